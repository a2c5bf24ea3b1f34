//! Database operations for the records table.

use satchel_engine::{Record, SyncCount};
use sqlx::{PgConnection, PgPool, Row};

/// A stored record row from the database.
#[derive(Debug)]
pub struct StoredRecord {
    pub key: String,
    pub value: Option<String>,
    pub sync_count: i64,
    pub last_modified_date: i64,
    pub last_modified_by: String,
    pub device_last_modified_date: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            key: row.try_get("key")?,
            value: row.try_get("value")?,
            sync_count: row.try_get("sync_count")?,
            last_modified_date: row.try_get("last_modified_date")?,
            last_modified_by: row.try_get("last_modified_by")?,
            device_last_modified_date: row.try_get("device_last_modified_date")?,
        })
    }
}

impl StoredRecord {
    /// Convert database row to a satchel-engine Record.
    pub fn into_record(self) -> Record {
        Record {
            key: self.key,
            value: self.value,
            sync_count: self.sync_count as u64,
            last_modified_date: self.last_modified_date as u64,
            last_modified_by: self.last_modified_by,
            device_last_modified_date: self.device_last_modified_date as u64,
            modified: false,
        }
    }
}

/// Records of a dataset written after `since`, in key order.
pub async fn list_records_since(
    pool: &PgPool,
    identity: &str,
    dataset: &str,
    since: SyncCount,
) -> Result<Vec<StoredRecord>, sqlx::Error> {
    sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT key, value, sync_count, last_modified_date, last_modified_by,
               device_last_modified_date
        FROM records
        WHERE identity_id = $1 AND dataset_name = $2 AND sync_count > $3
        ORDER BY key
        "#,
    )
    .bind(identity)
    .bind(dataset)
    .bind(since as i64)
    .fetch_all(pool)
    .await
}

/// Get the stored versions of the given keys.
pub async fn get_records(
    conn: &mut PgConnection,
    identity: &str,
    dataset: &str,
    keys: &[String],
) -> Result<Vec<StoredRecord>, sqlx::Error> {
    sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT key, value, sync_count, last_modified_date, last_modified_by,
               device_last_modified_date
        FROM records
        WHERE identity_id = $1 AND dataset_name = $2 AND key = ANY($3)
        "#,
    )
    .bind(identity)
    .bind(dataset)
    .bind(keys)
    .fetch_all(conn)
    .await
}

/// Upsert a record (insert or update).
pub async fn upsert_record(
    conn: &mut PgConnection,
    identity: &str,
    dataset: &str,
    record: &Record,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO records (
            identity_id, dataset_name, key, value, sync_count,
            last_modified_date, last_modified_by, device_last_modified_date
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (identity_id, dataset_name, key) DO UPDATE SET
            value = EXCLUDED.value,
            sync_count = EXCLUDED.sync_count,
            last_modified_date = EXCLUDED.last_modified_date,
            last_modified_by = EXCLUDED.last_modified_by,
            device_last_modified_date = EXCLUDED.device_last_modified_date
        "#,
    )
    .bind(identity)
    .bind(dataset)
    .bind(&record.key)
    .bind(&record.value)
    .bind(record.sync_count as i64)
    .bind(record.last_modified_date as i64)
    .bind(&record.last_modified_by)
    .bind(record.device_last_modified_date as i64)
    .execute(conn)
    .await?;

    Ok(())
}

/// Remove every record of a dataset.
pub async fn delete_records(
    conn: &mut PgConnection,
    identity: &str,
    dataset: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM records WHERE identity_id = $1 AND dataset_name = $2")
        .bind(identity)
        .bind(dataset)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}
