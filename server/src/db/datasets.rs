//! Database operations for the datasets table.

use satchel_engine::{DatasetAuthority, DatasetMetadata, DatasetStatus, Record};
use sqlx::{PgConnection, PgPool, Row};

/// A stored dataset row from the database.
#[derive(Debug)]
pub struct StoredDataset {
    pub dataset_name: String,
    pub sync_count: i64,
    pub creation_date: i64,
    pub last_modified_date: i64,
    pub last_modified_by: String,
    pub status: DatasetStatus,
    pub deleted_sync_count: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredDataset {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let status = DatasetStatus::parse(&status).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: format!("unknown dataset status '{}'", status).into(),
        })?;

        Ok(StoredDataset {
            dataset_name: row.try_get("dataset_name")?,
            sync_count: row.try_get("sync_count")?,
            creation_date: row.try_get("creation_date")?,
            last_modified_date: row.try_get("last_modified_date")?,
            last_modified_by: row.try_get("last_modified_by")?,
            status,
            deleted_sync_count: row.try_get("deleted_sync_count")?,
        })
    }
}

impl StoredDataset {
    /// Build the authority state from this row and the records it needs.
    pub fn into_authority(self, records: impl IntoIterator<Item = Record>) -> DatasetAuthority {
        let mut authority = DatasetAuthority::new(self.dataset_name, self.creation_date as u64);
        authority.sync_count = self.sync_count as u64;
        authority.last_modified_date = self.last_modified_date as u64;
        authority.last_modified_by = self.last_modified_by;
        authority.status = self.status;
        authority.deleted_sync_count = self.deleted_sync_count as u64;
        authority.records = records.into_iter().map(|r| (r.key.clone(), r)).collect();
        authority
    }
}

/// A dataset row with record statistics, as listed to clients.
#[derive(Debug)]
pub struct DatasetSummary {
    pub dataset: StoredDataset,
    pub record_count: i64,
    pub storage_size_bytes: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for DatasetSummary {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(DatasetSummary {
            dataset: StoredDataset::from_row(row)?,
            record_count: row.try_get("record_count")?,
            storage_size_bytes: row.try_get("storage_size_bytes")?,
        })
    }
}

impl DatasetSummary {
    /// Convert to the metadata reported to clients.
    pub fn to_metadata(&self) -> DatasetMetadata {
        let sync_count = self.dataset.sync_count as u64;
        DatasetMetadata {
            name: self.dataset.dataset_name.clone(),
            creation_date: self.dataset.creation_date as u64,
            last_modified_date: self.dataset.last_modified_date as u64,
            last_modified_by: self.dataset.last_modified_by.clone(),
            storage_size_bytes: self.storage_size_bytes as u64,
            record_count: self.record_count as u64,
            sync_count,
            last_sync_count: sync_count,
            status: self.dataset.status,
        }
    }
}

/// List every dataset of an identity, tombstones included.
pub async fn list_datasets(
    pool: &PgPool,
    identity: &str,
) -> Result<Vec<DatasetSummary>, sqlx::Error> {
    sqlx::query_as::<_, DatasetSummary>(
        r#"
        SELECT d.dataset_name, d.sync_count, d.creation_date, d.last_modified_date,
               d.last_modified_by, d.status, d.deleted_sync_count,
               COUNT(r.key) FILTER (WHERE r.value IS NOT NULL) AS record_count,
               COALESCE(SUM(octet_length(r.key) + octet_length(r.value)), 0)::BIGINT
                   AS storage_size_bytes
        FROM datasets d
        LEFT JOIN records r
            ON r.identity_id = d.identity_id AND r.dataset_name = d.dataset_name
        WHERE d.identity_id = $1
        GROUP BY d.identity_id, d.dataset_name
        ORDER BY d.dataset_name
        "#,
    )
    .bind(identity)
    .fetch_all(pool)
    .await
}

/// Get a dataset row without locking it.
pub async fn get_dataset(
    pool: &PgPool,
    identity: &str,
    dataset: &str,
) -> Result<Option<StoredDataset>, sqlx::Error> {
    sqlx::query_as::<_, StoredDataset>(
        r#"
        SELECT dataset_name, sync_count, creation_date, last_modified_date,
               last_modified_by, status, deleted_sync_count
        FROM datasets
        WHERE identity_id = $1 AND dataset_name = $2
        "#,
    )
    .bind(identity)
    .bind(dataset)
    .fetch_optional(pool)
    .await
}

/// Create an empty dataset row unless one exists.
pub async fn ensure_dataset(
    conn: &mut PgConnection,
    identity: &str,
    dataset: &str,
    now: u64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO datasets (identity_id, dataset_name, creation_date, last_modified_date)
        VALUES ($1, $2, $3, $3)
        ON CONFLICT (identity_id, dataset_name) DO NOTHING
        "#,
    )
    .bind(identity)
    .bind(dataset)
    .bind(now as i64)
    .execute(conn)
    .await?;

    Ok(())
}

/// Get a dataset row and lock it until the transaction ends.
///
/// Pushes to one dataset are serialized through this lock, which keeps
/// the counter bump of each accepted batch atomic.
pub async fn lock_dataset(
    conn: &mut PgConnection,
    identity: &str,
    dataset: &str,
) -> Result<Option<StoredDataset>, sqlx::Error> {
    sqlx::query_as::<_, StoredDataset>(
        r#"
        SELECT dataset_name, sync_count, creation_date, last_modified_date,
               last_modified_by, status, deleted_sync_count
        FROM datasets
        WHERE identity_id = $1 AND dataset_name = $2
        FOR UPDATE
        "#,
    )
    .bind(identity)
    .bind(dataset)
    .fetch_optional(conn)
    .await
}

/// Write back the counter and bookkeeping columns of a dataset.
pub async fn save_dataset(
    conn: &mut PgConnection,
    identity: &str,
    authority: &DatasetAuthority,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE datasets SET
            sync_count = $3,
            last_modified_date = $4,
            last_modified_by = $5,
            status = $6,
            deleted_sync_count = $7
        WHERE identity_id = $1 AND dataset_name = $2
        "#,
    )
    .bind(identity)
    .bind(&authority.name)
    .bind(authority.sync_count as i64)
    .bind(authority.last_modified_date as i64)
    .bind(&authority.last_modified_by)
    .bind(authority.status.as_str())
    .bind(authority.deleted_sync_count as i64)
    .execute(conn)
    .await?;

    Ok(())
}
