//! SQLite-backed local store.
//!
//! Every public call runs in its own transaction, so a mutation is on disk
//! before the call returns.

use super::{remote_metadata_action, DatasetState, LocalStore, RemoteMetadataAction, SyncCommit};
use crate::{
    error::Result, now_millis, validate::validate_dataset_name, DatasetMetadata, DatasetName,
    DatasetStatus, Error, Record, RecordKey,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS datasets (
    identity_id TEXT NOT NULL,
    dataset_name TEXT NOT NULL,
    creation_date INTEGER NOT NULL,
    last_modified_date INTEGER NOT NULL,
    last_modified_by TEXT NOT NULL,
    storage_size_bytes INTEGER NOT NULL DEFAULT 0,
    record_count INTEGER NOT NULL DEFAULT 0,
    sync_count INTEGER NOT NULL DEFAULT 0,
    last_sync_count INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'active',
    PRIMARY KEY (identity_id, dataset_name)
);

CREATE TABLE IF NOT EXISTS records (
    identity_id TEXT NOT NULL,
    dataset_name TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT,
    sync_count INTEGER NOT NULL,
    last_modified_date INTEGER NOT NULL,
    last_modified_by TEXT NOT NULL,
    device_last_modified_date INTEGER NOT NULL,
    modified INTEGER NOT NULL,
    PRIMARY KEY (identity_id, dataset_name, key)
);
";

const METADATA_COLUMNS: &str = "dataset_name, creation_date, last_modified_date, last_modified_by,
    storage_size_bytes, record_count, sync_count, last_sync_count, status";

const RECORD_COLUMNS: &str = "key, value, sync_count, last_modified_date, last_modified_by,
    device_last_modified_date, modified";

/// Local store persisted in a SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Creates an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside a transaction and commit it.
    fn transact<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

fn metadata_from_row(row: &Row<'_>) -> rusqlite::Result<DatasetMetadata> {
    let status: String = row.get(8)?;
    let status = DatasetStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(8, "status".into(), rusqlite::types::Type::Text)
    })?;
    Ok(DatasetMetadata {
        name: row.get(0)?,
        creation_date: row.get::<_, i64>(1)? as u64,
        last_modified_date: row.get::<_, i64>(2)? as u64,
        last_modified_by: row.get(3)?,
        storage_size_bytes: row.get::<_, i64>(4)? as u64,
        record_count: row.get::<_, i64>(5)? as u64,
        sync_count: row.get::<_, i64>(6)? as u64,
        last_sync_count: row.get::<_, i64>(7)? as u64,
        status,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    Ok(Record {
        key: row.get(0)?,
        value: row.get(1)?,
        sync_count: row.get::<_, i64>(2)? as u64,
        last_modified_date: row.get::<_, i64>(3)? as u64,
        last_modified_by: row.get(4)?,
        device_last_modified_date: row.get::<_, i64>(5)? as u64,
        modified: row.get(6)?,
    })
}

fn load_metadata(
    conn: &Connection,
    identity: &str,
    dataset: &str,
) -> Result<Option<DatasetMetadata>> {
    let sql = format!(
        "SELECT {} FROM datasets WHERE identity_id = ?1 AND dataset_name = ?2",
        METADATA_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![identity, dataset], metadata_from_row)
        .optional()?)
}

fn load_all_metadata(conn: &Connection, identity: &str) -> Result<Vec<DatasetMetadata>> {
    let sql = format!(
        "SELECT {} FROM datasets WHERE identity_id = ?1 ORDER BY dataset_name",
        METADATA_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![identity], metadata_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn load_records(
    conn: &Connection,
    identity: &str,
    dataset: &str,
) -> Result<BTreeMap<RecordKey, Record>> {
    let sql = format!(
        "SELECT {} FROM records WHERE identity_id = ?1 AND dataset_name = ?2",
        RECORD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![identity, dataset], record_from_row)?;
    let mut records = BTreeMap::new();
    for row in rows {
        let record = row?;
        records.insert(record.key.clone(), record);
    }
    Ok(records)
}

fn load_state(conn: &Connection, identity: &str, dataset: &str) -> Result<Option<DatasetState>> {
    let Some(metadata) = load_metadata(conn, identity, dataset)? else {
        return Ok(None);
    };
    Ok(Some(DatasetState {
        metadata,
        records: load_records(conn, identity, dataset)?,
    }))
}

fn require_state(conn: &Connection, identity: &str, dataset: &str) -> Result<DatasetState> {
    load_state(conn, identity, dataset)?.ok_or_else(|| Error::DatasetNotFound(dataset.to_string()))
}

fn save_metadata(conn: &Connection, identity: &str, metadata: &DatasetMetadata) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO datasets
         (identity_id, dataset_name, creation_date, last_modified_date, last_modified_by,
          storage_size_bytes, record_count, sync_count, last_sync_count, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            identity,
            metadata.name,
            metadata.creation_date as i64,
            metadata.last_modified_date as i64,
            metadata.last_modified_by,
            metadata.storage_size_bytes as i64,
            metadata.record_count as i64,
            metadata.sync_count as i64,
            metadata.last_sync_count as i64,
            metadata.status.as_str(),
        ],
    )?;
    Ok(())
}

fn save_record(conn: &Connection, identity: &str, dataset: &str, record: &Record) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO records
         (identity_id, dataset_name, key, value, sync_count, last_modified_date,
          last_modified_by, device_last_modified_date, modified)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            identity,
            dataset,
            record.key,
            record.value,
            record.sync_count as i64,
            record.last_modified_date as i64,
            record.last_modified_by,
            record.device_last_modified_date as i64,
            record.modified,
        ],
    )?;
    Ok(())
}

fn delete_dataset_rows(conn: &Connection, identity: &str, dataset: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM records WHERE identity_id = ?1 AND dataset_name = ?2",
        params![identity, dataset],
    )?;
    conn.execute(
        "DELETE FROM datasets WHERE identity_id = ?1 AND dataset_name = ?2",
        params![identity, dataset],
    )?;
    Ok(())
}

fn save_state(conn: &Connection, identity: &str, state: &DatasetState) -> Result<()> {
    delete_dataset_rows(conn, identity, &state.metadata.name)?;
    save_metadata(conn, identity, &state.metadata)?;
    for record in state.records.values() {
        save_record(conn, identity, &state.metadata.name, record)?;
    }
    Ok(())
}

impl LocalStore for SqliteStore {
    fn create_dataset(&self, identity: &str, dataset: &str) -> Result<DatasetMetadata> {
        validate_dataset_name(dataset)?;
        self.transact(|conn| {
            let metadata = match load_metadata(conn, identity, dataset)? {
                Some(existing) if !existing.is_deleted() => return Ok(existing),
                Some(mut deleted) => {
                    deleted.status = DatasetStatus::Active;
                    deleted
                }
                None => DatasetMetadata::new(dataset, now_millis()),
            };
            save_metadata(conn, identity, &metadata)?;
            Ok(metadata)
        })
    }

    fn get_dataset_metadata(&self, identity: &str) -> Result<Vec<DatasetMetadata>> {
        load_all_metadata(&self.conn.lock(), identity)
    }

    fn get_metadata(&self, identity: &str, dataset: &str) -> Result<Option<DatasetMetadata>> {
        load_metadata(&self.conn.lock(), identity, dataset)
    }

    fn get_records(&self, identity: &str, dataset: &str) -> Result<BTreeMap<RecordKey, Record>> {
        load_records(&self.conn.lock(), identity, dataset)
    }

    fn get_record(&self, identity: &str, dataset: &str, key: &str) -> Result<Option<Record>> {
        let sql = format!(
            "SELECT {} FROM records WHERE identity_id = ?1 AND dataset_name = ?2 AND key = ?3",
            RECORD_COLUMNS
        );
        Ok(self
            .conn
            .lock()
            .query_row(&sql, params![identity, dataset, key], record_from_row)
            .optional()?)
    }

    fn put_record(&self, identity: &str, dataset: &str, record: Record) -> Result<()> {
        self.transact(|conn| {
            let mut state = require_state(conn, identity, dataset)?;
            let key = record.key.clone();
            state.put_local(record);
            if let Some(stored) = state.records.get(&key) {
                save_record(conn, identity, dataset, stored)?;
            }
            save_metadata(conn, identity, &state.metadata)
        })
    }

    fn commit_sync(&self, identity: &str, dataset: &str, commit: SyncCommit) -> Result<()> {
        self.transact(|conn| {
            let mut state = require_state(conn, identity, dataset)?;
            let keys: Vec<RecordKey> = commit.records.iter().map(|e| e.record.key.clone()).collect();
            state.commit(commit);
            for key in &keys {
                if let Some(record) = state.records.get(key) {
                    save_record(conn, identity, dataset, record)?;
                }
            }
            save_metadata(conn, identity, &state.metadata)
        })
    }

    fn update_dataset_metadata(
        &self,
        identity: &str,
        metadata: Vec<DatasetMetadata>,
    ) -> Result<Vec<DatasetName>> {
        self.transact(|conn| {
            let mut conflicts = Vec::new();
            for remote in metadata {
                let local = load_state(conn, identity, &remote.name)?;
                match remote_metadata_action(local.as_ref(), &remote) {
                    RemoteMetadataAction::Skip => {}
                    RemoteMetadataAction::Purge => delete_dataset_rows(conn, identity, &remote.name)?,
                    RemoteMetadataAction::Conflict => conflicts.push(remote.name.clone()),
                    RemoteMetadataAction::Apply => {
                        let mut state = local.unwrap_or_else(|| {
                            DatasetState::new(&remote.name, remote.creation_date)
                        });
                        state.apply_remote_metadata(&remote);
                        save_metadata(conn, identity, &state.metadata)?;
                    }
                }
            }
            Ok(conflicts)
        })
    }

    fn mark_dataset_deleted(&self, identity: &str, dataset: &str, device_id: &str) -> Result<()> {
        self.transact(|conn| {
            let mut state = require_state(conn, identity, dataset)?;
            state.mark_deleted(device_id, now_millis());
            save_state(conn, identity, &state)
        })
    }

    fn purge_dataset(&self, identity: &str, dataset: &str) -> Result<()> {
        self.transact(|conn| delete_dataset_rows(conn, identity, dataset))
    }

    fn change_identity_id(&self, old: &str, new: &str) -> Result<()> {
        self.transact(|conn| {
            for metadata in load_all_metadata(conn, old)? {
                let moved = require_state(conn, old, &metadata.name)?;
                let merged = match load_state(conn, new, &metadata.name)? {
                    Some(mut target) => {
                        target.absorb(moved);
                        target
                    }
                    None => moved,
                };
                delete_dataset_rows(conn, old, &metadata.name)?;
                save_state(conn, new, &merged)?;
            }
            Ok(())
        })
    }

    fn wipe_data(&self) -> Result<()> {
        self.transact(|conn| {
            conn.execute_batch("DELETE FROM records; DELETE FROM datasets;")?;
            Ok(())
        })
    }
}
