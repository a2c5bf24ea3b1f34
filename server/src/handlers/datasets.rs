//! Dataset handlers - metadata listing and deletion.

use crate::db;
use crate::error::Result;
use satchel_engine::validate::validate_dataset_name;
use satchel_engine::{now_millis, DatasetMetadata};
use sqlx::PgPool;

/// List the metadata of every dataset of an identity.
pub async fn handle_list_datasets(pool: &PgPool, identity: &str) -> Result<Vec<DatasetMetadata>> {
    let summaries = db::list_datasets(pool, identity).await?;
    Ok(summaries.iter().map(db::DatasetSummary::to_metadata).collect())
}

/// Delete a dataset, leaving a tombstone with a bumped counter.
///
/// Deleting a dataset that was never pushed is a no-op.
pub async fn handle_delete(pool: &PgPool, identity: &str, dataset: &str) -> Result<()> {
    validate_dataset_name(dataset)?;

    let mut tx = pool.begin().await?;
    let Some(stored) = db::lock_dataset(&mut tx, identity, dataset).await? else {
        return Ok(());
    };

    let mut authority = stored.into_authority(Vec::new());
    authority.delete(now_millis());

    let removed = db::delete_records(&mut tx, identity, dataset).await?;
    db::save_dataset(&mut tx, identity, &authority).await?;
    tx.commit().await?;

    tracing::info!(identity, dataset, removed, "dataset deleted");
    Ok(())
}
