//! Record handlers - pull and push.

use crate::db;
use crate::error::{AppError, Result};
use satchel_engine::remote::{PushRequest, PushResponse, PushStatus, RecordPage};
use satchel_engine::validate::{validate_dataset_name, validate_record_key};
use satchel_engine::{now_millis, SyncCount};
use sqlx::PgPool;

/// Serve the records of a dataset changed after `since`.
///
/// An unknown dataset is an empty page at counter zero.
pub async fn handle_pull(
    pool: &PgPool,
    identity: &str,
    dataset: &str,
    since: SyncCount,
) -> Result<RecordPage> {
    validate_dataset_name(dataset)?;

    // Read the counter before the records: a push landing in between then
    // shows up again on the next pull instead of being skipped.
    let Some(stored) = db::get_dataset(pool, identity, dataset).await? else {
        return Ok(RecordPage::default());
    };
    let records = db::list_records_since(pool, identity, dataset, since).await?;
    let authority = stored.into_authority(records.into_iter().map(db::StoredRecord::into_record));

    Ok(authority.list_since(since))
}

/// Apply a push batch to a dataset, creating it if needed.
pub async fn handle_push(
    pool: &PgPool,
    identity: &str,
    dataset: &str,
    request: PushRequest,
) -> Result<PushResponse> {
    validate_dataset_name(dataset)?;
    if request.device_id.is_empty() {
        return Err(AppError::BadRequest("deviceId must not be empty".to_string()));
    }
    let keys = request
        .records
        .iter()
        .map(|push| {
            validate_record_key(&push.record.key)?;
            Ok(push.record.key.clone())
        })
        .collect::<Result<Vec<String>>>()?;

    let now = now_millis();
    let mut tx = pool.begin().await?;
    db::ensure_dataset(&mut tx, identity, dataset, now).await?;
    let stored = db::lock_dataset(&mut tx, identity, dataset)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;

    let current = db::get_records(&mut tx, identity, dataset, &keys).await?;
    let mut authority = stored.into_authority(current.into_iter().map(db::StoredRecord::into_record));
    let response = authority.apply_push(request.records, &request.device_id, now);

    let mut accepted = 0usize;
    for outcome in &response.outcomes {
        if let PushStatus::Accepted { .. } = outcome.status {
            if let Some(record) = authority.records.get(&outcome.key) {
                db::upsert_record(&mut tx, identity, dataset, record).await?;
                accepted += 1;
            }
        }
    }
    db::save_dataset(&mut tx, identity, &authority).await?;
    tx.commit().await?;

    tracing::debug!(
        identity,
        dataset,
        device_id = %request.device_id,
        pushed = response.outcomes.len(),
        accepted,
        sync_count = response.sync_count,
        "push applied"
    );
    Ok(response)
}
