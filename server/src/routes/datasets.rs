//! Dataset endpoint routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use satchel_engine::remote::{ListQuery, PushRequest, PushResponse, RecordPage};
use satchel_engine::DatasetMetadata;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{handle_delete, handle_list_datasets, handle_pull, handle_push};
use crate::AppState;

/// Create dataset routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/identities/{identity}/datasets", get(list_handler))
        .route("/identities/{identity}/datasets/{name}", delete(delete_handler))
        .route(
            "/identities/{identity}/datasets/{name}/records",
            get(pull_handler).post(push_handler),
        )
}

/// GET /identities/{identity}/datasets - List dataset metadata.
async fn list_handler(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(identity): Path<String>,
) -> Result<Json<Vec<DatasetMetadata>>> {
    let datasets = handle_list_datasets(&state.pool, &identity).await?;
    Ok(Json(datasets))
}

/// GET /identities/{identity}/datasets/{name}/records - Pull changed records.
async fn pull_handler(
    State(state): State<AppState>,
    _user: AuthUser,
    Path((identity, name)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
) -> Result<Json<RecordPage>> {
    let page = handle_pull(&state.pool, &identity, &name, query.since).await?;
    Ok(Json(page))
}

/// POST /identities/{identity}/datasets/{name}/records - Push records.
async fn push_handler(
    State(state): State<AppState>,
    _user: AuthUser,
    Path((identity, name)): Path<(String, String)>,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>> {
    let response = handle_push(&state.pool, &identity, &name, request).await?;
    Ok(Json(response))
}

/// DELETE /identities/{identity}/datasets/{name} - Delete a dataset.
async fn delete_handler(
    State(state): State<AppState>,
    _user: AuthUser,
    Path((identity, name)): Path<(String, String)>,
) -> Result<StatusCode> {
    handle_delete(&state.pool, &identity, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}
