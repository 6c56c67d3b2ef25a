//! Replication endpoint routes.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use tandem_engine::remote::wire::{
    BulkDocsRequest, BulkDocsResponse, BulkGetRequest, BulkGetResponse, ChangesQuery,
    RevsDiffResponse,
};
use tandem_engine::store::{ChangesPage, RevsDiff};
use tandem_engine::Document;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{
    handle_bulk_docs, handle_bulk_get, handle_changes, handle_get_document, handle_revs_diff,
};
use crate::AppState;

/// Create replication routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{db}/_changes", get(changes_handler))
        .route("/{db}/_revs_diff", post(revs_diff_handler))
        .route("/{db}/_bulk_get", post(bulk_get_handler))
        .route("/{db}/_bulk_docs", post(bulk_docs_handler))
        .route("/{db}/{id}", get(document_handler))
}

/// GET /{db}/_changes - Read the changes feed.
async fn changes_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(db): Path<String>,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<ChangesPage>> {
    let store = state.replicas.open(&db).await?;
    let page = handle_changes(&*store, query, &state.config).await?;
    Ok(Json(page))
}

/// POST /{db}/_revs_diff - Report missing revisions.
async fn revs_diff_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(db): Path<String>,
    Json(revs): Json<RevsDiff>,
) -> Result<Json<RevsDiffResponse>> {
    let store = state.replicas.open(&db).await?;
    let response = handle_revs_diff(&*store, revs).await?;
    Ok(Json(response))
}

/// POST /{db}/_bulk_get - Fetch specific revisions.
async fn bulk_get_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(db): Path<String>,
    Json(request): Json<BulkGetRequest>,
) -> Result<Json<BulkGetResponse>> {
    let store = state.replicas.open(&db).await?;
    let response = handle_bulk_get(&*store, request).await?;
    Ok(Json(response))
}

/// POST /{db}/_bulk_docs - Store replicated revisions.
async fn bulk_docs_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(db): Path<String>,
    Json(request): Json<BulkDocsRequest>,
) -> Result<Json<BulkDocsResponse>> {
    let store = state.replicas.open(&db).await?;
    let response = handle_bulk_docs(&*store, request).await?;
    Ok(Json(response))
}

/// GET /{db}/{id} - Current revision of a document.
async fn document_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((db, id)): Path<(String, String)>,
) -> Result<Json<Document>> {
    let store = state.replicas.open(&db).await?;
    let doc = handle_get_document(&*store, &id).await?;
    Ok(Json(doc))
}
