//! Revision diff, bulk reads and bulk writes.

use tandem_engine::remote::wire::{
    self, BulkDocsRequest, BulkDocsResponse, BulkGetRequest, BulkGetResponse, RevsDiffResponse,
};
use tandem_engine::store::RevsDiff;
use tandem_engine::{Document, LocalStore};

use crate::error::{AppError, Result};

/// Report which of the offered revisions this replica lacks.
pub async fn handle_revs_diff(store: &dyn LocalStore, revs: RevsDiff) -> Result<RevsDiffResponse> {
    let offered = revs.len();
    let missing = store.revs_diff(revs).await?;
    tracing::debug!(
        db = %store.name(),
        offered,
        missing = missing.len(),
        "Revision diff"
    );
    Ok(wire::into_response(missing))
}

/// Fetch specific revisions. Unknown revisions are left out of the response.
pub async fn handle_bulk_get(
    store: &dyn LocalStore,
    request: BulkGetRequest,
) -> Result<BulkGetResponse> {
    let mut docs = Vec::with_capacity(request.docs.len());
    for doc_ref in request.docs {
        match store.get_revision(&doc_ref.id, &doc_ref.rev).await? {
            Some(doc) => docs.push(doc),
            None => {
                tracing::debug!(db = %store.name(), id = %doc_ref.id, rev = %doc_ref.rev, "Requested revision not found");
            }
        }
    }
    Ok(BulkGetResponse { docs })
}

/// Store replicated revisions as they are.
pub async fn handle_bulk_docs(
    store: &dyn LocalStore,
    request: BulkDocsRequest,
) -> Result<BulkDocsResponse> {
    if request.new_edits {
        return Err(AppError::BadRequest(
            "only replicated writes (newEdits: false) are accepted".to_string(),
        ));
    }
    if request.docs.is_empty() {
        return Ok(BulkDocsResponse {
            ok: true,
            written: 0,
        });
    }

    let received = request.docs.len();
    let written = store.insert_replicated(request.docs).await?;
    tracing::info!(db = %store.name(), received, written, "Stored replicated revisions");

    Ok(BulkDocsResponse { ok: true, written })
}

/// Current revision of a live document.
pub async fn handle_get_document(store: &dyn LocalStore, id: &str) -> Result<Document> {
    store
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document '{id}' not found")))
}
