//! JSON bodies of the replication transport.

use crate::{store::RevsDiff, Document, DocumentId, Revision, Sequence};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Query string of `GET /{db}/_changes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesQuery {
    #[serde(default)]
    pub since: Sequence,
    pub limit: Option<usize>,
    /// Long-poll timeout in milliseconds
    pub timeout: Option<u64>,
}

/// One revision of one document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocRef {
    pub id: DocumentId,
    pub rev: Revision,
}

/// Entry of a `_revs_diff` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Missing {
    pub missing: Vec<Revision>,
}

/// `POST /{db}/_revs_diff` response body.
pub type RevsDiffResponse = BTreeMap<DocumentId, Missing>;

pub fn into_response(diff: RevsDiff) -> RevsDiffResponse {
    diff.into_iter()
        .map(|(id, missing)| (id, Missing { missing }))
        .collect()
}

pub fn from_response(response: RevsDiffResponse) -> RevsDiff {
    response
        .into_iter()
        .filter(|(_, m)| !m.missing.is_empty())
        .map(|(id, m)| (id, m.missing))
        .collect()
}

/// `POST /{db}/_bulk_get` request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkGetRequest {
    pub docs: Vec<DocRef>,
}

/// `POST /{db}/_bulk_get` response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkGetResponse {
    pub docs: Vec<Document>,
}

/// `POST /{db}/_bulk_docs` request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDocsRequest {
    pub docs: Vec<Document>,
    /// Replicated writes keep their revisions; only `false` is supported
    #[serde(default)]
    pub new_edits: bool,
}

/// `POST /{db}/_bulk_docs` response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDocsResponse {
    pub ok: bool,
    /// Revisions that changed the remote's leaves
    pub written: usize,
}

/// Error body returned by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn revs_diff_shape() {
        let mut diff = RevsDiff::new();
        diff.insert("emp-1".into(), vec![Revision::new(2, "b")]);

        let body = serde_json::to_value(into_response(diff.clone())).unwrap();
        assert_eq!(body, json!({"emp-1": {"missing": ["2-b"]}}));

        let parsed: RevsDiffResponse = serde_json::from_value(body).unwrap();
        assert_eq!(from_response(parsed), diff);
    }

    #[test]
    fn empty_missing_lists_are_dropped() {
        let response: RevsDiffResponse =
            serde_json::from_value(json!({"a": {"missing": []}})).unwrap();
        assert!(from_response(response).is_empty());
    }

    #[test]
    fn bulk_docs_defaults_to_replicated_writes() {
        let request: BulkDocsRequest = serde_json::from_value(json!({"docs": []})).unwrap();
        assert!(!request.new_edits);
    }
}
