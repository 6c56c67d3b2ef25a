//! HTTP transport to a Tandem server.

use super::wire::{
    self, BulkDocsRequest, BulkGetRequest, BulkGetResponse, DocRef, ErrorBody, RevsDiffResponse,
};
use super::{Connector, Remote};
use crate::{
    config::{Credentials, RemoteEndpointConfig},
    error::Result,
    store::{ChangesPage, RevsDiff},
    DatabaseName, Document, Error, Sequence,
};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// A database on a Tandem server.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    database: DatabaseName,
    credentials: Option<Credentials>,
    timeout: Duration,
}

impl HttpRemote {
    pub fn new(database: impl Into<DatabaseName>, config: &RemoteEndpointConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .gzip(config.compression)
            .build()
            .map_err(|e| Error::Connectivity(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            database: database.into(),
            credentials: config.credentials.clone(),
            timeout: config.timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.database, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(Credentials::Bearer { token }) => request.bearer_auth(token),
            Some(Credentials::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            None => request,
        }
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let request = self.authorize(self.client.post(self.url(path)).json(body));
        let response = request.send().await.map_err(transport_error)?;
        decode(check(response).await?).await
    }
}

#[async_trait]
impl Remote for HttpRemote {
    async fn changes(
        &self,
        since: Sequence,
        limit: usize,
        wait: Option<Duration>,
    ) -> Result<ChangesPage> {
        let mut query = vec![("since", since.to_string()), ("limit", limit.to_string())];
        let mut request = self.client.get(self.url("_changes"));
        if let Some(wait) = wait {
            query.push(("timeout", wait.as_millis().to_string()));
            // The server may legitimately hold the request for `wait`.
            request = request.timeout(self.timeout + wait);
        }

        let request = self.authorize(request.query(&query));
        let response = request.send().await.map_err(transport_error)?;
        decode(check(response).await?).await
    }

    async fn revs_diff(&self, revs: RevsDiff) -> Result<RevsDiff> {
        if revs.is_empty() {
            return Ok(RevsDiff::new());
        }
        let response: RevsDiffResponse = self.post("_revs_diff", &revs).await?;
        Ok(wire::from_response(response))
    }

    async fn bulk_get(&self, docs: Vec<DocRef>) -> Result<Vec<Document>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let response: BulkGetResponse = self.post("_bulk_get", &BulkGetRequest { docs }).await?;
        Ok(response.docs)
    }

    async fn bulk_docs(&self, docs: Vec<Document>) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let count = docs.len();
        let request = BulkDocsRequest {
            docs,
            new_edits: false,
        };
        let response: wire::BulkDocsResponse = self.post("_bulk_docs", &request).await?;
        tracing::trace!(
            db = %self.database,
            sent = count,
            written = response.written,
            "Bulk docs accepted"
        );
        Ok(())
    }
}

/// Opens [`HttpRemote`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

impl Connector for HttpConnector {
    fn connect(&self, database: &str, config: &RemoteEndpointConfig) -> Result<Arc<dyn Remote>> {
        Ok(Arc::new(HttpRemote::new(database, config)?))
    }
}

/// Classify a failure to get any response at all.
fn transport_error(e: reqwest::Error) -> Error {
    if e.is_decode() {
        Error::Protocol(e.to_string())
    } else {
        Error::Connectivity(e.to_string())
    }
}

/// Map a non-2xx response onto the error taxonomy.
pub(crate) fn status_error(status: StatusCode, message: String) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Denied(message),
        s if s.is_server_error() => Error::Connectivity(format!("{status}: {message}")),
        _ => Error::Protocol(format!("{status}: {message}")),
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err(status_error(status, message))
}

async fn decode<R: DeserializeOwned>(response: Response) -> Result<R> {
    let bytes = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Protocol(format!("invalid response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, "bad token".into()),
            Error::Denied(m) if m == "bad token"
        ));
        assert!(status_error(StatusCode::FORBIDDEN, String::new()).is_denied());
        assert!(matches!(
            status_error(StatusCode::SERVICE_UNAVAILABLE, String::new()),
            Error::Connectivity(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, String::new()),
            Error::Protocol(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, String::new()),
            Error::Protocol(_)
        ));
    }

    #[test]
    fn urls_are_database_scoped() {
        let config = RemoteEndpointConfig::new("http://localhost:3000/");
        let remote = HttpRemote::new("employees", &config).unwrap();
        assert_eq!(
            remote.url("_changes"),
            "http://localhost:3000/employees/_changes"
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connectivity_error() {
        let mut config = RemoteEndpointConfig::new("http://127.0.0.1:9");
        config.timeout_ms = 500;
        let remote = HttpRemote::new("employees", &config).unwrap();

        let result = remote.changes(0, 10, None).await;
        assert!(matches!(result, Err(Error::Connectivity(_))));
    }
}
