//! Integration tests for the replication transport.
//!
//! The router runs over in-memory replicas, so no database is needed.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tandem_engine::store::{Edit, LocalStore};
use tandem_engine::{
    Direction, DocumentInput, Error, MemoryStore, Payload, RemoteEndpointConfig, SyncContext,
};
use tandem_server::config::Config;
use tandem_server::replicas::MemoryReplicas;
use tandem_server::{app, AppState};
use tower::ServiceExt;

fn router(config: Config) -> (Router, Arc<MemoryReplicas>) {
    let replicas = Arc::new(MemoryReplicas::new());
    let state = AppState::new(replicas.clone(), config);
    (app(state), replicas)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn payload(value: Value) -> Payload {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn health_check() {
    let (router, _) = router(Config::local());
    let (status, body) = send(&router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["time"].is_string());
}

#[tokio::test]
async fn replication_round_trip_over_http() {
    let (router, _) = router(Config::local());

    let origin = MemoryStore::new("origin");
    let doc = origin
        .put(Edit::create("emp-1", "employee", payload(json!({"name": "Ada"}))))
        .await
        .unwrap();
    let rev = doc.rev.to_string();

    // The replica does not know the revision yet.
    let (status, diff) = send(
        &router,
        post("/employees/_revs_diff", json!({"emp-1": [rev]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(diff["emp-1"]["missing"], json!([rev]));

    let (status, written) = send(
        &router,
        post(
            "/employees/_bulk_docs",
            json!({"docs": [serde_json::to_value(&doc).unwrap()], "newEdits": false}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(written["written"], 1);

    let (status, page) = send(&router, get("/employees/_changes?since=0&limit=10")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["results"][0]["id"], "emp-1");
    assert_eq!(page["results"][0]["revs"], json!([rev]));
    assert_eq!(page["pending"], 0);

    let (_, diff) = send(
        &router,
        post("/employees/_revs_diff", json!({"emp-1": [rev]})),
    )
    .await;
    assert_eq!(diff, json!({}));

    let (status, fetched) = send(
        &router,
        post("/employees/_bulk_get", json!({"docs": [{"id": "emp-1", "rev": rev}]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["docs"][0]["payload"]["name"], "Ada");

    let (status, current) = send(&router, get("/employees/emp-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(current["rev"], rev);

    let (status, body) = send(&router, get("/employees/emp-404")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn invalid_database_name_is_rejected() {
    let (router, _) = router(Config::local());
    let (status, _) = send(&router, get("/Employees/_changes")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn auth_secret_is_enforced() {
    let (router, _) = router(Config::local().with_auth_secret("s3cret"));

    let (status, body) = send(&router, get("/employees/_changes")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let wrong = Request::builder()
        .uri("/employees/_changes")
        .header(header::AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let right = Request::builder()
        .uri("/employees/_changes")
        .header(header::AUTHORIZATION, "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, right).await;
    assert_eq!(status, StatusCode::OK);

    // Health stays public.
    let (status, _) = send(&router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn longpoll_returns_write_made_while_waiting() {
    let (router, replicas) = router(Config::local());
    let store = replicas.store("employees");

    let writer = store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        writer
            .put(Edit::create("emp-9", "employee", Payload::new()))
            .await
            .unwrap();
    });

    let (status, page) = send(&router, get("/employees/_changes?since=0&timeout=5000")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["results"][0]["id"], "emp-9");
}

async fn serve(config: Config) -> (String, Arc<MemoryReplicas>) {
    let (router, replicas) = router(config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), replicas)
}

fn context(endpoint: RemoteEndpointConfig) -> SyncContext {
    SyncContext::builder()
        .database(Arc::new(MemoryStore::new("employees")))
        .endpoint(endpoint)
        .build()
        .unwrap()
}

#[tokio::test]
async fn engine_replicates_through_server() {
    let (url, replicas) = serve(Config::local()).await;

    let laptop = context(RemoteEndpointConfig::new(&url));
    laptop
        .repository()
        .create(
            "employees",
            DocumentInput::new("employee", payload(json!({"name": "Ada"}))).with_id("emp-1"),
        )
        .await
        .unwrap();

    let report = laptop
        .coordinator()
        .sync_once("employees", Direction::Push, None)
        .await
        .unwrap();
    assert_eq!(report.pushed, 1);
    assert!(replicas.store("employees").get("emp-1").await.unwrap().is_some());

    let phone = context(RemoteEndpointConfig::new(&url));
    let report = phone
        .coordinator()
        .sync_once("employees", Direction::Pull, None)
        .await
        .unwrap();
    assert_eq!(report.pulled, 1);
    let pulled = phone.repository().get_by_id("employees", "emp-1").await.unwrap();
    assert_eq!(pulled.payload["name"], "Ada");
}

#[tokio::test]
async fn wrong_token_is_denied() {
    let (url, _) = serve(Config::local().with_auth_secret("s3cret")).await;

    let client = context(RemoteEndpointConfig::new(&url).with_bearer("guess"));
    let result = client
        .coordinator()
        .sync_once("employees", Direction::Pull, None)
        .await;
    assert!(matches!(result, Err(Error::Denied(_))));

    let trusted = context(RemoteEndpointConfig::new(&url).with_bearer("s3cret"));
    let report = trusted
        .coordinator()
        .sync_once("employees", Direction::Both, None)
        .await
        .unwrap();
    assert_eq!(report.pulled, 0);
}
