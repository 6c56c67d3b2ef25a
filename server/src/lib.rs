//! Tandem Server - remote replica for Tandem document replication.
//!
//! Serves the revision-addressed replication transport the engine's HTTP
//! remote speaks: a changes feed with optional long-polling, a revision diff,
//! and bulk reads and writes that keep revision tokens unchanged. Each
//! database name maps to one replica store; Postgres in production, memory
//! in tests.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod replicas;
pub mod routes;

use crate::config::Config;
use crate::replicas::Replicas;
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub replicas: Arc<dyn Replicas>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(replicas: Arc<dyn Replicas>, config: Config) -> Self {
        Self {
            replicas,
            config: Arc::new(config),
        }
    }
}

/// Build the router with its middleware stack.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}
