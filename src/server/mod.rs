//! HTTP API for the platform.
//!
//! JSON over HTTP under `/api/v1`. Every request carries the scope headers
//! `X-Scope-Org`, `X-Scope-Team`, `X-Scope-Repo`; handlers read them through
//! the [`ScopeHeaders`] extractor. Error bodies are plain text.

mod costs;
mod events;
mod memory;
mod policies;
mod runs;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::artifacts::ArtifactStore;
use crate::bus::EventBus;
use crate::cost::Governor;
use crate::errors::StoreError;
use crate::memory::MemoryService;
use crate::policy::Engine;
use crate::scope::Scope;
use crate::store::Store;

pub const SERVICE_NAME: &str = "flotilla";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub store: Store,
    pub bus: EventBus,
    pub governor: Governor,
    pub policy_engine: Engine,
    pub memory: MemoryService,
    pub artifacts: ArtifactStore,
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, message).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            StoreError::Conflict { .. } => ApiError::Conflict(err.to_string()),
            StoreError::InvalidArgument(_) => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

// ── Scope extraction ──────────────────────────────────────────────────

/// Extracts the `(org, team, repo)` scope from the request headers.
/// Missing headers mean "all" at that level.
pub struct ScopeHeaders(pub Scope);

#[async_trait::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ScopeHeaders {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        Ok(ScopeHeaders(Scope::new(
            header("x-scope-org"),
            header("x-scope-team"),
            header("x-scope-repo"),
        )))
    }
}

pub(crate) fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ApiError::BadRequest(format!("invalid RFC3339 timestamp {value:?}: {e}")))
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

// ── Router ────────────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok", "service": SERVICE_NAME}))
}

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/runs", get(runs::list).post(runs::create))
        .route("/api/v1/runs/:id", get(runs::get_by_id))
        .route(
            "/api/v1/memory/patterns",
            get(memory::list_patterns).post(memory::create_pattern),
        )
        .route(
            "/api/v1/memory/preferences",
            get(memory::get_preferences).put(memory::put_preferences),
        )
        .route("/api/v1/costs/summary", get(costs::summary))
        .route(
            "/api/v1/costs/budget",
            get(costs::get_budget).put(costs::put_budget),
        )
        .route(
            "/api/v1/policies",
            get(policies::get_policy).put(policies::put_policy),
        )
        .route("/api/v1/policies/effective", get(policies::effective))
        .route("/api/v1/events", get(events::query))
        .route("/api/v1/events/stream", get(events::stream))
}

/// The full application router with CORS for browser clients.
pub fn build_router(state: SharedState) -> Router {
    api_router().layer(CorsLayer::permissive()).with_state(state)
}

// ── Server ────────────────────────────────────────────────────────────

pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            data_dir: PathBuf::from(".flotilla"),
        }
    }
}

/// Build the shared state for a data directory: SQLite store, artifact
/// directory, bus, and the services wired over them.
pub async fn build_state(data_dir: &std::path::Path) -> anyhow::Result<SharedState> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .with_context(|| format!("create data dir {}", data_dir.display()))?;

    let store = Store::open(&data_dir.join("platform.db")).context("open platform store")?;
    let artifacts = ArtifactStore::new(data_dir.join("artifacts"))
        .await
        .context("open artifact store")?;
    let bus = EventBus::new(store.events());
    let governor = Governor::new(store.costs()).with_bus(bus.clone());
    let policy_engine = Engine::new(store.policies());
    let memory = MemoryService::new(store.memory());

    Ok(Arc::new(AppState {
        store,
        bus,
        governor,
        policy_engine,
        memory,
        artifacts,
    }))
}

/// Serve the HTTP API until the process is stopped.
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let state = build_state(&config.data_dir).await?;
    let router = build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("platform server listening on {}", listener.local_addr()?);

    axum::serve(listener, router).await.context("serve http")?;
    state.bus.close();
    Ok(())
}
