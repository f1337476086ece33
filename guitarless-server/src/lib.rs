//! guitarless-server library interface
//!
//! Exposes the router, state, and pipeline services for the binary and for
//! integration tests.

pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult, PipelineError};

use axum::http::{HeaderValue, Method};
use axum::Router;
use chrono::{DateTime, Utc};
use guitarless_common::Broadcaster;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::{PipelinePaths, ServerConfig};
use crate::services::{DemucsSeparator, OrchestratorSettings, PipelineOrchestrator, YtDlpFetcher};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Progress line broadcaster (same instance the orchestrator publishes on)
    pub broadcaster: Broadcaster,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub config: Arc<ServerConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last job failure for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>, config: ServerConfig) -> Self {
        Self {
            broadcaster: orchestrator.broadcaster().clone(),
            orchestrator,
            config: Arc::new(config),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Wire the production adapters (yt-dlp, demucs) into an orchestrator
pub fn build_orchestrator(
    config: &ServerConfig,
    paths: PipelinePaths,
    broadcaster: Broadcaster,
) -> PipelineOrchestrator {
    let fetcher = YtDlpFetcher::new(
        config.tools.yt_dlp_binary.clone(),
        config.tools.user_agent.clone(),
    );
    let separator = DemucsSeparator::new(
        config.tools.python_binary.clone(),
        config.tools.separation_model.clone(),
        paths.separated.clone(),
    );
    let settings = OrchestratorSettings::new(paths, config.max_duration())
        .with_public_base_url(config.public_base_url.clone());

    PipelineOrchestrator::new(Arc::new(fetcher), Arc::new(separator), broadcaster, settings)
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let output_dir = state.orchestrator.settings().paths.output.clone();
    let cors = cors_layer(&state.config.cors_allowed_origins);

    let router = Router::new()
        .merge(api::process_routes(state.config.max_upload_bytes))
        .merge(api::progress_routes())
        .merge(api::health_routes())
        .nest_service("/output", ServeDir::new(output_dir))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// CORS layer for the configured origins; `None` when the list is empty
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(allowed)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any),
    )
}
