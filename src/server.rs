//! HTTP boundary: `POST /api/suggest` over the [`CitationAnalyzer`].
//!
//! ```text
//! POST /api/suggest   {"text": "...", "image_base64": "..."}  → {"suggestion": "..."}
//! GET  /health                                                 → {"status": "ok"}
//! ```
//!
//! Every failure is a JSON `{"detail": "..."}` body: 400 for a request the
//! client can fix (unparseable JSON, bad base64, undecodable image), 500 for
//! anything else. The full error chain is logged server-side only.

use crate::config::CheckConfig;
use crate::error::SlideCiteError;
use crate::pipeline::encode;
use crate::pipeline::llm::CitationAnalyzer;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Listener and routing options.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// `["*"]` allows any origin.
    pub allowed_origins: Vec<String>,
    /// Served at `/` when set.
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            allowed_origins: vec!["*".to_string()],
            static_dir: None,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    analyzer: Arc<CitationAnalyzer>,
}

impl AppState {
    pub fn new(analyzer: CitationAnalyzer) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
        }
    }

    /// Resolve the reasoning engine once for the lifetime of the server.
    pub fn from_config(config: &CheckConfig) -> Result<Self, SlideCiteError> {
        let engine = crate::check::resolve_engine(config)?;
        Ok(Self::new(CitationAnalyzer::new(engine, config)))
    }
}

#[derive(Debug, Deserialize)]
pub struct SuggestRequest {
    #[serde(default)]
    pub text: String,
    pub image_base64: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuggestResponse {
    pub suggestion: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

/// Errors returned by handlers.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl From<SlideCiteError> for ApiError {
    fn from(err: SlideCiteError) -> Self {
        match err {
            SlideCiteError::InvalidImage { .. } => ApiError::BadRequest(err.to_string()),
            other => {
                error!("{}", error_chain(&other));
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            ApiError::Internal(detail) => (StatusCode::INTERNAL_SERVER_ERROR, detail),
        };
        (status, Json(ErrorBody { detail })).into_response()
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }
    out
}

async fn handle_suggest(
    State(state): State<AppState>,
    payload: Result<Json<SuggestRequest>, JsonRejection>,
) -> Result<Json<SuggestResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let image = encode::decode_base64_image(&request.image_base64)?;
    let analysis = state.analyzer.analyze(&request.text, &image).await?;
    Ok(Json(SuggestResponse {
        suggestion: analysis.result.into_string(),
    }))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(parsed))
}

/// Build the router.
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    let mut app = Router::new()
        .route("/health", get(handle_health))
        .route("/api/suggest", post(handle_suggest))
        .with_state(state);

    if let Some(ref dir) = config.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(cors_layer(&config.allowed_origins))
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until `shutdown` is cancelled.
pub async fn serve(
    state: AppState,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> Result<(), SlideCiteError> {
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| SlideCiteError::Internal(format!("cannot bind {}: {e}", config.bind)))?;
    info!("Listening on http://{}", config.bind);

    axum::serve(listener, router(state, config))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| SlideCiteError::Internal(format!("server error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_chain_includes_engine_cause() {
        let err = SlideCiteError::Analysis {
            source: crate::error::EngineError::Timeout { secs: 5 },
        };
        let chain = error_chain(&err);
        assert!(chain.contains("caused by: no response after 5s"), "got {chain}");
    }

    #[test]
    fn invalid_image_maps_to_bad_request() {
        let api: ApiError = SlideCiteError::InvalidImage {
            detail: "bad".into(),
        }
        .into();
        assert!(matches!(api, ApiError::BadRequest(_)));
        let resp = api.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn deck_errors_map_to_internal() {
        let api: ApiError = SlideCiteError::DeckOpen {
            path: "x.pptx".into(),
            detail: "file not found".into(),
        }
        .into();
        assert_eq!(api.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
