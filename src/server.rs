//! HTTP server exposing the corpus.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Service name, endpoint list, indexed documents |
//! | `GET` | `/health` | Health check |
//! | `POST` | `/documents` | Upload and ingest one document (base64 body) |
//! | `DELETE` | `/documents/{filename}` | Remove a document |
//! | `POST` | `/ask` | Answer a question from the corpus |
//! | `POST` | `/reset` | Drop every document index |
//!
//! Errors share one envelope:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! CORS is permissive so browser front-ends on other origins can call the
//! API directly.

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use docfusion_core::ScoredPassage;

use crate::answer::AnswerStyle;
use crate::config::Config;
use crate::federation::{IndexFederation, IngestOutcome};

#[derive(Clone)]
struct AppState {
    federation: Arc<IndexFederation>,
    default_top_k: usize,
}

/// Build the router; split from [`run_server`] so tests can drive it
/// without binding a socket.
pub fn router(federation: Arc<IndexFederation>, default_top_k: usize) -> Router {
    let state = AppState {
        federation,
        default_top_k,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/documents", post(handle_upload))
        .route("/documents/{filename}", delete(handle_delete))
        .route("/ask", post(handle_ask))
        .route("/reset", post(handle_reset))
        .layer(cors)
        .with_state(state)
}

/// Serve until the process is stopped.
pub async fn run_server(config: &Config, federation: Arc<IndexFederation>) -> Result<()> {
    let app = router(federation, config.retrieval.default_top_k);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    println!("docfusion listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn unprocessable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNPROCESSABLE_ENTITY,
        code: "ingest_failed",
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    warn!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal_error",
        message: format!("{:#}", err),
    }
}

// ============ GET / and GET /health ============

#[derive(Serialize)]
struct RootResponse {
    service: &'static str,
    endpoints: Vec<&'static str>,
    documents: Vec<String>,
}

async fn handle_root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        service: "docfusion",
        endpoints: vec!["/documents", "/documents/{filename}", "/ask", "/reset", "/health"],
        documents: state.federation.list().await,
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST /documents ============

#[derive(Deserialize)]
struct UploadRequest {
    filename: String,
    content_base64: String,
}

#[derive(Serialize)]
struct UploadResponse {
    status: &'static str,
    #[serde(flatten)]
    outcome: IngestOutcome,
}

/// Only bare file names are accepted; anything with a path component is
/// rejected.
fn sanitize_filename(name: &str) -> Option<&str> {
    let base = std::path::Path::new(name).file_name()?.to_str()?;
    (base == name && !name.starts_with('.')).then_some(base)
}

async fn handle_upload(
    State(state): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, AppError> {
    let filename = sanitize_filename(&req.filename)
        .ok_or_else(|| bad_request(format!("invalid filename: {:?}", req.filename)))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(req.content_base64.as_bytes())
        .map_err(|e| bad_request(format!("content_base64 is not valid base64: {}", e)))?;

    let outcome = state
        .federation
        .ingest_bytes(filename, &bytes)
        .await
        .map_err(|e| unprocessable(format!("{:#}", e)))?;
    Ok(Json(UploadResponse {
        status: "ok",
        outcome,
    }))
}

// ============ DELETE /documents/{filename} ============

async fn handle_delete(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let outcome = state.federation.remove(&filename).await.map_err(internal)?;
    if !outcome.removed {
        return Err(not_found(format!("no document named {}", filename)));
    }
    Ok(Json(serde_json::json!({ "status": "ok", "removed": true })))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    top_k: Option<usize>,
    style: Option<String>,
    #[serde(default = "default_best_only")]
    best_only: bool,
}

fn default_best_only() -> bool {
    true
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunks: Option<Vec<ScoredPassage>>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let top_k = req.top_k.unwrap_or(state.default_top_k);
    if top_k == 0 {
        return Err(bad_request("top_k must be >= 1"));
    }
    let style = match req.style.as_deref() {
        Some(s) => s.parse::<AnswerStyle>().map_err(|e| bad_request(e.to_string()))?,
        None => AnswerStyle::default(),
    };

    let answer = state
        .federation
        .ask(&req.question, top_k, style)
        .await
        .map_err(internal)?;
    Ok(Json(AskResponse {
        answer: answer.answer,
        chunks: (!req.best_only).then_some(answer.chunks),
    }))
}

// ============ POST /reset ============

async fn handle_reset(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.federation.reset().await.map_err(internal)?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}
