//! HTTP server.
//!
//! Exposes the pipeline as a small JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer a question (rate limited) |
//! | `POST` | `/validate` | Sanitize and validate a query without running it (rate limited) |
//! | `GET`  | `/sources` | Catalog sources and their configured backends |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Rejections by the pipeline (unsafe query, low confidence, backend down,
//! ...) are normal `200` answers with an `error` field. Only transport-level
//! problems use an error status, with this body:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must be a non-empty string" } }
//! ```
//!
//! Error codes: `bad_request` (400), `rate_limited` (429, with `Retry-After`).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser chat clients
//! can call the API directly.

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::Instrument;

use crate::config::Config;
use crate::pipeline::{check_query, ChatRequest, Pipeline, PipelineOutcome, QueryCheck};
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::sources::{list_sources, SourceSummary};

/// Header carrying a client id, honored for rate limiting only when
/// `[rate_limit] trust_client_id_header` is set.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    limiter: Option<Arc<RateLimiter>>,
    trust_client_id: bool,
}

/// Build the pipeline from `config` and serve it on `[server].bind`.
///
/// Runs until the process is terminated. Returns an error if the pipeline
/// cannot be assembled or the address cannot be bound.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config)?);
    run_server_with_pipeline(config, pipeline).await
}

/// Serve an already assembled pipeline.
///
/// Lets embedders and tests plug in their own translator and backends;
/// `[server]` and `[rate_limit]` are still taken from `config`.
pub async fn run_server_with_pipeline(config: &Config, pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let limiter = RateLimiter::from_config(&config.rate_limit).map(Arc::new);

    tracing::info!(
        translator = pipeline.translator_name(),
        sources = pipeline.catalog().describe().len(),
        backends = pipeline.dispatcher().len(),
        rate_limited = limiter.is_some(),
        "starting server"
    );

    let app = router(AppState {
        pipeline,
        limiter,
        trust_client_id: config.rate_limit.trust_client_id_header,
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("askdata listening on http://{}", bind_addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let limited = Router::new()
        .route("/chat", post(handle_chat))
        .route("/validate", post(handle_validate))
        .route_layer(middleware::from_fn_with_state(state.clone(), enforce_rate_limit));

    Router::new()
        .merge(limited)
        .route("/sources", get(handle_sources))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"rate_limited"`).
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    retry_after_secs: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
        retry_after_secs: None,
    }
}

fn rate_limited(retry_after_secs: u64) -> AppError {
    AppError {
        status: StatusCode::TOO_MANY_REQUESTS,
        code: "rate_limited".to_string(),
        message: format!(
            "too many requests, retry in {} seconds",
            retry_after_secs
        ),
        retry_after_secs: Some(retry_after_secs),
    }
}

// ============ Rate limiting ============

/// The peer IP, or `x-client-id` when trusted, present and non-empty.
fn client_key(headers: &HeaderMap, peer: SocketAddr, trust_client_id: bool) -> String {
    if !trust_client_id {
        return format!("ip:{}", peer.ip());
    }
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| format!("id:{}", v))
        .unwrap_or_else(|| format!("ip:{}", peer.ip()))
}

async fn enforce_rate_limit(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(limiter) = &state.limiter else {
        return Ok(next.run(request).await);
    };

    let key = client_key(request.headers(), peer, state.trust_client_id);
    match limiter.check(&key) {
        RateDecision::Allowed { .. } => Ok(next.run(request).await),
        RateDecision::Limited { retry_after } => {
            tracing::info!(client = %key, "rate limited");
            // Round up so clients never retry early.
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            Err(rate_limited(secs.max(1)))
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /sources ============

#[derive(Serialize)]
struct SourcesResponse {
    sources: Vec<SourceSummary>,
}

async fn handle_sources(State(state): State<AppState>) -> Json<SourcesResponse> {
    Json(SourcesResponse {
        sources: list_sources(state.pipeline.catalog(), state.pipeline.dispatcher()),
    })
}

// ============ POST /chat ============

/// Handler for `POST /chat`.
///
/// Every pipeline outcome, including rejections, is a `200`. Dropping the
/// connection drops this future, which cancels an in-flight translation or
/// backend call.
async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<PipelineOutcome>, AppError> {
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;

    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!(
        "chat",
        %request_id,
        data_source = %request.data_source,
        history = request.message_history.len()
    );

    let outcome = state
        .pipeline
        .answer(&request)
        .instrument(span.clone())
        .await
        .map_err(|e| bad_request(e.to_string()))?;

    span.in_scope(|| match outcome.rejection_kind() {
        Some(kind) => tracing::info!(outcome = kind.as_str(), "request rejected"),
        None => tracing::info!(outcome = "answered", "request answered"),
    });

    Ok(Json(outcome))
}

// ============ POST /validate ============

#[derive(Deserialize)]
struct ValidateRequest {
    #[serde(default)]
    query: String,
}

async fn handle_validate(
    State(state): State<AppState>,
    payload: Result<Json<ValidateRequest>, JsonRejection>,
) -> Result<Json<QueryCheck>, AppError> {
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;
    if request.query.trim().is_empty() {
        return Err(bad_request("query must be a non-empty string"));
    }
    Ok(Json(check_query(state.pipeline.validator(), &request.query)))
}
