//! # Authorization HTTP Server
//!
//! Decision service in front of the HDCN authorization engine. Thin adapter:
//! every answer comes straight from the engine.
//!
//! ## Endpoints
//!
//! - `POST /v1/check` - Access check
//! - `POST /v1/fields` - Visible and editable field classes for a record
//! - `POST /v1/regions` - Accessible regions for query scoping
//! - `POST /v1/rules/refresh` - Refresh the rule snapshot now
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics
//!
//! ## Configuration
//!
//! Environment variables:
//! - `PORT` - HTTP server port (default: 8080)
//! - `RUST_LOG` - Log level (default: info)
//! - `AUTHZ_RULES_URL` - Rule endpoint, fetched over HTTP
//! - `AUTHZ_RULES_PATH` - Rule document on disk (used when no URL is set)
//! - `AUTHZ_CACHE_ENABLED`, `AUTHZ_CACHE_CAPACITY` - Permission cache
//! - `AUTHZ_RULES_TTL_SECS`, `AUTHZ_RULES_BACKOFF_MS`, `AUTHZ_RULES_MAX_BACKOFF_SECS` - Refresh timing

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    serve, Router,
};
use hdcn_authz::{
    AccessibleRegions, AuthorizationEngine, DecisionReason, EngineConfig, FieldClass, FileRuleFetcher,
    HttpRuleFetcher, RecordContext, RefreshOutcome, Resource, RuleFetcher, StaticRuleFetcher, Subject,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shared application state
#[derive(Clone)]
struct AppState {
    engine: Arc<AuthorizationEngine>,
    start_time: std::time::Instant,
}

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

/// Application error type
#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Unavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "rules_unavailable", msg),
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<hdcn_authz::AuthzError> for AppError {
    fn from(err: hdcn_authz::AuthzError) -> Self {
        if err.is_config_defect() {
            AppError::BadRequest(err.to_string())
        } else {
            AppError::Unavailable(err.to_string())
        }
    }
}

/// Role claims as forwarded by the authentication layer
#[derive(Debug, Deserialize)]
struct SubjectBody {
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    is_own_record: bool,
}

impl SubjectBody {
    fn into_subject(self) -> Subject {
        Subject::new(self.roles).with_own_record(self.is_own_record)
    }
}

#[derive(Debug, Deserialize)]
struct CheckRequest {
    #[serde(flatten)]
    subject: SubjectBody,
    resource: String,
    action: String,
    #[serde(default)]
    region: Option<String>,
}

#[derive(Debug, Serialize)]
struct CheckResponse {
    allowed: bool,
    decision: &'static str,
    reason: DecisionReason,
    generation: u64,
}

#[derive(Debug, Deserialize)]
struct FieldsRequest {
    #[serde(flatten)]
    subject: SubjectBody,
    resource: String,
    #[serde(default)]
    record: RecordContext,
}

#[derive(Debug, Serialize)]
struct FieldsResponse {
    visible: BTreeSet<FieldClass>,
    editable: BTreeSet<FieldClass>,
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
    version: String,
    rules_generation: u64,
    rules_version: String,
    rules_fallback: bool,
    rules_stale: bool,
}

/// Metrics response (Prometheus format)
struct MetricsResponse {
    metrics: String,
}

impl IntoResponse for MetricsResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            self.metrics,
        )
            .into_response()
    }
}

/// POST /v1/check - Access check
async fn check_authorization(
    State(state): State<AppState>,
    Json(req): Json<CheckRequest>,
) -> Json<CheckResponse> {
    let subject = req.subject.into_subject();
    let decision = state
        .engine
        .authorize(&subject, &req.resource, &req.action, req.region.as_deref());

    Json(CheckResponse {
        allowed: decision.allowed,
        decision: if decision.allowed { "allow" } else { "deny" },
        reason: decision.reason,
        generation: decision.generation,
    })
}

/// POST /v1/fields - Field classes for a record
async fn field_classes(
    State(state): State<AppState>,
    Json(req): Json<FieldsRequest>,
) -> Result<Json<FieldsResponse>, AppError> {
    let resource: Resource = req.resource.parse()?;
    let subject = req.subject.into_subject();

    let visible = state.engine.visible_field_classes(&subject, resource, &req.record);
    let editable = FieldClass::ALL
        .into_iter()
        .filter(|class| state.engine.is_field_editable(&subject, resource, *class, &req.record))
        .collect();

    Ok(Json(FieldsResponse { visible, editable }))
}

/// POST /v1/regions - Accessible regions
async fn accessible_regions(
    State(state): State<AppState>,
    Json(req): Json<SubjectBody>,
) -> Json<AccessibleRegions> {
    Json(state.engine.accessible_regions(&req.into_subject()))
}

/// POST /v1/rules/refresh - Refresh the rule snapshot now
async fn refresh_rules(State(state): State<AppState>) -> Result<Json<RefreshResponse>, AppError> {
    let response = match state.engine.refresh_rules().await? {
        RefreshOutcome::Updated { generation, version } => RefreshResponse {
            status: "updated",
            generation: Some(generation),
            version: Some(version),
        },
        RefreshOutcome::Unchanged { version } => RefreshResponse {
            status: "unchanged",
            generation: None,
            version: Some(version),
        },
        RefreshOutcome::Coalesced => RefreshResponse {
            status: "coalesced",
            generation: None,
            version: None,
        },
    };

    Ok(Json(response))
}

/// GET /health - Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let source = state.engine.rule_source();
    let snapshot = source.current_snapshot();

    Json(HealthResponse {
        status: if snapshot.is_fallback() { "degraded" } else { "healthy" }.to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        version: hdcn_authz::VERSION.to_string(),
        rules_generation: snapshot.generation(),
        rules_version: snapshot.version().to_string(),
        rules_fallback: snapshot.is_fallback(),
        rules_stale: source.is_stale(),
    })
}

/// GET /metrics - Prometheus metrics endpoint
async fn metrics(State(state): State<AppState>) -> MetricsResponse {
    let mut metrics = format!(
        "# HELP authz_uptime_seconds Server uptime in seconds\n\
         # TYPE authz_uptime_seconds gauge\n\
         authz_uptime_seconds {}\n\
         \n\
         # HELP authz_rules_generation Installed rule snapshot generation\n\
         # TYPE authz_rules_generation gauge\n\
         authz_rules_generation {}\n\n",
        state.start_time.elapsed().as_secs(),
        state.engine.rule_source().generation(),
    );

    if let Some(engine_metrics) = state.engine.export_prometheus() {
        metrics.push_str(&engine_metrics);
    }

    MetricsResponse { metrics }
}

/// Create the HTTP router with all endpoints
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/v1/check", post(check_authorization))
        .route("/v1/fields", post(field_classes))
        .route("/v1/regions", post(accessible_regions))
        .route("/v1/rules/refresh", post(refresh_rules))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(ServiceBuilder::new().layer(trace).layer(cors))
        .with_state(state)
}

/// Pick the rule fetcher from the environment
fn rule_fetcher() -> anyhow::Result<Arc<dyn RuleFetcher>> {
    if let Ok(url) = std::env::var("AUTHZ_RULES_URL") {
        info!("  Rules: {}", url);
        let fetcher = HttpRuleFetcher::new(url, Duration::from_secs(10)).context("building rule endpoint client")?;
        return Ok(Arc::new(fetcher));
    }

    if let Ok(path) = std::env::var("AUTHZ_RULES_PATH") {
        info!("  Rules: file {}", path);
        return Ok(Arc::new(FileRuleFetcher::new(path)));
    }

    warn!("No AUTHZ_RULES_URL or AUTHZ_RULES_PATH set, serving role catalog grants only");
    Ok(Arc::new(StaticRuleFetcher::new(Vec::new())))
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Starting graceful shutdown");
}

/// Main server entrypoint
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting HDCN Authorization Server v{}", hdcn_authz::VERSION);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let config = EngineConfig::from_env();

    info!("Configuration:");
    info!("  Port: {}", port);
    info!("  Cache: {} (capacity {})", config.enable_cache, config.cache_config.capacity);
    info!("  Rule TTL: {:?}", config.rule_source.ttl);

    let engine = Arc::new(AuthorizationEngine::with_fetcher(config, rule_fetcher()?));

    // First fetch up front so the service starts on real rules when it can;
    // the refresh loop then waits a full TTL unless this one failed
    if let Err(e) = engine.refresh_rules().await {
        warn!("Initial rule fetch failed: {}", e);
    }
    let refresh_task = engine.spawn_refresh_loop();

    let state = AppState {
        engine,
        start_time: std::time::Instant::now(),
    };

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    refresh_task.abort();
    info!("Server shut down gracefully");
    Ok(())
}
