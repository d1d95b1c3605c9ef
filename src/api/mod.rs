//! # API — HTTP Server for the Quest and Ticket Flows
//!
//! Runs an Axum HTTP server exposing the profile, quest, leaderboard, ticket
//! and admin endpoints, plus Kubernetes-style health probes and Prometheus
//! metrics. An optional static directory serves the frontend build.
//!
//! Handlers are thin: they parse the request, load the event catalog, and
//! delegate to [`QuestEvaluator`] or [`TicketRegistry`]. Every domain failure
//! is an [`ApiError`], rendered as `{ "message": ... }` with the matching
//! status code.

mod routes_admin;
mod routes_events;
mod routes_health;
mod routes_profile;
mod routes_tickets;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, Instrument};

use crate::catalog::{Event, EventCatalog};
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::gateway::{ChainWriter, ProofVerifier};
use crate::profile::Address;
use crate::prom_metrics::{self, Metrics};
use crate::quest::{QuestEvaluator, QuestPolicy};
use crate::store::Store;
use crate::ticket::TicketRegistry;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub evaluator: QuestEvaluator,
    pub tickets: TicketRegistry,
    pub config: AppConfig,
    pub admins: HashSet<Address>,
    pub prom_metrics: Metrics,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        verifier: Arc<dyn ProofVerifier>,
        chain: Arc<dyn ChainWriter>,
        config: AppConfig,
    ) -> Arc<Self> {
        let policy = QuestPolicy::from_config(&config);
        let evaluator = QuestEvaluator::new(verifier, chain.clone(), policy);
        let tickets = TicketRegistry::new(chain, config.tickets.attest, config.tickets.max_batch);
        Arc::new(AppState {
            store,
            evaluator,
            tickets,
            admins: config.admin.allowlist(),
            config,
            prom_metrics: Metrics::new(),
        })
    }

    /// Load an event and parse its quest catalog.
    pub(crate) async fn catalog(&self, event_id: i64) -> Result<(Event, EventCatalog), ApiError> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Event not found"))?;
        let catalog = EventCatalog::from_event(&event)?;
        Ok((event, catalog))
    }
}

/// Middleware that records HTTP request duration into the Prometheus
/// histogram, generates (or propagates) a request ID for correlation, and
/// wraps the request in a tracing span.
async fn metrics_middleware(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> axum::response::Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let method = req.method().to_string();
    let raw_path = req.uri().path().to_string();
    let norm_path = normalize_path(&raw_path);
    let start = std::time::Instant::now();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %raw_path,
    );
    let mut response = next.run(req).instrument(span).await;

    state
        .prom_metrics
        .http_request_duration
        .get_or_create(&prom_metrics::HttpLabel {
            method,
            path: norm_path,
        })
        .observe(start.elapsed().as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Collapse numeric ids and ticket codes into placeholders so the latency
/// histogram keeps a bounded label set.
fn normalize_path(path: &str) -> String {
    let mut prev = "";
    path.split('/')
        .map(|seg| {
            let out = if seg.is_empty() {
                seg.to_string()
            } else if seg.chars().all(|c| c.is_ascii_digit()) {
                ":id".to_string()
            } else if prev == "ticket" && seg != "associate" {
                ":code".to_string()
            } else {
                seg.to_string()
            };
            prev = seg;
            out
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn build_router(state: Arc<AppState>, static_dir: Option<&Path>) -> Router {
    let server = &state.config.server;
    let body_limit = server.body_limit_bytes;
    let timeout = Duration::from_secs(server.request_timeout_secs);

    let mut app = Router::new()
        .route(
            "/api/profile",
            get(routes_profile::handler_profile_get).patch(routes_profile::handler_profile_patch),
        )
        .route(
            "/api/profile/claim",
            post(routes_profile::handler_profile_claim),
        )
        .route(
            "/api/leaderboard",
            get(routes_profile::handler_leaderboard),
        )
        .route("/api/events/{id}", get(routes_events::handler_event_get))
        .route(
            "/api/ticket/associate",
            post(routes_tickets::handler_ticket_associate),
        )
        .route(
            "/api/ticket/{code}",
            get(routes_tickets::handler_ticket_get),
        )
        .route(
            "/api/admin/tickets",
            post(routes_admin::handler_admin_tickets_issue),
        )
        .route(
            "/api/admin/tickets/list",
            post(routes_admin::handler_admin_tickets_list),
        )
        .route(
            "/api/admin/reset-profile",
            post(routes_admin::handler_admin_reset_profile),
        )
        .route("/healthz", get(routes_health::handler_healthz))
        .route("/readyz", get(routes_health::handler_readyz))
        .route("/metrics", get(routes_health::handler_metrics));

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
    }

    app.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
    .layer(CatchPanicLayer::new())
    .layer(axum::middleware::from_fn_with_state(
        state.clone(),
        metrics_middleware,
    ))
    .layer(TraceLayer::new_for_http())
    .layer(RequestBodyLimitLayer::new(body_limit))
    .layer(TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        timeout,
    ))
    .with_state(state)
}

pub async fn run(state: Arc<AppState>, port: u16, static_dir: Option<&Path>) -> Result<()> {
    let app = build_router(state, static_dir);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "server running");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
                info!("received SIGINT, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, shutting down");
    }
}
