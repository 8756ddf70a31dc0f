//! The HTTP surface (spec.md §6): `/api/v3/backfills` CRUD, wired the way
//! the teacher's top-level `api` crate wires its own router in
//! `start_api_server`, with the request-id/metrics middleware pair ported
//! from `cronback-api-srv/lib.rs`'s `inject_request_id`/`track_metrics`.

pub mod errors;
pub mod extractors;
mod handlers;
pub mod model;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::MatchedPath;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use corelib::database::workflow_store::WorkflowStore;
use corelib::shutdown::Shutdown;
use engine::backfill::BackfillEngine;
use metrics::{histogram, increment_counter};
use tokio::select;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

static X_REQUEST_ID: &str = "x-request-id";

pub struct AppState {
    pub backfill_engine: Arc<BackfillEngine>,
    pub workflow_store: Arc<dyn WorkflowStore>,
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest(
            "/api/v3",
            Router::new()
                .route("/backfills", get(handlers::backfills::list).post(handlers::backfills::create))
                .route(
                    "/backfills/:id",
                    get(handlers::backfills::get)
                        .put(handlers::backfills::update)
                        .delete(handlers::backfills::delete),
                ),
        )
        .route_layer(middleware::from_fn(track_metrics))
        .route_layer(middleware::from_fn(inject_request_id))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::any())
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::PUT, axum::http::Method::DELETE])
                .allow_headers([axum::http::header::CONTENT_TYPE]),
        )
        .with_state(state)
        .fallback(not_found)
}

/// Builds the router and serves it on `addr` until `shutdown` fires. Takes
/// an already-constructed [`BackfillEngine`] so the API and the backfill
/// advancement loop (spawned separately in `conductord`'s `main`) operate on
/// the exact same in-flight state rather than two independent instances.
pub async fn start_api_server(
    addr: SocketAddr,
    backfill_engine: Arc<BackfillEngine>,
    workflow_store: Arc<dyn WorkflowStore>,
    shutdown: Shutdown,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState { backfill_engine, workflow_store });
    let app = router(state);

    info!(%addr, "starting api server");
    let server = axum::Server::try_bind(&addr)?.serve(app.into_make_service());

    let mut shutdown_clone = shutdown.clone();
    select! {
        _ = shutdown_clone.recv() => {
            warn!("api server received shutdown signal");
        }
        res = server => {
            if let Err(err) = res {
                error!(%err, "api server exited unexpectedly");
                shutdown.broadcast_shutdown();
            }
        }
    }
    Ok(())
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "no such route")
}

/// spec.md §6's middleware contract: echo an inbound `X-Request-Id`, or mint
/// a fresh dashless UUID, on every response — and on an unhandled (500)
/// error, replace the body with a sanitized message naming only that id, so
/// the original internal error text never reaches the caller.
async fn inject_request_id<B>(req: Request<B>, next: Next<B>) -> impl IntoResponse {
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    let mut response = next.run(req).await;

    if response.status() == StatusCode::INTERNAL_SERVER_ERROR {
        let headers = response.headers().clone();
        let sanitized = Json(serde_json::json!({
            "message": format!("internal server error (request {request_id})"),
        }));
        response = (StatusCode::INTERNAL_SERVER_ERROR, sanitized).into_response();
        *response.headers_mut() = headers;
    }

    response.headers_mut().insert(
        X_REQUEST_ID,
        HeaderValue::from_str(&request_id).expect("request id is always a valid header value"),
    );
    response
}

async fn track_metrics<B>(req: Request<B>, next: Next<B>) -> impl IntoResponse {
    let start = Instant::now();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    increment_counter!("api.http_requests_total", &labels);
    histogram!("api.http_requests_duration_seconds", latency, &labels);

    response
}
