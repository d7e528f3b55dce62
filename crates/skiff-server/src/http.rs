//! HTTP transport for the command API.
//!
//! ## Endpoints
//!
//! - `POST /v1/commands` - run a command (JSON, tagged by `operation`)
//! - `POST /v1/confirmations/:token` - confirm or decline a pending delete
//! - `GET /health` - Health check

use crate::server::SkiffServer;
use crate::types::{ApiResult, Command, ConfirmParams};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the HTTP router for the command server.
///
/// The returned router can be served directly with axum or composed
/// into a larger application.
pub fn build_router(server: SkiffServer) -> Router {
    tracing::debug!("Building HTTP router");

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/v1/commands", post(command_handler))
        .route("/v1/confirmations/:token", post(confirm_handler))
        .with_state(server)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    tracing::debug!("HTTP router built with routes: /health, /v1/commands, /v1/confirmations/:token");
    router
}

/// HTTP status for a response envelope.
pub fn status_for(result: &ApiResult) -> StatusCode {
    let Some(kind) = result.error_kind() else {
        return StatusCode::OK;
    };
    match kind {
        "not_found" | "unknown_confirmation" => StatusCode::NOT_FOUND,
        "permission_denied" => StatusCode::FORBIDDEN,
        "conflict" | "quota_exceeded" => StatusCode::CONFLICT,
        "invalid_request" | "invalid_field" | "unknown_os" | "invalid_expiry" => {
            StatusCode::BAD_REQUEST
        }
        kind if kind.starts_with("runtime.") || kind.starts_with("extraction.") => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond(result: ApiResult) -> Response {
    (status_for(&result), Json(result)).into_response()
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    tracing::trace!("Health check request");
    Json(serde_json::json!({
        "status": "healthy",
        "service": "skiff-server"
    }))
}

async fn command_handler(
    State(server): State<SkiffServer>,
    body: Result<Json<Command>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(command)) => respond(server.dispatch(command).await),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Rejected command body");
            respond(ApiResult::invalid_request(rejection.body_text()))
        }
    }
}

async fn confirm_handler(
    State(server): State<SkiffServer>,
    Path(token): Path<String>,
    body: Result<Json<ConfirmParams>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(params)) => respond(server.confirm(&token, params).await),
        Err(rejection) => respond(ApiResult::invalid_request(rejection.body_text())),
    }
}

/// Start the HTTP server.
///
/// This function runs until the server is shut down via the provided
/// shutdown signal.
pub async fn serve(
    server: SkiffServer,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let router = build_router(server);

    tracing::info!(%addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::debug!(%addr, "TCP listener bound");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
