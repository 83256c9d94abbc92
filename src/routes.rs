//! Route definitions for the relay.
//!
//! `POST /webhook` accepts a message plus callback URL, relays the message
//! to the LLM backend, and returns the reply; `GET /health` reports service
//! liveness.

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::error::Error;
use crate::relay::RelayService;
use crate::validation::{validate_webhook, FieldError};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayService>,
}

/// Successful relay response.
#[derive(Debug, Serialize, Deserialize)]
pub struct RelayResponse {
    pub response: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

/// Build the relay routes.
pub fn relay_routes(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Handle an inbound webhook request.
async fn webhook_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<RelayResponse>, Response> {
    let Json(value) = body.map_err(|rejection| {
        validation_response(vec![FieldError {
            kind: "json_invalid".to_string(),
            loc: vec!["body".to_string()],
            msg: rejection.body_text(),
            input: Value::Null,
            ctx: None,
        }])
    })?;

    let request = validate_webhook(&value).map_err(validation_response)?;

    // The URL parser guarantees a host for http/https; kept as a guard for
    // the contract that an unusable callback target is a 400, not a 500.
    if request
        .callback_url
        .host_str()
        .is_none_or(|host| host.is_empty())
    {
        return Err(Error::InvalidInput("callback_url is required".to_string()).into_response());
    }

    info!(
        source = %addr.ip(),
        callback_url = %request.callback_url,
        "Received webhook request"
    );

    let output = state
        .relay
        .handle(addr.ip(), &request)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, callback_url = %request.callback_url, "Relay failed");
            e.into_response()
        })?;

    Ok(Json(RelayResponse { response: output }))
}

/// Build a 422 response from a list of field errors.
fn validation_response(errors: Vec<FieldError>) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(serde_json::json!({ "detail": errors })),
    )
        .into_response()
}

/// Handle health check requests.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        service: "llm-relay".to_string(),
    })
}
