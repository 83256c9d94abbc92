//! llm-relay - Webhook relay with Redis-backed conversation context.
//!
//! Accepts an inbound message plus a callback URL, forwards the message to
//! an LLM backend, keeps a short-lived conversation context per callback
//! URL in a shared store, and delivers the reply to the callback endpoint
//! asynchronously.
//!
//! ## Architecture
//!
//! ```text
//! Caller → POST /webhook (validate → gate 1 → context sweep → gate 2)
//!              → LLM backend → reply to caller
//!                           ↘ detached callback dispatch
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod callback;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod logging;
pub mod rate_limit;
pub mod relay;
pub mod routes;
pub mod store;
pub mod validation;

pub use config::Config;
pub use context::{ContextManager, ContextRecord};
pub use error::{Error, Result};
pub use relay::RelayService;
pub use routes::{relay_routes, AppState};
pub use store::{InMemoryStore, RedisStore, StoreClient};

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Build the relay router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    relay_routes(state).layer(cors)
}

/// Connect to the store, assemble the service, and serve requests.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let store = RedisStore::open(&config.store.url())?;

    // Store health is reported at startup without refusing to boot; the
    // connection is lazy, so requests fail individually if it stays down.
    match store.ping().await {
        Ok(()) => tracing::info!(url = %config.store.url(), "Store connection successful"),
        Err(e) => tracing::warn!(error = %e, "Store connection failed"),
    }

    let state = AppState {
        relay: Arc::new(RelayService::new(Arc::new(store), config)),
    };

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    let router = build_router(state);

    tracing::info!("Starting llm-relay on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
