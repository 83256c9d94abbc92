//! Callback delivery.
//!
//! Best-effort, fire-and-forget: the reply is POSTed to the caller-supplied
//! callback URL from a detached task with its own timeout. Failures are
//! logged and never surfaced to the original caller, whose response has
//! already been decided by the time dispatch runs.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Payload delivered to the callback endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackPayload {
    pub response: String,
}

/// Dispatches replies to callback URLs.
#[derive(Clone)]
pub struct CallbackDispatcher {
    client: reqwest::Client,
}

impl CallbackDispatcher {
    /// Create a dispatcher with the given per-delivery timeout.
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client }
    }

    /// Schedule delivery of `payload` to `url` on a detached task.
    pub fn dispatch(&self, url: String, payload: CallbackPayload) {
        let client = self.client.clone();

        tokio::spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(url = %url, "Callback delivered");
                }
                Ok(response) => {
                    warn!(url = %url, status = %response.status(), "Callback rejected");
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Callback delivery failed");
                }
            }
        });
    }
}
