//! LLM backend client.
//!
//! Single-turn completion against a chat-completions style endpoint with
//! bearer-token auth. Any non-2xx or transport failure surfaces as a
//! backend error; nothing is retried.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::BackendConfig;
use crate::error::{Error, Result};

/// Client for the configured model-completion endpoint.
pub struct LlmClient {
    client: reqwest::Client,
    api_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl LlmClient {
    /// Create a client from backend configuration.
    pub fn new(config: &BackendConfig) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.api_key))
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_url: config.api_url.clone(),
            model: config.model.clone(),
        }
    }

    /// Send a single user message and return the generated completion text.
    pub async fn complete(&self, message: &str) -> Result<String> {
        let request = ChatRequest {
            messages: vec![ChatMessage {
                role: "user",
                content: message.to_string(),
            }],
            model: self.model.clone(),
        };

        let response = self
            .client
            .post(&self.api_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "LLM backend returned error");
            return Err(Error::Backend(format!("Backend returned {}", status)));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("Failed to parse response: {}", e)))?;

        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Backend("Backend returned no choices".to_string()))
    }
}
