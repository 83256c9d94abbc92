//! Relay orchestration.
//!
//! One strictly sequential state machine per request:
//! admission (gate 1) → ensure/sweep/load → ceiling (gate 2) → append input
//! → bump counter → backend call → append output → detached callback →
//! synchronous reply. Every failure is terminal for the request; nothing is
//! retried and store mutations are never rolled back, so a backend failure
//! leaves the input message appended and the counter bumped.

use std::net::IpAddr;
use std::sync::Arc;
use tracing::info;

use crate::callback::{CallbackDispatcher, CallbackPayload};
use crate::config::Config;
use crate::context::ContextManager;
use crate::error::{Error, Result};
use crate::llm::LlmClient;
use crate::rate_limit::SourceRateLimiter;
use crate::store::StoreClient;
use crate::validation::WebhookRequest;

/// The relay service: injected dependencies, constructed once at startup,
/// shared by reference across request handlers.
pub struct RelayService {
    contexts: ContextManager,
    limiter: SourceRateLimiter,
    llm: LlmClient,
    callbacks: CallbackDispatcher,
    max_requests: i64,
}

impl RelayService {
    /// Build the service from configuration and a store handle.
    pub fn new(store: Arc<dyn StoreClient>, config: &Config) -> Self {
        Self {
            contexts: ContextManager::new(store, config.relay.context_ttl_secs),
            limiter: SourceRateLimiter::new(config.relay.requests_per_minute),
            llm: LlmClient::new(&config.backend),
            callbacks: CallbackDispatcher::new(config.relay.callback_timeout_secs),
            max_requests: config.relay.context_max_requests,
        }
    }

    /// Process one validated webhook request from `source`.
    ///
    /// Returns the backend's reply text; the same text is dispatched to the
    /// callback URL on a detached task before this returns.
    pub async fn handle(&self, source: IpAddr, request: &WebhookRequest) -> Result<String> {
        if !self.limiter.check(source).await {
            return Err(Error::RateLimited(format!(
                "{} exceeded {} requests per minute",
                source,
                self.limiter.max_per_window()
            )));
        }

        let callback_url = request.callback_url.as_str();
        let key = ContextManager::context_key(callback_url);

        self.contexts.ensure(&key).await?;
        self.contexts.sweep(&key).await?;
        let record = self.contexts.load(&key).await?;

        if record.request_count > self.max_requests {
            return Err(Error::QuotaExceeded(format!(
                "{} requests for {} exceed the ceiling of {}",
                record.request_count, callback_url, self.max_requests
            )));
        }

        self.contexts.append_message(&key, &request.message).await?;
        self.contexts.increment_request_count(&key).await?;

        // Terminal on failure; the mutations above are intentionally kept.
        let output = self.llm.complete(&request.message).await?;

        // Output is kept even when it duplicates an earlier message; only
        // the inbound message is deduplicated.
        self.contexts.push_message(&key, &output).await?;

        info!(callback_url = %callback_url, "Dispatching reply to callback URL");
        self.callbacks.dispatch(
            callback_url.to_string(),
            CallbackPayload {
                response: output.clone(),
            },
        );

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use url::Url;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(backend_url: &str) -> Config {
        let mut config = Config::default();
        config.backend.api_url = backend_url.to_string();
        config.backend.api_key = "test-key".to_string();
        config.relay.requests_per_minute = 100;
        config
    }

    fn request(message: &str) -> WebhookRequest {
        WebhookRequest {
            message: message.to_string(),
            callback_url: Url::parse("http://127.0.0.1:9/cb").unwrap(),
        }
    }

    fn source() -> IpAddr {
        IpAddr::from([127, 0, 0, 1])
    }

    async fn backend_replying(body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": body}}]
            })))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_success_appends_input_and_output() {
        let server = backend_replying("hello").await;
        let store = Arc::new(InMemoryStore::new());
        let relay = RelayService::new(store.clone(), &test_config(&server.uri()));

        let output = relay.handle(source(), &request("hi")).await.unwrap();
        assert_eq!(output, "hello");

        let contexts = ContextManager::new(store, 3600);
        let key = ContextManager::context_key("http://127.0.0.1:9/cb");
        let record = contexts.load(&key).await.unwrap();
        assert_eq!(record.messages, vec!["hi", "hello"]);
        assert_eq!(record.request_count, 1);
    }

    #[tokio::test]
    async fn test_duplicate_input_only_appends_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "first"}}]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "second"}}]
            })))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        let relay = RelayService::new(store.clone(), &test_config(&server.uri()));

        relay.handle(source(), &request("hi")).await.unwrap();
        relay.handle(source(), &request("hi")).await.unwrap();

        let contexts = ContextManager::new(store, 3600);
        let key = ContextManager::context_key("http://127.0.0.1:9/cb");
        let record = contexts.load(&key).await.unwrap();
        // Second "hi" deduplicated, both outputs kept, counter unaffected
        // by the dedup.
        assert_eq!(record.messages, vec!["hi", "first", "second"]);
        assert_eq!(record.request_count, 2);
    }

    #[tokio::test]
    async fn test_echoed_output_is_still_appended() {
        // Backend replies with the input verbatim; the output must not be
        // swallowed by the input-side dedup.
        let server = backend_replying("hi").await;
        let store = Arc::new(InMemoryStore::new());
        let relay = RelayService::new(store.clone(), &test_config(&server.uri()));

        let output = relay.handle(source(), &request("hi")).await.unwrap();
        assert_eq!(output, "hi");

        let contexts = ContextManager::new(store, 3600);
        let key = ContextManager::context_key("http://127.0.0.1:9/cb");
        let record = contexts.load(&key).await.unwrap();
        assert_eq!(record.messages, vec!["hi", "hi"]);
        assert_eq!(record.request_count, 1);
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_mutations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        let relay = RelayService::new(store.clone(), &test_config(&server.uri()));

        let err = relay.handle(source(), &request("hi")).await.unwrap_err();
        assert!(matches!(err, Error::Backend(_)));

        let contexts = ContextManager::new(store, 3600);
        let key = ContextManager::context_key("http://127.0.0.1:9/cb");
        let record = contexts.load(&key).await.unwrap();
        assert_eq!(record.messages, vec!["hi"]);
        assert_eq!(record.request_count, 1);
    }

    #[tokio::test]
    async fn test_context_ceiling_rejects_after_overflow() {
        let server = backend_replying("reply").await;
        let store = Arc::new(InMemoryStore::new());
        let mut config = test_config(&server.uri());
        config.relay.context_max_requests = 2;
        let relay = RelayService::new(store.clone(), &config);

        // Ceiling is 2 and the comparison is strict, so requests seeing a
        // count of 0, 1, and 2 all pass; the fourth sees 3 and is rejected.
        for i in 0..3 {
            relay
                .handle(source(), &request(&format!("msg {}", i)))
                .await
                .unwrap();
        }
        let err = relay.handle(source(), &request("msg 3")).await.unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn test_expired_context_counter_never_rejects() {
        let server = backend_replying("reply").await;
        let store = Arc::new(InMemoryStore::new());
        let mut config = test_config(&server.uri());
        config.relay.context_max_requests = 1;
        let relay = RelayService::new(store.clone(), &config);

        let key = ContextManager::context_key("http://127.0.0.1:9/cb");
        // Plant a stale record with a counter far past the ceiling.
        store
            .hash_set(
                &key,
                &[
                    ("messages", "[]".to_string()),
                    (
                        "last_updated",
                        (chrono::Utc::now() - chrono::Duration::seconds(7200)).to_rfc3339(),
                    ),
                    ("request_count", "50".to_string()),
                ],
            )
            .await
            .unwrap();

        // Sweep runs before gate 2, so the stale counter is discarded.
        relay.handle(source(), &request("hi")).await.unwrap();

        let contexts = ContextManager::new(store, 3600);
        let record = contexts.load(&key).await.unwrap();
        assert_eq!(record.request_count, 1);
    }

    #[tokio::test]
    async fn test_address_gate_rejects_before_store_access() {
        let server = backend_replying("reply").await;
        let store = Arc::new(InMemoryStore::new());
        let mut config = test_config(&server.uri());
        config.relay.requests_per_minute = 1;
        let relay = RelayService::new(store.clone(), &config);

        relay.handle(source(), &request("hi")).await.unwrap();
        let err = relay.handle(source(), &request("again")).await.unwrap_err();
        assert!(matches!(err, Error::RateLimited(_)));

        // The rejected request must not have touched the context.
        let contexts = ContextManager::new(store, 3600);
        let key = ContextManager::context_key("http://127.0.0.1:9/cb");
        let record = contexts.load(&key).await.unwrap();
        assert_eq!(record.request_count, 1);
        assert_eq!(record.messages, vec!["hi", "reply"]);
    }
}
