//! Conversation context lifecycle.
//!
//! One context record per callback URL, held in the shared store as a hash:
//!
//! | Field | Contents |
//! |---|---|
//! | `messages` | JSON array of strings, insertion-ordered, deduplicated |
//! | `last_updated` | RFC 3339 UTC timestamp of the last mutation |
//! | `request_count` | integer, bumped atomically, reset only by deletion |
//!
//! Records are created lazily, refreshed on every accepted request, and
//! deleted once `last_updated` falls behind the TTL. The counter uses the
//! store's atomic increment; the message list is read-modify-write with
//! last-writer-wins under concurrent requests to the same key.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::store::{StoreClient, StoreResult};

/// Namespace prefix for context keys in the shared store.
const KEY_PREFIX: &str = "context:";

const FIELD_MESSAGES: &str = "messages";
const FIELD_LAST_UPDATED: &str = "last_updated";
const FIELD_REQUEST_COUNT: &str = "request_count";

/// Snapshot of a conversation context record.
#[derive(Debug, Clone, Default)]
pub struct ContextRecord {
    /// User inputs and model outputs, interleaved in insertion order.
    pub messages: Vec<String>,
    /// Timestamp of the last mutation, if the record exists.
    pub last_updated: Option<DateTime<Utc>>,
    /// Requests accepted for this record since creation.
    pub request_count: i64,
}

/// Manages per-callback-URL context records in the shared store.
pub struct ContextManager {
    store: Arc<dyn StoreClient>,
    ttl: Duration,
}

impl ContextManager {
    /// Create a manager with the given store and record TTL.
    pub fn new(store: Arc<dyn StoreClient>, ttl_secs: u64) -> Self {
        Self {
            store,
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    /// Store key for a callback URL.
    pub fn context_key(callback_url: &str) -> String {
        format!("{}{}", KEY_PREFIX, callback_url)
    }

    /// Create an empty record for `key` if none exists. Idempotent.
    ///
    /// EXISTS-then-HSET, not a transaction: a lost race creates the same
    /// empty record twice, which is harmless.
    pub async fn ensure(&self, key: &str) -> StoreResult<()> {
        if self.store.exists(key).await? {
            return Ok(());
        }

        self.store
            .hash_set(
                key,
                &[
                    (FIELD_MESSAGES, "[]".to_string()),
                    (FIELD_LAST_UPDATED, Utc::now().to_rfc3339()),
                    (FIELD_REQUEST_COUNT, "0".to_string()),
                ],
            )
            .await?;

        debug!(key = %key, "Created context record");
        Ok(())
    }

    /// Delete the record for `key` when it has outlived the TTL.
    ///
    /// Must run before any read used for a rate or content decision so a
    /// stale record never drives one.
    pub async fn sweep(&self, key: &str) -> StoreResult<()> {
        let hash = self.store.hash_get_all(key).await?;
        if hash.is_empty() {
            return Ok(());
        }

        let expired = match hash
            .get(FIELD_LAST_UPDATED)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        {
            Some(last_updated) => Utc::now() - last_updated.with_timezone(&Utc) > self.ttl,
            // Unparsable timestamp: treat the record as expired so it
            // cannot drive decisions forever.
            None => {
                warn!(key = %key, "Context record has no usable timestamp, discarding");
                true
            }
        };

        if expired {
            info!(key = %key, "Clearing outdated context");
            self.store.delete(key).await?;
        }

        Ok(())
    }

    /// Load the current record state; empty when absent or just swept.
    pub async fn load(&self, key: &str) -> StoreResult<ContextRecord> {
        let hash = self.store.hash_get_all(key).await?;
        if hash.is_empty() {
            return Ok(ContextRecord::default());
        }

        let messages = match hash.get(FIELD_MESSAGES) {
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
                warn!(key = %key, error = %e, "Malformed message list, treating as empty");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let last_updated = hash
            .get(FIELD_LAST_UPDATED)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let request_count = hash
            .get(FIELD_REQUEST_COUNT)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);

        Ok(ContextRecord {
            messages,
            last_updated,
            request_count,
        })
    }

    /// Append `text` to the message sequence unless an identical message is
    /// already present (exact string match, no normalization). Refreshes
    /// `last_updated` when an append happens.
    ///
    /// Returns whether the message was actually appended.
    pub async fn append_message(&self, key: &str, text: &str) -> StoreResult<bool> {
        let record = self.load(key).await?;
        if record.messages.iter().any(|m| m == text) {
            debug!(key = %key, "Duplicate message suppressed");
            return Ok(false);
        }

        let mut messages = record.messages;
        messages.push(text.to_string());
        self.write_messages(key, &messages).await?;

        Ok(true)
    }

    /// Append `text` unconditionally, refreshing `last_updated`.
    ///
    /// Used for model output: a reply identical to an earlier message is
    /// still part of the conversation and must be kept.
    pub async fn push_message(&self, key: &str, text: &str) -> StoreResult<()> {
        let record = self.load(key).await?;
        let mut messages = record.messages;
        messages.push(text.to_string());
        self.write_messages(key, &messages).await
    }

    async fn write_messages(&self, key: &str, messages: &[String]) -> StoreResult<()> {
        let encoded = serde_json::to_string(messages)
            .map_err(|e| crate::store::StoreError::Decode(e.to_string()))?;

        self.store
            .hash_set(
                key,
                &[
                    (FIELD_MESSAGES, encoded),
                    (FIELD_LAST_UPDATED, Utc::now().to_rfc3339()),
                ],
            )
            .await
    }

    /// Atomically bump the request counter. Returns the new count.
    pub async fn increment_request_count(&self, key: &str) -> StoreResult<i64> {
        self.store.hash_incr(key, FIELD_REQUEST_COUNT, 1).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn manager(ttl_secs: u64) -> ContextManager {
        ContextManager::new(Arc::new(InMemoryStore::new()), ttl_secs)
    }

    #[test]
    fn test_context_key_namespacing() {
        assert_eq!(
            ContextManager::context_key("http://example.com/cb"),
            "context:http://example.com/cb"
        );
    }

    #[tokio::test]
    async fn test_ensure_creates_empty_record_once() {
        let manager = manager(3600);
        let key = ContextManager::context_key("http://example.com/cb");

        manager.ensure(&key).await.unwrap();
        let record = manager.load(&key).await.unwrap();
        assert!(record.messages.is_empty());
        assert_eq!(record.request_count, 0);
        assert!(record.last_updated.is_some());

        // Second ensure must not reset an existing record.
        manager.append_message(&key, "hello").await.unwrap();
        manager.ensure(&key).await.unwrap();
        let record = manager.load(&key).await.unwrap();
        assert_eq!(record.messages, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_append_deduplicates_exact_matches() {
        let manager = manager(3600);
        let key = ContextManager::context_key("http://example.com/cb");
        manager.ensure(&key).await.unwrap();

        assert!(manager.append_message(&key, "hi").await.unwrap());
        assert!(!manager.append_message(&key, "hi").await.unwrap());
        // No normalization: case and whitespace variants are distinct.
        assert!(manager.append_message(&key, "Hi").await.unwrap());
        assert!(manager.append_message(&key, "hi ").await.unwrap());

        let record = manager.load(&key).await.unwrap();
        assert_eq!(record.messages, vec!["hi", "Hi", "hi "]);
    }

    #[tokio::test]
    async fn test_push_keeps_duplicates_and_refreshes_timestamp() {
        let manager = manager(3600);
        let key = ContextManager::context_key("http://example.com/cb");
        manager.ensure(&key).await.unwrap();

        manager.append_message(&key, "hi").await.unwrap();
        let before = manager.load(&key).await.unwrap().last_updated.unwrap();

        manager.push_message(&key, "hi").await.unwrap();

        let record = manager.load(&key).await.unwrap();
        assert_eq!(record.messages, vec!["hi", "hi"]);
        assert!(record.last_updated.unwrap() >= before);
    }

    #[tokio::test]
    async fn test_increment_is_independent_of_dedup() {
        let manager = manager(3600);
        let key = ContextManager::context_key("http://example.com/cb");
        manager.ensure(&key).await.unwrap();

        manager.append_message(&key, "same").await.unwrap();
        manager.append_message(&key, "same").await.unwrap();
        assert_eq!(manager.increment_request_count(&key).await.unwrap(), 1);
        assert_eq!(manager.increment_request_count(&key).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sweep_deletes_expired_record() {
        let store = Arc::new(InMemoryStore::new());
        let manager = ContextManager::new(store.clone(), 3600);
        let key = ContextManager::context_key("http://example.com/cb");
        manager.ensure(&key).await.unwrap();
        manager.increment_request_count(&key).await.unwrap();

        // Backdate the record past the TTL.
        let stale = (Utc::now() - Duration::seconds(7200)).to_rfc3339();
        store
            .hash_set(&key, &[("last_updated", stale)])
            .await
            .unwrap();

        manager.sweep(&key).await.unwrap();
        let record = manager.load(&key).await.unwrap();
        assert!(record.messages.is_empty());
        assert_eq!(record.request_count, 0);
    }

    #[tokio::test]
    async fn test_sweep_keeps_fresh_record() {
        let manager = manager(3600);
        let key = ContextManager::context_key("http://example.com/cb");
        manager.ensure(&key).await.unwrap();
        manager.append_message(&key, "hello").await.unwrap();

        manager.sweep(&key).await.unwrap();
        let record = manager.load(&key).await.unwrap();
        assert_eq!(record.messages, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_sweep_discards_record_without_timestamp() {
        let store = Arc::new(InMemoryStore::new());
        let manager = ContextManager::new(store.clone(), 3600);
        let key = ContextManager::context_key("http://example.com/cb");
        store
            .hash_set(&key, &[("last_updated", "garbage".to_string())])
            .await
            .unwrap();

        manager.sweep(&key).await.unwrap();
        assert!(!store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_load_tolerates_malformed_message_list() {
        let store = Arc::new(InMemoryStore::new());
        let manager = ContextManager::new(store.clone(), 3600);
        let key = ContextManager::context_key("http://example.com/cb");
        store
            .hash_set(
                &key,
                &[
                    ("messages", "not json".to_string()),
                    ("last_updated", Utc::now().to_rfc3339()),
                    ("request_count", "3".to_string()),
                ],
            )
            .await
            .unwrap();

        let record = manager.load(&key).await.unwrap();
        assert!(record.messages.is_empty());
        assert_eq!(record.request_count, 3);
    }
}
