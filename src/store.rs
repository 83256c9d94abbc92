//! Shared key-value store access.
//!
//! The relay keeps conversation context in a shared hash store. The
//! [`StoreClient`] trait is the seam: [`RedisStore`] is the production
//! backend (connection-manager handles reconnection), [`InMemoryStore`]
//! backs tests and local development without a Redis server.
//!
//! This is a leaf layer: typed hash operations only, no relay semantics.

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// Store access errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection to the backend failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A command failed after the connection was established.
    #[error("Command error: {0}")]
    Command(String),

    /// A stored value could not be interpreted.
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Typed access to a shared hash store.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Read all fields of a hash. Missing keys yield an empty map.
    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Set one or more fields of a hash, creating the hash if absent.
    async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> StoreResult<()>;

    /// Atomically increment an integer hash field, creating it at zero if
    /// absent. Returns the new value.
    async fn hash_incr(&self, key: &str, field: &str, by: i64) -> StoreResult<i64>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Delete a key entirely.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Check store connectivity.
    async fn ping(&self) -> StoreResult<()>;
}

// ============================================================================
// Redis Store
// ============================================================================

/// Initial connection attempt timeout per try.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Retries for the initial connection before an operation fails.
const CONNECT_RETRIES: usize = 2;

/// Redis-backed store client.
///
/// The connection manager is obtained lazily on first use, so the service
/// boots with the store down and individual operations fail instead.
pub struct RedisStore {
    client: redis::Client,
    manager: RwLock<Option<ConnectionManager>>,
}

impl RedisStore {
    /// Create a client for Redis at the given URL (`redis://host:port/db`).
    ///
    /// Fails only on an unparseable URL; no connection is attempted yet.
    pub fn open(url: &str) -> StoreResult<Self> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            manager: RwLock::new(None),
        })
    }

    /// Get the shared connection manager, establishing it on first use.
    async fn manager(&self) -> StoreResult<ConnectionManager> {
        {
            let guard = self.manager.read().await;
            if let Some(manager) = guard.as_ref() {
                return Ok(manager.clone());
            }
        }

        let mut guard = self.manager.write().await;
        // A concurrent caller may have connected while we waited.
        if let Some(manager) = guard.as_ref() {
            return Ok(manager.clone());
        }

        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(CONNECT_TIMEOUT)
            .set_number_of_retries(CONNECT_RETRIES);

        let manager = self
            .client
            .get_connection_manager_with_config(config)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        *guard = Some(manager.clone());
        Ok(manager)
    }
}

#[async_trait]
impl StoreClient for RedisStore {
    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.manager().await?;
        redis::cmd("HGETALL")
            .arg(key)
            .query_async::<HashMap<String, String>>(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> StoreResult<()> {
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(*field).arg(value);
        }

        let mut conn = self.manager().await?;
        cmd.query_async::<()>(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn hash_incr(&self, key: &str, field: &str, by: i64) -> StoreResult<i64> {
        let mut conn = self.manager().await?;
        redis::cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(by)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.manager().await?;
        redis::cmd("EXISTS")
            .arg(key)
            .query_async::<bool>(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.manager().await?;
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.manager().await?;
        let response = redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        if response == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Connection(format!(
                "Unexpected PING response: {}",
                response
            )))
        }
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// In-memory store for tests and local development.
#[derive(Default)]
pub struct InMemoryStore {
    hashes: Arc<RwLock<HashMap<String, HashMap<String, String>>>>,
}

impl InMemoryStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreClient for InMemoryStore {
    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let hashes = self.hashes.read().await;
        Ok(hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> StoreResult<()> {
        let mut hashes = self.hashes.write().await;
        let hash = hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert((*field).to_string(), value.clone());
        }
        Ok(())
    }

    async fn hash_incr(&self, key: &str, field: &str, by: i64) -> StoreResult<i64> {
        let mut hashes = self.hashes.write().await;
        let hash = hashes.entry(key.to_string()).or_default();
        let current: i64 = match hash.get(field) {
            Some(value) => value
                .parse()
                .map_err(|_| StoreError::Decode(format!("{} is not an integer", field)))?,
            None => 0,
        };
        let next = current + by;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let hashes = self.hashes.read().await;
        Ok(hashes.contains_key(key))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut hashes = self.hashes.write().await;
        hashes.remove(key);
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
