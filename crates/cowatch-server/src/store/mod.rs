pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{StoreBackend, StoreConfig};

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Registry of room codes considered alive for lobby purposes.
pub const ACTIVE_ROOMS_KEY: &str = "active_rooms";

/// Key holding a room's JSON state.
pub fn room_key(code: &str) -> String {
    format!("room:{code}")
}

/// Key holding a room's ordered roster.
pub fn members_key(code: &str) -> String {
    format!("room:{code}:members")
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt value at {key}")]
    Corrupt { key: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Shared, TTL-capable key/value store: strings, ordered lists and sets.
///
/// Every call is independent; there are no transactions spanning calls.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    /// Set a string value with an expiry.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;
    async fn del(&self, key: &str) -> StoreResult<()>;

    /// Whole list, in order. A missing key reads as empty.
    async fn lrange_all(&self, key: &str) -> StoreResult<Vec<String>>;
    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()>;
    /// Overwrite the element at `index`.
    async fn lset(&self, key: &str, index: usize, value: &str) -> StoreResult<()>;
    /// Delete the list and push `values` in order (nothing is pushed when
    /// `values` is empty, leaving the key absent).
    async fn replace_list(&self, key: &str, values: &[String]) -> StoreResult<()>;

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()>;
    async fn srem(&self, key: &str, member: &str) -> StoreResult<()>;
    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;
}

pub type SharedRepository = Arc<dyn Repository>;

/// Open the configured backend.
pub async fn connect(config: &StoreConfig) -> StoreResult<SharedRepository> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-process memory store");
            Ok(Arc::new(MemoryStore::new()))
        },
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.redis_url).await?;
            store.ping().await?;
            tracing::info!("Connected to Redis store");
            Ok(Arc::new(store))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(room_key("1234"), "room:1234");
        assert_eq!(members_key("1234"), "room:1234:members");
        assert_eq!(ACTIVE_ROOMS_KEY, "active_rooms");
    }

    #[tokio::test]
    async fn connect_memory_backend() {
        let cfg = StoreConfig::default();
        let store = connect(&cfg).await.unwrap();
        store.ping().await.unwrap();
        assert!(!store.exists("room:1").await.unwrap());
    }
}
