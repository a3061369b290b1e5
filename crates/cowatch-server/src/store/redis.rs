use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, ErrorKind, RedisError};
use tokio::time::timeout;

use super::{Repository, StoreError, StoreResult};

/// Upper bound on any single round trip.
const REDIS_TIMEOUT: Duration = Duration::from_secs(5);

/// Repository backed by a shared Redis server, so several gateway
/// processes can serve the same rooms.
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = Client::open(url).map_err(|e| map_err("connect", e))?;
        let conn = timeout(REDIS_TIMEOUT, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| StoreError::Unavailable("timed out connecting to redis".into()))?
            .map_err(|e| map_err("connect", e))?;
        Ok(Self { conn })
    }

    /// The multiplexed connection is cheap to clone; one clone per call.
    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

fn map_err(key: &str, e: RedisError) -> StoreError {
    if e.kind() == ErrorKind::TypeError || e.code() == Some("WRONGTYPE") {
        StoreError::Corrupt {
            key: key.to_string(),
        }
    } else {
        StoreError::Unavailable(e.to_string())
    }
}

/// Run one redis future under the shared timeout.
async fn bounded<T>(
    key: &str,
    fut: impl std::future::Future<Output = Result<T, RedisError>>,
) -> StoreResult<T> {
    timeout(REDIS_TIMEOUT, fut)
        .await
        .map_err(|_| StoreError::Unavailable(format!("timed out on {key}")))?
        .map_err(|e| map_err(key, e))
}

#[async_trait]
impl Repository for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: String = bounded("PING", redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        bounded(key, conn.exists(key)).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        bounded(key, conn.get(key)).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn();
        let secs = ttl.as_secs().max(1);
        let _: () = bounded(key, conn.set_ex(key, value, secs)).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: () = bounded(key, conn.del(key)).await?;
        Ok(())
    }

    async fn lrange_all(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        bounded(key, conn.lrange(key, 0, -1)).await
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: () = bounded(key, conn.rpush(key, value)).await?;
        Ok(())
    }

    async fn lset(&self, key: &str, index: usize, value: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let index = isize::try_from(index)
            .map_err(|_| StoreError::Unavailable(format!("index {index} out of range")))?;
        let _: () = bounded(key, conn.lset(key, index, value)).await?;
        Ok(())
    }

    async fn replace_list(&self, key: &str, values: &[String]) -> StoreResult<()> {
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        if !values.is_empty() {
            pipe.rpush(key, values).ignore();
        }
        let _: () = bounded(key, pipe.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: () = bounded(key, conn.sadd(key, member)).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: () = bounded(key, conn.srem(key, member)).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        let mut members: Vec<String> = bounded(key, conn.smembers(key)).await?;
        members.sort();
        Ok(members)
    }
}
