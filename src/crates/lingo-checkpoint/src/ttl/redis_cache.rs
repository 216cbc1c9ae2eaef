//! Redis-backed [`ExpiringCache`]
//!
//! Multi-key mutations run as Lua scripts so a checkpoint, its writes and the
//! latest pointer change in one server-side step. The connection is opened
//! lazily on first use and multiplexed across all callers.

use super::cache::{CacheError, CacheResult, ExpiringCache};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::time::Duration;
use tokio::sync::OnceCell;

// KEYS[1] = thread prefix, ARGV[1] = ttl in ms, ARGV[2] = record, ARGV[3..] = writes
// Re-arms two keys per earlier checkpoint, so runtime grows with the thread.
const APPEND_SCRIPT: &str = r#"
local prefix = KEYS[1]
local ttl = tonumber(ARGV[1])
local seq = tonumber(redis.call('GET', prefix .. ':latest') or '0') + 1
for i = 1, seq - 1 do
  redis.call('PEXPIRE', prefix .. ':' .. i, ttl)
  redis.call('PEXPIRE', prefix .. ':' .. i .. ':writes', ttl)
end
redis.call('SET', prefix .. ':' .. seq, ARGV[2], 'PX', ttl)
if #ARGV > 2 then
  local wkey = prefix .. ':' .. seq .. ':writes'
  for i = 3, #ARGV do
    redis.call('RPUSH', wkey, ARGV[i])
  end
  redis.call('PEXPIRE', wkey, ttl)
end
redis.call('SET', prefix .. ':latest', seq, 'PX', ttl)
return seq
"#;

// KEYS[1] = guard key, KEYS[2] = list key, ARGV = values
const PUSH_IF_EXISTS_SCRIPT: &str = r#"
local pttl = redis.call('PTTL', KEYS[1])
if pttl == -2 then
  return 0
end
for i = 1, #ARGV do
  redis.call('RPUSH', KEYS[2], ARGV[i])
end
if pttl > 0 then
  redis.call('PEXPIRE', KEYS[2], pttl)
end
return 1
"#;

// KEYS[1] = thread prefix
const DELETE_LOG_SCRIPT: &str = r#"
local prefix = KEYS[1]
local latest = tonumber(redis.call('GET', prefix .. ':latest') or '0')
for i = 1, latest do
  redis.call('DEL', prefix .. ':' .. i, prefix .. ':' .. i .. ':writes')
end
redis.call('DEL', prefix .. ':latest')
return latest
"#;

impl From<RedisError> for CacheError {
    fn from(err: RedisError) -> Self {
        if err.is_io_error() || err.is_connection_refusal() || err.is_timeout() {
            CacheError::Unavailable(err.to_string())
        } else {
            CacheError::Command(err.to_string())
        }
    }
}

/// Shared cache on a Redis server
pub struct RedisCache {
    client: Client,
    conn: OnceCell<MultiplexedConnection>,
    append: Script,
    push_if_exists: Script,
    delete_log: Script,
}

impl RedisCache {
    /// Parse `url` without connecting; the first operation connects.
    pub fn open(url: &str) -> CacheResult<Self> {
        let client = Client::open(url).map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            append: Script::new(APPEND_SCRIPT),
            push_if_exists: Script::new(PUSH_IF_EXISTS_SCRIPT),
            delete_log: Script::new(DELETE_LOG_SCRIPT),
        })
    }

    async fn connection(&self) -> CacheResult<MultiplexedConnection> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                tracing::debug!("connecting to redis checkpoint cache");
                self.client.get_multiplexed_async_connection().await
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl ExpiringCache for RedisCache {
    fn durable(&self) -> bool {
        true
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn append(
        &self,
        prefix: &str,
        record: Vec<u8>,
        writes: Vec<Vec<u8>>,
        ttl: Duration,
    ) -> CacheResult<u64> {
        let mut conn = self.connection().await?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let mut invocation = self.append.prepare_invoke();
        invocation.key(prefix).arg(ttl_ms).arg(record);
        for write in writes {
            invocation.arg(write);
        }
        let seq: u64 = invocation.invoke_async(&mut conn).await?;
        Ok(seq)
    }

    async fn push_if_exists(
        &self,
        guard_key: &str,
        list_key: &str,
        values: Vec<Vec<u8>>,
    ) -> CacheResult<bool> {
        let mut conn = self.connection().await?;

        let mut invocation = self.push_if_exists.prepare_invoke();
        invocation.key(guard_key).key(list_key);
        for value in values {
            invocation.arg(value);
        }
        let pushed: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(pushed == 1)
    }

    async fn list_range(&self, key: &str) -> CacheResult<Vec<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let values: Vec<Vec<u8>> = conn.lrange(key, 0, -1).await?;
        Ok(values)
    }

    async fn delete_log(&self, prefix: &str) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let removed: u64 = self.delete_log.key(prefix).invoke_async(&mut conn).await?;
        tracing::debug!(prefix, removed, "deleted redis checkpoint log");
        Ok(())
    }
}
