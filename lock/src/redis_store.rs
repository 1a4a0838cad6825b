use crate::{
    config::RedisConfig,
    storage::{LeaseStore, SwapOutcome},
    Error, Result,
};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use std::time::Duration;
use tracing::debug;

// KEYS[1] lease key, ARGV[1] caller identity, ARGV[2] new value, ARGV[3] TTL in ms.
// Returns 1 when written, 0 when another identity holds the lease, -1 when the key is gone.
const SWAP_IF_HOLDER: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return -1
end
local ok, state = pcall(cjson.decode, current)
if not ok then
  return redis.error_reply('ERR lease record is not valid JSON')
end
local holder = ''
if type(state) == 'table' and type(state.record) == 'table'
  and type(state.record.holderIdentity) == 'string' then
  holder = state.record.holderIdentity
end
if holder ~= '' and holder ~= ARGV[1] then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
return 1
"#;

/// Lease storage on a Redis server.
///
/// Create is `SET NX PX`; the holder-checked update runs as one Lua script so
/// the read, the check and the write happen in a single server-side step.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    swap_script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.connection_info()?)?;
        let conn = client.get_connection_manager().await?;
        debug!(address = %config.redacted_address(), "redis connection established");
        Ok(Self::with_connection(conn))
    }

    pub fn with_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            swap_script: Script::new(SWAP_IF_HOLDER),
        }
    }

    /// Round-trips a PING, bounded by `timeout`.
    pub async fn ping(&self, timeout: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = tokio::time::timeout(timeout, redis::cmd("PING").query_async(&mut conn))
            .await
            .map_err(|_| Error::Transport(anyhow::anyhow!("redis PING timed out after {timeout:?}")))??;
        debug!(reply = %pong, "redis ping");
        Ok(())
    }

    /// Remaining TTL of `key`, `None` when the key is absent or has no expiry.
    pub async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl LeaseStore for RedisStore {
    fn label(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        debug!(key, found = raw.is_some(), "redis GET");
        Ok(raw)
    }

    async fn create(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        debug!(key, created = reply.is_some(), "redis SET NX");
        Ok(reply.is_some())
    }

    async fn swap_if_holder(
        &self,
        key: &str,
        identity: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<SwapOutcome> {
        let mut conn = self.conn.clone();
        let mut invocation = self.swap_script.prepare_invoke();
        invocation
            .key(key)
            .arg(identity)
            .arg(value)
            .arg(ttl_millis(ttl));
        let code: i64 = invocation.invoke_async(&mut conn).await?;
        debug!(key, identity, code, "redis swap script");

        match code {
            1 => Ok(SwapOutcome::Written),
            0 => Ok(SwapOutcome::NotHolder),
            -1 => Ok(SwapOutcome::Missing),
            other => Err(Error::Transport(anyhow::anyhow!(
                "unexpected reply {other} from lease swap script"
            ))),
        }
    }
}
