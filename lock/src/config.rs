use crate::{Error, Result};
use redis::{ConnectionAddr, ConnectionInfo, IntoConnectionInfo, RedisConnectionInfo};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_REDIS_ADDRESS: &str = "localhost:6379";
pub const DEFAULT_LOCK_KEY: &str = "leader-election:demo";

/// How to reach the Redis server holding the lease.
///
/// `address` is either `host:port` or a `redis://` / `rediss://` URL. The
/// explicit fields override whatever the URL carries.
#[derive(Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: i64,
    pub tls: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_REDIS_ADDRESS.to_string(),
            username: None,
            password: None,
            db: 0,
            tls: false,
        }
    }
}

impl RedisConfig {
    pub fn is_url(&self) -> bool {
        self.address.starts_with("redis://") || self.address.starts_with("rediss://")
    }

    /// Address safe to log: URLs may embed credentials, so they are masked.
    pub fn redacted_address(&self) -> String {
        if self.is_url() {
            "[redis URL masked]".to_string()
        } else {
            self.address.clone()
        }
    }

    pub fn connection_info(&self) -> Result<ConnectionInfo> {
        let mut info = if self.is_url() {
            self.address
                .as_str()
                .into_connection_info()
                .map_err(|e| Error::Config(format!("invalid redis URL: {e}")))?
        } else {
            let (host, port) = split_host_port(&self.address)?;
            ConnectionInfo {
                addr: ConnectionAddr::Tcp(host, port),
                redis: RedisConnectionInfo::default(),
            }
        };

        if let Some(username) = self.username.as_ref().filter(|u| !u.is_empty()) {
            info.redis.username = Some(username.clone());
        }
        if let Some(password) = self.password.as_ref().filter(|p| !p.is_empty()) {
            info.redis.password = Some(password.clone());
        }
        if self.db != 0 {
            info.redis.db = self.db;
        }
        if self.tls {
            if let ConnectionAddr::Tcp(host, port) = info.addr {
                info.addr = ConnectionAddr::TcpTls {
                    host,
                    port,
                    insecure: false,
                    tls_params: None,
                };
            }
        }
        Ok(info)
    }
}

impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("address", &self.redacted_address())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("db", &self.db)
            .field("tls", &self.tls)
            .finish()
    }
}

fn split_host_port(address: &str) -> Result<(String, u16)> {
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("invalid port in redis address {address:?}")))?;
            Ok((host.to_string(), port))
        }
        Some(_) => Err(Error::Config(format!("missing host in redis address {address:?}"))),
        None if !address.is_empty() => Ok((address.to_string(), 6379)),
        None => Err(Error::Config("redis address is empty".to_string())),
    }
}

/// Per-lock settings that are not part of the lease record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Upper bound on one store round-trip.
    pub op_timeout: Duration,
    /// How many `record_event` messages to keep for inspection.
    pub event_history: usize,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_secs(5),
            event_history: 64,
        }
    }
}
