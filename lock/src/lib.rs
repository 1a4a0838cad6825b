#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! A TTL-bounded, holder-checked lease lock on a shared key-value store,
//! shaped for leader-election coordinators.
//!
//! The lock is the only mutual-exclusion mechanism: conditional create and an
//! atomic server-side check-and-write on one key, with crashed holders
//! reclaimed by TTL eviction.

pub mod codec;
pub mod config;
pub mod election;
pub mod epoch;
pub mod error;
pub mod lock;
pub mod record;
pub mod redis_store;
pub mod storage;

pub mod test_utils;

pub use config::{LockOptions, RedisConfig};
pub use election::{ElectionConfig, LeaderCallbacks};
pub use error::{Error, Result};
pub use lock::{DistributedLock, ResourceLock};
pub use record::{LeaseRecord, StoredState};
pub use redis_store::RedisStore;
pub use storage::{InMemoryStore, LeaseStore};
