use crate::{
    codec,
    config::LockOptions,
    epoch::EpochClock,
    record::{LeaseRecord, StoredState},
    storage::{LeaseStore, SwapOutcome},
    Error, Result,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What a leader-election coordinator needs from a lock.
///
/// Each call is independently safe under concurrent use from many processes;
/// callers add no synchronization of their own.
#[async_trait]
pub trait ResourceLock: Send + Sync {
    /// The identity written as holder on create and update.
    fn identity(&self) -> &str;

    /// Human-readable label for diagnostics.
    fn describe(&self) -> String;

    /// Reads the current record along with its raw stored bytes.
    ///
    /// # Errors
    /// `NotFound` when the key is absent, which callers read as an empty
    /// record. `Transport` for store or decoding failures.
    async fn get(&self, cancel: &CancellationToken) -> Result<(LeaseRecord, Vec<u8>)>;

    /// Creates the record if and only if the key is absent.
    ///
    /// # Errors
    /// `AlreadyExists` when another writer got there first.
    async fn create(&self, cancel: &CancellationToken, record: &LeaseRecord) -> Result<()>;

    /// Replaces the record if the stored holder is vacant or this identity.
    ///
    /// # Errors
    /// `NotHolder` when another identity holds the lease, `NotFound` when the
    /// key has been evicted.
    async fn update(&self, cancel: &CancellationToken, record: &LeaseRecord) -> Result<()>;

    /// Best-effort diagnostic sink.
    fn record_event(&self, message: &str);
}

/// A lease lock on one key of a shared store.
#[derive(Debug)]
pub struct DistributedLock {
    store: Arc<dyn LeaseStore>,
    key: String,
    identity: String,
    epochs: EpochClock,
    options: LockOptions,
    events: Mutex<VecDeque<String>>,
}

impl DistributedLock {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        key: impl Into<String>,
        identity: impl Into<String>,
        options: LockOptions,
    ) -> Result<Self> {
        let key = key.into();
        let identity = identity.into();
        if key.is_empty() {
            return Err(Error::Config("lock key must not be empty".to_string()));
        }
        // An empty identity would read as "vacant" and pass every holder check.
        if identity.is_empty() {
            return Err(Error::Config("lock identity must not be empty".to_string()));
        }

        Ok(Self {
            store,
            key,
            identity,
            epochs: EpochClock::new(),
            options,
            events: Mutex::new(VecDeque::new()),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Most recent `record_event` messages, oldest first.
    pub fn recent_events(&self) -> Vec<String> {
        self.events.lock().iter().cloned().collect()
    }

    async fn guarded<T, F>(&self, cancel: &CancellationToken, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let timeout = self.options.op_timeout;
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled { key: self.key.clone() }),
            res = tokio::time::timeout(timeout, op) => match res {
                Ok(inner) => inner,
                Err(_) => Err(Error::DeadlineExceeded { key: self.key.clone(), timeout }),
            },
        }
    }

    fn stored(&self, record: &LeaseRecord) -> Result<(Vec<u8>, String)> {
        record.validate()?;
        let epoch = self.epochs.next_token();
        let raw = codec::encode(&StoredState {
            record: record.clone(),
            epoch: epoch.clone(),
        })?;
        Ok((raw, epoch))
    }
}

#[async_trait]
impl ResourceLock for DistributedLock {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.store.label(), self.key)
    }

    async fn get(&self, cancel: &CancellationToken) -> Result<(LeaseRecord, Vec<u8>)> {
        let raw = self
            .guarded(cancel, self.store.get(&self.key))
            .await?
            .ok_or_else(|| Error::NotFound {
                key: self.key.clone(),
            })?;
        let state = codec::decode(&raw)?;
        Ok((state.record, raw))
    }

    async fn create(&self, cancel: &CancellationToken, record: &LeaseRecord) -> Result<()> {
        let (raw, epoch) = self.stored(record)?;
        let created = self
            .guarded(
                cancel,
                self.store.create(&self.key, &raw, record.lease_duration()),
            )
            .await?;

        if !created {
            debug!(lock = %self.describe(), identity = %self.identity, "create lost to an existing lease");
            return Err(Error::AlreadyExists {
                key: self.key.clone(),
            });
        }
        info!(
            lock = %self.describe(),
            holder = %record.holder_identity,
            epoch = %epoch,
            "lease created"
        );
        Ok(())
    }

    async fn update(&self, cancel: &CancellationToken, record: &LeaseRecord) -> Result<()> {
        let (raw, epoch) = self.stored(record)?;
        let outcome = self
            .guarded(
                cancel,
                self.store.swap_if_holder(
                    &self.key,
                    &self.identity,
                    &raw,
                    record.lease_duration(),
                ),
            )
            .await?;

        match outcome {
            SwapOutcome::Written => {
                debug!(
                    lock = %self.describe(),
                    holder = %record.holder_identity,
                    epoch = %epoch,
                    "lease updated"
                );
                Ok(())
            }
            SwapOutcome::NotHolder => Err(Error::NotHolder {
                key: self.key.clone(),
                identity: self.identity.clone(),
            }),
            SwapOutcome::Missing => Err(Error::NotFound {
                key: self.key.clone(),
            }),
        }
    }

    fn record_event(&self, message: &str) {
        info!(lock = %self.describe(), "[event] {message}");
        if self.options.event_history == 0 {
            return;
        }
        let mut events = self.events.lock();
        while events.len() >= self.options.event_history {
            events.pop_front();
        }
        events.push_back(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use chrono::Utc;

    fn lock(store: &Arc<InMemoryStore>, identity: &str) -> DistributedLock {
        DistributedLock::new(store.clone(), "leader-election:unit", identity, LockOptions::default())
            .unwrap()
    }

    #[test]
    fn test_empty_identity_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let err = DistributedLock::new(store, "k", "", LockOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_describe_names_backend_and_key() {
        let store = Arc::new(InMemoryStore::new());
        assert_eq!(lock(&store, "p1").describe(), "memory/leader-election:unit");
    }

    #[tokio::test]
    async fn test_invalid_record_never_reaches_store() {
        let store = Arc::new(InMemoryStore::new());
        let p1 = lock(&store, "p1");
        let cancel = CancellationToken::new();
        let record = LeaseRecord::acquired_by("p1", 0, Utc::now());

        assert!(matches!(p1.create(&cancel, &record).await, Err(Error::InvalidRecord(_))));
        assert!(p1.get(&cancel).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let store = Arc::new(InMemoryStore::new());
        let p1 = lock(&store, "p1");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let record = LeaseRecord::acquired_by("p1", 15, Utc::now());
        assert!(matches!(p1.create(&cancel, &record).await, Err(Error::Cancelled { .. })));
        assert!(store.remaining_ttl(p1.key()).is_none());
    }

    #[test]
    fn test_event_history_is_bounded() {
        let store = Arc::new(InMemoryStore::new());
        let options = LockOptions {
            event_history: 2,
            ..LockOptions::default()
        };
        let p1 = DistributedLock::new(store, "k", "p1", options).unwrap();

        p1.record_event("one");
        p1.record_event("two");
        p1.record_event("three");
        assert_eq!(p1.recent_events(), vec!["two".to_string(), "three".to_string()]);
    }
}
