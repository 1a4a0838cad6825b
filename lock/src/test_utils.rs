use crate::{
    config::LockOptions,
    election::LeaderCallbacks,
    lock::DistributedLock,
    storage::{InMemoryStore, LeaseStore, SwapOutcome},
    Error, Result,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub const TEST_KEY: &str = "leader-election:test";

/// A lock for `identity` on `TEST_KEY` of a shared in-memory store.
pub fn memory_lock(store: &Arc<InMemoryStore>, identity: &str) -> DistributedLock {
    DistributedLock::new(store.clone(), TEST_KEY, identity, LockOptions::default())
        .unwrap_or_else(|e| panic!("test lock for {identity}: {e}"))
}

/// Wraps a store with injected latency and transport failures.
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<dyn LeaseStore>,
    latency: Duration,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn LeaseStore>) -> Self {
        Self {
            inner,
            latency: Duration::ZERO,
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// The next `count` calls fail with a transport error.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn before_call(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::Transport(anyhow::anyhow!("injected connection reset")));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for FlakyStore {
    fn label(&self) -> &str {
        self.inner.label()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.before_call().await?;
        self.inner.get(key).await
    }

    async fn create(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        self.before_call().await?;
        self.inner.create(key, value, ttl).await
    }

    async fn swap_if_holder(
        &self,
        key: &str,
        identity: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<SwapOutcome> {
        self.before_call().await?;
        self.inner.swap_if_holder(key, identity, value, ttl).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackEvent {
    StartedLeading,
    StoppedLeading,
    NewLeader(String),
}

/// Records every callback in order. `on_started_leading` waits for the
/// leading token, like a real leader workload would.
#[derive(Debug, Default)]
pub struct RecordingCallbacks {
    events: Mutex<Vec<CallbackEvent>>,
}

impl RecordingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &CallbackEvent) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }
}

#[async_trait]
impl LeaderCallbacks for RecordingCallbacks {
    async fn on_started_leading(&self, leading: CancellationToken) {
        self.events.lock().push(CallbackEvent::StartedLeading);
        leading.cancelled().await;
    }

    fn on_stopped_leading(&self) {
        self.events.lock().push(CallbackEvent::StoppedLeading);
    }

    fn on_new_leader(&self, identity: &str) {
        self.events
            .lock()
            .push(CallbackEvent::NewLeader(identity.to_string()));
    }
}
