//! The contract between a lock and the leader-election coordinator driving it.
//!
//! The coordinator owns the poll/renew loop; this module supplies the pieces it
//! is built from: timing configuration, the callback surface, and the
//! decision taken on each poll.

use crate::{
    lock::ResourceLock,
    record::LeaseRecord,
    Error, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Renew deadline must exceed the retry period by at least this factor.
pub const JITTER_FACTOR: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionConfig {
    /// How long a grant stays valid without renewal.
    pub lease_duration: Duration,
    /// How long the leader keeps retrying renewal before giving up.
    pub renew_deadline: Duration,
    /// Wait between polls while not leading.
    pub retry_period: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        }
    }
}

impl ElectionConfig {
    pub fn from_secs(lease: u64, renew: u64, retry: u64) -> Result<Self> {
        let config = Self {
            lease_duration: Duration::from_secs(lease),
            renew_deadline: Duration::from_secs(renew),
            retry_period: Duration::from_secs(retry),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lease_duration < Duration::from_secs(1) {
            return Err(Error::Config("lease duration must be at least one second".to_string()));
        }
        if self.renew_deadline.is_zero() {
            return Err(Error::Config("renew deadline must be positive".to_string()));
        }
        if self.retry_period.is_zero() {
            return Err(Error::Config("retry period must be positive".to_string()));
        }
        if self.lease_duration <= self.renew_deadline {
            return Err(Error::Config(
                "lease duration must be greater than renew deadline".to_string(),
            ));
        }
        if self.renew_deadline <= self.retry_period.mul_f64(JITTER_FACTOR) {
            return Err(Error::Config(format!(
                "renew deadline must be greater than retry period * {JITTER_FACTOR}"
            )));
        }
        Ok(())
    }

    /// Lease length as written into the record, in whole seconds.
    pub fn lease_duration_seconds(&self) -> i64 {
        i64::try_from(self.lease_duration.as_secs()).unwrap_or(i64::MAX)
    }
}

/// Leadership notifications fired by the coordinator.
#[async_trait]
pub trait LeaderCallbacks: Send + Sync {
    /// Runs once per acquisition; `leading` is cancelled when leadership ends.
    async fn on_started_leading(&self, leading: CancellationToken);

    /// Fires once when leadership ends, before the leading token is cancelled.
    fn on_stopped_leading(&self);

    /// Fires whenever the observed holder changes, including the first time.
    fn on_new_leader(&self, identity: &str);
}

/// What a poll found under the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Absent,
    Present(LeaseRecord),
}

impl Observation {
    /// Folds a `get` result into an observation. `NotFound` becomes `Absent`;
    /// every other error is passed through.
    pub fn from_get(result: Result<(LeaseRecord, Vec<u8>)>) -> Result<Self> {
        match result {
            Ok((record, _)) => Ok(Observation::Present(record)),
            Err(err) if err.is_not_found() => Ok(Observation::Absent),
            Err(err) => Err(err),
        }
    }

    pub fn holder(&self) -> Option<&str> {
        match self {
            Observation::Present(record) if !record.is_vacant() => Some(record.holder_identity.as_str()),
            _ => None,
        }
    }
}

/// The next call a coordinator makes after a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Create(LeaseRecord),
    Update(LeaseRecord),
    Wait { holder: String, retry_after: Duration },
}

/// Decides the next step for `identity` given what the last poll observed.
pub fn plan(
    observation: &Observation,
    identity: &str,
    config: &ElectionConfig,
    now: DateTime<Utc>,
) -> Action {
    let lease = config.lease_duration_seconds();
    match observation {
        Observation::Absent => Action::Create(LeaseRecord::acquired_by(identity, lease, now)),
        Observation::Present(record) if record.is_vacant() || record.is_held_by(identity) => {
            Action::Update(record.successor(identity, lease, now))
        }
        // The store evicts expired leases, so a record that is still present
        // belongs to a live holder.
        Observation::Present(record) => Action::Wait {
            holder: record.holder_identity.clone(),
            retry_after: config.retry_period,
        },
    }
}

/// Outcome of a single acquire-or-renew attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    Acquired(LeaseRecord),
    Renewed(LeaseRecord),
    HeldBy(String),
}

impl Attempt {
    pub fn is_leading(&self) -> bool {
        matches!(self, Attempt::Acquired(_) | Attempt::Renewed(_))
    }
}

/// One acquire-or-renew step: get, plan, then create or update.
///
/// Lost races come back as `HeldBy` when the winner is known; retrying is the
/// caller's business.
pub async fn try_acquire_or_renew<L: ResourceLock + ?Sized>(
    lock: &L,
    config: &ElectionConfig,
    cancel: &CancellationToken,
) -> Result<Attempt> {
    let observation = Observation::from_get(lock.get(cancel).await)?;
    let was_ours = observation.holder() == Some(lock.identity());

    match plan(&observation, lock.identity(), config, Utc::now()) {
        Action::Create(record) => match lock.create(cancel, &record).await {
            Ok(()) => {
                lock.record_event(&format!("{} became leader", lock.identity()));
                Ok(Attempt::Acquired(record))
            }
            Err(Error::AlreadyExists { .. }) => {
                debug!(lock = %lock.describe(), "lost create race, re-reading holder");
                let holder = Observation::from_get(lock.get(cancel).await)?
                    .holder()
                    .unwrap_or_default()
                    .to_string();
                Ok(Attempt::HeldBy(holder))
            }
            Err(err) => Err(err),
        },
        Action::Update(record) => match lock.update(cancel, &record).await {
            Ok(()) if was_ours => Ok(Attempt::Renewed(record)),
            Ok(()) => {
                lock.record_event(&format!("{} became leader", lock.identity()));
                Ok(Attempt::Acquired(record))
            }
            Err(Error::NotHolder { .. }) => {
                let holder = Observation::from_get(lock.get(cancel).await)?
                    .holder()
                    .unwrap_or_default()
                    .to_string();
                Ok(Attempt::HeldBy(holder))
            }
            Err(err) => Err(err),
        },
        Action::Wait { holder, .. } => Ok(Attempt::HeldBy(holder)),
    }
}

/// Voluntarily gives up the lease if `lock` holds it. Returns whether a
/// release was written.
pub async fn release<L: ResourceLock + ?Sized>(
    lock: &L,
    cancel: &CancellationToken,
) -> Result<bool> {
    let record = match Observation::from_get(lock.get(cancel).await)? {
        Observation::Present(record) if record.is_held_by(lock.identity()) => record,
        _ => return Ok(false),
    };
    lock.update(cancel, &record.released(Utc::now())).await?;
    lock.record_event(&format!("{} stopped leading", lock.identity()));
    info!(lock = %lock.describe(), identity = %lock.identity(), "lease released");
    Ok(true)
}

/// Tracks the last reported holder so `on_new_leader` fires on changes only.
#[derive(Debug, Default)]
pub struct LeaderTracker {
    reported: Option<String>,
}

impl LeaderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the holder to announce if it differs from the last announced
    /// one. Vacancies are not announced, but they reset the tracker so the
    /// next holder always is.
    pub fn observe(&mut self, observation: &Observation) -> Option<String> {
        let Some(holder) = observation.holder() else {
            self.reported = None;
            return None;
        };
        if self.reported.as_deref() == Some(holder) {
            return None;
        }
        self.reported = Some(holder.to_string());
        Some(holder.to_string())
    }

    /// Observes and fires `on_new_leader` when the holder changed.
    pub fn notify(&mut self, observation: &Observation, callbacks: &dyn LeaderCallbacks) {
        if let Some(holder) = self.observe(observation) {
            callbacks.on_new_leader(&holder);
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.reported.as_deref()
    }
}
