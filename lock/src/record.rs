use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lease duration written by a voluntary release. Short enough that the store
/// evicts the vacant record soon after the holder steps down.
pub const RELEASED_LEASE_SECONDS: i64 = 1;

/// The leader election record kept under the lock key.
///
/// Field names follow the Kubernetes `LeaderElectionRecord` JSON layout so the
/// value stays readable by other tooling. Absent fields decode to zero values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LeaseRecord {
    #[serde(deserialize_with = "crate::codec::null_as_default")]
    pub holder_identity: String,
    pub lease_duration_seconds: i64,
    pub acquire_time: Option<DateTime<Utc>>,
    pub renew_time: Option<DateTime<Utc>>,
    pub leader_transitions: i64,
}

impl LeaseRecord {
    /// A fresh record for `identity` taking a lease that was absent.
    pub fn acquired_by(identity: &str, lease_duration_seconds: i64, now: DateTime<Utc>) -> Self {
        Self {
            holder_identity: identity.to_string(),
            lease_duration_seconds,
            acquire_time: Some(now),
            renew_time: Some(now),
            leader_transitions: 0,
        }
    }

    /// The record `identity` writes over this one when acquiring or renewing.
    ///
    /// Renewal keeps the acquire time and transition count; a holder change
    /// resets the acquire time and bumps the transition count.
    pub fn successor(&self, identity: &str, lease_duration_seconds: i64, now: DateTime<Utc>) -> Self {
        if self.is_held_by(identity) {
            Self {
                holder_identity: identity.to_string(),
                lease_duration_seconds,
                acquire_time: self.acquire_time.or(Some(now)),
                renew_time: Some(now),
                leader_transitions: self.leader_transitions,
            }
        } else {
            Self {
                holder_identity: identity.to_string(),
                lease_duration_seconds,
                acquire_time: Some(now),
                renew_time: Some(now),
                leader_transitions: self.leader_transitions.saturating_add(1),
            }
        }
    }

    /// The vacant record written on voluntary release.
    pub fn released(&self, now: DateTime<Utc>) -> Self {
        Self {
            holder_identity: String::new(),
            lease_duration_seconds: RELEASED_LEASE_SECONDS,
            acquire_time: Some(now),
            renew_time: Some(now),
            leader_transitions: self.leader_transitions,
        }
    }

    pub fn is_vacant(&self) -> bool {
        self.holder_identity.is_empty()
    }

    pub fn is_held_by(&self, identity: &str) -> bool {
        !self.is_vacant() && self.holder_identity == identity
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.lease_duration_seconds).unwrap_or(0))
    }

    /// When the lease lapses if the holder stops renewing.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let renewed = self.renew_time?;
        renewed.checked_add_signed(chrono::Duration::seconds(self.lease_duration_seconds))
    }

    pub fn validate(&self) -> Result<()> {
        if self.lease_duration_seconds <= 0 {
            return Err(Error::InvalidRecord(format!(
                "leaseDurationSeconds must be positive, got {}",
                self.lease_duration_seconds
            )));
        }
        if self.leader_transitions < 0 {
            return Err(Error::InvalidRecord(format!(
                "leaderTransitions must not be negative, got {}",
                self.leader_transitions
            )));
        }
        Ok(())
    }
}

/// What is actually stored under the key: the record plus the write epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredState {
    #[serde(deserialize_with = "crate::codec::null_as_default")]
    pub record: LeaseRecord,
    pub epoch: String,
}
