//! Cooldown tracking for failed providers
//!
//! A provider that fails is excluded from selection until an absolute
//! deadline. Expiry is lazy: entries are compared against `now` at selection
//! time and are never swept. A success removes the entry outright.
//!
//! Transitions:
//! - eligible → cooling down (`mark_failure`, deadline overwritten, never summed)
//! - cooling down → eligible (deadline passed, or `mark_success`)

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

/// Synthetic status recorded for transport failures (timeouts, refused
/// connections, DNS errors).
pub const TRANSPORT_FAILURE_STATUS: u16 = 999;

/// Upper bound on any single cooldown. Retry hints come from upstream
/// responses and may be arbitrarily large.
pub const MAX_COOLDOWN: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Cooldown durations and the set of statuses that trigger failover.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FailoverPolicy {
    /// Fallback cooldown for any failure without a more specific rule.
    pub cooldown_seconds: u64,
    /// Rate limiting without a usable retry hint.
    pub cooldown_429_seconds: u64,
    /// Credential failures (401/403).
    pub cooldown_403_seconds: u64,
    pub retry_on_status: Vec<u16>,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            cooldown_seconds: 60,
            cooldown_429_seconds: 300,
            cooldown_403_seconds: 3600,
            retry_on_status: vec![401, 403, 408, 429, 500, 502, 503, 504],
        }
    }
}

impl FailoverPolicy {
    /// Cooldown for a failure with the given status and optional retry hint.
    ///
    /// The hint is only honoured for 429; every other status uses its
    /// configured duration. The result never exceeds `MAX_COOLDOWN`.
    pub fn cooldown_for(&self, status: u16, retry_after: Option<u64>) -> Duration {
        let secs = match status {
            429 => retry_after
                .filter(|&s| s > 0)
                .unwrap_or(self.cooldown_429_seconds),
            401 | 403 => self.cooldown_403_seconds,
            _ => self.cooldown_seconds,
        };
        Duration::from_secs(secs).min(MAX_COOLDOWN)
    }

    pub fn is_retriable(&self, status: u16) -> bool {
        self.retry_on_status.contains(&status)
    }
}

/// One active cooldown, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CooldownSnapshot {
    pub provider: String,
    pub remaining_secs: u64,
}

/// Provider name → "unavailable until" deadline.
///
/// A single mutex guards the map; every operation is O(1) and the lock is
/// never held across an await.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    entries: Mutex<HashMap<String, Instant>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        // The map holds plain deadlines; a panic elsewhere cannot leave it
        // half-written, so a poisoned lock is still usable.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True iff there is no entry for `name` or its deadline is not after `now`.
    pub fn is_eligible(&self, name: &str, now: Instant) -> bool {
        match self.entries().get(name) {
            Some(until) => *until <= now,
            None => true,
        }
    }

    /// Clear any cooldown for `name`. No-op when none exists.
    pub fn mark_success(&self, name: &str) {
        if self.entries().remove(name).is_some() {
            info!(provider = name, "provider recovered, cooldown cleared");
        }
    }

    /// Put `name` on cooldown from `now` for the policy's duration, replacing
    /// any existing deadline.
    ///
    /// Returns the applied duration.
    pub fn mark_failure(
        &self,
        name: &str,
        status: u16,
        retry_after: Option<u64>,
        now: Instant,
        policy: &FailoverPolicy,
    ) -> Duration {
        self.mark_failure_for(name, status, policy.cooldown_for(status, retry_after), now)
    }

    /// Put `name` on cooldown for an explicit `duration`, capped at
    /// `MAX_COOLDOWN`. `status` is only reported.
    pub fn mark_failure_for(
        &self,
        name: &str,
        status: u16,
        duration: Duration,
        now: Instant,
    ) -> Duration {
        let duration = duration.min(MAX_COOLDOWN);
        let until = now.checked_add(duration).unwrap_or(now);
        self.entries().insert(name.to_string(), until);

        warn!(
            provider = name,
            status,
            cooldown_secs = duration.as_secs(),
            "provider failed, entering cooldown"
        );
        metrics::counter!(
            "gateway_cooldowns_total",
            "provider" => name.to_string(),
            "status" => status.to_string()
        )
        .increment(1);

        duration
    }

    /// Number of stored entries, including ones whose deadline has passed.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Providers still cooling down at `now`, sorted by name.
    pub fn snapshot(&self, now: Instant) -> Vec<CooldownSnapshot> {
        let mut active: Vec<CooldownSnapshot> = self
            .entries()
            .iter()
            .filter(|(_, until)| **until > now)
            .map(|(name, until)| {
                let remaining = *until - now;
                CooldownSnapshot {
                    provider: name.clone(),
                    remaining_secs: remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0),
                }
            })
            .collect();
        active.sort_by(|a, b| a.provider.cmp(&b.provider));
        active
    }
}
