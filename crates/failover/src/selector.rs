//! Candidate selection

use tokio::time::Instant;

use crate::cooldown::CooldownTracker;
use crate::registry::{Protocol, ProviderRecord, Registry};

/// Providers speaking `protocol` that are not cooling down at `now`, ordered
/// by ascending priority.
///
/// The sort is stable, so equal priorities keep declaration order. An empty
/// result is a normal outcome.
pub fn select_candidates<'a>(
    registry: &'a Registry,
    cooldowns: &CooldownTracker,
    protocol: Protocol,
    now: Instant,
) -> Vec<&'a ProviderRecord> {
    let mut candidates: Vec<&ProviderRecord> = registry
        .iter()
        .filter(|p| p.protocol == protocol)
        .filter(|p| cooldowns.is_eligible(&p.name, now))
        .collect();
    candidates.sort_by_key(|p| p.priority);
    candidates
}
