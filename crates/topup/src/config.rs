//! Orchestrator settings.

use std::time::Duration;

/// What to do with an already-written balance when a later step fails.
///
/// `KeepBalance` leaves the balance incremented while the topup is marked
/// `failed`; this is the long-standing behavior. `RevertBalance` undoes the
/// balance change (and, for updates, restores the previous amount) before
/// the topup is marked `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompensationPolicy {
    #[default]
    KeepBalance,
    RevertBalance,
}

/// Settings for [`crate::TopupOrchestrator`] and [`crate::TopupQuery`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub compensation: CompensationPolicy,
    /// Lifetime of cached topup reads.
    pub cache_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            compensation: CompensationPolicy::KeepBalance,
            cache_ttl: Duration::from_secs(300),
        }
    }
}
