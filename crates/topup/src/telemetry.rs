//! Saga metric handles.

use std::collections::HashMap;
use std::time::Instant;

use metrics::{Counter, Histogram};

use crate::state::{SagaOperation, SagaStep};

/// Compensating actions the sagas can run.
pub const COMPENSATION_MARK_FAILED: &str = "mark_failed";
pub const COMPENSATION_RESTORE_AMOUNT: &str = "restore_amount";
pub const COMPENSATION_REVERT_BALANCE: &str = "revert_balance";

const COMPENSATIONS: [&str; 3] = [
    COMPENSATION_MARK_FAILED,
    COMPENSATION_RESTORE_AMOUNT,
    COMPENSATION_REVERT_BALANCE,
];

#[derive(Clone)]
struct OperationMetrics {
    started: Counter,
    completed: Counter,
    duration: Histogram,
    failed: HashMap<SagaStep, Counter>,
}

/// Counters and histograms for the topup sagas.
///
/// Handles are resolved once, when the value is built, and then passed to
/// the orchestrator. Building several orchestrators (as tests do) never
/// re-registers anything globally.
#[derive(Clone)]
pub struct SagaMetrics {
    create: OperationMetrics,
    update: OperationMetrics,
    compensations: HashMap<(&'static str, bool), Counter>,
    publish_failures: Counter,
}

impl SagaMetrics {
    /// Resolves handles against the currently installed recorder.
    pub fn register() -> Self {
        let operation = |op: SagaOperation| OperationMetrics {
            started: metrics::counter!("topup_saga_started_total", "operation" => op.as_str()),
            completed: metrics::counter!("topup_saga_completed_total", "operation" => op.as_str()),
            duration: metrics::histogram!(
                "topup_saga_duration_seconds",
                "operation" => op.as_str()
            ),
            failed: SagaStep::ALL
                .iter()
                .map(|step| {
                    (
                        *step,
                        metrics::counter!(
                            "topup_saga_failed_total",
                            "operation" => op.as_str(),
                            "step" => step.as_str()
                        ),
                    )
                })
                .collect(),
        };

        let mut compensations = HashMap::new();
        for action in COMPENSATIONS {
            for ok in [true, false] {
                let outcome = if ok { "ok" } else { "failed" };
                compensations.insert(
                    (action, ok),
                    metrics::counter!(
                        "topup_compensations_total",
                        "action" => action,
                        "outcome" => outcome
                    ),
                );
            }
        }

        Self {
            create: operation(SagaOperation::Create),
            update: operation(SagaOperation::Update),
            compensations,
            publish_failures: metrics::counter!("topup_publish_failures_total"),
        }
    }

    /// Handles that record nothing.
    pub fn noop() -> Self {
        let operation = || OperationMetrics {
            started: Counter::noop(),
            completed: Counter::noop(),
            duration: Histogram::noop(),
            failed: HashMap::new(),
        };
        Self {
            create: operation(),
            update: operation(),
            compensations: HashMap::new(),
            publish_failures: Counter::noop(),
        }
    }

    fn operation(&self, op: SagaOperation) -> &OperationMetrics {
        match op {
            SagaOperation::Create => &self.create,
            SagaOperation::Update => &self.update,
        }
    }

    /// Counts a saga start and returns its start time.
    pub fn saga_started(&self, op: SagaOperation) -> Instant {
        self.operation(op).started.increment(1);
        Instant::now()
    }

    /// Counts a completed saga and records its duration.
    pub fn saga_completed(&self, op: SagaOperation, started: Instant) {
        let metrics = self.operation(op);
        metrics.completed.increment(1);
        metrics.duration.record(started.elapsed().as_secs_f64());
    }

    /// Counts a saga that failed at `step` and records its duration.
    pub fn saga_failed(&self, op: SagaOperation, step: SagaStep, started: Instant) {
        let metrics = self.operation(op);
        if let Some(counter) = metrics.failed.get(&step) {
            counter.increment(1);
        }
        metrics.duration.record(started.elapsed().as_secs_f64());
    }

    /// Counts a compensating action and whether it succeeded.
    pub fn compensation(&self, action: &'static str, ok: bool) {
        if let Some(counter) = self.compensations.get(&(action, ok)) {
            counter.increment(1);
        }
    }

    /// Counts a failed notification publish.
    pub fn publish_failed(&self) {
        self.publish_failures.increment(1);
    }
}

impl Default for SagaMetrics {
    fn default() -> Self {
        Self::register()
    }
}

impl std::fmt::Debug for SagaMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaMetrics").finish_non_exhaustive()
    }
}
