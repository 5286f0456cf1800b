//! Saga operations and the steps they run through.

use serde::{Deserialize, Serialize};

/// The two sagas the orchestrator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaOperation {
    Create,
    Update,
}

impl SagaOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaOperation::Create => "create",
            SagaOperation::Update => "update",
        }
    }
}

impl std::fmt::Display for SagaOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A step of a topup saga.
///
/// Create runs:
/// ```text
/// ValidateCard ──► CreateTopup ──► ReadBalance ──► WriteBalance ──► RefreshCard ──► MarkSuccess ──► Notify
/// ```
///
/// Update runs:
/// ```text
/// ValidateCard ──► LoadTopup ──► WriteAmount ──► ReadBalance ──► WriteBalance ──► ReloadTopup ──► MarkSuccess
/// ```
///
/// A failure at any step after the topup row exists ends with the row
/// marked `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaStep {
    ValidateRequest,
    ValidateCard,
    CreateTopup,
    LoadTopup,
    WriteAmount,
    ReadBalance,
    WriteBalance,
    RefreshCard,
    ReloadTopup,
    MarkSuccess,
    Notify,
}

impl SagaStep {
    pub const ALL: [SagaStep; 11] = [
        SagaStep::ValidateRequest,
        SagaStep::ValidateCard,
        SagaStep::CreateTopup,
        SagaStep::LoadTopup,
        SagaStep::WriteAmount,
        SagaStep::ReadBalance,
        SagaStep::WriteBalance,
        SagaStep::RefreshCard,
        SagaStep::ReloadTopup,
        SagaStep::MarkSuccess,
        SagaStep::Notify,
    ];

    /// Returns the step name used in logs, metrics and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::ValidateRequest => "validate_request",
            SagaStep::ValidateCard => "validate_card",
            SagaStep::CreateTopup => "create_topup",
            SagaStep::LoadTopup => "load_topup",
            SagaStep::WriteAmount => "write_amount",
            SagaStep::ReadBalance => "read_balance",
            SagaStep::WriteBalance => "write_balance",
            SagaStep::RefreshCard => "refresh_card",
            SagaStep::ReloadTopup => "reload_topup",
            SagaStep::MarkSuccess => "mark_success",
            SagaStep::Notify => "notify",
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
