//! Topup saga error types.

use common::TopupId;
use ledger::LedgerError;
use thiserror::Error;

use crate::services::PublishError;
use crate::state::SagaStep;

/// Coarse classification of a [`TopupError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The card, topup or saldo does not exist.
    NotFound,
    /// The request or a stored value failed validation.
    Validation,
    /// A ledger read or write failed.
    Persistence,
    /// The state is final but the notification could not be sent.
    Publish,
    /// A compensating write failed on top of the original failure.
    Rollback,
}

/// Errors returned by the topup sagas.
#[derive(Debug, Error)]
pub enum TopupError {
    /// The request was rejected before anything was touched.
    #[error("Invalid topup request: {0}")]
    InvalidRequest(String),

    /// No active card with this number. Carries the masked number.
    #[error("Card not found: {0}")]
    CardNotFound(String),

    /// No active topup with this ID.
    #[error("Topup not found: {0}")]
    TopupNotFound(TopupId),

    /// The card has no stored balance. Carries the masked number.
    #[error("Saldo not found for card {0}")]
    SaldoNotFound(String),

    /// The topup row could not be inserted.
    #[error("Failed to create topup: {0}")]
    TopupCreateFailed(#[source] LedgerError),

    /// The new balance could not be written.
    #[error("Failed to update balance: {0}")]
    BalanceUpdateFailed(#[source] LedgerError),

    /// Applying the amount would overflow the stored balance.
    #[error("Balance overflow: {current} + {delta}")]
    BalanceOverflow { current: i64, delta: i64 },

    /// The card's stored expiry is not a `YYYY-MM-DD` date.
    #[error("Invalid card expire date '{value}': {source}")]
    InvalidExpireDate {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    /// Any other ledger failure, tagged with the step that hit it.
    #[error("Step '{step}' failed: {source}")]
    Ledger {
        step: SagaStep,
        #[source]
        source: LedgerError,
    },

    /// The topup was committed as successful but the notification failed.
    #[error("Topup {topup_id} committed but notification failed: {source}")]
    PublishFailed {
        topup_id: TopupId,
        #[source]
        source: PublishError,
    },

    /// A compensating write failed. `cause` is the failure that triggered it.
    #[error("{cause}; rollback of topup {topup_id} also failed: {rollback}")]
    RollbackFailed {
        topup_id: TopupId,
        cause: Box<TopupError>,
        rollback: LedgerError,
    },
}

impl TopupError {
    /// Returns the error's classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TopupError::InvalidRequest(_)
            | TopupError::BalanceOverflow { .. }
            | TopupError::InvalidExpireDate { .. } => ErrorKind::Validation,
            TopupError::CardNotFound(_)
            | TopupError::TopupNotFound(_)
            | TopupError::SaldoNotFound(_) => ErrorKind::NotFound,
            TopupError::TopupCreateFailed(_)
            | TopupError::BalanceUpdateFailed(_)
            | TopupError::Ledger { .. } => ErrorKind::Persistence,
            TopupError::PublishFailed { .. } => ErrorKind::Publish,
            TopupError::RollbackFailed { .. } => ErrorKind::Rollback,
        }
    }

    /// Returns true if the financial state was committed despite the error.
    ///
    /// Callers may retry the notification out of band; the topup itself
    /// must not be resubmitted.
    pub fn is_committed(&self) -> bool {
        matches!(self, TopupError::PublishFailed { .. })
    }

    /// Returns the original failure, looking through a failed rollback.
    pub fn root_cause(&self) -> &TopupError {
        match self {
            TopupError::RollbackFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

/// Convenience type alias for topup results.
pub type Result<T> = std::result::Result<T, TopupError>;
