//! Rows owned by the three ledgers.

use chrono::{DateTime, NaiveDate, Utc};
use common::{CardNumber, TopupId};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// A payment card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: i64,
    pub user_id: i64,
    pub card_number: CardNumber,
    /// Expiry as stored, formatted `YYYY-MM-DD`.
    pub expire_date: String,
    pub cvv: String,
    pub card_provider: String,
    /// Contact address used for topup notifications.
    pub email: String,
}

/// Fields for inserting a card.
#[derive(Debug, Clone)]
pub struct NewCard {
    pub user_id: i64,
    pub card_number: CardNumber,
    pub expire_date: NaiveDate,
    pub cvv: String,
    pub card_provider: String,
    pub email: String,
}

/// Fields for re-saving an existing card. The card number is immutable.
#[derive(Debug, Clone)]
pub struct CardUpdate {
    pub card_id: i64,
    pub user_id: i64,
    pub expire_date: NaiveDate,
    pub cvv: String,
    pub card_provider: String,
}

/// The stored balance of a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Saldo {
    pub id: i64,
    pub card_number: CardNumber,
    pub total_balance: i64,
}

/// Lifecycle status of a topup row.
///
/// ```text
/// Pending ──┬──► Success
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TopupStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl TopupStatus {
    /// Returns true for `Success` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TopupStatus::Success | TopupStatus::Failed)
    }

    /// Returns the status as it is stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            TopupStatus::Pending => "pending",
            TopupStatus::Success => "success",
            TopupStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TopupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TopupStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TopupStatus::Pending),
            "success" => Ok(TopupStatus::Success),
            "failed" => Ok(TopupStatus::Failed),
            other => Err(LedgerError::Corrupt {
                entity: "topup",
                reason: format!("unknown status '{other}'"),
            }),
        }
    }
}

/// A topup transaction row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topup {
    pub id: TopupId,
    pub card_number: CardNumber,
    pub amount: i64,
    pub method: String,
    pub status: TopupStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for inserting a topup. New rows start `Pending`.
#[derive(Debug, Clone)]
pub struct NewTopup {
    pub card_number: CardNumber,
    pub amount: i64,
    pub method: String,
}

/// Fields for rewriting a topup's card, amount and method.
#[derive(Debug, Clone)]
pub struct TopupUpdate {
    pub id: TopupId,
    pub card_number: CardNumber,
    pub amount: i64,
    pub method: String,
}
