use ledger::Topup;
use serde::{Deserialize, Serialize};

/// A topup as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopupResponse {
    pub id: i64,
    pub card_number: String,
    pub amount: i64,
    pub method: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Topup> for TopupResponse {
    fn from(topup: Topup) -> Self {
        Self {
            id: topup.id.as_i64(),
            card_number: topup.card_number.to_string(),
            amount: topup.amount,
            method: topup.method,
            status: topup.status.to_string(),
            created_at: topup.created_at.to_rfc3339(),
            updated_at: topup.updated_at.to_rfc3339(),
        }
    }
}
