//! Saga inputs.

use common::{CardNumber, TopupId};
use serde::Deserialize;

use crate::error::{Result, TopupError};

/// Input of the create saga.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTopupRequest {
    pub card_number: CardNumber,
    pub amount: i64,
    pub method: String,
}

impl CreateTopupRequest {
    pub fn new(card_number: impl Into<CardNumber>, amount: i64, method: impl Into<String>) -> Self {
        Self {
            card_number: card_number.into(),
            amount,
            method: method.into(),
        }
    }

    /// Rejects blank card numbers and methods and non-positive amounts.
    pub fn validate(&self) -> Result<()> {
        validate_fields(&self.card_number, self.amount, &self.method)
    }
}

/// Input of the update saga.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTopupRequest {
    pub topup_id: TopupId,
    pub card_number: CardNumber,
    pub amount: i64,
    pub method: String,
}

impl UpdateTopupRequest {
    pub fn new(
        topup_id: TopupId,
        card_number: impl Into<CardNumber>,
        amount: i64,
        method: impl Into<String>,
    ) -> Self {
        Self {
            topup_id,
            card_number: card_number.into(),
            amount,
            method: method.into(),
        }
    }

    /// Same rules as [`CreateTopupRequest::validate`], plus a positive ID.
    pub fn validate(&self) -> Result<()> {
        if self.topup_id.as_i64() <= 0 {
            return Err(TopupError::InvalidRequest(
                "topup id must be positive".to_string(),
            ));
        }
        validate_fields(&self.card_number, self.amount, &self.method)
    }
}

fn validate_fields(card_number: &CardNumber, amount: i64, method: &str) -> Result<()> {
    if card_number.is_blank() {
        return Err(TopupError::InvalidRequest(
            "card number is required".to_string(),
        ));
    }
    if amount <= 0 {
        return Err(TopupError::InvalidRequest(format!(
            "amount must be positive, got {amount}"
        )));
    }
    if method.trim().is_empty() {
        return Err(TopupError::InvalidRequest(
            "topup method is required".to_string(),
        ));
    }
    Ok(())
}
