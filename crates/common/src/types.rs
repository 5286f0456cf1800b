use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a topup row.
///
/// Assigned by the topup ledger on insert. Its decimal rendering is the
/// message key used when publishing topup notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopupId(i64);

impl TopupId {
    /// Creates a topup ID from its raw value.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for TopupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TopupId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TopupId> for i64 {
    fn from(id: TopupId) -> Self {
        id.0
    }
}

/// Card number, the natural key shared by cards, saldos and topups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardNumber(String);

impl CardNumber {
    /// Creates a card number from a string.
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    /// Returns the card number as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the card number is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Returns the card number with everything but the last four
    /// characters replaced by `*`, for use in logs.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let visible = chars.len() - 4;
        chars
            .iter()
            .enumerate()
            .map(|(i, c)| if i < visible && *c != '-' { '*' } else { *c })
            .collect()
    }
}

impl std::fmt::Display for CardNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CardNumber {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CardNumber {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for CardNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Correlation identifier for a single saga execution.
///
/// Not persisted; it ties together the spans and log lines emitted while
/// one create or update runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SagaId(Uuid);

impl SagaId {
    /// Creates a new random saga ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SagaId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SagaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
