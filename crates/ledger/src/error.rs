use thiserror::Error;

/// Errors that can occur when interacting with a ledger gateway.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The requested row does not exist (or has been trashed).
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A row with the same natural key already exists.
    #[error("{entity} already exists: {key}")]
    AlreadyExists { entity: &'static str, key: String },

    /// A stored value could not be decoded into its domain type.
    #[error("Corrupt {entity} row: {reason}")]
    Corrupt { entity: &'static str, reason: String },

    /// The backing store rejected or failed the operation.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl LedgerError {
    /// Shorthand for a not-found error.
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Returns true if this error means the row is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::NotFound { .. })
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message() {
        let err = LedgerError::not_found("topup", 12);
        assert_eq!(err.to_string(), "topup not found: 12");
        assert!(err.is_not_found());
    }

    #[test]
    fn unavailable_is_not_not_found() {
        assert!(!LedgerError::Unavailable("down".into()).is_not_found());
    }
}
