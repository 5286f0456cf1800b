//! Shared identifier types for the topup gateway.

mod types;

pub use types::{CardNumber, SagaId, TopupId};
