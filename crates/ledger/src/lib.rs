//! Ledger gateways for the three aggregates a topup touches.
//!
//! Each gateway exposes point operations on a single aggregate (card,
//! saldo, topup) and nothing spanning more than one row. Sequencing and
//! compensation across gateways belong to the caller.

pub mod error;
pub mod gateway;
pub mod memory;
pub mod model;
pub mod postgres;

pub use common::{CardNumber, TopupId};
pub use error::{LedgerError, Result};
pub use gateway::{CardLedger, SaldoLedger, TopupLedger};
pub use memory::{InMemoryLedger, LedgerOp};
pub use model::{Card, CardUpdate, NewCard, NewTopup, Saldo, Topup, TopupStatus, TopupUpdate};
pub use postgres::PostgresLedger;
