//! Topup saga orchestration.
//!
//! A topup touches three aggregates that share no database transaction:
//! the card, its stored balance (saldo) and the topup row itself. The
//! orchestrator sequences the writes and runs compensating actions when a
//! later step fails after an earlier one committed.
//!
//! The create saga follows these steps:
//! 1. Validate the card
//! 2. Create the topup row (pending)
//! 3. Read and increment the balance
//! 4. Re-save the card
//! 5. Mark the topup successful
//! 6. Publish the notification email
//!
//! Once the topup row exists, any failure marks it `failed` before the
//! error is returned.

pub mod config;
pub mod email;
pub mod error;
pub mod locks;
pub mod orchestrator;
pub mod query;
pub mod request;
pub mod response;
pub mod services;
pub mod state;
pub mod telemetry;

pub use config::{CompensationPolicy, OrchestratorConfig};
pub use email::{EmailMessage, TOPUP_CREATED_TOPIC};
pub use error::{ErrorKind, TopupError};
pub use locks::{CardLocks, KeyedLocks, TopupLocks};
pub use orchestrator::TopupOrchestrator;
pub use query::TopupQuery;
pub use request::{CreateTopupRequest, UpdateTopupRequest};
pub use response::TopupResponse;
pub use services::{
    InMemoryPublisher, InMemoryTopupCache, LoggingPublisher, NotificationPublisher, PublishError,
    PublishedMessage, TopupCache,
};
pub use state::{SagaOperation, SagaStep};
pub use telemetry::SagaMetrics;
