//! Orchestrator for the create and update topup sagas.

use std::time::Instant;

use chrono::NaiveDate;
use common::{CardNumber, SagaId, TopupId};
use ledger::{
    Card, CardLedger, CardUpdate, LedgerError, NewTopup, SaldoLedger, Topup, TopupLedger,
    TopupStatus, TopupUpdate,
};

use crate::config::{CompensationPolicy, OrchestratorConfig};
use crate::email::{EmailMessage, TOPUP_CREATED_TOPIC};
use crate::error::TopupError;
use crate::locks::{CardLocks, TopupLocks};
use crate::request::{CreateTopupRequest, UpdateTopupRequest};
use crate::response::TopupResponse;
use crate::services::{NotificationPublisher, PublishError, TopupCache};
use crate::state::{SagaOperation, SagaStep};
use crate::telemetry::{
    COMPENSATION_MARK_FAILED, COMPENSATION_RESTORE_AMOUNT, COMPENSATION_REVERT_BALANCE,
    SagaMetrics,
};

const EXPIRE_DATE_FORMAT: &str = "%Y-%m-%d";

/// A saga that stopped at `step`. Compensation has already run.
#[derive(Debug)]
struct StepFailure {
    step: SagaStep,
    error: TopupError,
}

impl StepFailure {
    fn new(step: SagaStep, error: TopupError) -> Self {
        Self { step, error }
    }
}

/// Runs topup sagas across the card, saldo and topup ledgers.
///
/// None of the ledgers share a transaction, so each saga writes them one
/// after another and compensates when a later write fails:
///
/// - once the topup row exists, every failure marks it `failed`;
/// - an update whose balance write fails restores the previous amount;
/// - a failure after the balance write keeps the balance change unless
///   [`CompensationPolicy::RevertBalance`] is configured.
///
/// Compensating writes are best effort. Their failures are logged and
/// reported alongside the original error, never instead of it.
pub struct TopupOrchestrator<C, S, T, P, K>
where
    C: CardLedger,
    S: SaldoLedger,
    T: TopupLedger,
    P: NotificationPublisher,
    K: TopupCache,
{
    cards: C,
    saldos: S,
    topups: T,
    publisher: P,
    cache: K,
    locks: CardLocks,
    topup_locks: TopupLocks,
    metrics: SagaMetrics,
    config: OrchestratorConfig,
}

impl<C, S, T, P, K> TopupOrchestrator<C, S, T, P, K>
where
    C: CardLedger,
    S: SaldoLedger,
    T: TopupLedger,
    P: NotificationPublisher,
    K: TopupCache,
{
    /// Creates an orchestrator with default settings.
    pub fn new(cards: C, saldos: S, topups: T, publisher: P, cache: K) -> Self {
        Self {
            cards,
            saldos,
            topups,
            publisher,
            cache,
            locks: CardLocks::new(),
            topup_locks: TopupLocks::new(),
            metrics: SagaMetrics::default(),
            config: OrchestratorConfig::default(),
        }
    }

    /// Replaces the settings.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the metric handles.
    pub fn with_metrics(mut self, metrics: SagaMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the active settings.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Tops up a card's balance.
    ///
    /// On success the topup is `success`, the balance is incremented by the
    /// amount and one notification has been published. A
    /// [`TopupError::PublishFailed`] error means all of that happened except
    /// the notification.
    #[tracing::instrument(
        skip(self, req),
        fields(
            saga_id = %SagaId::new(),
            operation = "create",
            card = %req.card_number.masked(),
            amount = req.amount
        )
    )]
    pub async fn create_topup(&self, req: &CreateTopupRequest) -> Result<TopupResponse, TopupError> {
        let started = self.metrics.saga_started(SagaOperation::Create);
        let result = self.run_create(req).await;
        self.finish(SagaOperation::Create, started, result)
            .map(TopupResponse::from)
    }

    /// Changes a topup's amount and applies the difference to the balance.
    ///
    /// If the balance write fails the previous amount is restored. Either way
    /// a failed update leaves the topup `failed`.
    #[tracing::instrument(
        skip(self, req),
        fields(
            saga_id = %SagaId::new(),
            operation = "update",
            topup_id = %req.topup_id,
            card = %req.card_number.masked(),
            amount = req.amount
        )
    )]
    pub async fn update_topup(&self, req: &UpdateTopupRequest) -> Result<TopupResponse, TopupError> {
        let started = self.metrics.saga_started(SagaOperation::Update);
        let result = self.run_update(req).await;
        self.finish(SagaOperation::Update, started, result)
            .map(TopupResponse::from)
    }

    async fn run_create(&self, req: &CreateTopupRequest) -> Result<Topup, StepFailure> {
        req.validate()
            .map_err(|error| StepFailure::new(SagaStep::ValidateRequest, error))?;

        // 1. Validate the card
        tracing::info!(step = %SagaStep::ValidateCard, "saga step started");
        let card = self
            .cards
            .find_card_by_number(&req.card_number)
            .await
            .map_err(|e| {
                StepFailure::new(SagaStep::ValidateCard, card_lookup_error(&req.card_number, e))
            })?;

        // 2. Create the pending topup
        tracing::info!(step = %SagaStep::CreateTopup, "saga step started");
        let topup = self
            .topups
            .create_topup(NewTopup {
                card_number: req.card_number.clone(),
                amount: req.amount,
                method: req.method.clone(),
            })
            .await
            .map_err(|e| StepFailure::new(SagaStep::CreateTopup, TopupError::TopupCreateFailed(e)))?;
        let topup_id = topup.id;

        // 3. Read and increment the balance
        {
            let _guard = self.locks.lock(&req.card_number).await;

            tracing::info!(step = %SagaStep::ReadBalance, %topup_id, "saga step started");
            let saldo = match self.saldos.find_saldo_by_card_number(&req.card_number).await {
                Ok(saldo) => saldo,
                Err(e) => {
                    let error = saldo_lookup_error(&req.card_number, e);
                    return Err(self.abort(SagaStep::ReadBalance, Some(topup_id), error).await);
                }
            };

            tracing::info!(step = %SagaStep::WriteBalance, %topup_id, "saga step started");
            let Some(new_total) = saldo.total_balance.checked_add(req.amount) else {
                let error = TopupError::BalanceOverflow {
                    current: saldo.total_balance,
                    delta: req.amount,
                };
                return Err(self.abort(SagaStep::WriteBalance, Some(topup_id), error).await);
            };
            if let Err(e) = self.saldos.update_balance(&req.card_number, new_total).await {
                let error = TopupError::BalanceUpdateFailed(e);
                return Err(self.abort(SagaStep::WriteBalance, Some(topup_id), error).await);
            }
        }

        // 4. Re-save the card
        tracing::info!(step = %SagaStep::RefreshCard, %topup_id, "saga step started");
        if let Err(error) = self.refresh_card(&card).await {
            return Err(self
                .late_failure(SagaStep::RefreshCard, topup_id, &req.card_number, req.amount, None, error)
                .await);
        }

        // 5. Mark the topup successful
        tracing::info!(step = %SagaStep::MarkSuccess, %topup_id, "saga step started");
        let topup = match self
            .topups
            .update_topup_status(topup_id, TopupStatus::Success)
            .await
        {
            Ok(topup) => topup,
            Err(source) => {
                let error = TopupError::Ledger {
                    step: SagaStep::MarkSuccess,
                    source,
                };
                return Err(self
                    .late_failure(SagaStep::MarkSuccess, topup_id, &req.card_number, req.amount, None, error)
                    .await);
            }
        };
        self.cache.invalidate(topup_id).await;

        // 6. Publish the notification
        tracing::info!(step = %SagaStep::Notify, %topup_id, "saga step started");
        if let Err(source) = self.publish_success(&card, &topup).await {
            return Err(StepFailure::new(
                SagaStep::Notify,
                TopupError::PublishFailed { topup_id, source },
            ));
        }

        Ok(topup)
    }

    async fn run_update(&self, req: &UpdateTopupRequest) -> Result<Topup, StepFailure> {
        req.validate()
            .map_err(|error| StepFailure::new(SagaStep::ValidateRequest, error))?;
        let topup_id = req.topup_id;

        // Held until the saga ends so the delta is taken from a settled amount
        let _topup_guard = self.topup_locks.lock(&topup_id).await;

        // 1. Validate the card
        tracing::info!(step = %SagaStep::ValidateCard, "saga step started");
        if let Err(e) = self.cards.find_card_by_number(&req.card_number).await {
            let error = card_lookup_error(&req.card_number, e);
            return Err(self.abort(SagaStep::ValidateCard, Some(topup_id), error).await);
        }

        // 2. Load the topup being changed
        tracing::info!(step = %SagaStep::LoadTopup, "saga step started");
        let existing = match self.topups.find_topup_by_id(topup_id).await {
            Ok(topup) => topup,
            Err(e) => {
                let error = topup_lookup_error(SagaStep::LoadTopup, topup_id, e);
                return Err(self.abort(SagaStep::LoadTopup, Some(topup_id), error).await);
            }
        };
        let delta = req.amount - existing.amount;

        // 3. Write the new amount
        tracing::info!(step = %SagaStep::WriteAmount, delta, "saga step started");
        if let Err(source) = self
            .topups
            .update_topup(TopupUpdate {
                id: topup_id,
                card_number: req.card_number.clone(),
                amount: req.amount,
                method: req.method.clone(),
            })
            .await
        {
            let error = TopupError::Ledger {
                step: SagaStep::WriteAmount,
                source,
            };
            return Err(self.abort(SagaStep::WriteAmount, Some(topup_id), error).await);
        }

        // 4. Apply the difference to the balance
        {
            let _guard = self.locks.lock(&req.card_number).await;

            tracing::info!(step = %SagaStep::ReadBalance, "saga step started");
            let saldo = match self.saldos.find_saldo_by_card_number(&req.card_number).await {
                Ok(saldo) => saldo,
                Err(e) => {
                    let error = saldo_lookup_error(&req.card_number, e);
                    return Err(self.abort(SagaStep::ReadBalance, Some(topup_id), error).await);
                }
            };

            tracing::info!(step = %SagaStep::WriteBalance, "saga step started");
            let written = match saldo.total_balance.checked_add(delta) {
                Some(new_total) => self
                    .saldos
                    .update_balance(&req.card_number, new_total)
                    .await
                    .map(|_| ())
                    .map_err(TopupError::BalanceUpdateFailed),
                None => Err(TopupError::BalanceOverflow {
                    current: saldo.total_balance,
                    delta,
                }),
            };
            if let Err(cause) = written {
                let error = self.restore_amount(topup_id, existing.amount, cause).await;
                return Err(self.abort(SagaStep::WriteBalance, Some(topup_id), error).await);
            }
        }

        // 5. Re-read the updated topup
        tracing::info!(step = %SagaStep::ReloadTopup, "saga step started");
        if let Err(e) = self.topups.find_topup_by_id(topup_id).await {
            let error = topup_lookup_error(SagaStep::ReloadTopup, topup_id, e);
            return Err(self
                .late_failure(
                    SagaStep::ReloadTopup,
                    topup_id,
                    &req.card_number,
                    delta,
                    Some(existing.amount),
                    error,
                )
                .await);
        }

        // 6. Mark the topup successful
        tracing::info!(step = %SagaStep::MarkSuccess, "saga step started");
        let topup = match self
            .topups
            .update_topup_status(topup_id, TopupStatus::Success)
            .await
        {
            Ok(topup) => topup,
            Err(source) => {
                let error = TopupError::Ledger {
                    step: SagaStep::MarkSuccess,
                    source,
                };
                return Err(self
                    .late_failure(
                        SagaStep::MarkSuccess,
                        topup_id,
                        &req.card_number,
                        delta,
                        Some(existing.amount),
                        error,
                    )
                    .await);
            }
        };
        self.cache.invalidate(topup_id).await;

        Ok(topup)
    }

    /// Records the outcome of a saga run.
    fn finish(
        &self,
        op: SagaOperation,
        started: Instant,
        result: Result<Topup, StepFailure>,
    ) -> Result<Topup, TopupError> {
        match result {
            Ok(topup) => {
                self.metrics.saga_completed(op, started);
                tracing::info!(
                    topup_id = %topup.id,
                    status = %topup.status,
                    duration = started.elapsed().as_secs_f64(),
                    "topup saga completed"
                );
                Ok(topup)
            }
            Err(StepFailure {
                step: SagaStep::Notify,
                error,
            }) => {
                // The topup is final; only the notification is missing
                self.metrics.saga_completed(op, started);
                self.metrics.publish_failed();
                tracing::warn!(error = %error, "topup committed but notification failed");
                Err(error)
            }
            Err(StepFailure { step, error }) => {
                self.metrics.saga_failed(op, step, started);
                tracing::warn!(%step, kind = ?error.kind(), error = %error, "topup saga failed");
                Err(error)
            }
        }
    }

    /// Marks the topup failed (if one exists) and wraps the error.
    async fn abort(
        &self,
        step: SagaStep,
        topup_id: Option<TopupId>,
        error: TopupError,
    ) -> StepFailure {
        if let Some(id) = topup_id {
            self.mark_failed(id).await;
        }
        StepFailure::new(step, error)
    }

    /// Handles a failure after the balance has been written.
    ///
    /// `delta` is what was added to the balance; `previous_amount` is the
    /// amount to restore on the topup row, for updates.
    async fn late_failure(
        &self,
        step: SagaStep,
        topup_id: TopupId,
        card_number: &CardNumber,
        delta: i64,
        previous_amount: Option<i64>,
        cause: TopupError,
    ) -> StepFailure {
        let error = match self.config.compensation {
            CompensationPolicy::KeepBalance => {
                tracing::warn!(
                    %step,
                    %topup_id,
                    delta,
                    "balance change kept although the topup failed"
                );
                cause
            }
            CompensationPolicy::RevertBalance => {
                let error = self.revert_balance(topup_id, card_number, delta, cause).await;
                match previous_amount {
                    Some(amount) => self.restore_amount(topup_id, amount, error).await,
                    None => error,
                }
            }
        };
        self.abort(step, Some(topup_id), error).await
    }

    /// Writes the terminal `failed` status. Never fails the caller.
    async fn mark_failed(&self, topup_id: TopupId) {
        match self
            .topups
            .update_topup_status(topup_id, TopupStatus::Failed)
            .await
        {
            Ok(_) => {
                self.metrics.compensation(COMPENSATION_MARK_FAILED, true);
                tracing::info!(%topup_id, "topup marked failed");
            }
            Err(e) => {
                self.metrics.compensation(COMPENSATION_MARK_FAILED, false);
                tracing::error!(%topup_id, error = %e, "failed to mark topup as failed");
            }
        }
        self.cache.invalidate(topup_id).await;
    }

    /// Puts the topup's amount back to `amount`.
    async fn restore_amount(&self, topup_id: TopupId, amount: i64, cause: TopupError) -> TopupError {
        match self.topups.update_topup_amount(topup_id, amount).await {
            Ok(_) => {
                self.metrics.compensation(COMPENSATION_RESTORE_AMOUNT, true);
                tracing::info!(%topup_id, amount, "topup amount restored");
                cause
            }
            Err(rollback) => {
                self.metrics.compensation(COMPENSATION_RESTORE_AMOUNT, false);
                tracing::error!(%topup_id, amount, error = %rollback, "failed to restore topup amount");
                TopupError::RollbackFailed {
                    topup_id,
                    cause: Box::new(cause),
                    rollback,
                }
            }
        }
    }

    /// Subtracts `delta` from the card's balance.
    async fn revert_balance(
        &self,
        topup_id: TopupId,
        card_number: &CardNumber,
        delta: i64,
        cause: TopupError,
    ) -> TopupError {
        let _guard = self.locks.lock(card_number).await;

        let reverted = match self.saldos.find_saldo_by_card_number(card_number).await {
            Ok(saldo) => self
                .saldos
                .update_balance(card_number, saldo.total_balance.saturating_sub(delta))
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        match reverted {
            Ok(()) => {
                self.metrics.compensation(COMPENSATION_REVERT_BALANCE, true);
                tracing::info!(%topup_id, delta, "balance change reverted");
                cause
            }
            Err(rollback) => {
                self.metrics.compensation(COMPENSATION_REVERT_BALANCE, false);
                tracing::error!(%topup_id, delta, error = %rollback, "failed to revert balance");
                TopupError::RollbackFailed {
                    topup_id,
                    cause: Box::new(cause),
                    rollback,
                }
            }
        }
    }

    /// Re-saves the card with its current values.
    async fn refresh_card(&self, card: &Card) -> Result<(), TopupError> {
        let expire_date = NaiveDate::parse_from_str(&card.expire_date, EXPIRE_DATE_FORMAT)
            .map_err(|source| TopupError::InvalidExpireDate {
                value: card.expire_date.clone(),
                source,
            })?;

        self.cards
            .update_card(CardUpdate {
                card_id: card.id,
                user_id: card.user_id,
                expire_date,
                cvv: card.cvv.clone(),
                card_provider: card.card_provider.clone(),
            })
            .await
            .map(|_| ())
            .map_err(|source| TopupError::Ledger {
                step: SagaStep::RefreshCard,
                source,
            })
    }

    async fn publish_success(&self, card: &Card, topup: &Topup) -> Result<(), PublishError> {
        let payload = EmailMessage::topup_success(card, topup).to_payload()?;
        self.publisher
            .send(TOPUP_CREATED_TOPIC, &topup.id.to_string(), payload)
            .await
    }
}

fn card_lookup_error(card_number: &CardNumber, source: LedgerError) -> TopupError {
    if source.is_not_found() {
        TopupError::CardNotFound(card_number.masked())
    } else {
        TopupError::Ledger {
            step: SagaStep::ValidateCard,
            source,
        }
    }
}

fn saldo_lookup_error(card_number: &CardNumber, source: LedgerError) -> TopupError {
    if source.is_not_found() {
        TopupError::SaldoNotFound(card_number.masked())
    } else {
        TopupError::Ledger {
            step: SagaStep::ReadBalance,
            source,
        }
    }
}

fn topup_lookup_error(step: SagaStep, topup_id: TopupId, source: LedgerError) -> TopupError {
    if source.is_not_found() {
        TopupError::TopupNotFound(topup_id)
    } else {
        TopupError::Ledger { step, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{InMemoryPublisher, InMemoryTopupCache};
    use crate::ErrorKind;
    use ledger::{InMemoryLedger, LedgerOp, NewCard};

    type TestOrchestrator = TopupOrchestrator<
        InMemoryLedger,
        InMemoryLedger,
        InMemoryLedger,
        InMemoryPublisher,
        InMemoryTopupCache,
    >;

    const CARD: &str = "4111-1111";

    async fn setup() -> (TestOrchestrator, InMemoryLedger, InMemoryPublisher) {
        let ledger = InMemoryLedger::new();
        let publisher = InMemoryPublisher::new();
        ledger
            .create_card(NewCard {
                user_id: 1,
                card_number: CardNumber::new(CARD),
                expire_date: NaiveDate::from_ymd_opt(2030, 12, 31).unwrap(),
                cvv: "123".to_string(),
                card_provider: "visa".to_string(),
                email: "owner@example.com".to_string(),
            })
            .await
            .unwrap();
        ledger
            .create_saldo(&CardNumber::new(CARD), 100_000)
            .await
            .unwrap();

        let orchestrator = TopupOrchestrator::new(
            ledger.clone(),
            ledger.clone(),
            ledger.clone(),
            publisher.clone(),
            InMemoryTopupCache::new(),
        )
        .with_metrics(SagaMetrics::noop());

        (orchestrator, ledger, publisher)
    }

    async fn balance(ledger: &InMemoryLedger) -> i64 {
        ledger
            .find_saldo_by_card_number(&CardNumber::new(CARD))
            .await
            .unwrap()
            .total_balance
    }

    #[tokio::test]
    async fn test_happy_path() {
        let (orchestrator, ledger, publisher) = setup().await;

        let response = orchestrator
            .create_topup(&CreateTopupRequest::new(CARD, 50_000, "bri"))
            .await
            .unwrap();

        assert_eq!(response.status, "success");
        assert_eq!(response.amount, 50_000);
        assert_eq!(balance(&ledger).await, 150_000);
        assert_eq!(publisher.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_request_touches_nothing() {
        let (orchestrator, ledger, publisher) = setup().await;

        let err = orchestrator
            .create_topup(&CreateTopupRequest::new(CARD, 0, "bri"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(ledger.call_count(LedgerOp::FindCard).await, 0);
        assert_eq!(ledger.topup_count().await, 0);
        assert_eq!(publisher.attempts().await, 0);
    }

    #[tokio::test]
    async fn test_card_not_found_creates_no_topup() {
        let (orchestrator, ledger, _) = setup().await;

        let err = orchestrator
            .create_topup(&CreateTopupRequest::new("9999-0000", 10, "bri"))
            .await
            .unwrap_err();

        assert!(matches!(err, TopupError::CardNotFound(_)));
        assert_eq!(ledger.topup_count().await, 0);
    }

    #[tokio::test]
    async fn test_card_lookup_outage_is_persistence() {
        let (orchestrator, ledger, _) = setup().await;
        ledger.fail_on(LedgerOp::FindCard).await;

        let err = orchestrator
            .create_topup(&CreateTopupRequest::new(CARD, 10, "bri"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TopupError::Ledger {
                step: SagaStep::ValidateCard,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_mark_failed_failure_does_not_mask_cause() {
        let (orchestrator, ledger, _) = setup().await;
        ledger.fail_on(LedgerOp::UpdateBalance).await;
        ledger.fail_on(LedgerOp::UpdateTopupStatus).await;

        let err = orchestrator
            .create_topup(&CreateTopupRequest::new(CARD, 10, "bri"))
            .await
            .unwrap_err();

        assert!(matches!(err, TopupError::BalanceUpdateFailed(_)));
        assert_eq!(ledger.call_count(LedgerOp::UpdateTopupStatus).await, 1);
    }

    #[tokio::test]
    async fn test_balance_overflow_marks_failed() {
        let (orchestrator, ledger, _) = setup().await;
        ledger
            .update_balance(&CardNumber::new(CARD), i64::MAX)
            .await
            .unwrap();

        let err = orchestrator
            .create_topup(&CreateTopupRequest::new(CARD, 1, "bri"))
            .await
            .unwrap_err();

        assert!(matches!(err, TopupError::BalanceOverflow { .. }));
        assert_eq!(balance(&ledger).await, i64::MAX);
        let topup = ledger.find_topup_by_id(TopupId::new(1)).await.unwrap();
        assert_eq!(topup.status, TopupStatus::Failed);
    }

    #[tokio::test]
    async fn test_update_missing_topup() {
        let (orchestrator, ledger, _) = setup().await;

        let err = orchestrator
            .update_topup(&UpdateTopupRequest::new(TopupId::new(42), CARD, 10, "bri"))
            .await
            .unwrap_err();

        assert!(matches!(err, TopupError::TopupNotFound(id) if id == TopupId::new(42)));
        assert_eq!(balance(&ledger).await, 100_000);
    }

    #[test]
    fn test_lookup_errors_map_not_found() {
        let card = CardNumber::new(CARD);
        assert!(matches!(
            card_lookup_error(&card, LedgerError::not_found("card", "x")),
            TopupError::CardNotFound(_)
        ));
        assert!(matches!(
            saldo_lookup_error(&card, LedgerError::Unavailable("down".into())),
            TopupError::Ledger {
                step: SagaStep::ReadBalance,
                ..
            }
        ));
        assert!(matches!(
            topup_lookup_error(
                SagaStep::ReloadTopup,
                TopupId::new(1),
                LedgerError::not_found("topup", 1)
            ),
            TopupError::TopupNotFound(_)
        ));
    }
}
