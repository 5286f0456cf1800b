//! Integration tests for the topup sagas.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{CardNumber, TopupId};
use ledger::{
    Card, CardLedger, CardUpdate, InMemoryLedger, LedgerOp, NewCard, NewTopup, SaldoLedger,
    Topup, TopupLedger, TopupStatus, TopupUpdate,
};
use topup::{
    CompensationPolicy, CreateTopupRequest, EmailMessage, ErrorKind, InMemoryPublisher,
    InMemoryTopupCache, OrchestratorConfig, SagaMetrics, TOPUP_CREATED_TOPIC, TopupError,
    TopupOrchestrator, UpdateTopupRequest,
};

const CARD: &str = "4111-1111";
const OPENING_BALANCE: i64 = 100_000;

type TestOrchestrator = TopupOrchestrator<
    InMemoryLedger,
    InMemoryLedger,
    InMemoryLedger,
    InMemoryPublisher,
    InMemoryTopupCache,
>;

struct TestHarness {
    orchestrator: TestOrchestrator,
    ledger: InMemoryLedger,
    publisher: InMemoryPublisher,
    cache: InMemoryTopupCache,
}

impl TestHarness {
    async fn new() -> Self {
        Self::with_policy(CompensationPolicy::KeepBalance).await
    }

    async fn with_policy(compensation: CompensationPolicy) -> Self {
        let ledger = InMemoryLedger::new();
        let publisher = InMemoryPublisher::new();
        let cache = InMemoryTopupCache::new();
        seed_card(&ledger).await;

        let orchestrator = TopupOrchestrator::new(
            ledger.clone(),
            ledger.clone(),
            ledger.clone(),
            publisher.clone(),
            cache.clone(),
        )
        .with_config(OrchestratorConfig {
            compensation,
            ..OrchestratorConfig::default()
        })
        .with_metrics(SagaMetrics::noop());

        Self {
            orchestrator,
            ledger,
            publisher,
            cache,
        }
    }

    async fn balance(&self) -> i64 {
        self.ledger
            .find_saldo_by_card_number(&CardNumber::new(CARD))
            .await
            .unwrap()
            .total_balance
    }

    async fn status(&self, id: i64) -> TopupStatus {
        self.ledger
            .find_topup_by_id(TopupId::new(id))
            .await
            .unwrap()
            .status
    }

    async fn create(&self, amount: i64) -> Result<topup::TopupResponse, TopupError> {
        self.orchestrator
            .create_topup(&CreateTopupRequest::new(CARD, amount, "bri"))
            .await
    }

    async fn update(&self, id: i64, amount: i64) -> Result<topup::TopupResponse, TopupError> {
        self.orchestrator
            .update_topup(&UpdateTopupRequest::new(
                TopupId::new(id),
                CARD,
                amount,
                "mandiri",
            ))
            .await
    }
}

async fn seed_card(ledger: &InMemoryLedger) {
    ledger
        .create_card(NewCard {
            user_id: 7,
            card_number: CardNumber::new(CARD),
            expire_date: NaiveDate::from_ymd_opt(2030, 12, 31).unwrap(),
            cvv: "123".to_string(),
            card_provider: "visa".to_string(),
            email: "owner@example.com".to_string(),
        })
        .await
        .unwrap();
    ledger
        .create_saldo(&CardNumber::new(CARD), OPENING_BALANCE)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_create_happy_path() {
    let h = TestHarness::new().await;

    let response = h.create(50_000).await.unwrap();

    assert_eq!(response.status, "success");
    assert_eq!(response.amount, 50_000);
    assert_eq!(response.card_number, CARD);
    assert_eq!(h.balance().await, 150_000);
    assert_eq!(h.status(response.id).await, TopupStatus::Success);

    let messages = h.publisher.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].topic, TOPUP_CREATED_TOPIC);
    assert_eq!(messages[0].key, response.id.to_string());

    let email: EmailMessage = messages[0].json().unwrap();
    assert_eq!(email.email, "owner@example.com");
    assert_eq!(email.subject, "Topup Successful");
    assert!(!email.body.contains(CARD));
}

#[tokio::test]
async fn test_create_balance_write_failure_marks_failed() {
    let h = TestHarness::new().await;
    h.ledger.fail_on(LedgerOp::UpdateBalance).await;

    let err = h.create(50_000).await.unwrap_err();

    assert!(matches!(err, TopupError::BalanceUpdateFailed(_)));
    assert_eq!(err.kind(), ErrorKind::Persistence);
    assert_eq!(h.balance().await, OPENING_BALANCE);
    assert_eq!(h.status(1).await, TopupStatus::Failed);
    assert_eq!(h.publisher.attempts().await, 0);
    assert!(h.cache.invalidations().await >= 1);
}

#[tokio::test]
async fn test_create_saldo_read_failure_marks_failed() {
    let h = TestHarness::new().await;
    h.ledger.fail_on(LedgerOp::FindSaldo).await;

    let err = h.create(10).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Persistence);
    assert_eq!(h.status(1).await, TopupStatus::Failed);
}

#[tokio::test]
async fn test_create_card_refresh_failure_keeps_balance_by_default() {
    let h = TestHarness::new().await;
    h.ledger.fail_on(LedgerOp::UpdateCard).await;

    let err = h.create(50_000).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Persistence);
    assert_eq!(h.balance().await, 150_000);
    assert_eq!(h.status(1).await, TopupStatus::Failed);
    assert_eq!(h.publisher.attempts().await, 0);
}

#[tokio::test]
async fn test_create_card_refresh_failure_reverts_balance_when_configured() {
    let h = TestHarness::with_policy(CompensationPolicy::RevertBalance).await;
    h.ledger.fail_on(LedgerOp::UpdateCard).await;

    let err = h.create(50_000).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Persistence);
    assert_eq!(h.balance().await, OPENING_BALANCE);
    assert_eq!(h.status(1).await, TopupStatus::Failed);
}

#[tokio::test]
async fn test_create_publish_failure_is_committed() {
    let h = TestHarness::new().await;
    h.publisher.set_fail_on_send(true).await;

    let err = h.create(50_000).await.unwrap_err();

    assert!(err.is_committed());
    assert_eq!(err.kind(), ErrorKind::Publish);
    assert!(matches!(err, TopupError::PublishFailed { topup_id, .. } if topup_id == TopupId::new(1)));
    assert_eq!(h.balance().await, 150_000);
    assert_eq!(h.status(1).await, TopupStatus::Success);
    assert_eq!(h.publisher.attempts().await, 1);
}

#[tokio::test]
async fn test_create_unknown_card_creates_nothing() {
    let h = TestHarness::new().await;

    let err = h
        .orchestrator
        .create_topup(&CreateTopupRequest::new("5500-0000", 10, "bri"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.ledger.topup_count().await, 0);
    assert_eq!(h.balance().await, OPENING_BALANCE);
}

#[tokio::test]
async fn test_exactly_one_terminal_status_per_run() {
    let h = TestHarness::new().await;
    h.create(10).await.unwrap();
    h.ledger.fail_on(LedgerOp::UpdateBalance).await;
    h.create(10).await.unwrap_err();

    let writes = h.ledger.status_writes().await;
    assert_eq!(
        writes,
        vec![
            (TopupId::new(1), TopupStatus::Success),
            (TopupId::new(2), TopupStatus::Failed),
        ]
    );
}

#[tokio::test]
async fn test_retry_after_failure_creates_new_topup() {
    let h = TestHarness::new().await;
    h.ledger.fail_on(LedgerOp::UpdateBalance).await;
    h.create(10).await.unwrap_err();
    h.ledger.clear_fault(LedgerOp::UpdateBalance).await;

    let response = h.create(10).await.unwrap();

    assert_eq!(response.id, 2);
    assert_eq!(h.status(1).await, TopupStatus::Failed);
    assert_eq!(h.balance().await, OPENING_BALANCE + 10);
}

#[tokio::test]
async fn test_concurrent_creates_on_same_card_accumulate() {
    let h = Arc::new(TestHarness::new().await);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move { h.create(1_000).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.balance().await, OPENING_BALANCE + 20 * 1_000);
    assert_eq!(h.publisher.messages().await.len(), 20);
}

#[tokio::test]
async fn test_update_applies_delta() {
    let h = TestHarness::new().await;
    h.create(50_000).await.unwrap();

    let response = h.update(1, 70_000).await.unwrap();

    assert_eq!(response.amount, 70_000);
    assert_eq!(response.method, "mandiri");
    assert_eq!(response.status, "success");
    assert_eq!(h.balance().await, 170_000);
}

#[tokio::test]
async fn test_update_decrease_applies_negative_delta() {
    let h = TestHarness::new().await;
    h.create(50_000).await.unwrap();

    h.update(1, 20_000).await.unwrap();

    assert_eq!(h.balance().await, 120_000);
}

#[tokio::test]
async fn test_update_balance_failure_restores_amount() {
    let h = TestHarness::new().await;
    h.create(50_000).await.unwrap();
    h.ledger.fail_on(LedgerOp::UpdateBalance).await;

    let err = h.update(1, 70_000).await.unwrap_err();

    assert!(matches!(err, TopupError::BalanceUpdateFailed(_)));
    assert_eq!(h.balance().await, 150_000);
    assert_eq!(
        h.ledger.amount_writes().await,
        vec![(TopupId::new(1), 50_000)]
    );
    let topup = h.ledger.find_topup_by_id(TopupId::new(1)).await.unwrap();
    assert_eq!(topup.amount, 50_000);
    assert_eq!(topup.status, TopupStatus::Failed);
}

#[tokio::test]
async fn test_update_restore_failure_reports_rollback() {
    let h = TestHarness::new().await;
    h.create(50_000).await.unwrap();
    h.ledger.fail_on(LedgerOp::UpdateBalance).await;
    h.ledger.fail_on(LedgerOp::UpdateTopupAmount).await;

    let err = h.update(1, 70_000).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Rollback);
    assert!(matches!(err.root_cause(), TopupError::BalanceUpdateFailed(_)));
    assert_eq!(h.status(1).await, TopupStatus::Failed);
}

#[tokio::test]
async fn test_update_reload_failure_keeps_balance_by_default() {
    let h = TestHarness::new().await;
    h.create(50_000).await.unwrap();
    // Load and reload both read the topup; fail only the reload
    let reads_so_far = h.ledger.call_count(LedgerOp::FindTopup).await;
    h.ledger
        .fail_from_call(LedgerOp::FindTopup, reads_so_far + 2)
        .await;

    let err = h.update(1, 70_000).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Persistence);
    assert_eq!(h.balance().await, 170_000);
    h.ledger.clear_fault(LedgerOp::FindTopup).await;
    assert_eq!(h.status(1).await, TopupStatus::Failed);
}

#[tokio::test]
async fn test_update_reload_failure_reverts_when_configured() {
    let h = TestHarness::with_policy(CompensationPolicy::RevertBalance).await;
    h.create(50_000).await.unwrap();
    let reads_so_far = h.ledger.call_count(LedgerOp::FindTopup).await;
    h.ledger
        .fail_from_call(LedgerOp::FindTopup, reads_so_far + 2)
        .await;

    let err = h.update(1, 70_000).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Persistence);
    assert_eq!(h.balance().await, 150_000);
    h.ledger.clear_fault(LedgerOp::FindTopup).await;
    let topup = h.ledger.find_topup_by_id(TopupId::new(1)).await.unwrap();
    assert_eq!(topup.amount, 50_000);
    assert_eq!(topup.status, TopupStatus::Failed);
}

#[tokio::test]
async fn test_update_does_not_notify() {
    let h = TestHarness::new().await;
    h.create(50_000).await.unwrap();

    h.update(1, 60_000).await.unwrap();

    assert_eq!(h.publisher.messages().await.len(), 1);
}

#[tokio::test]
async fn test_update_unknown_card_marks_failed() {
    let h = TestHarness::new().await;
    h.create(50_000).await.unwrap();

    let err = h
        .orchestrator
        .update_topup(&UpdateTopupRequest::new(
            TopupId::new(1),
            "9999-0000",
            70_000,
            "mandiri",
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, TopupError::CardNotFound(_)));
    assert_eq!(h.status(1).await, TopupStatus::Failed);
    assert_eq!(h.balance().await, 150_000);
    assert_eq!(h.ledger.call_count(LedgerOp::UpdateTopup).await, 0);
}

#[tokio::test]
async fn test_update_amount_write_failure_leaves_balance() {
    let h = TestHarness::new().await;
    h.create(50_000).await.unwrap();
    h.ledger.fail_on(LedgerOp::UpdateTopup).await;

    let err = h.update(1, 70_000).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Persistence);
    assert_eq!(h.balance().await, 150_000);
    assert_eq!(h.ledger.call_count(LedgerOp::UpdateBalance).await, 1);
    let topup = h.ledger.find_topup_by_id(TopupId::new(1)).await.unwrap();
    assert_eq!(topup.amount, 50_000);
    assert_eq!(topup.status, TopupStatus::Failed);
}

#[tokio::test]
async fn test_update_saldo_read_failure_marks_failed_without_restore() {
    let h = TestHarness::new().await;
    h.create(50_000).await.unwrap();
    h.ledger.fail_on(LedgerOp::FindSaldo).await;

    let err = h.update(1, 70_000).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Persistence);
    assert!(h.ledger.amount_writes().await.is_empty());
    let topup = h.ledger.find_topup_by_id(TopupId::new(1)).await.unwrap();
    assert_eq!(topup.amount, 70_000);
    assert_eq!(topup.status, TopupStatus::Failed);
    h.ledger.clear_fault(LedgerOp::FindSaldo).await;
    assert_eq!(h.balance().await, 150_000);
}

#[tokio::test]
async fn test_update_invalidates_cache() {
    let h = TestHarness::new().await;
    h.create(50_000).await.unwrap();
    let after_create = h.cache.invalidations().await;

    h.update(1, 70_000).await.unwrap();

    assert_eq!(h.cache.invalidations().await, after_create + 1);
}

/// Topup ledger that stalls after every read, widening the window between
/// loading a topup and writing it back.
#[derive(Clone)]
struct SlowTopupReads(InMemoryLedger);

#[async_trait]
impl TopupLedger for SlowTopupReads {
    async fn create_topup(&self, topup: NewTopup) -> ledger::Result<Topup> {
        self.0.create_topup(topup).await
    }

    async fn find_topup_by_id(&self, id: TopupId) -> ledger::Result<Topup> {
        let topup = self.0.find_topup_by_id(id).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        topup
    }

    async fn update_topup(&self, update: TopupUpdate) -> ledger::Result<Topup> {
        self.0.update_topup(update).await
    }

    async fn update_topup_amount(&self, id: TopupId, amount: i64) -> ledger::Result<Topup> {
        self.0.update_topup_amount(id, amount).await
    }

    async fn update_topup_status(
        &self,
        id: TopupId,
        status: TopupStatus,
    ) -> ledger::Result<Topup> {
        self.0.update_topup_status(id, status).await
    }

    async fn trash_topup(&self, id: TopupId) -> ledger::Result<Topup> {
        self.0.trash_topup(id).await
    }

    async fn restore_topup(&self, id: TopupId) -> ledger::Result<Topup> {
        self.0.restore_topup(id).await
    }

    async fn delete_topup_permanent(&self, id: TopupId) -> ledger::Result<()> {
        self.0.delete_topup_permanent(id).await
    }
}

#[tokio::test]
async fn test_concurrent_updates_of_same_topup_apply_delta_once() {
    let ledger = InMemoryLedger::new();
    seed_card(&ledger).await;
    let orchestrator = TopupOrchestrator::new(
        ledger.clone(),
        ledger.clone(),
        SlowTopupReads(ledger.clone()),
        InMemoryPublisher::new(),
        InMemoryTopupCache::new(),
    )
    .with_metrics(SagaMetrics::noop());
    orchestrator
        .create_topup(&CreateTopupRequest::new(CARD, 50_000, "bri"))
        .await
        .unwrap();

    let request = UpdateTopupRequest::new(TopupId::new(1), CARD, 70_000, "mandiri");
    let (first, second) = tokio::join!(
        orchestrator.update_topup(&request),
        orchestrator.update_topup(&request),
    );
    first.unwrap();
    second.unwrap();

    let balance = ledger
        .find_saldo_by_card_number(&CardNumber::new(CARD))
        .await
        .unwrap()
        .total_balance;
    assert_eq!(balance, 170_000);
    let topup = ledger.find_topup_by_id(TopupId::new(1)).await.unwrap();
    assert_eq!(topup.amount, 70_000);
    assert_eq!(topup.status, TopupStatus::Success);
}

/// Card ledger whose stored expiry cannot be parsed.
struct MalformedExpiryCards(InMemoryLedger);

#[async_trait]
impl CardLedger for MalformedExpiryCards {
    async fn create_card(&self, card: NewCard) -> ledger::Result<Card> {
        self.0.create_card(card).await
    }

    async fn find_card_by_number(&self, card_number: &CardNumber) -> ledger::Result<Card> {
        let mut card = self.0.find_card_by_number(card_number).await?;
        card.expire_date = "12/30".to_string();
        Ok(card)
    }

    async fn find_card_by_id(&self, card_id: i64) -> ledger::Result<Card> {
        self.0.find_card_by_id(card_id).await
    }

    async fn update_card(&self, update: CardUpdate) -> ledger::Result<Card> {
        self.0.update_card(update).await
    }

    async fn trash_card(&self, card_id: i64) -> ledger::Result<Card> {
        self.0.trash_card(card_id).await
    }

    async fn restore_card(&self, card_id: i64) -> ledger::Result<Card> {
        self.0.restore_card(card_id).await
    }

    async fn delete_card_permanent(&self, card_id: i64) -> ledger::Result<()> {
        self.0.delete_card_permanent(card_id).await
    }
}

#[tokio::test]
async fn test_malformed_expiry_fails_card_refresh() {
    let ledger = InMemoryLedger::new();
    seed_card(&ledger).await;
    let orchestrator = TopupOrchestrator::new(
        MalformedExpiryCards(ledger.clone()),
        ledger.clone(),
        ledger.clone(),
        InMemoryPublisher::new(),
        InMemoryTopupCache::new(),
    )
    .with_metrics(SagaMetrics::noop());

    let err = orchestrator
        .create_topup(&CreateTopupRequest::new(CARD, 500, "bri"))
        .await
        .unwrap_err();

    assert!(matches!(err, TopupError::InvalidExpireDate { .. }));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(ledger.call_count(LedgerOp::UpdateCard).await, 0);
    assert_eq!(
        ledger
            .find_topup_by_id(TopupId::new(1))
            .await
            .unwrap()
            .status,
        TopupStatus::Failed
    );
}
