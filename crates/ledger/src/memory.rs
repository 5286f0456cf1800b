use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{CardNumber, TopupId};
use tokio::sync::RwLock;

use crate::gateway::{CardLedger, SaldoLedger, TopupLedger};
use crate::model::{Card, CardUpdate, NewCard, NewTopup, Saldo, Topup, TopupStatus, TopupUpdate};
use crate::{LedgerError, Result};

/// Ledger operations that can be observed and made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    CreateCard,
    FindCard,
    UpdateCard,
    CreateSaldo,
    FindSaldo,
    UpdateBalance,
    CreateTopup,
    FindTopup,
    UpdateTopup,
    UpdateTopupAmount,
    UpdateTopupStatus,
    Trash,
    Restore,
    DeletePermanent,
}

impl LedgerOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerOp::CreateCard => "create_card",
            LedgerOp::FindCard => "find_card",
            LedgerOp::UpdateCard => "update_card",
            LedgerOp::CreateSaldo => "create_saldo",
            LedgerOp::FindSaldo => "find_saldo",
            LedgerOp::UpdateBalance => "update_balance",
            LedgerOp::CreateTopup => "create_topup",
            LedgerOp::FindTopup => "find_topup",
            LedgerOp::UpdateTopup => "update_topup",
            LedgerOp::UpdateTopupAmount => "update_topup_amount",
            LedgerOp::UpdateTopupStatus => "update_topup_status",
            LedgerOp::Trash => "trash",
            LedgerOp::Restore => "restore",
            LedgerOp::DeletePermanent => "delete_permanent",
        }
    }
}

impl std::fmt::Display for LedgerOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
struct Row<T> {
    value: T,
    trashed: bool,
}

impl<T> Row<T> {
    fn active(value: T) -> Self {
        Self {
            value,
            trashed: false,
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    cards: BTreeMap<i64, Row<Card>>,
    saldos: BTreeMap<i64, Row<Saldo>>,
    topups: BTreeMap<TopupId, Row<Topup>>,
    next_card_id: i64,
    next_saldo_id: i64,
    next_topup_id: i64,
    /// Operation -> 1-based call number from which every call fails.
    faults: HashMap<LedgerOp, usize>,
    calls: HashMap<LedgerOp, usize>,
    amount_writes: Vec<(TopupId, i64)>,
    status_writes: Vec<(TopupId, TopupStatus)>,
}

impl LedgerState {
    fn enter(&mut self, op: LedgerOp) -> Result<()> {
        let count = self.calls.entry(op).or_insert(0);
        *count += 1;
        match self.faults.get(&op) {
            Some(from) if *count >= *from => Err(LedgerError::Unavailable(format!(
                "injected failure on {op} (call {count})"
            ))),
            _ => Ok(()),
        }
    }

    fn card_mut(&mut self, card_id: i64) -> Result<&mut Row<Card>> {
        self.cards
            .get_mut(&card_id)
            .filter(|row| !row.trashed)
            .ok_or_else(|| LedgerError::not_found("card", card_id))
    }

    fn saldo_by_number_mut(&mut self, card_number: &CardNumber) -> Result<&mut Row<Saldo>> {
        self.saldos
            .values_mut()
            .find(|row| !row.trashed && &row.value.card_number == card_number)
            .ok_or_else(|| LedgerError::not_found("saldo", card_number.masked()))
    }

    fn topup_mut(&mut self, id: TopupId) -> Result<&mut Row<Topup>> {
        self.topups
            .get_mut(&id)
            .filter(|row| !row.trashed)
            .ok_or_else(|| LedgerError::not_found("topup", id))
    }
}

/// In-memory implementation of all three ledgers.
///
/// Every operation can be made to fail through [`InMemoryLedger::fail_on`]
/// and [`InMemoryLedger::fail_from_call`], and every call is counted, so
/// saga paths can be driven and observed deterministically.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call to `op` fail from now on.
    pub async fn fail_on(&self, op: LedgerOp) {
        let mut state = self.state.write().await;
        let next = state.calls.get(&op).copied().unwrap_or(0) + 1;
        state.faults.insert(op, next);
    }

    /// Makes calls to `op` fail starting with its `nth` call (1-based,
    /// counted from the ledger's creation).
    pub async fn fail_from_call(&self, op: LedgerOp, nth: usize) {
        self.state.write().await.faults.insert(op, nth);
    }

    /// Removes any injected failure for `op`.
    pub async fn clear_fault(&self, op: LedgerOp) {
        self.state.write().await.faults.remove(&op);
    }

    /// Returns how many times `op` has been called, including failed calls.
    pub async fn call_count(&self, op: LedgerOp) -> usize {
        self.state.read().await.calls.get(&op).copied().unwrap_or(0)
    }

    /// Returns every successful `update_topup_amount` write, in order.
    pub async fn amount_writes(&self) -> Vec<(TopupId, i64)> {
        self.state.read().await.amount_writes.clone()
    }

    /// Returns every successful `update_topup_status` write, in order.
    pub async fn status_writes(&self) -> Vec<(TopupId, TopupStatus)> {
        self.state.read().await.status_writes.clone()
    }

    /// Returns the number of topup rows, trashed ones included.
    pub async fn topup_count(&self) -> usize {
        self.state.read().await.topups.len()
    }
}

#[async_trait]
impl CardLedger for InMemoryLedger {
    async fn create_card(&self, card: NewCard) -> Result<Card> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::CreateCard)?;

        if state
            .cards
            .values()
            .any(|row| row.value.card_number == card.card_number)
        {
            return Err(LedgerError::AlreadyExists {
                entity: "card",
                key: card.card_number.masked(),
            });
        }

        state.next_card_id += 1;
        let created = Card {
            id: state.next_card_id,
            user_id: card.user_id,
            card_number: card.card_number,
            expire_date: card.expire_date.format("%Y-%m-%d").to_string(),
            cvv: card.cvv,
            card_provider: card.card_provider,
            email: card.email,
        };
        state.cards.insert(created.id, Row::active(created.clone()));
        Ok(created)
    }

    async fn find_card_by_number(&self, card_number: &CardNumber) -> Result<Card> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::FindCard)?;
        state
            .cards
            .values()
            .find(|row| !row.trashed && &row.value.card_number == card_number)
            .map(|row| row.value.clone())
            .ok_or_else(|| LedgerError::not_found("card", card_number.masked()))
    }

    async fn find_card_by_id(&self, card_id: i64) -> Result<Card> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::FindCard)?;
        Ok(state.card_mut(card_id)?.value.clone())
    }

    async fn update_card(&self, update: CardUpdate) -> Result<Card> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::UpdateCard)?;
        let row = state.card_mut(update.card_id)?;
        row.value.user_id = update.user_id;
        row.value.expire_date = update.expire_date.format("%Y-%m-%d").to_string();
        row.value.cvv = update.cvv;
        row.value.card_provider = update.card_provider;
        Ok(row.value.clone())
    }

    async fn trash_card(&self, card_id: i64) -> Result<Card> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::Trash)?;
        let row = state.card_mut(card_id)?;
        row.trashed = true;
        Ok(row.value.clone())
    }

    async fn restore_card(&self, card_id: i64) -> Result<Card> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::Restore)?;
        let row = state
            .cards
            .get_mut(&card_id)
            .filter(|row| row.trashed)
            .ok_or_else(|| LedgerError::not_found("trashed card", card_id))?;
        row.trashed = false;
        Ok(row.value.clone())
    }

    async fn delete_card_permanent(&self, card_id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::DeletePermanent)?;
        match state.cards.get(&card_id) {
            Some(row) if row.trashed => {
                state.cards.remove(&card_id);
                Ok(())
            }
            _ => Err(LedgerError::not_found("trashed card", card_id)),
        }
    }
}

#[async_trait]
impl SaldoLedger for InMemoryLedger {
    async fn create_saldo(&self, card_number: &CardNumber, total_balance: i64) -> Result<Saldo> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::CreateSaldo)?;

        if state
            .saldos
            .values()
            .any(|row| &row.value.card_number == card_number)
        {
            return Err(LedgerError::AlreadyExists {
                entity: "saldo",
                key: card_number.masked(),
            });
        }

        state.next_saldo_id += 1;
        let saldo = Saldo {
            id: state.next_saldo_id,
            card_number: card_number.clone(),
            total_balance,
        };
        state.saldos.insert(saldo.id, Row::active(saldo.clone()));
        Ok(saldo)
    }

    async fn find_saldo_by_card_number(&self, card_number: &CardNumber) -> Result<Saldo> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::FindSaldo)?;
        Ok(state.saldo_by_number_mut(card_number)?.value.clone())
    }

    async fn update_balance(&self, card_number: &CardNumber, new_total: i64) -> Result<Saldo> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::UpdateBalance)?;
        let row = state.saldo_by_number_mut(card_number)?;
        row.value.total_balance = new_total;
        Ok(row.value.clone())
    }

    async fn trash_saldo(&self, saldo_id: i64) -> Result<Saldo> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::Trash)?;
        let row = state
            .saldos
            .get_mut(&saldo_id)
            .filter(|row| !row.trashed)
            .ok_or_else(|| LedgerError::not_found("saldo", saldo_id))?;
        row.trashed = true;
        Ok(row.value.clone())
    }

    async fn restore_saldo(&self, saldo_id: i64) -> Result<Saldo> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::Restore)?;
        let row = state
            .saldos
            .get_mut(&saldo_id)
            .filter(|row| row.trashed)
            .ok_or_else(|| LedgerError::not_found("trashed saldo", saldo_id))?;
        row.trashed = false;
        Ok(row.value.clone())
    }

    async fn delete_saldo_permanent(&self, saldo_id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::DeletePermanent)?;
        match state.saldos.get(&saldo_id) {
            Some(row) if row.trashed => {
                state.saldos.remove(&saldo_id);
                Ok(())
            }
            _ => Err(LedgerError::not_found("trashed saldo", saldo_id)),
        }
    }
}

#[async_trait]
impl TopupLedger for InMemoryLedger {
    async fn create_topup(&self, topup: NewTopup) -> Result<Topup> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::CreateTopup)?;

        state.next_topup_id += 1;
        let now = Utc::now();
        let created = Topup {
            id: TopupId::new(state.next_topup_id),
            card_number: topup.card_number,
            amount: topup.amount,
            method: topup.method,
            status: TopupStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        state.topups.insert(created.id, Row::active(created.clone()));
        Ok(created)
    }

    async fn find_topup_by_id(&self, id: TopupId) -> Result<Topup> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::FindTopup)?;
        Ok(state.topup_mut(id)?.value.clone())
    }

    async fn update_topup(&self, update: TopupUpdate) -> Result<Topup> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::UpdateTopup)?;
        let row = state.topup_mut(update.id)?;
        row.value.card_number = update.card_number;
        row.value.amount = update.amount;
        row.value.method = update.method;
        row.value.updated_at = Utc::now();
        Ok(row.value.clone())
    }

    async fn update_topup_amount(&self, id: TopupId, amount: i64) -> Result<Topup> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::UpdateTopupAmount)?;
        let row = state.topup_mut(id)?;
        row.value.amount = amount;
        row.value.updated_at = Utc::now();
        let updated = row.value.clone();
        state.amount_writes.push((id, amount));
        Ok(updated)
    }

    async fn update_topup_status(&self, id: TopupId, status: TopupStatus) -> Result<Topup> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::UpdateTopupStatus)?;
        let row = state.topup_mut(id)?;
        row.value.status = status;
        row.value.updated_at = Utc::now();
        let updated = row.value.clone();
        state.status_writes.push((id, status));
        Ok(updated)
    }

    async fn trash_topup(&self, id: TopupId) -> Result<Topup> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::Trash)?;
        let row = state.topup_mut(id)?;
        row.trashed = true;
        Ok(row.value.clone())
    }

    async fn restore_topup(&self, id: TopupId) -> Result<Topup> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::Restore)?;
        let row = state
            .topups
            .get_mut(&id)
            .filter(|row| row.trashed)
            .ok_or_else(|| LedgerError::not_found("trashed topup", id))?;
        row.trashed = false;
        Ok(row.value.clone())
    }

    async fn delete_topup_permanent(&self, id: TopupId) -> Result<()> {
        let mut state = self.state.write().await;
        state.enter(LedgerOp::DeletePermanent)?;
        match state.topups.get(&id) {
            Some(row) if row.trashed => {
                state.topups.remove(&id);
                Ok(())
            }
            _ => Err(LedgerError::not_found("trashed topup", id)),
        }
    }
}
