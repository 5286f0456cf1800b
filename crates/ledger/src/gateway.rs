use async_trait::async_trait;
use common::{CardNumber, TopupId};

use crate::Result;
use crate::model::{Card, CardUpdate, NewCard, NewTopup, Saldo, Topup, TopupStatus, TopupUpdate};

/// Point operations on card records.
///
/// Lookups never return trashed cards. All implementations must be
/// thread-safe (Send + Sync).
#[async_trait]
pub trait CardLedger: Send + Sync {
    /// Inserts a card. Fails with `AlreadyExists` if the number is taken.
    async fn create_card(&self, card: NewCard) -> Result<Card>;

    /// Looks up an active card by its number.
    async fn find_card_by_number(&self, card_number: &CardNumber) -> Result<Card>;

    /// Looks up an active card by ID.
    async fn find_card_by_id(&self, card_id: i64) -> Result<Card>;

    /// Re-saves a card's mutable fields.
    async fn update_card(&self, update: CardUpdate) -> Result<Card>;

    /// Soft-deletes a card.
    async fn trash_card(&self, card_id: i64) -> Result<Card>;

    /// Reverses a soft delete. Fails with `NotFound` unless the row is trashed.
    async fn restore_card(&self, card_id: i64) -> Result<Card>;

    /// Removes a trashed card for good.
    async fn delete_card_permanent(&self, card_id: i64) -> Result<()>;
}

/// Point operations on stored balances.
///
/// There is one saldo per card number. `update_balance` writes an absolute
/// total; it is not an increment.
#[async_trait]
pub trait SaldoLedger: Send + Sync {
    /// Inserts the saldo row for a card.
    async fn create_saldo(&self, card_number: &CardNumber, total_balance: i64) -> Result<Saldo>;

    /// Looks up the active saldo of a card.
    async fn find_saldo_by_card_number(&self, card_number: &CardNumber) -> Result<Saldo>;

    /// Overwrites the total balance of a card.
    async fn update_balance(&self, card_number: &CardNumber, new_total: i64) -> Result<Saldo>;

    /// Soft-deletes a saldo.
    async fn trash_saldo(&self, saldo_id: i64) -> Result<Saldo>;

    /// Reverses a soft delete. Fails with `NotFound` unless the row is trashed.
    async fn restore_saldo(&self, saldo_id: i64) -> Result<Saldo>;

    /// Removes a trashed saldo for good.
    async fn delete_saldo_permanent(&self, saldo_id: i64) -> Result<()>;
}

/// Point operations on topup rows.
///
/// `update_topup_amount` and `update_topup_status` are the narrow writes
/// used for compensation; both overwrite with an absolute value so
/// repeating them is harmless.
#[async_trait]
pub trait TopupLedger: Send + Sync {
    /// Inserts a topup in `Pending` status.
    async fn create_topup(&self, topup: NewTopup) -> Result<Topup>;

    /// Looks up an active topup.
    async fn find_topup_by_id(&self, id: TopupId) -> Result<Topup>;

    /// Rewrites card number, amount and method.
    async fn update_topup(&self, update: TopupUpdate) -> Result<Topup>;

    /// Overwrites only the amount.
    async fn update_topup_amount(&self, id: TopupId, amount: i64) -> Result<Topup>;

    /// Overwrites only the status.
    async fn update_topup_status(&self, id: TopupId, status: TopupStatus) -> Result<Topup>;

    /// Soft-deletes a topup.
    async fn trash_topup(&self, id: TopupId) -> Result<Topup>;

    /// Reverses a soft delete. Fails with `NotFound` unless the row is trashed.
    async fn restore_topup(&self, id: TopupId) -> Result<Topup>;

    /// Removes a trashed topup for good.
    async fn delete_topup_permanent(&self, id: TopupId) -> Result<()>;
}
