use async_trait::async_trait;
use chrono::NaiveDate;
use common::{CardNumber, TopupId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::gateway::{CardLedger, SaldoLedger, TopupLedger};
use crate::model::{Card, CardUpdate, NewCard, NewTopup, Saldo, Topup, TopupStatus, TopupUpdate};
use crate::{LedgerError, Result};

const CARD_COLUMNS: &str =
    "card_id, user_id, card_number, expire_date, cvv, card_provider, email";
const SALDO_COLUMNS: &str = "saldo_id, card_number, total_balance";
const TOPUP_COLUMNS: &str =
    "topup_id, card_number, topup_amount, topup_method, status, created_at, updated_at";

/// PostgreSQL-backed implementation of all three ledgers.
///
/// Every method is a single statement; none of them opens a transaction
/// spanning more than one row.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Creates a new PostgreSQL ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool against `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_card(row: PgRow) -> Result<Card> {
        let expire_date: NaiveDate = row.try_get("expire_date")?;
        Ok(Card {
            id: row.try_get("card_id")?,
            user_id: row.try_get("user_id")?,
            card_number: CardNumber::new(row.try_get::<String, _>("card_number")?),
            expire_date: expire_date.format("%Y-%m-%d").to_string(),
            cvv: row.try_get("cvv")?,
            card_provider: row.try_get("card_provider")?,
            email: row.try_get("email")?,
        })
    }

    fn row_to_saldo(row: PgRow) -> Result<Saldo> {
        Ok(Saldo {
            id: row.try_get("saldo_id")?,
            card_number: CardNumber::new(row.try_get::<String, _>("card_number")?),
            total_balance: row.try_get("total_balance")?,
        })
    }

    fn row_to_topup(row: PgRow) -> Result<Topup> {
        let status: String = row.try_get("status")?;
        Ok(Topup {
            id: TopupId::new(row.try_get("topup_id")?),
            card_number: CardNumber::new(row.try_get::<String, _>("card_number")?),
            amount: row.try_get("topup_amount")?,
            method: row.try_get("topup_method")?,
            status: status.parse::<TopupStatus>()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
        matches!(err, sqlx::Error::Database(db_err) if db_err.constraint() == Some(constraint))
    }
}

#[async_trait]
impl CardLedger for PostgresLedger {
    #[tracing::instrument(skip(self, card), fields(card = %card.card_number.masked()))]
    async fn create_card(&self, card: NewCard) -> Result<Card> {
        let sql = format!(
            "INSERT INTO cards (user_id, card_number, expire_date, cvv, card_provider, email) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {CARD_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(card.user_id)
            .bind(card.card_number.as_str())
            .bind(card.expire_date)
            .bind(&card.cvv)
            .bind(&card.card_provider)
            .bind(&card.email)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if Self::unique_violation(&e, "unique_card_number") {
                    return LedgerError::AlreadyExists {
                        entity: "card",
                        key: card.card_number.masked(),
                    };
                }
                LedgerError::Database(e)
            })?;
        Self::row_to_card(row)
    }

    #[tracing::instrument(skip(self, card_number), fields(card = %card_number.masked()))]
    async fn find_card_by_number(&self, card_number: &CardNumber) -> Result<Card> {
        let sql = format!(
            "SELECT {CARD_COLUMNS} FROM cards WHERE card_number = $1 AND deleted_at IS NULL"
        );
        sqlx::query(&sql)
            .bind(card_number.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::not_found("card", card_number.masked()))
            .and_then(Self::row_to_card)
    }

    #[tracing::instrument(skip(self))]
    async fn find_card_by_id(&self, card_id: i64) -> Result<Card> {
        let sql =
            format!("SELECT {CARD_COLUMNS} FROM cards WHERE card_id = $1 AND deleted_at IS NULL");
        sqlx::query(&sql)
            .bind(card_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::not_found("card", card_id))
            .and_then(Self::row_to_card)
    }

    #[tracing::instrument(skip(self, update), fields(card_id = update.card_id))]
    async fn update_card(&self, update: CardUpdate) -> Result<Card> {
        let sql = format!(
            "UPDATE cards SET user_id = $2, expire_date = $3, cvv = $4, card_provider = $5, \
             updated_at = NOW() WHERE card_id = $1 AND deleted_at IS NULL RETURNING {CARD_COLUMNS}"
        );
        sqlx::query(&sql)
            .bind(update.card_id)
            .bind(update.user_id)
            .bind(update.expire_date)
            .bind(&update.cvv)
            .bind(&update.card_provider)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::not_found("card", update.card_id))
            .and_then(Self::row_to_card)
    }

    #[tracing::instrument(skip(self))]
    async fn trash_card(&self, card_id: i64) -> Result<Card> {
        let sql = format!(
            "UPDATE cards SET deleted_at = NOW() WHERE card_id = $1 AND deleted_at IS NULL \
             RETURNING {CARD_COLUMNS}"
        );
        sqlx::query(&sql)
            .bind(card_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::not_found("card", card_id))
            .and_then(Self::row_to_card)
    }

    #[tracing::instrument(skip(self))]
    async fn restore_card(&self, card_id: i64) -> Result<Card> {
        let sql = format!(
            "UPDATE cards SET deleted_at = NULL WHERE card_id = $1 AND deleted_at IS NOT NULL \
             RETURNING {CARD_COLUMNS}"
        );
        sqlx::query(&sql)
            .bind(card_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::not_found("trashed card", card_id))
            .and_then(Self::row_to_card)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_card_permanent(&self, card_id: i64) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM cards WHERE card_id = $1 AND deleted_at IS NOT NULL")
                .bind(card_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::not_found("trashed card", card_id));
        }
        Ok(())
    }
}

#[async_trait]
impl SaldoLedger for PostgresLedger {
    #[tracing::instrument(skip(self, card_number), fields(card = %card_number.masked()))]
    async fn create_saldo(&self, card_number: &CardNumber, total_balance: i64) -> Result<Saldo> {
        let sql = format!(
            "INSERT INTO saldos (card_number, total_balance) VALUES ($1, $2) \
             RETURNING {SALDO_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(card_number.as_str())
            .bind(total_balance)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if Self::unique_violation(&e, "unique_saldo_card_number") {
                    return LedgerError::AlreadyExists {
                        entity: "saldo",
                        key: card_number.masked(),
                    };
                }
                LedgerError::Database(e)
            })?;
        Self::row_to_saldo(row)
    }

    #[tracing::instrument(skip(self, card_number), fields(card = %card_number.masked()))]
    async fn find_saldo_by_card_number(&self, card_number: &CardNumber) -> Result<Saldo> {
        let sql = format!(
            "SELECT {SALDO_COLUMNS} FROM saldos WHERE card_number = $1 AND deleted_at IS NULL"
        );
        sqlx::query(&sql)
            .bind(card_number.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::not_found("saldo", card_number.masked()))
            .and_then(Self::row_to_saldo)
    }

    #[tracing::instrument(skip(self, card_number), fields(card = %card_number.masked()))]
    async fn update_balance(&self, card_number: &CardNumber, new_total: i64) -> Result<Saldo> {
        let sql = format!(
            "UPDATE saldos SET total_balance = $2, updated_at = NOW() \
             WHERE card_number = $1 AND deleted_at IS NULL RETURNING {SALDO_COLUMNS}"
        );
        sqlx::query(&sql)
            .bind(card_number.as_str())
            .bind(new_total)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::not_found("saldo", card_number.masked()))
            .and_then(Self::row_to_saldo)
    }

    #[tracing::instrument(skip(self))]
    async fn trash_saldo(&self, saldo_id: i64) -> Result<Saldo> {
        let sql = format!(
            "UPDATE saldos SET deleted_at = NOW() WHERE saldo_id = $1 AND deleted_at IS NULL \
             RETURNING {SALDO_COLUMNS}"
        );
        sqlx::query(&sql)
            .bind(saldo_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::not_found("saldo", saldo_id))
            .and_then(Self::row_to_saldo)
    }

    #[tracing::instrument(skip(self))]
    async fn restore_saldo(&self, saldo_id: i64) -> Result<Saldo> {
        let sql = format!(
            "UPDATE saldos SET deleted_at = NULL WHERE saldo_id = $1 AND deleted_at IS NOT NULL \
             RETURNING {SALDO_COLUMNS}"
        );
        sqlx::query(&sql)
            .bind(saldo_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::not_found("trashed saldo", saldo_id))
            .and_then(Self::row_to_saldo)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_saldo_permanent(&self, saldo_id: i64) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM saldos WHERE saldo_id = $1 AND deleted_at IS NOT NULL")
                .bind(saldo_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::not_found("trashed saldo", saldo_id));
        }
        Ok(())
    }
}

#[async_trait]
impl TopupLedger for PostgresLedger {
    #[tracing::instrument(skip(self, topup), fields(card = %topup.card_number.masked()))]
    async fn create_topup(&self, topup: NewTopup) -> Result<Topup> {
        let sql = format!(
            "INSERT INTO topups (card_number, topup_amount, topup_method, status) \
             VALUES ($1, $2, $3, $4) RETURNING {TOPUP_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(topup.card_number.as_str())
            .bind(topup.amount)
            .bind(&topup.method)
            .bind(TopupStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await?;
        Self::row_to_topup(row)
    }

    #[tracing::instrument(skip(self))]
    async fn find_topup_by_id(&self, id: TopupId) -> Result<Topup> {
        let sql =
            format!("SELECT {TOPUP_COLUMNS} FROM topups WHERE topup_id = $1 AND deleted_at IS NULL");
        sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::not_found("topup", id))
            .and_then(Self::row_to_topup)
    }

    #[tracing::instrument(skip(self, update), fields(topup_id = %update.id))]
    async fn update_topup(&self, update: TopupUpdate) -> Result<Topup> {
        let sql = format!(
            "UPDATE topups SET card_number = $2, topup_amount = $3, topup_method = $4, \
             updated_at = NOW() WHERE topup_id = $1 AND deleted_at IS NULL \
             RETURNING {TOPUP_COLUMNS}"
        );
        sqlx::query(&sql)
            .bind(update.id.as_i64())
            .bind(update.card_number.as_str())
            .bind(update.amount)
            .bind(&update.method)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::not_found("topup", update.id))
            .and_then(Self::row_to_topup)
    }

    #[tracing::instrument(skip(self))]
    async fn update_topup_amount(&self, id: TopupId, amount: i64) -> Result<Topup> {
        let sql = format!(
            "UPDATE topups SET topup_amount = $2, updated_at = NOW() \
             WHERE topup_id = $1 AND deleted_at IS NULL RETURNING {TOPUP_COLUMNS}"
        );
        sqlx::query(&sql)
            .bind(id.as_i64())
            .bind(amount)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::not_found("topup", id))
            .and_then(Self::row_to_topup)
    }

    #[tracing::instrument(skip(self))]
    async fn update_topup_status(&self, id: TopupId, status: TopupStatus) -> Result<Topup> {
        let sql = format!(
            "UPDATE topups SET status = $2, updated_at = NOW() \
             WHERE topup_id = $1 AND deleted_at IS NULL RETURNING {TOPUP_COLUMNS}"
        );
        sqlx::query(&sql)
            .bind(id.as_i64())
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::not_found("topup", id))
            .and_then(Self::row_to_topup)
    }

    #[tracing::instrument(skip(self))]
    async fn trash_topup(&self, id: TopupId) -> Result<Topup> {
        let sql = format!(
            "UPDATE topups SET deleted_at = NOW() WHERE topup_id = $1 AND deleted_at IS NULL \
             RETURNING {TOPUP_COLUMNS}"
        );
        sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::not_found("topup", id))
            .and_then(Self::row_to_topup)
    }

    #[tracing::instrument(skip(self))]
    async fn restore_topup(&self, id: TopupId) -> Result<Topup> {
        let sql = format!(
            "UPDATE topups SET deleted_at = NULL WHERE topup_id = $1 AND deleted_at IS NOT NULL \
             RETURNING {TOPUP_COLUMNS}"
        );
        sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::not_found("trashed topup", id))
            .and_then(Self::row_to_topup)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_topup_permanent(&self, id: TopupId) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM topups WHERE topup_id = $1 AND deleted_at IS NOT NULL")
                .bind(id.as_i64())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::not_found("trashed topup", id));
        }
        Ok(())
    }
}
