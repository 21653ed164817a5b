//! PostgreSQL Ledger Store
//!
//! The durable implementation of [`LedgerStore`]. Both write primitives run
//! inside a database transaction; status transitions use a conditional
//! `UPDATE ... WHERE status = $expected`, reservations a conditional
//! `UPDATE ... SET balance = balance - $n WHERE balance >= $n`, and commit
//! balance changes are relative (`balance = balance + $n`), so every guard
//! and adjustment is atomic at the storage layer.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use async_trait::async_trait;

use crate::core_types::{TransactionId, UserId, WalletId};
use crate::error::WalletError;
use crate::transaction::{ReversalInitiator, Transaction, TransactionStatus, TransactionType};
use crate::wallet::Wallet;

use super::{BalanceChange, LedgerStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS wallets_tb (
    id          BIGSERIAL PRIMARY KEY,
    owner_id    BIGINT NOT NULL UNIQUE,
    balance     BIGINT NOT NULL DEFAULT 0,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS wallet_transactions_tb (
    transaction_id      TEXT PRIMARY KEY,
    tx_type             SMALLINT NOT NULL,
    amount              BIGINT NOT NULL,
    status              SMALLINT NOT NULL,
    from_wallet_id      BIGINT REFERENCES wallets_tb(id),
    to_wallet_id        BIGINT REFERENCES wallets_tb(id),
    reversal_initiator  SMALLINT,
    reversal_reason     TEXT,
    description         TEXT,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_wallet_tx_status
    ON wallet_transactions_tb (status);
"#;

/// sqlx/PostgreSQL ledger store.
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and bootstrap the schema.
    pub async fn connect(url: &str) -> Result<Self, WalletError> {
        let pool = PgPoolOptions::new().max_connections(8).connect(url).await?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<(), WalletError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn row_to_wallet(row: &sqlx::postgres::PgRow) -> Wallet {
        let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
        let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");
        Wallet {
            id: row.get::<i64, _>("id") as WalletId,
            owner_id: row.get::<i64, _>("owner_id") as UserId,
            balance: row.get::<i64, _>("balance"),
            created_at: created_at.timestamp_millis(),
            updated_at: updated_at.timestamp_millis(),
        }
    }

    fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<Transaction, WalletError> {
        let id_str: String = row.get("transaction_id");
        let id: TransactionId = id_str
            .parse()
            .map_err(|_| WalletError::Store(format!("invalid transaction_id: {id_str}")))?;

        let kind_id: i16 = row.get("tx_type");
        let kind = TransactionType::from_id(kind_id)
            .ok_or_else(|| WalletError::Store(format!("invalid tx_type: {kind_id}")))?;

        let status_id: i16 = row.get("status");
        let status = TransactionStatus::from_id(status_id)
            .ok_or_else(|| WalletError::Store(format!("invalid status: {status_id}")))?;

        let reversal_initiator = row
            .get::<Option<i16>, _>("reversal_initiator")
            .and_then(ReversalInitiator::from_id);

        let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
        let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");

        Ok(Transaction {
            id,
            kind,
            amount: row.get::<i64, _>("amount") as u64,
            status,
            from_wallet_id: row
                .get::<Option<i64>, _>("from_wallet_id")
                .map(|v| v as WalletId),
            to_wallet_id: row
                .get::<Option<i64>, _>("to_wallet_id")
                .map(|v| v as WalletId),
            reversal_initiator,
            reversal_reason: row.get("reversal_reason"),
            description: row.get("description"),
            created_at: created_at.timestamp_millis(),
            updated_at: updated_at.timestamp_millis(),
        })
    }
}

const SELECT_TRANSACTION: &str = r#"
    SELECT transaction_id, tx_type, amount, status, from_wallet_id, to_wallet_id,
           reversal_initiator, reversal_reason, description, created_at, updated_at
    FROM wallet_transactions_tb
"#;

#[async_trait]
impl LedgerStore for PgLedger {
    async fn create_wallet(
        &self,
        owner_id: UserId,
        initial_balance: i64,
    ) -> Result<Wallet, WalletError> {
        let row = sqlx::query(
            r#"
            INSERT INTO wallets_tb (owner_id, balance)
            VALUES ($1, $2)
            RETURNING id, owner_id, balance, created_at, updated_at
            "#,
        )
        .bind(owner_id as i64)
        .bind(initial_balance)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                WalletError::ResourceInvalid(format!("user {owner_id} already has a wallet"))
            }
            other => other.into(),
        })?;

        Ok(Self::row_to_wallet(&row))
    }

    async fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, WalletError> {
        let row = sqlx::query(
            "SELECT id, owner_id, balance, created_at, updated_at FROM wallets_tb WHERE id = $1",
        )
        .bind(id as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_wallet))
    }

    async fn wallet_of_user(&self, owner_id: UserId) -> Result<Option<Wallet>, WalletError> {
        let row = sqlx::query(
            "SELECT id, owner_id, balance, created_at, updated_at FROM wallets_tb WHERE owner_id = $1",
        )
        .bind(owner_id as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_wallet))
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, WalletError> {
        let row = sqlx::query(&format!("{SELECT_TRANSACTION} WHERE transaction_id = $1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_transaction(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert_pending(
        &self,
        tx: &Transaction,
        reserve_from: Option<WalletId>,
    ) -> Result<(), WalletError> {
        let mut db_tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO wallet_transactions_tb
                (transaction_id, tx_type, amount, status, from_wallet_id, to_wallet_id, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(tx.id.to_string())
        .bind(tx.kind.id())
        .bind(tx.amount as i64)
        .bind(tx.status.id())
        .bind(tx.from_wallet_id.map(|v| v as i64))
        .bind(tx.to_wallet_id.map(|v| v as i64))
        .bind(&tx.description)
        .execute(&mut *db_tx)
        .await?;

        if let Some(wallet_id) = reserve_from {
            // Conditional decrement: the guard runs against the row's
            // current balance, not a balance the caller read earlier.
            let result = sqlx::query(
                r#"
                UPDATE wallets_tb SET balance = balance - $1, updated_at = NOW()
                WHERE id = $2 AND balance >= $1
                "#,
            )
            .bind(tx.amount as i64)
            .bind(wallet_id as i64)
            .execute(&mut *db_tx)
            .await?;
            if result.rows_affected() == 0 {
                // Dropping db_tx rolls the insert back.
                let exists = sqlx::query("SELECT 1 FROM wallets_tb WHERE id = $1")
                    .bind(wallet_id as i64)
                    .fetch_optional(&mut *db_tx)
                    .await?
                    .is_some();
                return Err(if exists {
                    WalletError::InsufficientBalance(format!("Wallet {wallet_id}"))
                } else {
                    WalletError::ResourceNotFound(format!("Wallet with id: {wallet_id}"))
                });
            }
        }

        db_tx.commit().await?;
        Ok(())
    }

    async fn commit(
        &self,
        tx: &Transaction,
        expected: TransactionStatus,
        changes: &[BalanceChange],
    ) -> Result<bool, WalletError> {
        let mut db_tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE wallet_transactions_tb
            SET status = $1, reversal_initiator = $2, reversal_reason = $3, updated_at = NOW()
            WHERE transaction_id = $4 AND status = $5
            "#,
        )
        .bind(tx.status.id())
        .bind(tx.reversal_initiator.map(|i| i.id()))
        .bind(&tx.reversal_reason)
        .bind(tx.id.to_string())
        .bind(expected.id())
        .execute(&mut *db_tx)
        .await?;

        if result.rows_affected() == 0 {
            // Lost the CAS - either already processed or record missing.
            return Ok(false);
        }

        for change in changes {
            // Deltas, so this commit cannot clobber a reservation that
            // landed after the worker's read.
            let result = sqlx::query(
                "UPDATE wallets_tb SET balance = balance + $1, updated_at = NOW() WHERE id = $2",
            )
            .bind(change.delta)
            .bind(change.wallet_id as i64)
            .execute(&mut *db_tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(WalletError::ResourceNotFound(format!(
                    "Wallet with id: {}",
                    change.wallet_id
                )));
            }
        }

        db_tx.commit().await?;
        Ok(true)
    }
}
