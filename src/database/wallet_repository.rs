use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgConnection};
use std::collections::HashMap;

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{
    FeeEvent, FeeLedgerSummary, TransactionKind, TransactionRecord, TransactionStatus,
    TransferOutcome, TransferPlan, TransferReceipt, Wallet, WalletStatus,
};
use crate::database::repository::{RepoResult, WalletRepository};
use crate::database::PgStore;

pub(crate) const WALLET_COLUMNS: &str = "user_id, wallet_id, currency, balance, daily_spent, \
     monthly_spent, spend_date, status, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "user_id, transaction_id, kind, amount, fee, currency, status, \
     counterpart, note, external_reference, balance_after, refunded, idempotency_key, \
     created_at, updated_at";

#[derive(Debug, FromRow)]
pub(crate) struct WalletRow {
    user_id: String,
    wallet_id: String,
    currency: String,
    balance: BigDecimal,
    daily_spent: BigDecimal,
    monthly_spent: BigDecimal,
    spend_date: NaiveDate,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WalletRow> for Wallet {
    type Error = DatabaseError;

    fn try_from(row: WalletRow) -> Result<Self, Self::Error> {
        let status = WalletStatus::from_db_status(&row.status).ok_or_else(|| {
            DatabaseError::unknown(format!("unknown wallet status '{}'", row.status))
        })?;
        Ok(Wallet {
            user_id: row.user_id,
            wallet_id: row.wallet_id,
            currency: row.currency,
            balance: row.balance,
            daily_spent: row.daily_spent,
            monthly_spent: row.monthly_spent,
            spend_date: row.spend_date,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    user_id: String,
    transaction_id: String,
    kind: String,
    amount: BigDecimal,
    fee: BigDecimal,
    currency: String,
    status: String,
    counterpart: Option<String>,
    note: Option<String>,
    external_reference: Option<String>,
    balance_after: Option<BigDecimal>,
    refunded: bool,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for TransactionRecord {
    type Error = DatabaseError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let kind = TransactionKind::from_db_status(&row.kind).ok_or_else(|| {
            DatabaseError::unknown(format!("unknown transaction kind '{}'", row.kind))
        })?;
        let status = TransactionStatus::from_db_status(&row.status).ok_or_else(|| {
            DatabaseError::unknown(format!("unknown transaction status '{}'", row.status))
        })?;
        Ok(TransactionRecord {
            user_id: row.user_id,
            transaction_id: row.transaction_id,
            kind,
            amount: row.amount,
            fee: row.fee,
            currency: row.currency,
            status,
            counterpart: row.counterpart,
            note: row.note,
            external_reference: row.external_reference,
            balance_after: row.balance_after,
            refunded: row.refunded,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Lock one wallet row for the rest of the transaction
pub(crate) async fn lock_wallet_by_user(
    conn: &mut PgConnection,
    user_id: &str,
) -> RepoResult<Option<Wallet>> {
    let row = sqlx::query_as::<_, WalletRow>(&format!(
        "SELECT {} FROM wallets WHERE user_id = $1 FOR UPDATE",
        WALLET_COLUMNS
    ))
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    row.map(Wallet::try_from).transpose()
}

pub(crate) async fn set_balance(
    conn: &mut PgConnection,
    user_id: &str,
    balance: &BigDecimal,
) -> RepoResult<()> {
    sqlx::query("UPDATE wallets SET balance = $2, updated_at = NOW() WHERE user_id = $1")
        .bind(user_id)
        .bind(balance)
        .execute(&mut *conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;
    Ok(())
}

pub(crate) async fn insert_record(
    conn: &mut PgConnection,
    record: &TransactionRecord,
) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO wallet_transactions
         (user_id, transaction_id, kind, amount, fee, currency, status, counterpart, note,
          external_reference, balance_after, refunded, idempotency_key, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
    )
    .bind(&record.user_id)
    .bind(&record.transaction_id)
    .bind(record.kind.as_str())
    .bind(&record.amount)
    .bind(&record.fee)
    .bind(&record.currency)
    .bind(record.status.as_str())
    .bind(&record.counterpart)
    .bind(&record.note)
    .bind(&record.external_reference)
    .bind(&record.balance_after)
    .bind(record.refunded)
    .bind(&record.idempotency_key)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(DatabaseError::from_sqlx)?;
    Ok(())
}

async fn receipt_for_key(
    conn: &mut PgConnection,
    user_id: &str,
    key: &str,
) -> RepoResult<Option<TransferReceipt>> {
    let row: Option<(String, BigDecimal, Option<BigDecimal>)> = sqlx::query_as(
        "SELECT transaction_id, fee, balance_after
         FROM wallet_transactions
         WHERE user_id = $1 AND idempotency_key = $2",
    )
    .bind(user_id)
    .bind(key)
    .fetch_optional(&mut *conn)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    Ok(row.map(|(transaction_id, fee, balance_after)| TransferReceipt {
        transaction_id,
        fee,
        new_balance: balance_after.unwrap_or_default(),
    }))
}

async fn append_fee_event(conn: &mut PgConnection, event: &FeeEvent) -> RepoResult<()> {
    // Uniqueness on transaction_id keeps retries from double counting
    let inserted = sqlx::query(
        "INSERT INTO platform_fee_events (transaction_id, currency, fee, fee_usd, rate, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (transaction_id) DO NOTHING",
    )
    .bind(&event.transaction_id)
    .bind(&event.currency)
    .bind(&event.fee)
    .bind(&event.fee_usd)
    .bind(&event.rate)
    .bind(event.created_at)
    .execute(&mut *conn)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    if inserted.rows_affected() == 0 {
        return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
            constraint: "platform_fee_events_pkey".to_string(),
        }));
    }

    sqlx::query(
        "UPDATE platform_fee_ledger
         SET total_usd = total_usd + $1, event_count = event_count + 1, updated_at = NOW()
         WHERE id = 1",
    )
    .bind(&event.fee_usd)
    .execute(&mut *conn)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    sqlx::query(
        "INSERT INTO platform_fee_buckets (currency, total) VALUES ($1, $2)
         ON CONFLICT (currency)
         DO UPDATE SET total = platform_fee_buckets.total + EXCLUDED.total, updated_at = NOW()",
    )
    .bind(&event.currency)
    .bind(&event.fee)
    .execute(&mut *conn)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    Ok(())
}

#[async_trait]
impl WalletRepository for PgStore {
    async fn find_wallet_by_user(&self, user_id: &str) -> RepoResult<Option<Wallet>> {
        let row = sqlx::query_as::<_, WalletRow>(&format!(
            "SELECT {} FROM wallets WHERE user_id = $1",
            WALLET_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(Wallet::try_from).transpose()
    }

    async fn find_wallet_by_public_id(&self, wallet_id: &str) -> RepoResult<Option<Wallet>> {
        let row = sqlx::query_as::<_, WalletRow>(&format!(
            "SELECT {} FROM wallets WHERE wallet_id = $1",
            WALLET_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(Wallet::try_from).transpose()
    }

    async fn create_wallet(&self, wallet: Wallet) -> RepoResult<Wallet> {
        let inserted = sqlx::query_as::<_, WalletRow>(&format!(
            "INSERT INTO wallets (user_id, wallet_id, currency, balance, spend_date, status)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (user_id) DO NOTHING
             RETURNING {}",
            WALLET_COLUMNS
        ))
        .bind(&wallet.user_id)
        .bind(&wallet.wallet_id)
        .bind(&wallet.currency)
        .bind(&wallet.balance)
        .bind(wallet.spend_date)
        .bind(wallet.status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match inserted {
            Some(row) => Wallet::try_from(row),
            None => self
                .find_wallet_by_user(&wallet.user_id)
                .await?
                .ok_or_else(|| DatabaseError::not_found("wallet", wallet.user_id)),
        }
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        limit: i64,
    ) -> RepoResult<Vec<TransactionRecord>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM wallet_transactions
             WHERE user_id = $1
             ORDER BY created_at DESC
             LIMIT $2",
            TRANSACTION_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(TransactionRecord::try_from).collect()
    }

    async fn find_transfer_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> RepoResult<Option<TransferReceipt>> {
        let mut conn = self.pool.acquire().await.map_err(DatabaseError::from_sqlx)?;
        receipt_for_key(&mut conn, user_id, key).await
    }

    async fn execute_transfer(&self, plan: TransferPlan) -> RepoResult<TransferOutcome> {
        // Dropping `tx` without commit rolls the whole unit back
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        // Both rows locked in one statement, always in user_id order
        let rows = sqlx::query_as::<_, WalletRow>(&format!(
            "SELECT {} FROM wallets
             WHERE user_id = $1 OR wallet_id = $2
             ORDER BY user_id
             FOR UPDATE",
            WALLET_COLUMNS
        ))
        .bind(&plan.sender_user_id)
        .bind(&plan.recipient_wallet_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        let wallets = rows
            .into_iter()
            .map(Wallet::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(key) = &plan.idempotency_key {
            if let Some(receipt) = receipt_for_key(&mut tx, &plan.sender_user_id, key).await? {
                return Ok(TransferOutcome::Duplicate(receipt));
            }
        }

        let sender = wallets.iter().find(|w| w.user_id == plan.sender_user_id);
        let recipient = wallets
            .iter()
            .find(|w| w.wallet_id == plan.recipient_wallet_id);
        let effects = match plan.evaluate(sender, recipient) {
            Ok(effects) => effects,
            Err(outcome) => return Ok(outcome),
        };
        let (sender, recipient) = match (sender, recipient) {
            (Some(s), Some(r)) => (s, r),
            _ => return Err(DatabaseError::unknown("transfer evaluated without both wallets")),
        };

        sqlx::query(
            "UPDATE wallets
             SET balance = $2, daily_spent = $3, monthly_spent = $4, spend_date = $5,
                 updated_at = NOW()
             WHERE user_id = $1",
        )
        .bind(&sender.user_id)
        .bind(&effects.sender_balance)
        .bind(&effects.daily_spent)
        .bind(&effects.monthly_spent)
        .bind(plan.today)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        set_balance(&mut tx, &recipient.user_id, &effects.recipient_balance).await?;

        let now = Utc::now();
        append_fee_event(&mut tx, &plan.fee_event(now)).await?;

        let (send_record, receive_record) = plan.records(sender, recipient, &effects, now);
        insert_record(&mut tx, &send_record).await?;
        insert_record(&mut tx, &receive_record).await?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(TransferOutcome::Committed(plan.receipt(&effects)))
    }

    async fn fee_ledger_summary(&self) -> RepoResult<FeeLedgerSummary> {
        let aggregate: Option<(BigDecimal, i64)> =
            sqlx::query_as("SELECT total_usd, event_count FROM platform_fee_ledger WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        let buckets: Vec<(String, BigDecimal)> =
            sqlx::query_as("SELECT currency, total FROM platform_fee_buckets")
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        let (total_usd, event_count) = aggregate.unwrap_or_default();
        Ok(FeeLedgerSummary {
            total_usd,
            event_count: u64::try_from(event_count).unwrap_or(0),
            buckets: buckets.into_iter().collect::<HashMap<_, _>>(),
        })
    }
}
