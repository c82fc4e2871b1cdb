use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgConnection};

use crate::database::error::DatabaseError;
use crate::database::memory::merge_metadata;
use crate::database::models::{
    DebitOutcome, ExternalOperation, NewOperation, OperationKind, OperationStatus,
    PaymentChannel, Settlement, SettleOutcome, TransactionStatus,
};
use crate::database::repository::{ExternalOperationRepository, RepoResult};
use crate::database::wallet_repository::{insert_record, lock_wallet_by_user, set_balance};
use crate::database::PgStore;

const OPERATION_COLUMNS: &str = "reference, user_id, kind, channel, amount, currency, \
     counterpart, status, refunded, transfer_code, recipient_code, gateway_reference, \
     failure_reason, metadata, created_at, updated_at";

#[derive(Debug, FromRow)]
struct OperationRow {
    reference: String,
    user_id: String,
    kind: String,
    channel: String,
    amount: BigDecimal,
    currency: String,
    counterpart: Option<String>,
    status: String,
    refunded: bool,
    transfer_code: Option<String>,
    recipient_code: Option<String>,
    gateway_reference: Option<String>,
    failure_reason: Option<String>,
    metadata: JsonValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OperationRow> for ExternalOperation {
    type Error = DatabaseError;

    fn try_from(row: OperationRow) -> Result<Self, Self::Error> {
        let kind = OperationKind::from_db_status(&row.kind)
            .ok_or_else(|| DatabaseError::unknown(format!("unknown kind '{}'", row.kind)))?;
        let channel = PaymentChannel::from_db_status(&row.channel)
            .ok_or_else(|| DatabaseError::unknown(format!("unknown channel '{}'", row.channel)))?;
        let status = OperationStatus::from_db_status(&row.status)
            .ok_or_else(|| DatabaseError::unknown(format!("unknown status '{}'", row.status)))?;
        Ok(ExternalOperation {
            reference: row.reference,
            user_id: row.user_id,
            kind,
            channel,
            amount: row.amount,
            currency: row.currency,
            counterpart: row.counterpart,
            status,
            refunded: row.refunded,
            transfer_code: row.transfer_code,
            recipient_code: row.recipient_code,
            gateway_reference: row.gateway_reference,
            failure_reason: row.failure_reason,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

async fn insert_operation(conn: &mut PgConnection, op: &ExternalOperation) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO external_operations
         (reference, user_id, kind, channel, amount, currency, counterpart, status, refunded,
          recipient_code, metadata, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(&op.reference)
    .bind(&op.user_id)
    .bind(op.kind.as_str())
    .bind(op.channel.as_str())
    .bind(&op.amount)
    .bind(&op.currency)
    .bind(&op.counterpart)
    .bind(op.status.as_str())
    .bind(op.refunded)
    .bind(&op.recipient_code)
    .bind(&op.metadata)
    .bind(op.created_at)
    .bind(op.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(DatabaseError::from_sqlx)?;
    Ok(())
}

async fn mark_record(
    conn: &mut PgConnection,
    user_id: &str,
    reference: &str,
    status: TransactionStatus,
    refunded: bool,
) -> RepoResult<()> {
    sqlx::query(
        "UPDATE wallet_transactions
         SET status = $3, refunded = $4, updated_at = NOW()
         WHERE user_id = $1 AND transaction_id = $2 AND status = 'pending'",
    )
    .bind(user_id)
    .bind(reference)
    .bind(status.as_str())
    .bind(refunded)
    .execute(&mut *conn)
    .await
    .map_err(DatabaseError::from_sqlx)?;
    Ok(())
}

#[async_trait]
impl ExternalOperationRepository for PgStore {
    async fn debit_for_withdrawal(&self, op: NewOperation) -> RepoResult<DebitOutcome> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let wallet = match lock_wallet_by_user(&mut tx, &op.user_id).await? {
            Some(wallet) => wallet,
            None => return Ok(DebitOutcome::WalletMissing),
        };
        if !wallet.is_active() {
            return Ok(DebitOutcome::WalletInactive {
                status: wallet.status,
            });
        }
        if wallet.balance < op.amount {
            return Ok(DebitOutcome::InsufficientBalance {
                available: wallet.balance,
            });
        }

        let now = Utc::now();
        let new_balance = &wallet.balance - &op.amount;
        let operation = op.into_operation(now);

        set_balance(&mut tx, &operation.user_id, &new_balance).await?;
        insert_operation(&mut tx, &operation).await?;
        insert_record(
            &mut tx,
            &operation.ledger_record(TransactionStatus::Pending, Some(new_balance), now),
        )
        .await?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(DebitOutcome::Debited(operation))
    }

    async fn create_collection(&self, op: NewOperation) -> RepoResult<ExternalOperation> {
        let operation = op.into_operation(Utc::now());
        let mut conn = self.pool.acquire().await.map_err(DatabaseError::from_sqlx)?;
        insert_operation(&mut conn, &operation).await?;
        Ok(operation)
    }

    async fn find_operation(&self, reference: &str) -> RepoResult<Option<ExternalOperation>> {
        let row = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT {} FROM external_operations WHERE reference = $1",
            OPERATION_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(ExternalOperation::try_from).transpose()
    }

    async fn find_operation_by_transfer_code(
        &self,
        transfer_code: &str,
    ) -> RepoResult<Option<ExternalOperation>> {
        let row = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT {} FROM external_operations WHERE transfer_code = $1",
            OPERATION_COLUMNS
        ))
        .bind(transfer_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(ExternalOperation::try_from).transpose()
    }

    async fn advance_operation(
        &self,
        reference: &str,
        from: &[OperationStatus],
        to: OperationStatus,
        transfer_code: Option<&str>,
    ) -> RepoResult<Option<ExternalOperation>> {
        if to.is_terminal() {
            return Err(DatabaseError::unknown(
                "terminal statuses are only reachable through settle_operation",
            ));
        }
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();

        let row = sqlx::query_as::<_, OperationRow>(&format!(
            "UPDATE external_operations
             SET status = $3, transfer_code = COALESCE($4, transfer_code), updated_at = NOW()
             WHERE reference = $1 AND status = ANY($2)
             RETURNING {}",
            OPERATION_COLUMNS
        ))
        .bind(reference)
        .bind(&from)
        .bind(to.as_str())
        .bind(transfer_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(ExternalOperation::try_from).transpose()
    }

    async fn settle_operation(&self, settlement: Settlement) -> RepoResult<SettleOutcome> {
        if !settlement.status.is_terminal() {
            return Err(DatabaseError::unknown("settlement requires a terminal status"));
        }
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        // Row lock makes the status check and the balance effect one step
        let row = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT {} FROM external_operations WHERE reference = $1 FOR UPDATE",
            OPERATION_COLUMNS
        ))
        .bind(&settlement.reference)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        let mut op = match row {
            Some(row) => ExternalOperation::try_from(row)?,
            None => return Ok(SettleOutcome::NotFound),
        };
        if op.status.is_terminal() {
            return Ok(SettleOutcome::AlreadyProcessed(op));
        }

        let now = Utc::now();
        match (op.kind.debits_wallet(), settlement.status) {
            (false, OperationStatus::Successful) => {
                let wallet = lock_wallet_by_user(&mut tx, &op.user_id)
                    .await?
                    .ok_or_else(|| DatabaseError::not_found("wallet", op.user_id.clone()))?;
                let new_balance = &wallet.balance + &op.amount;
                set_balance(&mut tx, &op.user_id, &new_balance).await?;
                // (user_id, transaction_id) is unique: a second credit cannot land
                insert_record(
                    &mut tx,
                    &op.ledger_record(TransactionStatus::Completed, Some(new_balance), now),
                )
                .await?;
            }
            (false, _) => {}
            (true, OperationStatus::Successful) => {
                mark_record(
                    &mut tx,
                    &op.user_id,
                    &op.reference,
                    TransactionStatus::Completed,
                    false,
                )
                .await?;
            }
            (true, _) => {
                if !op.refunded {
                    let wallet = lock_wallet_by_user(&mut tx, &op.user_id)
                        .await?
                        .ok_or_else(|| DatabaseError::not_found("wallet", op.user_id.clone()))?;
                    set_balance(&mut tx, &op.user_id, &(&wallet.balance + &op.amount)).await?;
                    op.refunded = true;
                }
                mark_record(
                    &mut tx,
                    &op.user_id,
                    &op.reference,
                    TransactionStatus::Failed,
                    op.refunded,
                )
                .await?;
            }
        }

        op.status = settlement.status;
        if settlement.gateway_reference.is_some() {
            op.gateway_reference = settlement.gateway_reference;
        }
        if settlement.failure_reason.is_some() {
            op.failure_reason = settlement.failure_reason;
        }
        if let Some(metadata) = settlement.metadata {
            merge_metadata(&mut op.metadata, metadata);
        }
        op.updated_at = now;

        sqlx::query(
            "UPDATE external_operations
             SET status = $2, refunded = $3, gateway_reference = $4, failure_reason = $5,
                 metadata = $6, updated_at = $7
             WHERE reference = $1",
        )
        .bind(&op.reference)
        .bind(op.status.as_str())
        .bind(op.refunded)
        .bind(&op.gateway_reference)
        .bind(&op.failure_reason)
        .bind(&op.metadata)
        .bind(op.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(SettleOutcome::Applied(op))
    }

    async fn list_stale_operations(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> RepoResult<Vec<ExternalOperation>> {
        let rows = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT {} FROM external_operations
             WHERE status IN ('PENDING', 'PENDING_OTP', 'PROCESSING') AND updated_at < $1
             ORDER BY updated_at
             LIMIT $2",
            OPERATION_COLUMNS
        ))
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(ExternalOperation::try_from).collect()
    }
}
