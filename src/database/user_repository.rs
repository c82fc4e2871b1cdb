use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::database::error::DatabaseError;
use crate::database::models::{KycStatus, User};
use crate::database::repository::{RepoResult, UserRepository};
use crate::database::PgStore;

const USER_COLUMNS: &str = "id, display_name, photo_url, email, phone_number, kyc_status, \
     kyc_job_id, identity_verified, documents_verified, created_at, updated_at";

#[derive(Debug, FromRow)]
struct UserRow {
    id: String,
    display_name: Option<String>,
    photo_url: Option<String>,
    email: Option<String>,
    phone_number: Option<String>,
    kyc_status: String,
    kyc_job_id: Option<String>,
    identity_verified: bool,
    documents_verified: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = DatabaseError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let kyc_status = KycStatus::from_db_status(&row.kyc_status).ok_or_else(|| {
            DatabaseError::unknown(format!("unknown kyc_status '{}'", row.kyc_status))
        })?;
        Ok(User {
            id: row.id,
            display_name: row.display_name,
            photo_url: row.photo_url,
            email: row.email,
            phone_number: row.phone_number,
            kyc_status,
            kyc_job_id: row.kyc_job_id,
            identity_verified: row.identity_verified,
            documents_verified: row.documents_verified,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn find_user(&self, user_id: &str) -> RepoResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(User::try_from).transpose()
    }

    async fn create_user(&self, user: User) -> RepoResult<User> {
        sqlx::query(
            "INSERT INTO users
             (id, display_name, photo_url, email, phone_number, kyc_status, kyc_job_id,
              identity_verified, documents_verified)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&user.id)
        .bind(&user.display_name)
        .bind(&user.photo_url)
        .bind(&user.email)
        .bind(&user.phone_number)
        .bind(user.kyc_status.as_str())
        .bind(&user.kyc_job_id)
        .bind(user.identity_verified)
        .bind(user.documents_verified)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        self.find_user(&user.id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("user", user.id))
    }

    async fn migrate_legacy_kyc(&self, user_id: &str) -> RepoResult<bool> {
        // The predicate is the idempotency guard: a migrated row no longer matches
        let result = sqlx::query(
            "UPDATE users
             SET kyc_status = 'verified', updated_at = NOW()
             WHERE id = $1
               AND kyc_status = 'unset'
               AND identity_verified
               AND documents_verified",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_kyc_status(
        &self,
        user_id: &str,
        status: KycStatus,
        job_id: Option<&str>,
    ) -> RepoResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users
             SET kyc_status = $2, kyc_job_id = COALESCE($3, kyc_job_id), updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(status.as_str())
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(User::try_from).transpose()
    }
}
