//! Postgres storage for OAuth credentials.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use triggermenot_core::{ServiceKind, UserId};
use triggermenot_integration::{Credential, CredentialError, CredentialStore};

/// Row type for credential queries.
#[derive(FromRow)]
struct CredentialRow {
    user_id: String,
    service: String,
    service_user_id: Option<String>,
    access_token: String,
    access_token_expires_at: DateTime<Utc>,
    refresh_token: String,
    refresh_token_expires_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CredentialRow {
    fn try_into_credential(self) -> Result<Credential, CredentialError> {
        let user_id = UserId::from_str(&self.user_id).map_err(|e| {
            CredentialError::InvalidFormat {
                reason: format!("invalid user id '{}': {}", self.user_id, e),
            }
        })?;
        let service =
            ServiceKind::from_str(&self.service).map_err(|e| CredentialError::InvalidFormat {
                reason: e.to_string(),
            })?;

        Ok(Credential {
            user_id,
            service,
            service_user_id: self.service_user_id,
            access_token: self.access_token,
            access_token_expires_at: self.access_token_expires_at,
            refresh_token: self.refresh_token,
            refresh_token_expires_at: self.refresh_token_expires_at,
            updated_at: self.updated_at,
        })
    }
}

fn storage_failed(e: sqlx::Error) -> CredentialError {
    CredentialError::StorageFailed {
        reason: e.to_string(),
    }
}

/// Repository for credential operations.
pub struct CredentialRepository {
    pool: PgPool,
}

impl CredentialRepository {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for CredentialRepository {
    async fn get(
        &self,
        user_id: UserId,
        service: ServiceKind,
    ) -> Result<Option<Credential>, CredentialError> {
        let row: Option<CredentialRow> = sqlx::query_as(
            r#"
            SELECT user_id, service, service_user_id, access_token, access_token_expires_at,
                   refresh_token, refresh_token_expires_at, updated_at
            FROM credentials
            WHERE user_id = $1 AND service = $2
            "#,
        )
        .bind(user_id.to_string())
        .bind(service.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_failed)?;

        row.map(CredentialRow::try_into_credential).transpose()
    }

    async fn upsert(&self, credential: &Credential) -> Result<(), CredentialError> {
        sqlx::query(
            r#"
            INSERT INTO credentials
                (user_id, service, service_user_id, access_token, access_token_expires_at,
                 refresh_token, refresh_token_expires_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id, service)
            DO UPDATE SET service_user_id = COALESCE($3, credentials.service_user_id),
                          access_token = $4, access_token_expires_at = $5,
                          refresh_token = $6, refresh_token_expires_at = $7,
                          updated_at = $8
            "#,
        )
        .bind(credential.user_id.to_string())
        .bind(credential.service.as_str())
        .bind(&credential.service_user_id)
        .bind(&credential.access_token)
        .bind(credential.access_token_expires_at)
        .bind(&credential.refresh_token)
        .bind(credential.refresh_token_expires_at)
        .bind(credential.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_failed)?;

        Ok(())
    }
}
