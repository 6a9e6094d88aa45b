use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;
use tracing::instrument;

use sso_auth::{
    Identity, IdentityStore, NewIdentity, RefreshTokenRecord, RefreshTokenStore, SecretResolver,
    SigningSecret,
};
use sso_core::{AppId, IdentityId, StoreError, StoreResult};

use super::{PostgresStore, map_sqlx_error};

impl PostgresStore {
    /// Register an app or rotate its secret.
    #[instrument(skip(self, secret), fields(app_id = %app_id), err)]
    pub async fn put_app(&self, app_id: AppId, name: &str, secret: &SigningSecret) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO apps (id, name, secret)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, secret = EXCLUDED.secret
            "#,
        )
        .bind(app_id.get())
        .bind(name)
        .bind(secret.as_bytes())
        .execute(self.pool())
        .await
        .map_err(|e| map_sqlx_error("put_app", e))?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for PostgresStore {
    #[instrument(skip(self, identity), fields(identity_id = %identity.id), err)]
    async fn save_identity(&self, identity: NewIdentity) -> StoreResult<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("INSERT INTO identities (id, email, password_hash) VALUES ($1, $2, $3)")
            .bind(identity.id.to_db())
            .bind(&identity.email)
            .bind(&identity.password_hash)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_identity", e))?;

        sqlx::query(
            r#"
            INSERT INTO profiles (identity_id, first_name, last_name, date_of_birth)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(identity.id.to_db())
        .bind(&identity.profile.first_name)
        .bind(&identity.profile.last_name)
        .bind(identity.profile.date_of_birth)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_profile", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self, email), err)]
    async fn identity_by_email(&self, email: &str) -> StoreResult<Identity> {
        let row = sqlx::query("SELECT id, email, password_hash FROM identities WHERE email = $1")
            .bind(email)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| map_sqlx_error("identity_by_email", e))?
            .ok_or_else(|| StoreError::not_found("identity"))?;

        Ok(Identity {
            id: IdentityId::from_db(row.try_get("id").map_err(decode_error)?),
            email: row.try_get("email").map_err(decode_error)?,
            password_hash: row.try_get("password_hash").map_err(decode_error)?,
        })
    }
}

#[async_trait]
impl RefreshTokenStore for PostgresStore {
    #[instrument(skip(self, record), fields(identity_id = %record.identity_id), err)]
    async fn upsert(&self, record: RefreshTokenRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (identity_id, app_id, token_digest, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (identity_id) DO UPDATE SET
                app_id = EXCLUDED.app_id,
                token_digest = EXCLUDED.token_digest,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(record.identity_id.to_db())
        .bind(record.app_id.get())
        .bind(&record.token_digest)
        .bind(record.expires_at)
        .execute(self.pool())
        .await
        .map_err(|e| map_sqlx_error("upsert_refresh_token", e))?;
        Ok(())
    }

    #[instrument(skip(self, token_digest), err)]
    async fn lookup(&self, token_digest: &str, now: DateTime<Utc>) -> StoreResult<RefreshTokenRecord> {
        let row = sqlx::query(
            r#"
            SELECT identity_id, app_id, token_digest, expires_at
            FROM refresh_tokens
            WHERE token_digest = $1 AND expires_at > $2
            "#,
        )
        .bind(token_digest)
        .bind(now)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_sqlx_error("lookup_refresh_token", e))?
        .ok_or_else(|| StoreError::not_found("refresh token"))?;

        refresh_record(&row)
    }

    /// Row locking makes the loser of a concurrent rotation re-read the new
    /// digest and match zero rows.
    #[instrument(skip(self, old_digest, replacement), fields(identity_id = %replacement.identity_id), err)]
    async fn replace(
        &self,
        old_digest: &str,
        replacement: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> StoreResult<RefreshTokenRecord> {
        let row = sqlx::query(
            r#"
            UPDATE refresh_tokens AS t
            SET app_id = $4, token_digest = $5, expires_at = $6
            FROM (
                SELECT identity_id, app_id, token_digest, expires_at
                FROM refresh_tokens
                WHERE token_digest = $1 AND expires_at > $2 AND identity_id = $3
                FOR UPDATE
            ) AS old
            WHERE t.identity_id = old.identity_id
            RETURNING old.identity_id, old.app_id, old.token_digest, old.expires_at
            "#,
        )
        .bind(old_digest)
        .bind(now)
        .bind(replacement.identity_id.to_db())
        .bind(replacement.app_id.get())
        .bind(&replacement.token_digest)
        .bind(replacement.expires_at)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_sqlx_error("replace_refresh_token", e))?
        .ok_or_else(|| StoreError::not_found("refresh token"))?;

        refresh_record(&row)
    }

    #[instrument(skip(self), err)]
    async fn revoke(&self, identity_id: IdentityId) -> StoreResult<()> {
        sqlx::query("DELETE FROM refresh_tokens WHERE identity_id = $1")
            .bind(identity_id.to_db())
            .execute(self.pool())
            .await
            .map_err(|e| map_sqlx_error("revoke_refresh_token", e))?;
        Ok(())
    }
}

#[async_trait]
impl SecretResolver for PostgresStore {
    #[instrument(skip(self), err)]
    async fn resolve(&self, app_id: AppId) -> StoreResult<SigningSecret> {
        let secret: Vec<u8> = sqlx::query_scalar("SELECT secret FROM apps WHERE id = $1")
            .bind(app_id.get())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| map_sqlx_error("resolve_secret", e))?
            .ok_or_else(|| StoreError::not_found("app"))?;
        Ok(SigningSecret::new(secret))
    }
}

fn refresh_record(row: &PgRow) -> StoreResult<RefreshTokenRecord> {
    Ok(RefreshTokenRecord {
        identity_id: IdentityId::from_db(row.try_get("identity_id").map_err(decode_error)?),
        app_id: AppId::new(row.try_get("app_id").map_err(decode_error)?),
        token_digest: row.try_get("token_digest").map_err(decode_error)?,
        expires_at: row.try_get("expires_at").map_err(decode_error)?,
    })
}

pub(super) fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::backend(format!("failed to decode row: {err}"))
}
