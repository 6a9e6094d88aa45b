//! Postgres-backed implementation of every store contract.
//!
//! ## Error Mapping
//!
//! | SQLx error | SQLSTATE | StoreError |
//! |------------|----------|------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | RowNotFound | n/a | `NotFound` |
//! | anything else | any | `Backend` |
//!
//! Every statement is parameterized. Multi-row writes (role creation with its
//! links, role deletion, permission deletion, identity + profile) run in one
//! transaction each.

mod accounts;
mod rbac;

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::instrument;

use sso_core::StoreError;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS identities (
        id            BIGINT PRIMARY KEY,
        email         TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS profiles (
        identity_id   BIGINT PRIMARY KEY REFERENCES identities (id),
        first_name    TEXT NOT NULL,
        last_name     TEXT NOT NULL,
        date_of_birth DATE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS apps (
        id     INTEGER PRIMARY KEY,
        name   TEXT NOT NULL UNIQUE,
        secret BYTEA NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS refresh_tokens (
        identity_id  BIGINT PRIMARY KEY REFERENCES identities (id),
        app_id       INTEGER NOT NULL,
        token_digest TEXT NOT NULL UNIQUE,
        expires_at   TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS roles (
        id          BIGSERIAL PRIMARY KEY,
        name        TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS permissions (
        id          BIGSERIAL PRIMARY KEY,
        resource    TEXT NOT NULL,
        action      TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        UNIQUE (resource, action)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS role_permissions (
        role_id       BIGINT NOT NULL REFERENCES roles (id),
        permission_id BIGINT NOT NULL REFERENCES permissions (id),
        PRIMARY KEY (role_id, permission_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS identity_roles (
        identity_id BIGINT NOT NULL REFERENCES identities (id),
        role_id     BIGINT NOT NULL REFERENCES roles (id),
        PRIMARY KEY (identity_id, role_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS identity_roles_role_idx ON identity_roles (role_id)",
    "CREATE INDEX IF NOT EXISTS role_permissions_permission_idx ON role_permissions (permission_id)",
];

/// Pool settings for [`PostgresStore::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

/// One pool serving the identity, refresh-token, app and RBAC stores.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(settings), fields(max_connections = settings.max_connections), err)]
    pub async fn connect(settings: &PoolSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(&settings.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create all tables if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

/// Classify a sqlx failure. The message is for logs only; callers never show it.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::not_found(operation),
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::AlreadyExists(msg),
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Backend(msg),
            }
        }
        other => StoreError::Backend(format!("{operation}: {other}")),
    }
}
