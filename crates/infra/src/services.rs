//! Service wiring: picks a store backend and constructs the services over it.

use std::sync::Arc;

use anyhow::Context;

use sso_auth::{
    AccessControl, CredentialService, IdentityStore, PasswordHasher, RbacStore, RefreshTokenStore,
    SecretResolver, TokenService,
};
use sso_core::IdGenerator;

use crate::config::SsoConfig;
use crate::memory::{InMemoryAppStore, InMemoryIdentityStore, InMemoryRbacStore, InMemoryRefreshTokenStore};
use crate::postgres::PostgresStore;

/// One backend behind every store contract.
#[derive(Clone)]
pub struct Stores {
    pub identities: Arc<dyn IdentityStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub secrets: Arc<dyn SecretResolver>,
    pub rbac: Arc<dyn RbacStore>,
}

impl Stores {
    pub fn postgres(store: PostgresStore) -> Self {
        let store = Arc::new(store);
        Self {
            identities: store.clone(),
            refresh_tokens: store.clone(),
            secrets: store.clone(),
            rbac: store,
        }
    }

    /// Fresh in-memory stores; apps are registered through `apps`.
    pub fn in_memory(apps: Arc<InMemoryAppStore>) -> Self {
        Self {
            identities: Arc::new(InMemoryIdentityStore::new()),
            refresh_tokens: Arc::new(InMemoryRefreshTokenStore::new()),
            secrets: apps,
            rbac: Arc::new(InMemoryRbacStore::new()),
        }
    }
}

/// Everything the transport layer calls into.
#[derive(Clone)]
pub struct Services {
    pub tokens: Arc<TokenService>,
    pub credentials: Arc<CredentialService>,
    pub access: Arc<AccessControl>,
    pub rbac_store: Arc<dyn RbacStore>,
}

impl Services {
    pub fn build(config: &SsoConfig, stores: Stores) -> anyhow::Result<Self> {
        let ids = IdGenerator::new(config.id_generator.node_id)
            .context("invalid id generator node id")?;
        let hasher = PasswordHasher::new(config.hashing_policy())
            .context("invalid password hashing policy")?;

        let tokens = Arc::new(TokenService::new(
            stores.refresh_tokens,
            stores.secrets,
            config.token_policy(),
        ));
        let credentials = Arc::new(CredentialService::new(
            stores.identities,
            Arc::new(ids),
            Arc::new(hasher),
            tokens.clone(),
        ));
        let access = Arc::new(AccessControl::new(tokens.clone(), stores.rbac.clone()));

        tracing::info!(node_id = config.id_generator.node_id, "services constructed");
        Ok(Self {
            tokens,
            credentials,
            access,
            rbac_store: stores.rbac,
        })
    }

    /// Postgres when a database URL is configured (schema ensured), otherwise
    /// in-memory. The configured apps are registered in the chosen backend.
    pub async fn connect(config: &SsoConfig) -> anyhow::Result<Self> {
        if config.apps.is_empty() {
            tracing::warn!("no apps configured; token issuance will fail with unknown app");
        }

        let stores = match config.pool_settings() {
            Some(settings) => {
                let store = PostgresStore::connect(&settings)
                    .await
                    .context("failed to connect to postgres")?;
                store
                    .ensure_schema()
                    .await
                    .context("failed to ensure database schema")?;
                for (name, app) in &config.apps {
                    store
                        .put_app(app.app_id(), name, &app.signing_secret())
                        .await
                        .with_context(|| format!("failed to register app '{name}'"))?;
                }
                Stores::postgres(store)
            }
            None => {
                tracing::warn!("no database configured; using in-memory stores");
                let apps = Arc::new(InMemoryAppStore::new());
                for (name, app) in &config.apps {
                    apps.put_app(app.app_id(), app.signing_secret())
                        .with_context(|| format!("failed to register app '{name}'"))?;
                }
                Stores::in_memory(apps)
            }
        };

        tracing::info!(apps = config.apps.len(), "apps registered");
        Self::build(config, stores)
    }
}
