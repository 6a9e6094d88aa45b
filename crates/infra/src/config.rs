//! Configuration loading.
//!
//! Sources, later wins: built-in defaults, an optional file, `SSO__*`
//! environment variables (`SSO__TOKENS__ACCESS_TTL_SECS=900`). A `.env` file in
//! the working directory is loaded into the environment first.
//!
//! Apps are a table keyed by name (`SSO__APPS__WEB__ID=1`,
//! `SSO__APPS__WEB__SECRET=...`); names read from the environment are lower case.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use sso_auth::{HashingPolicy, SigningSecret, TokenPolicy};
use sso_core::AppId;
use sso_core::snowflake::MAX_NODE_ID;
use sso_observability::LogSettings;

use crate::postgres::PoolSettings;

const ENV_PREFIX: &str = "SSO";
const MIN_REFRESH_TOKEN_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SsoConfig {
    pub log: LogSettings,
    pub database: DatabaseSettings,
    pub tokens: TokenSettings,
    pub hashing: HashingSettings,
    pub id_generator: IdGeneratorSettings,
    /// Registered into the selected backend by `Services::connect`.
    pub apps: BTreeMap<String, AppSettings>,
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct AppSettings {
    pub id: i32,
    pub secret: String,
}

impl AppSettings {
    pub fn app_id(&self) -> AppId {
        AppId::new(self.id)
    }

    pub fn signing_secret(&self) -> SigningSecret {
        SigningSecret::from(self.secret.as_str())
    }
}

impl core::fmt::Debug for AppSettings {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppSettings")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Postgres URL. Unset means the in-memory stores are used.
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TokenSettings {
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub refresh_token_length: usize,
    pub default_app_id: i32,
}

impl Default for TokenSettings {
    fn default() -> Self {
        let policy = TokenPolicy::default();
        Self {
            access_ttl_secs: policy.access_ttl.num_seconds(),
            refresh_ttl_secs: policy.refresh_ttl.num_seconds(),
            refresh_token_length: policy.refresh_token_length,
            default_app_id: policy.default_app_id.get(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HashingSettings {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingSettings {
    fn default() -> Self {
        let policy = HashingPolicy::default();
        Self {
            memory_kib: policy.memory_kib,
            iterations: policy.iterations,
            parallelism: policy.parallelism,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IdGeneratorSettings {
    /// Must be unique among running instances.
    pub node_id: u16,
}

impl SsoConfig {
    /// Load from `.env`, the optional file at `path`, and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        Self::from_config(builder.build()?)
    }

    fn from_config(raw: config::Config) -> Result<Self, ConfigError> {
        let cfg: SsoConfig = raw.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id_generator.node_id > MAX_NODE_ID {
            return Err(ConfigError::Invalid(format!(
                "id_generator.node_id must be at most {MAX_NODE_ID}"
            )));
        }
        if self.tokens.access_ttl_secs <= 0 || self.tokens.refresh_ttl_secs <= 0 {
            return Err(ConfigError::Invalid("token TTLs must be positive".into()));
        }
        if self.tokens.refresh_token_length < MIN_REFRESH_TOKEN_LENGTH {
            return Err(ConfigError::Invalid(format!(
                "tokens.refresh_token_length must be at least {MIN_REFRESH_TOKEN_LENGTH}"
            )));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid("database.max_connections must be positive".into()));
        }

        let mut ids = HashSet::new();
        for (name, app) in &self.apps {
            if app.secret.is_empty() {
                return Err(ConfigError::Invalid(format!("apps.{name}.secret must not be empty")));
            }
            if !ids.insert(app.id) {
                return Err(ConfigError::Invalid(format!("apps.{name}.id {} is used twice", app.id)));
            }
        }
        Ok(())
    }

    pub fn token_policy(&self) -> TokenPolicy {
        TokenPolicy {
            access_ttl: chrono::Duration::seconds(self.tokens.access_ttl_secs),
            refresh_ttl: chrono::Duration::seconds(self.tokens.refresh_ttl_secs),
            refresh_token_length: self.tokens.refresh_token_length,
            default_app_id: AppId::new(self.tokens.default_app_id),
        }
    }

    pub fn hashing_policy(&self) -> HashingPolicy {
        HashingPolicy {
            memory_kib: self.hashing.memory_kib,
            iterations: self.hashing.iterations,
            parallelism: self.hashing.parallelism,
        }
    }

    /// `None` when no database URL is configured.
    pub fn pool_settings(&self) -> Option<PoolSettings> {
        self.database.url.as_ref().map(|url| PoolSettings {
            url: url.clone(),
            max_connections: self.database.max_connections,
            acquire_timeout: std::time::Duration::from_secs(self.database.acquire_timeout_secs),
        })
    }
}
