//! Infrastructure layer: store backends, configuration and service wiring.

pub mod config;
pub mod memory;
pub mod postgres;
pub mod services;

pub use config::{AppSettings, ConfigError, SsoConfig};
pub use memory::{InMemoryAppStore, InMemoryIdentityStore, InMemoryRbacStore, InMemoryRefreshTokenStore};
pub use postgres::{PoolSettings, PostgresStore};
pub use services::{Services, Stores};
