//! `sso-core`: identifiers, error taxonomy and the Snowflake id generator.
//!
//! This crate has no IO and no knowledge of tokens or storage backends.

pub mod error;
pub mod id;
pub mod snowflake;

pub use error::{ErrorKind, StoreError, StoreResult};
pub use id::{AppId, IdentityId, InvalidId, PermissionId, RoleId};
pub use snowflake::{Clock, IdGenerator, SnowflakeError, SnowflakeParts, SystemClock, decompose};
