//! Strongly-typed identifiers used across the identity subsystem.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Identifier of an identity (account), minted by the Snowflake generator.
///
/// Persisted as `BIGINT`: the conversion to `i64` is a bit reinterpretation, so
/// values with the top bit set survive the round trip unchanged.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(u64);

/// Identifier of a registered application (tenant). Each app signs with its own secret.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(i32);

/// Store-assigned role key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(i64);

/// Store-assigned permission key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionId(i64);

/// Error returned when an identifier cannot be parsed from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct InvalidId {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! impl_int_newtype {
    ($t:ident, $inner:ty, $name:literal) => {
        impl $t {
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$inner> for $t {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$t> for $inner {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = InvalidId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<$inner>().map(Self).map_err(|_| InvalidId {
                    kind: $name,
                    value: s.to_string(),
                })
            }
        }
    };
}

impl_int_newtype!(IdentityId, u64, "IdentityId");
impl_int_newtype!(AppId, i32, "AppId");
impl_int_newtype!(RoleId, i64, "RoleId");
impl_int_newtype!(PermissionId, i64, "PermissionId");

impl IdentityId {
    /// Column representation (`BIGINT`).
    pub const fn to_db(self) -> i64 {
        self.0 as i64
    }

    pub const fn from_db(value: i64) -> Self {
        Self(value as u64)
    }
}
