use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use sso_core::{AppId, IdentityId};

/// Access token payload.
///
/// Verification hands this back directly; there is no untyped claims map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject identity.
    pub uid: IdentityId,

    /// Application whose secret signed the token.
    pub app_id: AppId,

    /// Issued-at, Unix seconds.
    pub iat: i64,

    /// Absolute expiry, Unix seconds.
    pub exp: i64,
}

impl AccessClaims {
    pub fn new(uid: IdentityId, app_id: AppId, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            uid,
            app_id,
            iat: issued_at.timestamp(),
            exp: (issued_at + ttl).timestamp(),
        }
    }

    /// Expired once `now` reaches `exp`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }
}

/// Access + refresh token pair handed to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    /// Always `"Bearer"`.
    pub token_type: String,
}

impl TokenPair {
    pub fn bearer(access_token: String, refresh_token: String, access_ttl: Duration) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_in: access_ttl.num_seconds(),
            token_type: "Bearer".to_string(),
        }
    }
}
