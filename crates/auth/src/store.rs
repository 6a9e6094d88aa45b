//! Persistence contracts consumed by the services.
//!
//! Each contract is one capability trait; backends (in-memory, Postgres) are
//! selected at construction and passed in as `Arc<dyn ...>`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use sso_core::{AppId, IdentityId, PermissionId, RoleId, StoreResult};

use crate::{NewPermission, NewRole, Permission, PermissionKey, Role};

/// Profile data captured at registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
}

/// Identity plus profile, written as one atomically visible unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIdentity {
    pub id: IdentityId,
    pub email: String,
    pub password_hash: String,
    pub profile: Profile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: IdentityId,
    pub email: String,
    pub password_hash: String,
}

/// Stored refresh token. Only the SHA-256 digest of the opaque value is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub identity_id: IdentityId,
    pub app_id: AppId,
    pub token_digest: String,
    pub expires_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// HMAC key of one application.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningSecret(Vec<u8>);

impl SigningSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl core::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SigningSecret(<redacted>)")
    }
}

impl From<&str> for SigningSecret {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Persist identity and profile together. `AlreadyExists` on a duplicate email.
    async fn save_identity(&self, identity: NewIdentity) -> StoreResult<()>;

    /// `NotFound` when no identity uses the email.
    async fn identity_by_email(&self, email: &str) -> StoreResult<Identity>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Insert or replace the single refresh token of `record.identity_id`.
    async fn upsert(&self, record: RefreshTokenRecord) -> StoreResult<()>;

    /// Live record for a digest; expired records count as absent.
    async fn lookup(&self, token_digest: &str, now: DateTime<Utc>) -> StoreResult<RefreshTokenRecord>;

    /// Atomically swap a live token for `replacement`.
    ///
    /// Conditional on `old_digest` still being the stored, unexpired value: of
    /// two concurrent calls with the same digest exactly one succeeds, the other
    /// gets `NotFound`. Returns the consumed record.
    async fn replace(
        &self,
        old_digest: &str,
        replacement: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> StoreResult<RefreshTokenRecord>;

    /// Drop the refresh token of an identity, if any.
    async fn revoke(&self, identity_id: IdentityId) -> StoreResult<()>;
}

/// Maps an application id to its current signing secret.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// `NotFound` for an unknown application.
    async fn resolve(&self, app_id: AppId) -> StoreResult<SigningSecret>;
}

/// Roles, permissions and their join tables.
///
/// Link inserts are idempotent; unlinking an absent link is not an error.
/// Deleting a role or permission removes its join rows in the same write.
#[async_trait]
pub trait RbacStore: Send + Sync {
    /// `AlreadyExists` on a duplicate name, `NotFound` when a listed permission is missing.
    async fn create_role(&self, role: NewRole) -> StoreResult<RoleId>;

    async fn role_by_name(&self, name: &str) -> StoreResult<Role>;

    async fn delete_role(&self, name: &str) -> StoreResult<RoleId>;

    /// `NotFound` when the role (or, where the backend knows identities, the identity) is missing.
    async fn assign_role(&self, identity_id: IdentityId, role_id: RoleId) -> StoreResult<()>;

    async fn unassign_role(&self, identity_id: IdentityId, role_id: RoleId) -> StoreResult<()>;

    async fn identity_roles(&self, identity_id: IdentityId) -> StoreResult<Vec<Role>>;

    /// `AlreadyExists` when the `(resource, action)` pair is taken.
    async fn create_permission(&self, permission: NewPermission) -> StoreResult<PermissionId>;

    async fn permission_by_key(&self, key: &PermissionKey) -> StoreResult<Permission>;

    async fn delete_permission(&self, permission_id: PermissionId) -> StoreResult<()>;

    async fn link_permission(&self, role_id: RoleId, permission_id: PermissionId) -> StoreResult<()>;

    async fn unlink_permission(&self, role_id: RoleId, permission_id: PermissionId) -> StoreResult<()>;

    /// identity → assigned roles → linked permissions → exact pair match.
    async fn has_permission(&self, identity_id: IdentityId, key: &PermissionKey) -> StoreResult<bool>;
}
