//! Seeding the first administrator.
//!
//! Creating roles and permissions through [`crate::AccessControl`] already
//! requires them, so the first administrator is written straight to the store.

use sso_core::{IdentityId, PermissionId, RoleId, StoreError};

use crate::permissions::{
    PERMISSION_CHECK, PERMISSION_CREATE, PERMISSION_DELETE, PERMISSION_GRANT, PERMISSION_REVOKE,
    ROLE_CREATE, ROLE_DELETE, ROLE_GRANT, ROLE_READ, ROLE_REVOKE,
};
use crate::store::RbacStore;
use crate::{AuthError, NewPermission, NewRole, PermissionKey};

pub const ADMIN_ROLE: &str = "admin";

/// Every permission guarding the RBAC graph.
pub const ADMIN_PERMISSIONS: [PermissionKey; 10] = [
    ROLE_CREATE,
    ROLE_DELETE,
    ROLE_GRANT,
    ROLE_REVOKE,
    ROLE_READ,
    PERMISSION_CREATE,
    PERMISSION_DELETE,
    PERMISSION_GRANT,
    PERMISSION_REVOKE,
    PERMISSION_CHECK,
];

/// Ensure the admin permissions and role exist and assign the role to `identity_id`.
///
/// Safe to run on every start.
pub async fn seed_administrator(store: &dyn RbacStore, identity_id: IdentityId) -> Result<RoleId, AuthError> {
    let mut permission_ids = Vec::with_capacity(ADMIN_PERMISSIONS.len());
    for key in ADMIN_PERMISSIONS {
        permission_ids.push(ensure_permission(store, key).await?);
    }

    let role_id = match store.role_by_name(ADMIN_ROLE).await {
        Ok(role) => role.id,
        Err(StoreError::NotFound(_)) => {
            let role = NewRole::new(ADMIN_ROLE, "Manages roles and permissions")
                .with_permissions(permission_ids.iter().copied());
            match store.create_role(role).await {
                Ok(id) => id,
                // Lost a race with a concurrent seeder.
                Err(StoreError::AlreadyExists(_)) => {
                    store.role_by_name(ADMIN_ROLE).await.map_err(AuthError::store)?.id
                }
                Err(e) => return Err(AuthError::store(e)),
            }
        }
        Err(e) => return Err(AuthError::store(e)),
    };

    // Links are idempotent; this also repairs a pre-existing admin role.
    for permission_id in permission_ids {
        store
            .link_permission(role_id, permission_id)
            .await
            .map_err(AuthError::store)?;
    }
    store
        .assign_role(identity_id, role_id)
        .await
        .map_err(AuthError::store)?;

    tracing::info!(%identity_id, %role_id, "administrator seeded");
    Ok(role_id)
}

async fn ensure_permission(store: &dyn RbacStore, key: PermissionKey) -> Result<PermissionId, AuthError> {
    match store.permission_by_key(&key).await {
        Ok(permission) => return Ok(permission.id),
        Err(StoreError::NotFound(_)) => {}
        Err(e) => return Err(AuthError::store(e)),
    }

    let description = format!("Allows {} on {}", key.action(), key.resource());
    match store
        .create_permission(NewPermission {
            key: key.clone(),
            description,
        })
        .await
    {
        Ok(id) => Ok(id),
        Err(StoreError::AlreadyExists(_)) => store
            .permission_by_key(&key)
            .await
            .map(|p| p.id)
            .map_err(AuthError::store),
        Err(e) => Err(AuthError::store(e)),
    }
}
