//! Minimal store doubles for unit tests in this crate.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sso_core::{AppId, IdentityId, PermissionId, RoleId, StoreError, StoreResult};

use crate::store::{
    Identity, IdentityStore, NewIdentity, RbacStore, RefreshTokenRecord, RefreshTokenStore,
    SecretResolver, SigningSecret,
};
use crate::{NewPermission, NewRole, Permission, PermissionKey, Role};

#[derive(Default)]
pub struct FakeIdentities {
    by_email: Mutex<HashMap<String, Identity>>,
}

#[async_trait]
impl IdentityStore for FakeIdentities {
    async fn save_identity(&self, identity: NewIdentity) -> StoreResult<()> {
        let mut map = self.by_email.lock().unwrap();
        if map.contains_key(&identity.email) {
            return Err(StoreError::already_exists("email"));
        }
        map.insert(
            identity.email.clone(),
            Identity {
                id: identity.id,
                email: identity.email,
                password_hash: identity.password_hash,
            },
        );
        Ok(())
    }

    async fn identity_by_email(&self, email: &str) -> StoreResult<Identity> {
        self.by_email
            .lock()
            .unwrap()
            .get(email)
            .cloned()
            .ok_or_else(|| StoreError::not_found("identity"))
    }
}

#[derive(Default)]
pub struct FakeRefreshStore {
    by_identity: Mutex<HashMap<IdentityId, RefreshTokenRecord>>,
}

impl FakeRefreshStore {
    pub fn record_of(&self, identity_id: IdentityId) -> Option<RefreshTokenRecord> {
        self.by_identity.lock().unwrap().get(&identity_id).cloned()
    }
}

#[async_trait]
impl RefreshTokenStore for FakeRefreshStore {
    async fn upsert(&self, record: RefreshTokenRecord) -> StoreResult<()> {
        self.by_identity
            .lock()
            .unwrap()
            .insert(record.identity_id, record);
        Ok(())
    }

    async fn lookup(&self, token_digest: &str, now: DateTime<Utc>) -> StoreResult<RefreshTokenRecord> {
        self.by_identity
            .lock()
            .unwrap()
            .values()
            .find(|r| r.token_digest == token_digest && r.is_live_at(now))
            .cloned()
            .ok_or_else(|| StoreError::not_found("refresh token"))
    }

    async fn replace(
        &self,
        old_digest: &str,
        replacement: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> StoreResult<RefreshTokenRecord> {
        let mut map = self.by_identity.lock().unwrap();
        let current = map
            .get(&replacement.identity_id)
            .filter(|r| r.token_digest == old_digest && r.is_live_at(now))
            .cloned()
            .ok_or_else(|| StoreError::not_found("refresh token"))?;
        map.insert(replacement.identity_id, replacement);
        Ok(current)
    }

    async fn revoke(&self, identity_id: IdentityId) -> StoreResult<()> {
        self.by_identity.lock().unwrap().remove(&identity_id);
        Ok(())
    }
}

pub struct FakeSecrets {
    secrets: HashMap<AppId, SigningSecret>,
}

impl FakeSecrets {
    pub fn with(app_id: AppId, secret: &str) -> Self {
        Self {
            secrets: HashMap::from([(app_id, SigningSecret::from(secret))]),
        }
    }
}

#[async_trait]
impl SecretResolver for FakeSecrets {
    async fn resolve(&self, app_id: AppId) -> StoreResult<SigningSecret> {
        self.secrets
            .get(&app_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("app"))
    }
}

#[derive(Default)]
struct RbacState {
    roles: HashMap<String, Role>,
    permissions: HashMap<PermissionKey, Permission>,
    assignments: HashSet<(IdentityId, RoleId)>,
    direct: HashSet<(IdentityId, PermissionKey)>,
}

/// RBAC double. `grant` short-circuits role plumbing for caller setup.
#[derive(Default)]
pub struct FakeRbac {
    state: Mutex<RbacState>,
    next_id: AtomicI64,
    failing: AtomicBool,
}

impl FakeRbac {
    pub fn grant(&self, identity_id: IdentityId, key: PermissionKey) {
        self.state.lock().unwrap().direct.insert((identity_id, key));
    }

    pub fn fail_checks(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn next(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl RbacStore for FakeRbac {
    async fn create_role(&self, role: NewRole) -> StoreResult<RoleId> {
        let id = RoleId::new(self.next());
        let mut state = self.state.lock().unwrap();
        if state.roles.contains_key(&role.name) {
            return Err(StoreError::already_exists("role"));
        }
        state.roles.insert(
            role.name.clone(),
            Role {
                id,
                name: role.name,
                description: role.description,
                permissions: role.permissions,
            },
        );
        Ok(id)
    }

    async fn role_by_name(&self, name: &str) -> StoreResult<Role> {
        self.state
            .lock()
            .unwrap()
            .roles
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found("role"))
    }

    async fn delete_role(&self, name: &str) -> StoreResult<RoleId> {
        let mut state = self.state.lock().unwrap();
        let role = state
            .roles
            .remove(name)
            .ok_or_else(|| StoreError::not_found("role"))?;
        state.assignments.retain(|(_, r)| *r != role.id);
        Ok(role.id)
    }

    async fn assign_role(&self, identity_id: IdentityId, role_id: RoleId) -> StoreResult<()> {
        self.state
            .lock()
            .unwrap()
            .assignments
            .insert((identity_id, role_id));
        Ok(())
    }

    async fn unassign_role(&self, identity_id: IdentityId, role_id: RoleId) -> StoreResult<()> {
        self.state
            .lock()
            .unwrap()
            .assignments
            .remove(&(identity_id, role_id));
        Ok(())
    }

    async fn identity_roles(&self, identity_id: IdentityId) -> StoreResult<Vec<Role>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .roles
            .values()
            .filter(|r| state.assignments.contains(&(identity_id, r.id)))
            .cloned()
            .collect())
    }

    async fn create_permission(&self, permission: NewPermission) -> StoreResult<PermissionId> {
        let id = PermissionId::new(self.next());
        let mut state = self.state.lock().unwrap();
        if state.permissions.contains_key(&permission.key) {
            return Err(StoreError::already_exists("permission"));
        }
        state.permissions.insert(
            permission.key.clone(),
            Permission {
                id,
                key: permission.key,
                description: permission.description,
            },
        );
        Ok(id)
    }

    async fn permission_by_key(&self, key: &PermissionKey) -> StoreResult<Permission> {
        self.state
            .lock()
            .unwrap()
            .permissions
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found("permission"))
    }

    async fn delete_permission(&self, permission_id: PermissionId) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.permissions.retain(|_, p| p.id != permission_id);
        for role in state.roles.values_mut() {
            role.permissions.remove(&permission_id);
        }
        Ok(())
    }

    async fn link_permission(&self, role_id: RoleId, permission_id: PermissionId) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let role = state
            .roles
            .values_mut()
            .find(|r| r.id == role_id)
            .ok_or_else(|| StoreError::not_found("role"))?;
        role.permissions.insert(permission_id);
        Ok(())
    }

    async fn unlink_permission(&self, role_id: RoleId, permission_id: PermissionId) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(role) = state.roles.values_mut().find(|r| r.id == role_id) {
            role.permissions.remove(&permission_id);
        }
        Ok(())
    }

    async fn has_permission(&self, identity_id: IdentityId, key: &PermissionKey) -> StoreResult<bool> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::backend("injected failure"));
        }
        let state = self.state.lock().unwrap();
        if state.direct.contains(&(identity_id, key.clone())) {
            return Ok(true);
        }
        let Some(permission_id) = state.permissions.get(key).map(|p| p.id) else {
            return Ok(false);
        };
        let linked: BTreeSet<RoleId> = state
            .roles
            .values()
            .filter(|r| r.permissions.contains(&permission_id))
            .map(|r| r.id)
            .collect();
        Ok(state
            .assignments
            .iter()
            .any(|(i, r)| *i == identity_id && linked.contains(r)))
    }
}
