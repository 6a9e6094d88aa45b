use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use async_trait::async_trait;

use sso_auth::{NewPermission, NewRole, Permission, PermissionKey, RbacStore, Role};
use sso_core::{IdentityId, PermissionId, RoleId, StoreError, StoreResult};

use super::poisoned;

#[derive(Debug, Clone)]
struct RoleRow {
    name: String,
    description: String,
}

#[derive(Debug, Default)]
struct Tables {
    roles: BTreeMap<RoleId, RoleRow>,
    permissions: BTreeMap<PermissionId, Permission>,
    role_permissions: BTreeSet<(RoleId, PermissionId)>,
    assignments: BTreeSet<(IdentityId, RoleId)>,
    last_role_id: i64,
    last_permission_id: i64,
}

impl Tables {
    fn role_id_by_name(&self, name: &str) -> Option<RoleId> {
        self.roles
            .iter()
            .find(|(_, row)| row.name == name)
            .map(|(id, _)| *id)
    }

    fn materialize(&self, role_id: RoleId, row: &RoleRow) -> Role {
        Role {
            id: role_id,
            name: row.name.clone(),
            description: row.description.clone(),
            permissions: self
                .role_permissions
                .iter()
                .filter(|(r, _)| *r == role_id)
                .map(|(_, p)| *p)
                .collect(),
        }
    }
}

/// Roles, permissions and both join tables behind one `RwLock`.
#[derive(Debug, Default)]
pub struct InMemoryRbacStore {
    tables: RwLock<Tables>,
}

impl InMemoryRbacStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RbacStore for InMemoryRbacStore {
    async fn create_role(&self, role: NewRole) -> StoreResult<RoleId> {
        let mut t = self.tables.write().map_err(poisoned)?;

        if t.role_id_by_name(&role.name).is_some() {
            return Err(StoreError::already_exists(format!("role {}", role.name)));
        }
        if let Some(missing) = role.permissions.iter().find(|p| !t.permissions.contains_key(p)) {
            return Err(StoreError::not_found(format!("permission {missing}")));
        }

        t.last_role_id += 1;
        let role_id = RoleId::new(t.last_role_id);
        t.roles.insert(
            role_id,
            RoleRow {
                name: role.name,
                description: role.description,
            },
        );
        for permission_id in role.permissions {
            t.role_permissions.insert((role_id, permission_id));
        }
        Ok(role_id)
    }

    async fn role_by_name(&self, name: &str) -> StoreResult<Role> {
        let t = self.tables.read().map_err(poisoned)?;
        t.roles
            .iter()
            .find(|(_, row)| row.name == name)
            .map(|(id, row)| t.materialize(*id, row))
            .ok_or_else(|| StoreError::not_found(format!("role {name}")))
    }

    async fn delete_role(&self, name: &str) -> StoreResult<RoleId> {
        let mut t = self.tables.write().map_err(poisoned)?;
        let role_id = t
            .role_id_by_name(name)
            .ok_or_else(|| StoreError::not_found(format!("role {name}")))?;

        t.roles.remove(&role_id);
        t.role_permissions.retain(|(r, _)| *r != role_id);
        t.assignments.retain(|(_, r)| *r != role_id);
        Ok(role_id)
    }

    async fn assign_role(&self, identity_id: IdentityId, role_id: RoleId) -> StoreResult<()> {
        let mut t = self.tables.write().map_err(poisoned)?;
        if !t.roles.contains_key(&role_id) {
            return Err(StoreError::not_found(format!("role {role_id}")));
        }
        t.assignments.insert((identity_id, role_id));
        Ok(())
    }

    async fn unassign_role(&self, identity_id: IdentityId, role_id: RoleId) -> StoreResult<()> {
        let mut t = self.tables.write().map_err(poisoned)?;
        t.assignments.remove(&(identity_id, role_id));
        Ok(())
    }

    async fn identity_roles(&self, identity_id: IdentityId) -> StoreResult<Vec<Role>> {
        let t = self.tables.read().map_err(poisoned)?;
        Ok(t.assignments
            .iter()
            .filter(|(i, _)| *i == identity_id)
            .filter_map(|(_, role_id)| t.roles.get(role_id).map(|row| t.materialize(*role_id, row)))
            .collect())
    }

    async fn create_permission(&self, permission: NewPermission) -> StoreResult<PermissionId> {
        let mut t = self.tables.write().map_err(poisoned)?;
        if t.permissions.values().any(|p| p.key == permission.key) {
            return Err(StoreError::already_exists(format!("permission {}", permission.key)));
        }

        t.last_permission_id += 1;
        let permission_id = PermissionId::new(t.last_permission_id);
        t.permissions.insert(
            permission_id,
            Permission {
                id: permission_id,
                key: permission.key,
                description: permission.description,
            },
        );
        Ok(permission_id)
    }

    async fn permission_by_key(&self, key: &PermissionKey) -> StoreResult<Permission> {
        let t = self.tables.read().map_err(poisoned)?;
        t.permissions
            .values()
            .find(|p| p.key == *key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("permission {key}")))
    }

    async fn delete_permission(&self, permission_id: PermissionId) -> StoreResult<()> {
        let mut t = self.tables.write().map_err(poisoned)?;
        if t.permissions.remove(&permission_id).is_none() {
            return Err(StoreError::not_found(format!("permission {permission_id}")));
        }
        t.role_permissions.retain(|(_, p)| *p != permission_id);
        Ok(())
    }

    async fn link_permission(&self, role_id: RoleId, permission_id: PermissionId) -> StoreResult<()> {
        let mut t = self.tables.write().map_err(poisoned)?;
        if !t.roles.contains_key(&role_id) {
            return Err(StoreError::not_found(format!("role {role_id}")));
        }
        if !t.permissions.contains_key(&permission_id) {
            return Err(StoreError::not_found(format!("permission {permission_id}")));
        }
        t.role_permissions.insert((role_id, permission_id));
        Ok(())
    }

    async fn unlink_permission(&self, role_id: RoleId, permission_id: PermissionId) -> StoreResult<()> {
        let mut t = self.tables.write().map_err(poisoned)?;
        t.role_permissions.remove(&(role_id, permission_id));
        Ok(())
    }

    async fn has_permission(&self, identity_id: IdentityId, key: &PermissionKey) -> StoreResult<bool> {
        let t = self.tables.read().map_err(poisoned)?;
        let Some(permission_id) = t.permissions.values().find(|p| p.key == *key).map(|p| p.id) else {
            return Ok(false);
        };
        Ok(t.assignments
            .iter()
            .filter(|(i, _)| *i == identity_id)
            .any(|(_, role_id)| t.role_permissions.contains(&(*role_id, permission_id))))
    }
}
