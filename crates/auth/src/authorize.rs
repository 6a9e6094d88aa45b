//! RBAC engine.
//!
//! Every operation runs the same protocol: validate input, verify the bearer
//! token, check the required permission against the store, and only then
//! touch role/permission state. The permission check fails closed.

use std::sync::Arc;

use sso_core::{IdentityId, PermissionId, RoleId, StoreError};

use crate::permissions::{
    PERMISSION_CHECK, PERMISSION_CREATE, PERMISSION_DELETE, PERMISSION_GRANT, PERMISSION_REVOKE,
    ROLE_CREATE, ROLE_DELETE, ROLE_GRANT, ROLE_READ, ROLE_REVOKE,
};
use crate::roles::validate_role_name;
use crate::store::RbacStore;
use crate::token::TokenService;
use crate::{AuthError, Caller, NewPermission, NewRole, PermissionKey, Role};

pub struct AccessControl {
    tokens: Arc<TokenService>,
    store: Arc<dyn RbacStore>,
}

impl AccessControl {
    pub fn new(tokens: Arc<TokenService>, store: Arc<dyn RbacStore>) -> Self {
        Self { tokens, store }
    }

    /// Verify a bearer token and return who is calling.
    pub async fn authenticate(&self, token: &str) -> Result<Caller, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::validation("token is required"));
        }
        let claims = self.tokens.verify_access_token(token).await.map_err(|e| {
            tracing::warn!(error = %e, "access token rejected");
            AuthError::from(e)
        })?;
        Ok(Caller::from(claims))
    }

    /// `Forbidden` unless the caller holds `required`. A store failure is a denial.
    pub async fn require(&self, caller: &Caller, required: &PermissionKey) -> Result<(), AuthError> {
        match self.store.has_permission(caller.identity_id(), required).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::warn!(
                    identity_id = %caller.identity_id(),
                    resource = required.resource(),
                    action = required.action(),
                    "permission denied"
                );
                Err(AuthError::Forbidden(required.clone()))
            }
            Err(e) => {
                tracing::error!(
                    identity_id = %caller.identity_id(),
                    resource = required.resource(),
                    action = required.action(),
                    error = %e,
                    "permission check failed; denying"
                );
                Err(AuthError::Forbidden(required.clone()))
            }
        }
    }

    async fn authorize(&self, token: &str, required: &PermissionKey) -> Result<Caller, AuthError> {
        let caller = self.authenticate(token).await?;
        self.require(&caller, required).await?;
        Ok(caller)
    }

    pub async fn create_role(&self, token: &str, role: NewRole) -> Result<RoleId, AuthError> {
        let role = role.validated().map_err(AuthError::Validation)?;
        let caller = self.authorize(token, &ROLE_CREATE).await?;

        let name = role.name.clone();
        let role_id = self.store.create_role(role).await.map_err(|e| match e {
            StoreError::AlreadyExists(_) => AuthError::RoleAlreadyExists(name.clone()),
            other => AuthError::store(other),
        })?;

        tracing::info!(caller = %caller, role = %name, %role_id, "role created");
        Ok(role_id)
    }

    /// Deletes the role together with its assignments and permission links.
    pub async fn delete_role(&self, token: &str, name: &str) -> Result<RoleId, AuthError> {
        let name = validate_role_name(name).map_err(AuthError::Validation)?;
        let caller = self.authorize(token, &ROLE_DELETE).await?;

        let role_id = self
            .store
            .delete_role(&name)
            .await
            .map_err(|e| not_found_as(e, format!("role '{name}'")))?;

        tracing::info!(caller = %caller, role = %name, %role_id, "role deleted");
        Ok(role_id)
    }

    /// Assign a role to an identity.
    pub async fn add_role(&self, token: &str, identity_id: IdentityId, role: &str) -> Result<(), AuthError> {
        let role = validate_role_name(role).map_err(AuthError::Validation)?;
        let caller = self.authorize(token, &ROLE_GRANT).await?;

        let role_id = self.role_id(&role).await?;
        self.store
            .assign_role(identity_id, role_id)
            .await
            .map_err(|e| not_found_as(e, format!("identity {identity_id}")))?;

        tracing::info!(caller = %caller, %identity_id, role = %role, "role assigned");
        Ok(())
    }

    pub async fn remove_role(&self, token: &str, identity_id: IdentityId, role: &str) -> Result<(), AuthError> {
        let role = validate_role_name(role).map_err(AuthError::Validation)?;
        let caller = self.authorize(token, &ROLE_REVOKE).await?;

        let role_id = self.role_id(&role).await?;
        self.store
            .unassign_role(identity_id, role_id)
            .await
            .map_err(AuthError::store)?;

        tracing::info!(caller = %caller, %identity_id, role = %role, "role unassigned");
        Ok(())
    }

    pub async fn create_permission(
        &self,
        token: &str,
        resource: &str,
        action: &str,
        description: &str,
    ) -> Result<PermissionId, AuthError> {
        let key = PermissionKey::parse(resource, action).map_err(AuthError::Validation)?;
        let caller = self.authorize(token, &PERMISSION_CREATE).await?;

        let permission = NewPermission {
            key: key.clone(),
            description: description.trim().to_string(),
        };
        let permission_id = self.store.create_permission(permission).await.map_err(|e| match e {
            StoreError::AlreadyExists(_) => AuthError::PermissionAlreadyExists(key.clone()),
            other => AuthError::store(other),
        })?;

        tracing::info!(caller = %caller, permission = %key, %permission_id, "permission created");
        Ok(permission_id)
    }

    /// Deletes the permission and unlinks it from every role.
    pub async fn delete_permission(&self, token: &str, resource: &str, action: &str) -> Result<(), AuthError> {
        let key = PermissionKey::parse(resource, action).map_err(AuthError::Validation)?;
        let caller = self.authorize(token, &PERMISSION_DELETE).await?;

        let permission_id = self.permission_id(&key).await?;
        self.store
            .delete_permission(permission_id)
            .await
            .map_err(|e| not_found_as(e, format!("permission '{key}'")))?;

        tracing::info!(caller = %caller, permission = %key, "permission deleted");
        Ok(())
    }

    /// Link a permission to a role.
    pub async fn add_permission(
        &self,
        token: &str,
        role: &str,
        resource: &str,
        action: &str,
    ) -> Result<(), AuthError> {
        let role = validate_role_name(role).map_err(AuthError::Validation)?;
        let key = PermissionKey::parse(resource, action).map_err(AuthError::Validation)?;
        let caller = self.authorize(token, &PERMISSION_GRANT).await?;

        let role_id = self.role_id(&role).await?;
        let permission_id = self.permission_id(&key).await?;
        self.store
            .link_permission(role_id, permission_id)
            .await
            .map_err(AuthError::store)?;

        tracing::info!(caller = %caller, role = %role, permission = %key, "permission linked");
        Ok(())
    }

    pub async fn remove_permission(
        &self,
        token: &str,
        role: &str,
        resource: &str,
        action: &str,
    ) -> Result<(), AuthError> {
        let role = validate_role_name(role).map_err(AuthError::Validation)?;
        let key = PermissionKey::parse(resource, action).map_err(AuthError::Validation)?;
        let caller = self.authorize(token, &PERMISSION_REVOKE).await?;

        let role_id = self.role_id(&role).await?;
        let permission_id = self.permission_id(&key).await?;
        self.store
            .unlink_permission(role_id, permission_id)
            .await
            .map_err(AuthError::store)?;

        tracing::info!(caller = %caller, role = %role, permission = %key, "permission unlinked");
        Ok(())
    }

    /// Whether `identity_id` holds `(resource, action)`.
    ///
    /// Callers may always ask about themselves; asking about anyone else needs
    /// `permission:check`.
    pub async fn check_user_permission(
        &self,
        token: &str,
        identity_id: IdentityId,
        resource: &str,
        action: &str,
    ) -> Result<bool, AuthError> {
        let key = PermissionKey::parse(resource, action).map_err(AuthError::Validation)?;
        let caller = self.authenticate(token).await?;
        if !caller.is(identity_id) {
            self.require(&caller, &PERMISSION_CHECK).await?;
        }

        self.store.has_permission(identity_id, &key).await.map_err(|e| {
            tracing::error!(%identity_id, permission = %key, error = %e, "permission lookup failed");
            AuthError::store(e)
        })
    }

    /// Roles assigned to `identity_id`; other identities need `role:read`.
    pub async fn get_user_roles(&self, token: &str, identity_id: IdentityId) -> Result<Vec<Role>, AuthError> {
        let caller = self.authenticate(token).await?;
        if !caller.is(identity_id) {
            self.require(&caller, &ROLE_READ).await?;
        }

        self.store.identity_roles(identity_id).await.map_err(AuthError::store)
    }

    async fn role_id(&self, name: &str) -> Result<RoleId, AuthError> {
        self.store
            .role_by_name(name)
            .await
            .map(|role| role.id)
            .map_err(|e| not_found_as(e, format!("role '{name}'")))
    }

    async fn permission_id(&self, key: &PermissionKey) -> Result<PermissionId, AuthError> {
        self.store
            .permission_by_key(key)
            .await
            .map(|permission| permission.id)
            .map_err(|e| not_found_as(e, format!("permission '{key}'")))
    }
}

fn not_found_as(err: StoreError, what: String) -> AuthError {
    match err {
        StoreError::NotFound(_) => AuthError::NotFound(what),
        other => AuthError::store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;
    use sso_core::{AppId, ErrorKind};

    use crate::fakes::{FakeRbac, FakeRefreshStore, FakeSecrets};
    use crate::token::{TokenPolicy, issue_access_token};

    const SECRET: &str = "rbac-unit-secret";
    const ADMIN: IdentityId = IdentityId::new(1);
    const USER: IdentityId = IdentityId::new(2);

    fn engine(rbac: Arc<FakeRbac>) -> AccessControl {
        let tokens = Arc::new(TokenService::new(
            Arc::new(FakeRefreshStore::default()),
            Arc::new(FakeSecrets::with(AppId::new(1), SECRET)),
            TokenPolicy::default(),
        ));
        AccessControl::new(tokens, rbac)
    }

    fn token_for(id: IdentityId) -> String {
        issue_access_token(id, AppId::new(1), Duration::minutes(5), &SECRET.into()).unwrap()
    }

    #[tokio::test]
    async fn caller_without_permission_is_forbidden_and_nothing_changes() {
        let rbac = Arc::new(FakeRbac::default());
        let engine = engine(rbac.clone());

        let err = engine
            .create_role(&token_for(USER), NewRole::new("auditor", ""))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Forbidden(ref key) if *key == ROLE_CREATE));
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(rbac.role_by_name("auditor").await.is_err());
    }

    #[tokio::test]
    async fn granted_caller_can_mutate() {
        let rbac = Arc::new(FakeRbac::default());
        rbac.grant(ADMIN, ROLE_CREATE);
        let engine = engine(rbac.clone());

        let id = engine
            .create_role(&token_for(ADMIN), NewRole::new("auditor", "reads"))
            .await
            .unwrap();
        assert_eq!(rbac.role_by_name("auditor").await.unwrap().id, id);
    }

    #[tokio::test]
    async fn store_failure_during_check_denies() {
        let rbac = Arc::new(FakeRbac::default());
        rbac.grant(ADMIN, ROLE_CREATE);
        rbac.fail_checks();
        let engine = engine(rbac.clone());

        let err = engine
            .create_role(&token_for(ADMIN), NewRole::new("auditor", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Forbidden(_)));
    }

    #[tokio::test]
    async fn invalid_token_short_circuits_before_the_check() {
        let rbac = Arc::new(FakeRbac::default());
        let engine = engine(rbac);

        let err = engine.delete_role("garbage", "auditor").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);

        let err = engine.delete_role("", "auditor").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn validation_runs_before_authentication() {
        let engine = engine(Arc::new(FakeRbac::default()));
        let err = engine
            .create_permission("garbage", "bad resource", "read", "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn self_queries_are_free_but_others_need_permission() {
        let rbac = Arc::new(FakeRbac::default());
        let engine = engine(rbac.clone());
        let token = token_for(USER);

        assert!(!engine.check_user_permission(&token, USER, "doc", "read").await.unwrap());
        assert!(engine.get_user_roles(&token, USER).await.unwrap().is_empty());

        let err = engine.check_user_permission(&token, ADMIN, "doc", "read").await.unwrap_err();
        assert!(matches!(err, AuthError::Forbidden(ref key) if *key == PERMISSION_CHECK));
        let err = engine.get_user_roles(&token, ADMIN).await.unwrap_err();
        assert!(matches!(err, AuthError::Forbidden(ref key) if *key == ROLE_READ));

        rbac.grant(USER, PERMISSION_CHECK);
        assert!(engine.check_user_permission(&token, ADMIN, "doc", "read").await.is_ok());
    }

    #[tokio::test]
    async fn missing_role_is_not_found() {
        let rbac = Arc::new(FakeRbac::default());
        rbac.grant(ADMIN, ROLE_GRANT);
        let engine = engine(rbac);

        let err = engine.add_role(&token_for(ADMIN), USER, "ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
