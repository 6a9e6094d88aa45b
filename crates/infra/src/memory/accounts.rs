use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sso_auth::{
    Identity, IdentityStore, NewIdentity, Profile, RefreshTokenRecord, RefreshTokenStore,
    SecretResolver, SigningSecret,
};
use sso_core::{AppId, IdentityId, StoreError, StoreResult};

use super::poisoned;

#[derive(Debug, Default)]
struct IdentityTable {
    by_id: HashMap<IdentityId, (Identity, Profile)>,
    id_by_email: HashMap<String, IdentityId>,
}

#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    table: RwLock<IdentityTable>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile(&self, identity_id: IdentityId) -> StoreResult<Profile> {
        let table = self.table.read().map_err(poisoned)?;
        table
            .by_id
            .get(&identity_id)
            .map(|(_, profile)| profile.clone())
            .ok_or_else(|| StoreError::not_found("identity"))
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn save_identity(&self, identity: NewIdentity) -> StoreResult<()> {
        let mut table = self.table.write().map_err(poisoned)?;

        if table.id_by_email.contains_key(&identity.email) {
            return Err(StoreError::already_exists("identity email"));
        }
        if table.by_id.contains_key(&identity.id) {
            return Err(StoreError::already_exists("identity id"));
        }

        table.id_by_email.insert(identity.email.clone(), identity.id);
        table.by_id.insert(
            identity.id,
            (
                Identity {
                    id: identity.id,
                    email: identity.email,
                    password_hash: identity.password_hash,
                },
                identity.profile,
            ),
        );
        Ok(())
    }

    async fn identity_by_email(&self, email: &str) -> StoreResult<Identity> {
        let table = self.table.read().map_err(poisoned)?;
        table
            .id_by_email
            .get(email)
            .and_then(|id| table.by_id.get(id))
            .map(|(identity, _)| identity.clone())
            .ok_or_else(|| StoreError::not_found("identity"))
    }
}

/// Refresh tokens keyed by owner, at most one per identity.
#[derive(Debug, Default)]
pub struct InMemoryRefreshTokenStore {
    by_identity: Mutex<HashMap<IdentityId, RefreshTokenRecord>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, live or not.
    pub fn len(&self) -> StoreResult<usize> {
        let map = self.by_identity.lock().map_err(poisoned)?;
        Ok(map.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn upsert(&self, record: RefreshTokenRecord) -> StoreResult<()> {
        let mut map = self.by_identity.lock().map_err(poisoned)?;
        map.insert(record.identity_id, record);
        Ok(())
    }

    async fn lookup(&self, token_digest: &str, now: DateTime<Utc>) -> StoreResult<RefreshTokenRecord> {
        let map = self.by_identity.lock().map_err(poisoned)?;
        map.values()
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
        let mut map = self.by_identity.lock().map_err(poisoned)?;

        let consumed = match map.get(&replacement.identity_id) {
            Some(current) if current.token_digest == old_digest && current.is_live_at(now) => {
                current.clone()
            }
            _ => return Err(StoreError::not_found("refresh token")),
        };

        map.insert(replacement.identity_id, replacement);
        Ok(consumed)
    }

    async fn revoke(&self, identity_id: IdentityId) -> StoreResult<()> {
        let mut map = self.by_identity.lock().map_err(poisoned)?;
        map.remove(&identity_id);
        Ok(())
    }
}

/// Registered apps and their signing secrets.
#[derive(Debug, Default)]
pub struct InMemoryAppStore {
    secrets: RwLock<HashMap<AppId, SigningSecret>>,
}

impl InMemoryAppStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an app or rotate its secret. Tokens signed with the previous
    /// secret stop verifying immediately.
    pub fn put_app(&self, app_id: AppId, secret: SigningSecret) -> StoreResult<()> {
        let mut secrets = self.secrets.write().map_err(poisoned)?;
        secrets.insert(app_id, secret);
        Ok(())
    }
}

#[async_trait]
impl SecretResolver for InMemoryAppStore {
    async fn resolve(&self, app_id: AppId) -> StoreResult<SigningSecret> {
        let secrets = self.secrets.read().map_err(poisoned)?;
        secrets
            .get(&app_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("app"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    fn record(id: u64, digest: &str, ttl: Duration) -> RefreshTokenRecord {
        RefreshTokenRecord {
            identity_id: IdentityId::new(id),
            app_id: AppId::new(1),
            token_digest: digest.to_string(),
            expires_at: Utc::now() + ttl,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_and_first_write_kept() {
        let store = InMemoryIdentityStore::new();
        let first = NewIdentity {
            id: IdentityId::new(1),
            email: "a@x.com".into(),
            password_hash: "h1".into(),
            profile: Profile::default(),
        };
        store.save_identity(first).await.unwrap();

        let dup = NewIdentity {
            id: IdentityId::new(2),
            email: "a@x.com".into(),
            password_hash: "h2".into(),
            profile: Profile::default(),
        };
        assert!(matches!(
            store.save_identity(dup).await,
            Err(StoreError::AlreadyExists(_))
        ));

        let found = store.identity_by_email("a@x.com").await.unwrap();
        assert_eq!(found.id, IdentityId::new(1));
        assert!(store.profile(IdentityId::new(1)).is_ok());
    }

    #[tokio::test]
    async fn replace_requires_the_current_live_digest() {
        let store = InMemoryRefreshTokenStore::new();
        store.upsert(record(1, "old", Duration::hours(1))).await.unwrap();

        let now = Utc::now();
        let consumed = store
            .replace("old", record(1, "new", Duration::hours(1)), now)
            .await
            .unwrap();
        assert_eq!(consumed.token_digest, "old");

        assert!(store.lookup("old", now).await.unwrap_err().is_not_found());
        assert!(store
            .replace("old", record(1, "newer", Duration::hours(1)), now)
            .await
            .unwrap_err()
            .is_not_found());
        assert_eq!(store.lookup("new", now).await.unwrap().identity_id, IdentityId::new(1));
    }

    #[tokio::test]
    async fn revoke_removes_the_record() {
        let store = InMemoryRefreshTokenStore::new();
        store.upsert(record(1, "live", Duration::hours(1))).await.unwrap();
        assert_eq!(store.len().unwrap(), 1);

        store.revoke(IdentityId::new(1)).await.unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn poisoned_lock_is_a_backend_error() {
        let store = InMemoryRefreshTokenStore::new();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = store.by_identity.lock().unwrap();
            panic!("poison the lock");
        }));

        assert!(matches!(store.len(), Err(StoreError::Backend(_))));
        assert!(store.is_empty().is_err());
    }

    #[tokio::test]
    async fn expired_records_are_invisible() {
        let store = InMemoryRefreshTokenStore::new();
        store.upsert(record(1, "stale", Duration::seconds(-1))).await.unwrap();

        assert!(store.lookup("stale", Utc::now()).await.is_err());
        assert!(store
            .replace("stale", record(1, "fresh", Duration::hours(1)), Utc::now())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn rotated_secret_replaces_the_old_one() {
        let apps = InMemoryAppStore::new();
        apps.put_app(AppId::new(1), "first".into()).unwrap();
        apps.put_app(AppId::new(1), "second".into()).unwrap();

        assert_eq!(apps.resolve(AppId::new(1)).await.unwrap().as_bytes(), b"second");
        assert!(apps.resolve(AppId::new(2)).await.unwrap_err().is_not_found());
    }
}
