//! Registration, login and refresh.

use std::sync::Arc;

use sso_core::{AppId, IdGenerator, IdentityId, StoreError};

use crate::password::PasswordHasher;
use crate::store::{IdentityStore, NewIdentity, Profile};
use crate::token::{TokenError, TokenService};
use crate::{AuthError, TokenPair};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 36;
const MAX_EMAIL_LEN: usize = 254;

pub struct CredentialService {
    identities: Arc<dyn IdentityStore>,
    ids: Arc<IdGenerator>,
    hasher: Arc<PasswordHasher>,
    tokens: Arc<TokenService>,
}

impl CredentialService {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        ids: Arc<IdGenerator>,
        hasher: Arc<PasswordHasher>,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            identities,
            ids,
            hasher,
            tokens,
        }
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        profile: Profile,
    ) -> Result<IdentityId, AuthError> {
        let email = validate_email(email)?;
        validate_new_password(password)?;

        let password = password.to_owned();
        let password_hash = self.off_executor(move |hasher| hasher.hash(&password)).await??;
        let id = self.ids.generate().map_err(|e| {
            tracing::error!(error = %e, "identity id generation failed");
            AuthError::from(e)
        })?;

        let identity = NewIdentity {
            id,
            email,
            password_hash,
            profile,
        };

        match self.identities.save_identity(identity).await {
            Ok(()) => {
                tracing::info!(identity_id = %id, "identity registered");
                Ok(id)
            }
            Err(StoreError::AlreadyExists(_)) => {
                tracing::warn!("registration rejected: email already in use");
                Err(AuthError::IdentityAlreadyExists)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to save identity");
                Err(AuthError::store(e))
            }
        }
    }

    /// Log in to the default app.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, AuthError> {
        let app_id = self.tokens.policy().default_app_id;
        self.login_for_app(email, password, app_id).await
    }

    pub async fn login_for_app(
        &self,
        email: &str,
        password: &str,
        app_id: AppId,
    ) -> Result<TokenPair, AuthError> {
        let email = require("email", email)?.to_ascii_lowercase();
        require("password", password)?;

        let identity = match self.identities.identity_by_email(&email).await {
            Ok(identity) => identity,
            Err(StoreError::NotFound(_)) => {
                let password = password.to_owned();
                self.off_executor(move |hasher| hasher.verify_dummy(&password))
                    .await?;
                tracing::warn!(%app_id, "login failed");
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load identity");
                return Err(AuthError::store(e));
            }
        };

        let matches = {
            let password = password.to_owned();
            let stored = identity.password_hash.clone();
            self.off_executor(move |hasher| hasher.verify(&password, &stored))
                .await??
        };
        if !matches {
            tracing::warn!(%app_id, "login failed");
            return Err(AuthError::InvalidCredentials);
        }

        let pair = self
            .tokens
            .issue_token_pair(identity.id, app_id)
            .await
            .map_err(|e| {
                if let TokenError::Store(ref cause) = e {
                    tracing::error!(error = %cause, "failed to persist refresh token");
                }
                AuthError::from(e)
            })?;

        tracing::info!(identity_id = %identity.id, %app_id, "login succeeded");
        Ok(pair)
    }

    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let refresh_token = require("refresh token", refresh_token)?;
        self.tokens.rotate_tokens(refresh_token).await.map_err(|e| {
            tracing::warn!(error = %e, "token refresh failed");
            AuthError::from(e)
        })
    }

    /// Logout: drops the identity's refresh token.
    pub async fn logout(&self, identity_id: IdentityId) -> Result<(), AuthError> {
        self.tokens.revoke_refresh_token(identity_id).await?;
        tracing::info!(%identity_id, "refresh token revoked");
        Ok(())
    }

    /// Argon2 work runs on the blocking pool so async workers stay free.
    async fn off_executor<T, F>(&self, work: F) -> Result<T, AuthError>
    where
        F: FnOnce(&PasswordHasher) -> T + Send + 'static,
        T: Send + 'static,
    {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || work(hasher.as_ref()))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "password hashing task failed");
                AuthError::Internal(Box::new(e))
            })
    }
}

fn require<'a>(field: &str, value: &'a str) -> Result<&'a str, AuthError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AuthError::validation(format!("{field} is required")));
    }
    Ok(value)
}

/// Normalizes to lower case and checks the `local@domain.tld` shape.
pub fn validate_email(email: &str) -> Result<String, AuthError> {
    let email = require("email", email)?;
    let malformed = || AuthError::validation("email has the wrong structure");

    if email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return Err(malformed());
    }
    let (local, domain) = email.split_once('@').ok_or_else(malformed)?;
    if local.is_empty() || domain.contains('@') {
        return Err(malformed());
    }
    let (host, tld) = domain.rsplit_once('.').ok_or_else(malformed)?;
    if host.is_empty() || tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(malformed());
    }

    Ok(email.to_ascii_lowercase())
}

pub fn validate_new_password(password: &str) -> Result<(), AuthError> {
    if password.is_empty() {
        return Err(AuthError::validation("password is required"));
    }
    let len = password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        return Err(AuthError::validation(format!(
            "password must be between {MIN_PASSWORD_LEN} and {MAX_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}
