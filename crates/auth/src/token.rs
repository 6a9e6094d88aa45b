//! Access token signing/verification and refresh token rotation.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

use sso_core::{AppId, ErrorKind, IdentityId, StoreError};

use crate::store::{RefreshTokenRecord, RefreshTokenStore, SecretResolver, SigningSecret};
use crate::{AccessClaims, TokenPair};

/// The only algorithm accepted on verification.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("unsupported signing algorithm")]
    UnsupportedAlgorithm,

    #[error("token has expired")]
    Expired,

    #[error("token signature is invalid")]
    BadSignature,

    #[error("app is unknown")]
    UnknownApp,

    #[error("refresh token not found")]
    RefreshTokenNotFound,

    #[error("token signing failed")]
    Signing(#[source] jsonwebtoken::errors::Error),

    #[error("token store unavailable")]
    Store(#[source] StoreError),
}

impl TokenError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TokenError::Malformed
            | TokenError::UnsupportedAlgorithm
            | TokenError::Expired
            | TokenError::BadSignature
            | TokenError::UnknownApp => ErrorKind::Authentication,
            TokenError::RefreshTokenNotFound => ErrorKind::NotFound,
            TokenError::Signing(_) | TokenError::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Token lifetimes and shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPolicy {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Characters in an opaque refresh token.
    pub refresh_token_length: usize,
    /// App used by logins that do not name one.
    pub default_app_id: AppId,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            access_ttl: Duration::hours(1),
            refresh_ttl: Duration::days(30),
            refresh_token_length: 64,
            default_app_id: AppId::new(1),
        }
    }
}

/// Sign an access token for `identity_id` that expires `ttl` from now.
pub fn issue_access_token(
    identity_id: IdentityId,
    app_id: AppId,
    ttl: Duration,
    secret: &SigningSecret,
) -> Result<String, TokenError> {
    let claims = AccessClaims::new(identity_id, app_id, Utc::now(), ttl);
    encode(
        &Header::new(SIGNING_ALGORITHM),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(TokenError::Signing)
}

/// Opaque token of `len` alphanumeric characters from the OS CSPRNG.
pub fn generate_opaque_token(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Hex SHA-256 of a refresh token; the only form that reaches storage.
pub fn refresh_token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Mints and verifies access tokens; issues and rotates refresh tokens.
pub struct TokenService {
    refresh_store: Arc<dyn RefreshTokenStore>,
    secrets: Arc<dyn SecretResolver>,
    policy: TokenPolicy,
}

impl TokenService {
    pub fn new(
        refresh_store: Arc<dyn RefreshTokenStore>,
        secrets: Arc<dyn SecretResolver>,
        policy: TokenPolicy,
    ) -> Self {
        Self {
            refresh_store,
            secrets,
            policy,
        }
    }

    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    pub async fn verify_access_token(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.verify_access_token_at(token, Utc::now()).await
    }

    /// Verify a token against its app's current secret.
    ///
    /// Order matters: algorithm first, expiry second, and only then is the
    /// claimed app used to pick a secret for the signature check.
    pub async fn verify_access_token_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessClaims, TokenError> {
        let header = decode_header(token).map_err(|_| TokenError::Malformed)?;
        if header.alg != SIGNING_ALGORITHM {
            return Err(TokenError::UnsupportedAlgorithm);
        }

        let unverified = peek_claims(token)?;
        if unverified.is_expired_at(now) {
            return Err(TokenError::Expired);
        }

        let secret = self.resolve_secret(unverified.app_id).await?;
        verify_signature(token, &secret)
    }

    /// Sign an access token for `identity_id` with the app's current secret.
    pub async fn access_token_for(
        &self,
        identity_id: IdentityId,
        app_id: AppId,
    ) -> Result<String, TokenError> {
        let secret = self.resolve_secret(app_id).await?;
        issue_access_token(identity_id, app_id, self.policy.access_ttl, &secret)
    }

    /// Issue a new refresh token, superseding any previous one of the identity.
    pub async fn issue_refresh_token(
        &self,
        identity_id: IdentityId,
        app_id: AppId,
    ) -> Result<String, TokenError> {
        let token = generate_opaque_token(self.policy.refresh_token_length);
        let record = self.refresh_record(identity_id, app_id, &token, Utc::now());

        self.refresh_store
            .upsert(record)
            .await
            .map_err(TokenError::Store)?;

        Ok(token)
    }

    pub async fn issue_token_pair(
        &self,
        identity_id: IdentityId,
        app_id: AppId,
    ) -> Result<TokenPair, TokenError> {
        let access = self.access_token_for(identity_id, app_id).await?;
        let refresh = self.issue_refresh_token(identity_id, app_id).await?;
        Ok(TokenPair::bearer(access, refresh, self.policy.access_ttl))
    }

    /// Exchange a refresh token for a new pair. The presented token is single use.
    pub async fn rotate_tokens(&self, old_refresh_token: &str) -> Result<TokenPair, TokenError> {
        let now = Utc::now();
        let old_digest = refresh_token_digest(old_refresh_token);

        let current = self
            .refresh_store
            .lookup(&old_digest, now)
            .await
            .map_err(refresh_store_error)?;

        let access = self
            .access_token_for(current.identity_id, current.app_id)
            .await?;

        let refresh = generate_opaque_token(self.policy.refresh_token_length);
        let replacement = self.refresh_record(current.identity_id, current.app_id, &refresh, now);

        // The conditional replace is the arbiter between concurrent rotations.
        self.refresh_store
            .replace(&old_digest, replacement, now)
            .await
            .map_err(refresh_store_error)?;

        tracing::debug!(
            identity_id = %current.identity_id,
            app_id = %current.app_id,
            "refresh token rotated"
        );

        Ok(TokenPair::bearer(access, refresh, self.policy.access_ttl))
    }

    /// Invalidate the identity's refresh token (logout).
    pub async fn revoke_refresh_token(&self, identity_id: IdentityId) -> Result<(), TokenError> {
        self.refresh_store
            .revoke(identity_id)
            .await
            .map_err(TokenError::Store)
    }

    async fn resolve_secret(&self, app_id: AppId) -> Result<SigningSecret, TokenError> {
        match self.secrets.resolve(app_id).await {
            Ok(secret) => Ok(secret),
            Err(StoreError::NotFound(_)) => Err(TokenError::UnknownApp),
            Err(e) => Err(TokenError::Store(e)),
        }
    }

    fn refresh_record(
        &self,
        identity_id: IdentityId,
        app_id: AppId,
        token: &str,
        now: DateTime<Utc>,
    ) -> RefreshTokenRecord {
        RefreshTokenRecord {
            identity_id,
            app_id,
            token_digest: refresh_token_digest(token),
            expires_at: now + self.policy.refresh_ttl,
        }
    }
}

fn refresh_store_error(err: StoreError) -> TokenError {
    match err {
        StoreError::NotFound(_) => TokenError::RefreshTokenNotFound,
        other => TokenError::Store(other),
    }
}

/// Decode the payload without trusting it, to read `exp` and `app_id`.
fn peek_claims(token: &str) -> Result<AccessClaims, TokenError> {
    let mut validation = Validation::new(SIGNING_ALGORITHM);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|_| TokenError::Malformed)
}

fn verify_signature(token: &str, secret: &SigningSecret) -> Result<AccessClaims, TokenError> {
    let mut validation = Validation::new(SIGNING_ALGORITHM);
    validation.leeway = 0;
    validation.validate_exp = true;
    validation.set_required_spec_claims(&["exp"]);

    decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        JwtErrorKind::InvalidSignature => TokenError::BadSignature,
        JwtErrorKind::ExpiredSignature => TokenError::Expired,
        JwtErrorKind::InvalidAlgorithm => TokenError::UnsupportedAlgorithm,
        _ => TokenError::Malformed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::fakes::{FakeRefreshStore, FakeSecrets};

    const APP: AppId = AppId::new(1);
    const SECRET: &str = "test-secret-key-for-jwt-testing-minimum-32-chars";

    fn service() -> (TokenService, Arc<FakeRefreshStore>) {
        let refresh = Arc::new(FakeRefreshStore::default());
        let secrets = Arc::new(FakeSecrets::with(APP, SECRET));
        let policy = TokenPolicy {
            refresh_token_length: 48,
            ..TokenPolicy::default()
        };
        (TokenService::new(refresh.clone(), secrets, policy), refresh)
    }

    fn sign_with(header: Header, claims: &AccessClaims, secret: &str) -> String {
        encode(&header, claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[tokio::test]
    async fn issued_token_verifies_with_typed_claims() {
        let (tokens, _) = service();
        let token = issue_access_token(IdentityId::new(42), APP, Duration::minutes(5), &SECRET.into()).unwrap();

        let claims = tokens.verify_access_token(&token).await.unwrap();
        assert_eq!(claims.uid, IdentityId::new(42));
        assert_eq!(claims.app_id, APP);
        assert!(!claims.is_expired_at(Utc::now()));
    }

    #[tokio::test]
    async fn expired_but_validly_signed_token_is_rejected() {
        let (tokens, _) = service();
        let token = issue_access_token(IdentityId::new(7), APP, Duration::seconds(-30), &SECRET.into()).unwrap();

        assert!(matches!(
            tokens.verify_access_token(&token).await,
            Err(TokenError::Expired)
        ));
    }

    #[tokio::test]
    async fn expiry_is_checked_before_the_app_is_resolved() {
        let (tokens, _) = service();
        // Unknown app *and* expired: expiry must win.
        let claims = AccessClaims::new(IdentityId::new(7), AppId::new(99), Utc::now(), Duration::seconds(-5));
        let token = sign_with(Header::new(Algorithm::HS256), &claims, "other");

        assert!(matches!(
            tokens.verify_access_token(&token).await,
            Err(TokenError::Expired)
        ));
    }

    #[tokio::test]
    async fn unexpected_algorithm_is_rejected_even_with_correct_secret() {
        let (tokens, _) = service();
        let claims = AccessClaims::new(IdentityId::new(7), APP, Utc::now(), Duration::minutes(5));
        let token = sign_with(Header::new(Algorithm::HS512), &claims, SECRET);

        assert!(matches!(
            tokens.verify_access_token(&token).await,
            Err(TokenError::UnsupportedAlgorithm)
        ));
    }

    #[tokio::test]
    async fn unsigned_none_token_is_rejected() {
        let (tokens, _) = service();
        // {"alg":"none","typ":"JWT"} . {"uid":1}
        let token = "eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0.eyJ1aWQiOjF9.";

        assert!(matches!(
            tokens.verify_access_token(token).await,
            Err(TokenError::Malformed | TokenError::UnsupportedAlgorithm)
        ));
    }

    #[tokio::test]
    async fn wrong_secret_and_unknown_app_are_distinguished() {
        let (tokens, _) = service();

        let forged = issue_access_token(IdentityId::new(1), APP, Duration::minutes(5), &"not-the-secret".into()).unwrap();
        assert!(matches!(
            tokens.verify_access_token(&forged).await,
            Err(TokenError::BadSignature)
        ));

        let foreign = issue_access_token(IdentityId::new(1), AppId::new(2), Duration::minutes(5), &SECRET.into()).unwrap();
        assert!(matches!(
            tokens.verify_access_token(&foreign).await,
            Err(TokenError::UnknownApp)
        ));
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let (tokens, _) = service();
        assert!(matches!(
            tokens.verify_access_token("invalid.token.here").await,
            Err(TokenError::Malformed)
        ));
        assert!(matches!(
            tokens.verify_access_token("").await,
            Err(TokenError::Malformed)
        ));
    }

    #[tokio::test]
    async fn refresh_token_has_policy_length_and_only_digest_is_stored() {
        let (tokens, store) = service();
        let token = tokens.issue_refresh_token(IdentityId::new(5), APP).await.unwrap();

        assert_eq!(token.len(), 48);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));

        let stored = store.record_of(IdentityId::new(5)).unwrap();
        assert_eq!(stored.token_digest, refresh_token_digest(&token));
        assert_ne!(stored.token_digest, token);
    }

    #[tokio::test]
    async fn second_refresh_token_supersedes_the_first() {
        let (tokens, _) = service();
        let first = tokens.issue_refresh_token(IdentityId::new(5), APP).await.unwrap();
        let second = tokens.issue_refresh_token(IdentityId::new(5), APP).await.unwrap();
        assert_ne!(first, second);

        assert!(matches!(
            tokens.rotate_tokens(&first).await,
            Err(TokenError::RefreshTokenNotFound)
        ));
        assert!(tokens.rotate_tokens(&second).await.is_ok());
    }

    #[tokio::test]
    async fn rotation_is_one_time_use() {
        let (tokens, _) = service();
        let pair = tokens.issue_token_pair(IdentityId::new(9), APP).await.unwrap();

        let rotated = tokens.rotate_tokens(&pair.refresh_token).await.unwrap();
        assert_ne!(rotated.refresh_token, pair.refresh_token);
        let claims = tokens.verify_access_token(&rotated.access_token).await.unwrap();
        assert_eq!(claims.uid, IdentityId::new(9));

        assert!(matches!(
            tokens.rotate_tokens(&pair.refresh_token).await,
            Err(TokenError::RefreshTokenNotFound)
        ));
        assert!(tokens.rotate_tokens(&rotated.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn expired_refresh_token_is_not_found() {
        let refresh = Arc::new(FakeRefreshStore::default());
        let secrets = Arc::new(FakeSecrets::with(APP, SECRET));
        let policy = TokenPolicy {
            refresh_ttl: Duration::seconds(-1),
            ..TokenPolicy::default()
        };
        let tokens = TokenService::new(refresh, secrets, policy);

        let token = tokens.issue_refresh_token(IdentityId::new(3), APP).await.unwrap();
        assert!(matches!(
            tokens.rotate_tokens(&token).await,
            Err(TokenError::RefreshTokenNotFound)
        ));
    }

    #[tokio::test]
    async fn revoked_refresh_token_cannot_rotate() {
        let (tokens, _) = service();
        let token = tokens.issue_refresh_token(IdentityId::new(3), APP).await.unwrap();
        tokens.revoke_refresh_token(IdentityId::new(3)).await.unwrap();

        assert!(matches!(
            tokens.rotate_tokens(&token).await,
            Err(TokenError::RefreshTokenNotFound)
        ));
    }
}
