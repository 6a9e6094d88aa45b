//! `sso-auth`: token service, credential flows and the RBAC engine.
//!
//! Storage is reached only through the traits in [`store`]; this crate has no
//! knowledge of SQL or transport.

pub mod authorize;
pub mod bootstrap;
pub mod claims;
pub mod credentials;
pub mod error;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod store;
pub mod token;

#[cfg(test)]
mod fakes;

pub use authorize::AccessControl;
pub use bootstrap::{ADMIN_ROLE, seed_administrator};
pub use claims::{AccessClaims, TokenPair};
pub use credentials::CredentialService;
pub use error::AuthError;
pub use password::{HashingPolicy, PasswordError, PasswordHasher};
pub use permissions::{NewPermission, Permission, PermissionKey};
pub use principal::Caller;
pub use roles::{NewRole, Role};
pub use store::{
    Identity, IdentityStore, NewIdentity, Profile, RbacStore, RefreshTokenRecord, RefreshTokenStore,
    SecretResolver, SigningSecret,
};
pub use token::{TokenError, TokenPolicy, TokenService, issue_access_token};
