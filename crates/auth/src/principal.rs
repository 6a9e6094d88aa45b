use serde::Serialize;

use sso_core::{AppId, IdentityId};

use crate::AccessClaims;

/// The verified identity behind a request.
///
/// Only obtainable from verified claims; RBAC operations never take a raw id
/// as proof of who is calling.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Caller {
    identity_id: IdentityId,
    app_id: AppId,
}

impl Caller {
    pub fn identity_id(&self) -> IdentityId {
        self.identity_id
    }

    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    pub fn is(&self, identity_id: IdentityId) -> bool {
        self.identity_id == identity_id
    }
}

impl From<AccessClaims> for Caller {
    fn from(claims: AccessClaims) -> Self {
        Self {
            identity_id: claims.uid,
            app_id: claims.app_id,
        }
    }
}

impl core::fmt::Display for Caller {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.identity_id, self.app_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_carries_the_verified_subject() {
        let caller = Caller::from(AccessClaims {
            uid: IdentityId::new(42),
            app_id: AppId::new(3),
            iat: 0,
            exp: 60,
        });

        assert_eq!(caller.identity_id(), IdentityId::new(42));
        assert_eq!(caller.app_id(), AppId::new(3));
        assert!(caller.is(IdentityId::new(42)));
        assert!(!caller.is(IdentityId::new(43)));
        assert_eq!(caller.to_string(), "42@3");
    }
}
