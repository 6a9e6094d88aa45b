use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use sso_core::PermissionId;

const MAX_PART_LEN: usize = 64;

/// Permission identifier: an open `(resource, action)` pair.
///
/// New protected operations only need a new pair in the store, never a schema
/// or code change to this type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PermissionKey {
    resource: Cow<'static, str>,
    action: Cow<'static, str>,
}

impl PermissionKey {
    pub const fn from_static(resource: &'static str, action: &'static str) -> Self {
        Self {
            resource: Cow::Borrowed(resource),
            action: Cow::Borrowed(action),
        }
    }

    /// Build a key from caller input.
    ///
    /// Both parts are trimmed and must be non-empty, at most 64 characters, and
    /// free of whitespace and `:`.
    pub fn parse(resource: &str, action: &str) -> Result<Self, String> {
        let resource = validate_part("resource", resource)?;
        let action = validate_part("action", action)?;
        Ok(Self {
            resource: Cow::Owned(resource),
            action: Cow::Owned(action),
        })
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn action(&self) -> &str {
        &self.action
    }
}

impl core::fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

fn validate_part(field: &str, value: &str) -> Result<String, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("{field} is required"));
    }
    if value.chars().count() > MAX_PART_LEN {
        return Err(format!("{field} must be at most {MAX_PART_LEN} characters"));
    }
    if value.chars().any(|c| c.is_whitespace() || c == ':') {
        return Err(format!("{field} must not contain whitespace or ':'"));
    }
    Ok(value.to_string())
}

/// A persisted permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub key: PermissionKey,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPermission {
    pub key: PermissionKey,
    pub description: String,
}

// Permissions guarding the RBAC graph itself.
pub const ROLE_CREATE: PermissionKey = PermissionKey::from_static("role", "create");
pub const ROLE_DELETE: PermissionKey = PermissionKey::from_static("role", "delete");
pub const ROLE_GRANT: PermissionKey = PermissionKey::from_static("role", "grant");
pub const ROLE_REVOKE: PermissionKey = PermissionKey::from_static("role", "revoke");
pub const ROLE_READ: PermissionKey = PermissionKey::from_static("role", "read");
pub const PERMISSION_CREATE: PermissionKey = PermissionKey::from_static("permission", "create");
pub const PERMISSION_DELETE: PermissionKey = PermissionKey::from_static("permission", "delete");
pub const PERMISSION_GRANT: PermissionKey = PermissionKey::from_static("permission", "grant");
pub const PERMISSION_REVOKE: PermissionKey = PermissionKey::from_static("permission", "revoke");
pub const PERMISSION_CHECK: PermissionKey = PermissionKey::from_static("permission", "check");
