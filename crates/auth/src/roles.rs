use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use sso_core::{PermissionId, RoleId};

const MAX_NAME_LEN: usize = 64;
const MAX_DESCRIPTION_LEN: usize = 512;

/// A persisted role with the ids of the permissions linked to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub description: String,
    pub permissions: BTreeSet<PermissionId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRole {
    pub name: String,
    pub description: String,
    /// Permissions linked in the same write as the role row.
    pub permissions: BTreeSet<PermissionId>,
}

impl NewRole {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = PermissionId>) -> Self {
        self.permissions.extend(permissions);
        self
    }

    /// Trim the name and check lengths.
    pub fn validated(mut self) -> Result<Self, String> {
        self.name = validate_role_name(&self.name)?;
        if self.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(format!(
                "description must be at most {MAX_DESCRIPTION_LEN} characters"
            ));
        }
        Ok(self)
    }
}

pub fn validate_role_name(name: &str) -> Result<String, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("role name is required".to_string());
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!("role name must be at most {MAX_NAME_LEN} characters"));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validated_trims_name() {
        let role = NewRole::new("  auditor ", "reads ledgers").validated().unwrap();
        assert_eq!(role.name, "auditor");
    }

    #[test]
    fn validated_rejects_empty_and_long_names() {
        assert!(NewRole::new("   ", "").validated().is_err());
        assert!(NewRole::new("x".repeat(65), "").validated().is_err());
        assert!(NewRole::new("ok", "d".repeat(513)).validated().is_err());
    }
}
