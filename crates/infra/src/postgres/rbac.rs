use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::PgRow;
use tracing::instrument;

use sso_auth::{NewPermission, NewRole, Permission, PermissionKey, RbacStore, Role};
use sso_core::{IdentityId, PermissionId, RoleId, StoreError, StoreResult};

use super::accounts::decode_error;
use super::{PostgresStore, map_sqlx_error};

const ROLE_COLUMNS: &str = r#"
    r.id, r.name, r.description,
    COALESCE(array_agg(rp.permission_id) FILTER (WHERE rp.permission_id IS NOT NULL), '{}') AS permission_ids
"#;

#[async_trait]
impl RbacStore for PostgresStore {
    #[instrument(skip(self, role), fields(role = %role.name), err)]
    async fn create_role(&self, role: NewRole) -> StoreResult<RoleId> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO roles (name, description) VALUES ($1, $2) RETURNING id",
        )
        .bind(&role.name)
        .bind(&role.description)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;

        for permission_id in &role.permissions {
            sqlx::query("INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2)")
                .bind(id)
                .bind(permission_id.get())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("link_permission", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(RoleId::new(id))
    }

    #[instrument(skip(self), err)]
    async fn role_by_name(&self, name: &str) -> StoreResult<Role> {
        let query = format!(
            r#"
            SELECT {ROLE_COLUMNS}
            FROM roles r
            LEFT JOIN role_permissions rp ON rp.role_id = r.id
            WHERE r.name = $1
            GROUP BY r.id
            "#
        );
        let row = sqlx::query(&query)
            .bind(name)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| map_sqlx_error("role_by_name", e))?
            .ok_or_else(|| StoreError::not_found(format!("role {name}")))?;

        role_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn delete_role(&self, name: &str) -> StoreResult<RoleId> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM roles WHERE name = $1 FOR UPDATE")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("select_role", e))?
            .ok_or_else(|| StoreError::not_found(format!("role {name}")))?;

        for statement in [
            "DELETE FROM identity_roles WHERE role_id = $1",
            "DELETE FROM role_permissions WHERE role_id = $1",
            "DELETE FROM roles WHERE id = $1",
        ] {
            sqlx::query(statement)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("delete_role", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(RoleId::new(id))
    }

    #[instrument(skip(self), err)]
    async fn assign_role(&self, identity_id: IdentityId, role_id: RoleId) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO identity_roles (identity_id, role_id) VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(identity_id.to_db())
        .bind(role_id.get())
        .execute(self.pool())
        .await
        .map_err(|e| map_sqlx_error("assign_role", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn unassign_role(&self, identity_id: IdentityId, role_id: RoleId) -> StoreResult<()> {
        sqlx::query("DELETE FROM identity_roles WHERE identity_id = $1 AND role_id = $2")
            .bind(identity_id.to_db())
            .bind(role_id.get())
            .execute(self.pool())
            .await
            .map_err(|e| map_sqlx_error("unassign_role", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn identity_roles(&self, identity_id: IdentityId) -> StoreResult<Vec<Role>> {
        let query = format!(
            r#"
            SELECT {ROLE_COLUMNS}
            FROM identity_roles ir
            JOIN roles r ON r.id = ir.role_id
            LEFT JOIN role_permissions rp ON rp.role_id = r.id
            WHERE ir.identity_id = $1
            GROUP BY r.id
            ORDER BY r.id
            "#
        );
        let rows = sqlx::query(&query)
            .bind(identity_id.to_db())
            .fetch_all(self.pool())
            .await
            .map_err(|e| map_sqlx_error("identity_roles", e))?;

        rows.iter().map(role_from_row).collect()
    }

    #[instrument(skip(self, permission), fields(permission = %permission.key), err)]
    async fn create_permission(&self, permission: NewPermission) -> StoreResult<PermissionId> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO permissions (resource, action, description)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(permission.key.resource())
        .bind(permission.key.action())
        .bind(&permission.description)
        .fetch_one(self.pool())
        .await
        .map_err(|e| map_sqlx_error("insert_permission", e))?;
        Ok(PermissionId::new(id))
    }

    #[instrument(skip(self, key), fields(permission = %key), err)]
    async fn permission_by_key(&self, key: &PermissionKey) -> StoreResult<Permission> {
        let row = sqlx::query(
            r#"
            SELECT id, resource, action, description
            FROM permissions
            WHERE resource = $1 AND action = $2
            "#,
        )
        .bind(key.resource())
        .bind(key.action())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_sqlx_error("permission_by_key", e))?
        .ok_or_else(|| StoreError::not_found(format!("permission {key}")))?;

        let resource: String = row.try_get("resource").map_err(decode_error)?;
        let action: String = row.try_get("action").map_err(decode_error)?;
        Ok(Permission {
            id: PermissionId::new(row.try_get("id").map_err(decode_error)?),
            key: PermissionKey::parse(&resource, &action).map_err(StoreError::Backend)?,
            description: row.try_get("description").map_err(decode_error)?,
        })
    }

    #[instrument(skip(self), err)]
    async fn delete_permission(&self, permission_id: PermissionId) -> StoreResult<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("DELETE FROM role_permissions WHERE permission_id = $1")
            .bind(permission_id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("unlink_permission", e))?;

        let deleted = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(permission_id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_permission", e))?
            .rows_affected();

        if deleted == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::not_found(format!("permission {permission_id}")));
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), err)]
    async fn link_permission(&self, role_id: RoleId, permission_id: PermissionId) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role_id.get())
        .bind(permission_id.get())
        .execute(self.pool())
        .await
        .map_err(|e| map_sqlx_error("link_permission", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn unlink_permission(&self, role_id: RoleId, permission_id: PermissionId) -> StoreResult<()> {
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2")
            .bind(role_id.get())
            .bind(permission_id.get())
            .execute(self.pool())
            .await
            .map_err(|e| map_sqlx_error("unlink_permission", e))?;
        Ok(())
    }

    #[instrument(skip(self, key), fields(resource = key.resource(), action = key.action()), err)]
    async fn has_permission(&self, identity_id: IdentityId, key: &PermissionKey) -> StoreResult<bool> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM identity_roles ir
                JOIN role_permissions rp ON rp.role_id = ir.role_id
                JOIN permissions p ON p.id = rp.permission_id
                WHERE ir.identity_id = $1 AND p.resource = $2 AND p.action = $3
            )
            "#,
        )
        .bind(identity_id.to_db())
        .bind(key.resource())
        .bind(key.action())
        .fetch_one(self.pool())
        .await
        .map_err(|e| map_sqlx_error("has_permission", e))
    }
}

fn role_from_row(row: &PgRow) -> StoreResult<Role> {
    let permission_ids: Vec<i64> = row.try_get("permission_ids").map_err(decode_error)?;
    Ok(Role {
        id: RoleId::new(row.try_get("id").map_err(decode_error)?),
        name: row.try_get("name").map_err(decode_error)?,
        description: row.try_get("description").map_err(decode_error)?,
        permissions: permission_ids.into_iter().map(PermissionId::new).collect(),
    })
}
