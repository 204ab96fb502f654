//! Writers for the independent collections. All of them take a connection so the
//! essential phase can run them inside one transaction.

use std::collections::HashMap;

use crmsync_core::models::{OrganizationUpsert, RoleUpsert, TenantUpsert, UserUpsert};
use crmsync_core::AppError;
use sqlx::{PgConnection, Postgres};
use uuid::Uuid;

#[tracing::instrument(skip(conn, tenant), fields(db.table = "tenants", db.operation = "upsert"))]
pub async fn upsert_tenant(conn: &mut PgConnection, tenant: &TenantUpsert) -> Result<Uuid, AppError> {
    let id = sqlx::query_scalar::<Postgres, Uuid>(
        r#"
        INSERT INTO tenants (tenant_id, name, status, settings, subscription, last_synced_at)
        VALUES ($1, $2, $3, $4, $5, NOW())
        ON CONFLICT (tenant_id) DO UPDATE SET
            name = EXCLUDED.name,
            status = EXCLUDED.status,
            settings = EXCLUDED.settings,
            subscription = EXCLUDED.subscription,
            last_synced_at = NOW(),
            updated_at = NOW()
        RETURNING id
        "#,
    )
    .bind(&tenant.tenant_id)
    .bind(&tenant.name)
    .bind(tenant.status)
    .bind(&tenant.settings)
    .bind(&tenant.subscription)
    .fetch_one(conn)
    .await?;

    Ok(id)
}

/// Two-step organization store. Rows are first upserted by org code with the
/// parent kept as a code; a single pass then points every child at its parent's
/// id, so batch order does not matter.
#[tracing::instrument(skip(conn, organizations), fields(db.table = "organizations", db.operation = "upsert", count = organizations.len()))]
pub async fn upsert_organizations(
    conn: &mut PgConnection,
    tenant_id: &str,
    organizations: &[OrganizationUpsert],
) -> Result<HashMap<String, Uuid>, AppError> {
    let mut ids = HashMap::with_capacity(organizations.len());

    for org in organizations {
        let id = sqlx::query_scalar::<Postgres, Uuid>(
            r#"
            INSERT INTO organizations
                (tenant_id, org_code, name, status, level, path, description, parent_key, last_synced_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (tenant_id, org_code) DO UPDATE SET
                name = EXCLUDED.name,
                status = EXCLUDED.status,
                level = EXCLUDED.level,
                path = EXCLUDED.path,
                description = EXCLUDED.description,
                parent_key = EXCLUDED.parent_key,
                last_synced_at = NOW(),
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(tenant_id)
        .bind(&org.org_code)
        .bind(&org.name)
        .bind(&org.status)
        .bind(org.level)
        .bind(&org.path)
        .bind(&org.description)
        .bind(&org.parent_code)
        .fetch_one(&mut *conn)
        .await?;
        ids.insert(org.org_code.clone(), id);
    }

    let linked = resolve_organization_parents(conn, tenant_id).await?;
    tracing::debug!(tenant_id = %tenant_id, linked, "Organization parents resolved");

    Ok(ids)
}

/// Point `parent_id` at the organization whose code is `parent_key`. Children
/// whose parent is not (yet) stored keep a pending reference.
pub async fn resolve_organization_parents(
    conn: &mut PgConnection,
    tenant_id: &str,
) -> Result<u64, AppError> {
    let linked = sqlx::query(
        r#"
        UPDATE organizations AS child
        SET parent_id = parent.id, updated_at = NOW()
        FROM organizations AS parent
        WHERE child.tenant_id = $1
          AND parent.tenant_id = $1
          AND child.parent_key = parent.org_code
          AND child.parent_id IS DISTINCT FROM parent.id
        "#,
    )
    .bind(tenant_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    // An organization that became a root, or whose parent code changed to an
    // unknown one, must not keep pointing at the old parent.
    sqlx::query(
        r#"
        UPDATE organizations AS child
        SET parent_id = NULL, updated_at = NOW()
        WHERE child.tenant_id = $1
          AND child.parent_id IS NOT NULL
          AND NOT EXISTS (
              SELECT 1 FROM organizations AS parent
              WHERE parent.id = child.parent_id
                AND parent.org_code = child.parent_key
          )
        "#,
    )
    .bind(tenant_id)
    .execute(conn)
    .await?;

    Ok(linked)
}

#[tracing::instrument(skip(conn, roles), fields(db.table = "crm_roles", db.operation = "upsert", count = roles.len()))]
pub async fn upsert_roles(
    conn: &mut PgConnection,
    tenant_id: &str,
    roles: &[RoleUpsert],
) -> Result<u64, AppError> {
    let mut stored = 0;
    for role in roles {
        sqlx::query(
            r#"
            INSERT INTO crm_roles
                (tenant_id, role_id, name, permissions, priority, is_active, description, last_synced_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (tenant_id, role_id) DO UPDATE SET
                name = EXCLUDED.name,
                permissions = EXCLUDED.permissions,
                priority = EXCLUDED.priority,
                is_active = EXCLUDED.is_active,
                description = EXCLUDED.description,
                last_synced_at = NOW(),
                updated_at = NOW()
            "#,
        )
        .bind(tenant_id)
        .bind(&role.role_id)
        .bind(&role.name)
        .bind(&role.permissions)
        .bind(role.priority)
        .bind(role.is_active)
        .bind(&role.description)
        .execute(&mut *conn)
        .await?;
        stored += 1;
    }
    Ok(stored)
}

#[tracing::instrument(skip(conn, users), fields(db.table = "user_profiles", db.operation = "upsert", count = users.len()))]
pub async fn upsert_users(
    conn: &mut PgConnection,
    tenant_id: &str,
    users: &[UserUpsert],
) -> Result<u64, AppError> {
    let mut stored = 0;
    for user in users {
        sqlx::query(
            r#"
            INSERT INTO user_profiles
                (tenant_id, user_id, employee_code, first_name, last_name, email, is_active, last_synced_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (tenant_id, user_id) DO UPDATE SET
                employee_code = EXCLUDED.employee_code,
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                email = EXCLUDED.email,
                is_active = EXCLUDED.is_active,
                last_synced_at = NOW(),
                updated_at = NOW()
            "#,
        )
        .bind(tenant_id)
        .bind(&user.user_id)
        .bind(&user.employee_code)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(user.is_active)
        .execute(&mut *conn)
        .await?;
        stored += 1;
    }
    Ok(stored)
}
