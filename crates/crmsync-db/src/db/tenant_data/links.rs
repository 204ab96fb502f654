//! Reference maps and the post-sync relink pass.

use std::collections::HashMap;

use crmsync_core::models::ReferenceMaps;
use crmsync_core::AppError;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::store_traits::LinkStats;

async fn key_map(pool: &PgPool, query: &str, tenant_id: &str) -> Result<HashMap<String, Uuid>, AppError> {
    let rows = sqlx::query_as::<Postgres, (String, Uuid)>(query)
        .bind(tenant_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().collect())
}

#[tracing::instrument(skip(pool), fields(db.operation = "select"))]
pub async fn load_reference_maps(pool: &PgPool, tenant_id: &str) -> Result<ReferenceMaps, AppError> {
    Ok(ReferenceMaps {
        organizations: key_map(
            pool,
            "SELECT org_code, id FROM organizations WHERE tenant_id = $1",
            tenant_id,
        )
        .await?,
        roles: key_map(
            pool,
            "SELECT role_id, id FROM crm_roles WHERE tenant_id = $1",
            tenant_id,
        )
        .await?,
        users: key_map(
            pool,
            "SELECT user_id, id FROM user_profiles WHERE tenant_id = $1",
            tenant_id,
        )
        .await?,
    })
}

/// `(table, key column, ref column, referent table, referent key column)` of every
/// dual-column reference.
const PENDING_REFERENCES: &[(&str, &str, &str, &str, &str)] = &[
    ("employee_org_assignments", "user_key", "user_ref", "user_profiles", "user_id"),
    ("employee_org_assignments", "org_key", "org_ref", "organizations", "org_code"),
    ("crm_role_assignments", "user_key", "user_ref", "user_profiles", "user_id"),
    ("crm_role_assignments", "role_key", "role_ref", "crm_roles", "role_id"),
    ("crm_role_assignments", "org_key", "org_ref", "organizations", "org_code"),
    ("crm_credit_configs", "org_key", "org_ref", "organizations", "org_code"),
    ("crm_entity_credits", "entity_key", "entity_ref", "organizations", "org_code"),
];

#[tracing::instrument(skip(pool), fields(db.operation = "update"))]
pub async fn link_user_assignments(pool: &PgPool, tenant_id: &str) -> Result<LinkStats, AppError> {
    let mut stats = LinkStats::default();

    for (table, key, reference, target, target_key) in PENDING_REFERENCES {
        let resolved = sqlx::query(&format!(
            r#"
            UPDATE {table} AS r
            SET {reference} = t.id, updated_at = NOW()
            FROM {target} AS t
            WHERE r.tenant_id = $1
              AND t.tenant_id = $1
              AND r.{reference} IS NULL
              AND r.{key} = t.{target_key}
            "#
        ))
        .bind(tenant_id)
        .execute(pool)
        .await?
        .rows_affected();
        stats.resolved_references += resolved;
    }

    stats.users_linked = sqlx::query(
        r#"
        UPDATE user_profiles AS u
        SET assignment_ids = COALESCE((
                SELECT array_agg(a.id ORDER BY a.priority DESC, a.assigned_at)
                FROM employee_org_assignments AS a
                WHERE a.tenant_id = u.tenant_id
                  AND a.user_key = u.user_id
                  AND a.is_active
            ), '{}'),
            updated_at = NOW()
        WHERE u.tenant_id = $1
        "#,
    )
    .bind(tenant_id)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(stats)
}
