//! Writers for the dependent collections. Each collection is stored on its own,
//! outside any shared transaction; a bad record is logged and counted in the
//! [`StoreReport`] instead of sinking its batch.

use std::future::Future;

use crmsync_core::models::{
    CreditConfigUpsert, EmployeeAssignmentUpsert, EntityCreditUpsert, Reference,
    RoleAssignmentUpsert, StoreReport,
};
use crmsync_core::AppError;
use sqlx::PgPool;

/// Write records one by one. Fails only when every record failed; otherwise the
/// report carries how many were rejected.
async fn store_each<'r, T, F, Fut>(
    collection: &'static str,
    tenant_id: &str,
    records: &'r [T],
    key: impl Fn(&T) -> &str,
    write: F,
) -> Result<StoreReport, AppError>
where
    F: Fn(&'r T) -> Fut,
    Fut: Future<Output = Result<(), AppError>>,
{
    let mut report = StoreReport::default();
    let mut first_error = None;

    for record in records {
        match write(record).await {
            Ok(()) => report.stored_one(),
            Err(e) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    collection,
                    record = key(record),
                    error = %e,
                    "Failed to store record, skipping"
                );
                report.failed_one(&e);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) if report.stored == 0 => Err(e),
        _ => Ok(report),
    }
}

fn org_columns(reference: Option<&Reference>) -> (Option<&str>, Option<uuid::Uuid>) {
    match reference {
        Some(r) => (Some(r.key()), r.id()),
        None => (None, None),
    }
}

#[tracing::instrument(skip(pool, records), fields(db.table = "employee_org_assignments", db.operation = "upsert", count = records.len()))]
pub async fn upsert_employee_assignments(
    pool: &PgPool,
    tenant_id: &str,
    records: &[EmployeeAssignmentUpsert],
) -> Result<StoreReport, AppError> {
    store_each(
        "employeeAssignments",
        tenant_id,
        records,
        |a| a.assignment_id.as_str(),
        |a| async move {
            sqlx::query(
                r#"
                INSERT INTO employee_org_assignments
                    (tenant_id, assignment_id, user_key, user_ref, org_key, org_ref,
                     assignment_type, assigned_at, assigned_by, expires_at, is_active,
                     priority, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (tenant_id, assignment_id) DO UPDATE SET
                    user_key = EXCLUDED.user_key,
                    user_ref = COALESCE(EXCLUDED.user_ref, employee_org_assignments.user_ref),
                    org_key = EXCLUDED.org_key,
                    org_ref = COALESCE(EXCLUDED.org_ref, employee_org_assignments.org_ref),
                    assignment_type = EXCLUDED.assignment_type,
                    assigned_at = EXCLUDED.assigned_at,
                    assigned_by = EXCLUDED.assigned_by,
                    expires_at = EXCLUDED.expires_at,
                    is_active = EXCLUDED.is_active,
                    priority = EXCLUDED.priority,
                    metadata = EXCLUDED.metadata,
                    updated_at = NOW()
                "#,
            )
            .bind(tenant_id)
            .bind(&a.assignment_id)
            .bind(a.user.key())
            .bind(a.user.id())
            .bind(a.organization.key())
            .bind(a.organization.id())
            .bind(&a.assignment_type)
            .bind(a.assigned_at)
            .bind(&a.assigned_by)
            .bind(a.expires_at)
            .bind(a.is_active)
            .bind(a.priority)
            .bind(&a.metadata)
            .execute(pool)
            .await?;
            Ok(())
        },
    )
    .await
}

#[tracing::instrument(skip(pool, records), fields(db.table = "crm_role_assignments", db.operation = "upsert", count = records.len()))]
pub async fn upsert_role_assignments(
    pool: &PgPool,
    tenant_id: &str,
    records: &[RoleAssignmentUpsert],
) -> Result<StoreReport, AppError> {
    store_each(
        "roleAssignments",
        tenant_id,
        records,
        |a| a.assignment_id.as_str(),
        |a| async move {
            let (org_key, org_ref) = org_columns(a.organization.as_ref());
            sqlx::query(
                r#"
                INSERT INTO crm_role_assignments
                    (tenant_id, assignment_id, user_key, user_ref, role_key, role_ref,
                     org_key, org_ref, assigned_at, assigned_by, expires_at, is_active)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (tenant_id, assignment_id) DO UPDATE SET
                    user_key = EXCLUDED.user_key,
                    user_ref = COALESCE(EXCLUDED.user_ref, crm_role_assignments.user_ref),
                    role_key = EXCLUDED.role_key,
                    role_ref = COALESCE(EXCLUDED.role_ref, crm_role_assignments.role_ref),
                    org_key = EXCLUDED.org_key,
                    org_ref = EXCLUDED.org_ref,
                    assigned_at = EXCLUDED.assigned_at,
                    assigned_by = EXCLUDED.assigned_by,
                    expires_at = EXCLUDED.expires_at,
                    is_active = EXCLUDED.is_active,
                    updated_at = NOW()
                "#,
            )
            .bind(tenant_id)
            .bind(&a.assignment_id)
            .bind(a.user.key())
            .bind(a.user.id())
            .bind(a.role.key())
            .bind(a.role.id())
            .bind(org_key)
            .bind(org_ref)
            .bind(a.assigned_at)
            .bind(&a.assigned_by)
            .bind(a.expires_at)
            .bind(a.is_active)
            .execute(pool)
            .await?;
            Ok(())
        },
    )
    .await
}

const CREDIT_CONFIG_UPSERT: &str = r#"
    ON CONFLICT (tenant_id, config_id) DO UPDATE SET
        config_name = EXCLUDED.config_name,
        operation_code = EXCLUDED.operation_code,
        credit_cost = EXCLUDED.credit_cost,
        org_key = EXCLUDED.org_key,
        org_ref = EXCLUDED.org_ref,
        is_active = EXCLUDED.is_active,
        description = EXCLUDED.description,
        updated_at = NOW()
"#;

/// Bulk upsert, falling back to per-record writes when the batch is rejected.
#[tracing::instrument(skip(pool, records), fields(db.table = "crm_credit_configs", db.operation = "upsert", count = records.len()))]
pub async fn upsert_credit_configs(
    pool: &PgPool,
    tenant_id: &str,
    records: &[CreditConfigUpsert],
) -> Result<StoreReport, AppError> {
    if records.is_empty() {
        return Ok(StoreReport::default());
    }

    let mut config_ids = Vec::with_capacity(records.len());
    let mut names = Vec::with_capacity(records.len());
    let mut operations = Vec::with_capacity(records.len());
    let mut costs = Vec::with_capacity(records.len());
    let mut org_keys = Vec::with_capacity(records.len());
    let mut org_refs = Vec::with_capacity(records.len());
    let mut actives = Vec::with_capacity(records.len());
    let mut descriptions = Vec::with_capacity(records.len());
    for c in records {
        let (org_key, org_ref) = org_columns(c.organization.as_ref());
        config_ids.push(c.config_id.clone());
        names.push(c.config_name.clone());
        operations.push(c.operation_code.clone());
        costs.push(c.credit_cost);
        org_keys.push(org_key.map(str::to_string));
        org_refs.push(org_ref);
        actives.push(c.is_active);
        descriptions.push(c.description.clone());
    }

    let bulk = sqlx::query(&format!(
        r#"
        INSERT INTO crm_credit_configs
            (tenant_id, config_id, config_name, operation_code, credit_cost,
             org_key, org_ref, is_active, description)
        SELECT $1, * FROM UNNEST(
            $2::text[], $3::text[], $4::text[], $5::float8[],
            $6::text[], $7::uuid[], $8::bool[], $9::text[])
        {}
        "#,
        CREDIT_CONFIG_UPSERT
    ))
    .bind(tenant_id)
    .bind(&config_ids)
    .bind(&names)
    .bind(&operations)
    .bind(&costs)
    .bind(&org_keys)
    .bind(&org_refs)
    .bind(&actives)
    .bind(&descriptions)
    .execute(pool)
    .await;

    match bulk {
        Ok(_) => Ok(StoreReport::all(records.len() as u64)),
        Err(e) => {
            tracing::warn!(
                tenant_id = %tenant_id,
                error = %e,
                "Bulk credit config upsert failed, falling back to per-record writes"
            );
            let statement = format!(
                r#"
                INSERT INTO crm_credit_configs
                    (tenant_id, config_id, config_name, operation_code, credit_cost,
                     org_key, org_ref, is_active, description)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                {}
                "#,
                CREDIT_CONFIG_UPSERT
            );
            store_each(
                "creditConfigs",
                tenant_id,
                records,
                |c| c.config_id.as_str(),
                |c| {
                    let statement = statement.as_str();
                    async move {
                        let (org_key, org_ref) = org_columns(c.organization.as_ref());
                        sqlx::query(statement)
                            .bind(tenant_id)
                            .bind(&c.config_id)
                            .bind(&c.config_name)
                            .bind(&c.operation_code)
                            .bind(c.credit_cost)
                            .bind(org_key)
                            .bind(org_ref)
                            .bind(c.is_active)
                            .bind(&c.description)
                            .execute(pool)
                            .await?;
                        Ok(())
                    }
                },
            )
            .await
        }
    }
}

const ENTITY_CREDIT_UPSERT: &str = r#"
    ON CONFLICT (tenant_id, entity_key) DO UPDATE SET
        entity_ref = COALESCE(EXCLUDED.entity_ref, crm_entity_credits.entity_ref),
        allocated_credits = EXCLUDED.allocated_credits,
        used_credits = EXCLUDED.used_credits,
        available_credits = EXCLUDED.available_credits,
        expires_at = EXCLUDED.expires_at,
        is_active = EXCLUDED.is_active,
        updated_at = NOW()
"#;

/// Bulk upsert, falling back to per-record writes when the batch is rejected.
/// `available_credits` arrives already recomputed by `EntityCreditUpsert`.
#[tracing::instrument(skip(pool, records), fields(db.table = "crm_entity_credits", db.operation = "upsert", count = records.len()))]
pub async fn upsert_entity_credits(
    pool: &PgPool,
    tenant_id: &str,
    records: &[EntityCreditUpsert],
) -> Result<StoreReport, AppError> {
    if records.is_empty() {
        return Ok(StoreReport::default());
    }

    let entity_keys: Vec<String> = records.iter().map(|c| c.entity.key().to_string()).collect();
    let entity_refs: Vec<Option<uuid::Uuid>> = records.iter().map(|c| c.entity.id()).collect();
    let allocated: Vec<f64> = records.iter().map(|c| c.allocated_credits).collect();
    let used: Vec<f64> = records.iter().map(|c| c.used_credits).collect();
    let available: Vec<f64> = records.iter().map(|c| c.available_credits).collect();
    let expires: Vec<Option<chrono::DateTime<chrono::Utc>>> =
        records.iter().map(|c| c.expires_at).collect();
    let actives: Vec<bool> = records.iter().map(|c| c.is_active).collect();

    let bulk = sqlx::query(&format!(
        r#"
        INSERT INTO crm_entity_credits
            (tenant_id, entity_key, entity_ref, allocated_credits, used_credits,
             available_credits, expires_at, is_active)
        SELECT $1, * FROM UNNEST(
            $2::text[], $3::uuid[], $4::float8[], $5::float8[],
            $6::float8[], $7::timestamptz[], $8::bool[])
        {}
        "#,
        ENTITY_CREDIT_UPSERT
    ))
    .bind(tenant_id)
    .bind(&entity_keys)
    .bind(&entity_refs)
    .bind(&allocated)
    .bind(&used)
    .bind(&available)
    .bind(&expires)
    .bind(&actives)
    .execute(pool)
    .await;

    match bulk {
        Ok(_) => Ok(StoreReport::all(records.len() as u64)),
        Err(e) => {
            tracing::warn!(
                tenant_id = %tenant_id,
                error = %e,
                "Bulk entity credit upsert failed, falling back to per-record writes"
            );
            let statement = format!(
                r#"
                INSERT INTO crm_entity_credits
                    (tenant_id, entity_key, entity_ref, allocated_credits, used_credits,
                     available_credits, expires_at, is_active)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                {}
                "#,
                ENTITY_CREDIT_UPSERT
            );
            store_each(
                "entityCredits",
                tenant_id,
                records,
                |c| c.entity.key(),
                |c| {
                    let statement = statement.as_str();
                    async move {
                        sqlx::query(statement)
                            .bind(tenant_id)
                            .bind(c.entity.key())
                            .bind(c.entity.id())
                            .bind(c.allocated_credits)
                            .bind(c.used_credits)
                            .bind(c.available_credits)
                            .bind(c.expires_at)
                            .bind(c.is_active)
                            .execute(pool)
                            .await?;
                        Ok(())
                    }
                },
            )
            .await
        }
    }
}
