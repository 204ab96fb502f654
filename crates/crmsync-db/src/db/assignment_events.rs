use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crmsync_core::models::{AssignmentPatch, EmployeeAssignmentUpsert, EmployeeOrgAssignment};
use crmsync_core::AppError;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::store_traits::AssignmentEventStore;

const ASSIGNMENT_COLUMNS: &str = "id, tenant_id, assignment_id, user_key, user_ref, org_key, \
     org_ref, assignment_type, assigned_at, assigned_by, expires_at, is_active, deactivated_at, \
     deactivated_by, priority, metadata, created_at, updated_at";

/// Assignment queries of the organization-assignment consumer
#[derive(Clone)]
pub struct PgAssignmentEventStore {
    pool: PgPool,
}

impl PgAssignmentEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssignmentEventStore for PgAssignmentEventStore {
    async fn find_organization(
        &self,
        tenant_id: &str,
        org_code: &str,
    ) -> Result<Option<Uuid>, AppError> {
        let id = sqlx::query_scalar::<Postgres, Uuid>(
            "SELECT id FROM organizations WHERE tenant_id = $1 AND org_code = $2",
        )
        .bind(tenant_id)
        .bind(org_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    async fn find_organization_ci(
        &self,
        tenant_id: &str,
        org_code: &str,
    ) -> Result<Option<(Uuid, String)>, AppError> {
        let row = sqlx::query_as::<Postgres, (Uuid, String)>(
            r#"
            SELECT id, org_code FROM organizations
            WHERE tenant_id = $1 AND LOWER(org_code) = LOWER($2)
            ORDER BY org_code
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(org_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_user(&self, tenant_id: &str, user_id: &str) -> Result<Option<Uuid>, AppError> {
        let id = sqlx::query_scalar::<Postgres, Uuid>(
            "SELECT id FROM user_profiles WHERE tenant_id = $1 AND user_id = $2",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    #[tracing::instrument(skip(self), fields(db.table = "employee_org_assignments", db.operation = "select"))]
    async fn find_assignment(
        &self,
        tenant_id: &str,
        assignment_id: &str,
    ) -> Result<Option<EmployeeOrgAssignment>, AppError> {
        let assignment = sqlx::query_as::<Postgres, EmployeeOrgAssignment>(&format!(
            "SELECT {} FROM employee_org_assignments WHERE tenant_id = $1 AND assignment_id = $2",
            ASSIGNMENT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(assignment_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(assignment)
    }

    #[tracing::instrument(skip(self), fields(db.table = "employee_org_assignments", db.operation = "select"))]
    async fn find_by_user_org(
        &self,
        tenant_id: &str,
        user_id: &str,
        org_code: &str,
    ) -> Result<Option<EmployeeOrgAssignment>, AppError> {
        let assignment = sqlx::query_as::<Postgres, EmployeeOrgAssignment>(&format!(
            r#"
            SELECT {} FROM employee_org_assignments
            WHERE tenant_id = $1 AND user_key = $2 AND org_key = $3
            ORDER BY is_active DESC, updated_at DESC
            LIMIT 1
            "#,
            ASSIGNMENT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(user_id)
        .bind(org_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(assignment)
    }

    #[tracing::instrument(skip(self, assignment), fields(db.table = "employee_org_assignments", db.operation = "insert"))]
    async fn insert_assignment(
        &self,
        tenant_id: &str,
        assignment: &EmployeeAssignmentUpsert,
    ) -> Result<Option<EmployeeOrgAssignment>, AppError> {
        let inserted = sqlx::query_as::<Postgres, EmployeeOrgAssignment>(&format!(
            r#"
            INSERT INTO employee_org_assignments
                (tenant_id, assignment_id, user_key, user_ref, org_key, org_ref,
                 assignment_type, assigned_at, assigned_by, expires_at, is_active,
                 priority, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (tenant_id, assignment_id) DO NOTHING
            RETURNING {}
            "#,
            ASSIGNMENT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(&assignment.assignment_id)
        .bind(assignment.user.key())
        .bind(assignment.user.id())
        .bind(assignment.organization.key())
        .bind(assignment.organization.id())
        .bind(&assignment.assignment_type)
        .bind(assignment.assigned_at)
        .bind(&assignment.assigned_by)
        .bind(assignment.expires_at)
        .bind(assignment.is_active)
        .bind(assignment.priority)
        .bind(&assignment.metadata)
        .fetch_optional(&self.pool)
        .await?;

        Ok(inserted)
    }

    #[tracing::instrument(skip(self, patch), fields(db.table = "employee_org_assignments", db.operation = "update", db.record_id = %id))]
    async fn update_assignment(
        &self,
        id: Uuid,
        patch: &AssignmentPatch,
    ) -> Result<Option<EmployeeOrgAssignment>, AppError> {
        let priority = patch
            .priority
            .map(|p| crmsync_core::models::clamp_priority(Some(p)));
        let updated = sqlx::query_as::<Postgres, EmployeeOrgAssignment>(&format!(
            r#"
            UPDATE employee_org_assignments
            SET assignment_type = COALESCE($2, assignment_type),
                is_active = COALESCE($3, is_active),
                priority = COALESCE($4, priority),
                expires_at = COALESCE($5, expires_at),
                metadata = COALESCE($6, metadata),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            ASSIGNMENT_COLUMNS
        ))
        .bind(id)
        .bind(&patch.assignment_type)
        .bind(patch.is_active)
        .bind(priority)
        .bind(patch.expires_at)
        .bind(&patch.metadata)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }

    #[tracing::instrument(skip(self), fields(db.table = "employee_org_assignments", db.operation = "delete", db.record_id = %id))]
    async fn delete_assignment(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM employee_org_assignments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), fields(db.table = "employee_org_assignments", db.operation = "update", db.record_id = %id))]
    async fn set_assignment_active(
        &self,
        id: Uuid,
        active: bool,
        by: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<EmployeeOrgAssignment>, AppError> {
        let updated = sqlx::query_as::<Postgres, EmployeeOrgAssignment>(&format!(
            r#"
            UPDATE employee_org_assignments
            SET is_active = $2,
                deactivated_at = CASE WHEN $2 THEN NULL ELSE $3 END,
                deactivated_by = CASE WHEN $2 THEN NULL ELSE $4 END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            ASSIGNMENT_COLUMNS
        ))
        .bind(id)
        .bind(active)
        .bind(at)
        .bind(by)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }
}
