//! Throwaway PostgreSQL for repository tests.
//!
//! Needs a Docker daemon. Each test gets its own container with the workspace
//! migrations applied: `cargo test -p crmsync-db --test postgres_store_test`.

#![allow(dead_code)]

use std::time::Duration;

use chrono::Utc;
use crmsync_core::models::{
    EmployeeAssignmentUpsert, OrganizationUpsert, Reference, RoleUpsert, TenantStatus,
    TenantUpsert, UserUpsert,
};
use crmsync_db::EssentialData;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

pub const TENANT: &str = "t1";

/// Pool plus the container backing it; dropping it stops the database.
pub struct TestDb {
    pub pool: PgPool,
    _container: ContainerAsync<Postgres>,
}

pub async fn setup_test_db() -> TestDb {
    let container = Postgres::default()
        .with_tag("16-alpine")
        .start()
        .await
        .expect("Failed to start postgres container");

    let connection_string = format!(
        "postgresql://postgres:postgres@{}:{}/postgres",
        container.get_host().await.expect("Failed to get container host"),
        container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get container port")
    );

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&connection_string)
        .await
        .expect("Failed to connect to test database");

    crmsync_db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    TestDb {
        pool,
        _container: container,
    }
}

pub fn org(code: &str, parent: Option<&str>) -> OrganizationUpsert {
    OrganizationUpsert {
        org_code: code.to_string(),
        name: code.to_string(),
        status: "active".to_string(),
        level: None,
        path: None,
        description: None,
        parent_code: parent.map(str::to_string),
    }
}

pub fn user(user_id: &str, first_name: &str) -> UserUpsert {
    UserUpsert {
        user_id: user_id.to_string(),
        employee_code: None,
        first_name: Some(first_name.to_string()),
        last_name: None,
        email: None,
        is_active: true,
    }
}

/// ROOT with child SALES (listed first), one role and the given users.
pub fn essential(users: Vec<UserUpsert>) -> EssentialData {
    EssentialData {
        tenant: TenantUpsert {
            tenant_id: TENANT.to_string(),
            name: "Tenant One".to_string(),
            status: TenantStatus::Active,
            settings: json!({}),
            subscription: json!({}),
        },
        organizations: vec![org("SALES", Some("ROOT")), org("ROOT", None)],
        roles: vec![RoleUpsert {
            role_id: "r-admin".to_string(),
            name: "Admin".to_string(),
            permissions: vec!["*".to_string()],
            priority: 1,
            is_active: true,
            description: None,
        }],
        users,
    }
}

pub fn assignment(id: &str, user: Reference, org: Reference) -> EmployeeAssignmentUpsert {
    EmployeeAssignmentUpsert {
        assignment_id: id.to_string(),
        user,
        organization: org,
        assignment_type: "primary".to_string(),
        assigned_at: Utc::now(),
        assigned_by: Some("admin".to_string()),
        expires_at: None,
        is_active: true,
        priority: 5,
        metadata: json!({}),
    }
}

pub async fn count(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM {} WHERE tenant_id = $1",
        table
    ))
    .bind(TENANT)
    .fetch_one(pool)
    .await
    .expect("count query")
}
