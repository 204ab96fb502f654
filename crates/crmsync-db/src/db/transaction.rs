//! Database transaction utilities
//!
//! The essential phase writes four collections that must become visible
//! together; [`with_transaction`] runs such multi-step writes atomically.

use crmsync_core::AppError;
use sqlx::{PgPool, Postgres, Transaction};

/// Execute a closure within a database transaction
///
/// Begins a transaction, runs the closure, and commits if it succeeds. On error
/// the transaction is rolled back and nothing the closure wrote is persisted.
///
/// # Example
///
/// ```ignore
/// use crmsync_db::with_transaction;
///
/// async fn example(pool: &sqlx::PgPool) -> Result<(), crmsync_core::AppError> {
///     with_transaction(pool, |tx| Box::pin(async move {
///         sqlx::query("INSERT INTO ...").execute(&mut **tx).await?;
///         sqlx::query("UPDATE ...").execute(&mut **tx).await?;
///         Ok(())
///     })).await
/// }
/// ```
pub async fn with_transaction<F, R>(pool: &PgPool, f: F) -> Result<R, AppError>
where
    F: for<'a> FnOnce(
        &'a mut Transaction<'_, Postgres>,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<R, AppError>> + Send + 'a>,
    >,
{
    let mut tx = pool.begin().await?;

    match f(&mut tx).await {
        Ok(result) => {
            tx.commit().await?;
            Ok(result)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "Transaction rollback failed");
            }
            Err(e)
        }
    }
}
