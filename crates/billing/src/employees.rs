//! Active employee counts
//!
//! Employee records belong to the HR domain; billing only needs the count of active
//! employees per company to bound seat changes.

use async_trait::async_trait;
use mockall::automock;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;

#[automock]
#[async_trait]
pub trait EmployeeCounter: Send + Sync {
    async fn count_active_by_company(&self, company_id: Uuid) -> BillingResult<i64>;
}

/// Counts rows in the HR `employees` table
#[derive(Clone)]
pub struct PgEmployeeCounter {
    pool: PgPool,
}

impl PgEmployeeCounter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmployeeCounter for PgEmployeeCounter {
    async fn count_active_by_company(&self, company_id: Uuid) -> BillingResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM employees
            WHERE company_id = $1
              AND status = 'active'
              AND deleted_at IS NULL
            "#,
        )
        .bind(company_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
