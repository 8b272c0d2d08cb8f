//! Read-only plan catalog

use sqlx::PgPool;
use staffly_shared::FeatureCode;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::Plan;
use crate::repository::plans;

/// Plan and feature lookup. The engine never writes to the catalog.
#[derive(Clone)]
pub struct PlanCatalog {
    pool: PgPool,
}

impl PlanCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_plan(&self, plan_id: Uuid) -> BillingResult<Plan> {
        let mut conn = self.pool.acquire().await?;
        plans::find(&mut conn, plan_id)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound(plan_id.to_string()))
    }

    /// Plans offered for purchase, cheapest tier first
    pub async fn list_plans(&self) -> BillingResult<Vec<Plan>> {
        let mut conn = self.pool.acquire().await?;
        plans::list_active(&mut conn).await
    }

    /// Typed capability set of a plan. Unknown feature codes are skipped.
    pub async fn features(&self, plan_id: Uuid) -> BillingResult<BTreeSet<FeatureCode>> {
        let mut conn = self.pool.acquire().await?;
        let rows = plans::features_for_plan(&mut conn, plan_id).await?;
        Ok(feature_codes(plan_id, rows.iter().map(|f| f.code.as_str())))
    }
}

pub(crate) fn feature_codes<'a>(
    plan_id: Uuid,
    codes: impl Iterator<Item = &'a str>,
) -> BTreeSet<FeatureCode> {
    codes
        .filter_map(|code| match code.parse::<FeatureCode>() {
            Ok(feature) => Some(feature),
            Err(_) => {
                tracing::warn!(plan_id = %plan_id, code = %code, "Unknown feature code on plan");
                None
            }
        })
        .collect()
}
