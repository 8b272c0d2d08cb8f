//! Entitlement resolution
//!
//! Resolves what a company may use right now: its subscription, the plan it is on,
//! and a typed capability set. Feature gates check `FeatureCode`s, never strings.

use serde::Serialize;
use sqlx::PgPool;
use staffly_shared::FeatureCode;
use std::collections::BTreeSet;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::catalog::feature_codes;
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::models::{Plan, Subscription};
use crate::repository::{plans, subscriptions};

/// Subscription resolved with its plan and capabilities
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionSnapshot {
    pub subscription: Subscription,
    pub plan: Plan,
    pub features: BTreeSet<FeatureCode>,
    pub has_access: bool,
    pub access_ends_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub resolved_at: OffsetDateTime,
}

impl SubscriptionSnapshot {
    pub fn build(
        subscription: Subscription,
        plan: Plan,
        features: BTreeSet<FeatureCode>,
        config: &BillingConfig,
        now: OffsetDateTime,
    ) -> Self {
        let grace = config.grace_period();
        Self {
            has_access: subscription.has_access(now, grace),
            access_ends_at: subscription.access_ends_at(grace),
            subscription,
            plan,
            features,
            resolved_at: now,
        }
    }

    /// Feature is on the plan and the subscription currently grants access
    pub fn has_feature(&self, feature: FeatureCode) -> bool {
        self.has_access && self.features.contains(&feature)
    }

    /// Whether one more employee may be activated
    pub fn can_add_employee(&self, active_employees: i64) -> bool {
        self.has_access && active_employees < i64::from(self.subscription.max_seats)
    }
}

#[derive(Clone)]
pub struct EntitlementService {
    pool: PgPool,
    config: Arc<BillingConfig>,
}

impl EntitlementService {
    pub fn new(pool: PgPool, config: Arc<BillingConfig>) -> Self {
        Self { pool, config }
    }

    pub async fn resolve(&self, company_id: Uuid) -> BillingResult<SubscriptionSnapshot> {
        let mut conn = self.pool.acquire().await?;

        let sub = subscriptions::find_by_company(&mut conn, company_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(company_id.to_string()))?;
        let plan = plans::find(&mut conn, sub.plan_id)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound(sub.plan_id.to_string()))?;
        let rows = plans::features_for_plan(&mut conn, plan.id).await?;
        let features = feature_codes(plan.id, rows.iter().map(|f| f.code.as_str()));

        Ok(SubscriptionSnapshot::build(
            sub,
            plan,
            features,
            &self.config,
            OffsetDateTime::now_utc(),
        ))
    }

    pub async fn has_feature(&self, company_id: Uuid, feature: FeatureCode) -> BillingResult<bool> {
        Ok(self.resolve(company_id).await?.has_feature(feature))
    }
}
