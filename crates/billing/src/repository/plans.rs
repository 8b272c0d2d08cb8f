//! Read-only plan catalog queries

use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::{Feature, Plan};

const PLAN_COLUMNS: &str =
    "id, name, price_per_seat, tier_level, max_seats, is_active, created_at";

pub async fn find(conn: &mut PgConnection, plan_id: Uuid) -> BillingResult<Option<Plan>> {
    let plan = sqlx::query_as::<_, Plan>(&format!(
        "SELECT {} FROM plans WHERE id = $1",
        PLAN_COLUMNS
    ))
    .bind(plan_id)
    .fetch_optional(conn)
    .await?;

    Ok(plan)
}

pub async fn list_active(conn: &mut PgConnection) -> BillingResult<Vec<Plan>> {
    let plans = sqlx::query_as::<_, Plan>(&format!(
        "SELECT {} FROM plans WHERE is_active ORDER BY tier_level, price_per_seat",
        PLAN_COLUMNS
    ))
    .fetch_all(conn)
    .await?;

    Ok(plans)
}

pub async fn features_for_plan(conn: &mut PgConnection, plan_id: Uuid) -> BillingResult<Vec<Feature>> {
    let features = sqlx::query_as::<_, Feature>(
        r#"
        SELECT f.id, f.code, f.name
        FROM features f
        JOIN plan_features pf ON pf.feature_id = f.id
        WHERE pf.plan_id = $1
        ORDER BY f.code
        "#,
    )
    .bind(plan_id)
    .fetch_all(conn)
    .await?;

    Ok(features)
}
