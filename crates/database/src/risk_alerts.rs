use {
    chrono::{DateTime, Utc},
    sqlx::PgConnection,
    tracing::instrument,
};

/// A risk event to persist. Alerts are an append-only stream with no natural
/// key; the same product may alert on every run and each firing is a new row.
#[derive(Clone, Debug, PartialEq)]
pub struct RiskAlert {
    pub sku_id: i64,
    pub risk_index: f64,
    pub threshold: f64,
    pub contributing_factors: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct RiskAlertRow {
    pub id: i64,
    pub sku_id: i64,
    pub risk_index: f64,
    pub threshold: f64,
    pub contributing_factors: serde_json::Value,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

#[instrument(skip_all, fields(sku_id = alert.sku_id, risk = alert.risk_index))]
pub async fn insert(ex: &mut PgConnection, alert: &RiskAlert) -> Result<i64, sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO risk_alerts (sku_id, risk_index, threshold, contributing_factors, acknowledged, created_at)
VALUES ($1, $2, $3, $4, FALSE, now())
RETURNING id
;"#;
    sqlx::query_scalar(QUERY)
        .bind(alert.sku_id)
        .bind(alert.risk_index)
        .bind(alert.threshold)
        .bind(&alert.contributing_factors)
        .fetch_one(ex)
        .await
}

/// Operator acknowledgement. Toggles the flag, never deletes.
pub async fn set_acknowledged(
    ex: &mut PgConnection,
    id: i64,
    acknowledged: bool,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"UPDATE risk_alerts SET acknowledged = $2 WHERE id = $1;"#;
    sqlx::query(QUERY)
        .bind(id)
        .bind(acknowledged)
        .execute(ex)
        .await?;
    Ok(())
}

/// Unacknowledged alerts, newest first.
pub async fn fetch_unacknowledged(
    ex: &mut PgConnection,
    limit: i64,
) -> Result<Vec<RiskAlertRow>, sqlx::Error> {
    const QUERY: &str = r#"
SELECT * FROM risk_alerts
WHERE acknowledged = FALSE
ORDER BY created_at DESC
LIMIT $1
;"#;
    sqlx::query_as(QUERY).bind(limit).fetch_all(ex).await
}
