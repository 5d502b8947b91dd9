use {
    bigdecimal::BigDecimal,
    chrono::{DateTime, Utc},
    sqlx::PgConnection,
    tracing::instrument,
};

/// One price observation for a product at one source at one time.
///
/// `(sku_id, source, recorded_at)` is the natural key. Re-ingesting the same
/// observation updates `price_change_pct` because re-runs may recompute it
/// once more history is available; it never duplicates the row.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct PriceLog {
    pub sku_id: i64,
    pub price: BigDecimal,
    pub source: String,
    pub source_url: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub price_change_pct: Option<f64>,
}

#[instrument(skip_all, fields(sku_id = log.sku_id))]
pub async fn upsert(ex: &mut PgConnection, log: &PriceLog) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO price_logs (sku_id, price, source, source_url, recorded_at, price_change_pct)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (sku_id, source, recorded_at) DO UPDATE SET
    price = EXCLUDED.price,
    source_url = EXCLUDED.source_url,
    price_change_pct = EXCLUDED.price_change_pct
;"#;
    sqlx::query(QUERY)
        .bind(log.sku_id)
        .bind(log.price.clone())
        .bind(&log.source)
        .bind(&log.source_url)
        .bind(log.recorded_at)
        .bind(log.price_change_pct)
        .execute(ex)
        .await?;
    Ok(())
}

/// Observations for one product inside `[from, to]`, ordered by `recorded_at`
/// ascending. Used by the week-over-week price analysis.
pub async fn fetch_window(
    ex: &mut PgConnection,
    sku_id: i64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<PriceLog>, sqlx::Error> {
    const QUERY: &str = r#"
SELECT sku_id, price, source, source_url, recorded_at, price_change_pct
FROM price_logs
WHERE sku_id = $1 AND recorded_at >= $2 AND recorded_at <= $3
ORDER BY recorded_at ASC
;"#;
    sqlx::query_as(QUERY)
        .bind(sku_id)
        .bind(from)
        .bind(to)
        .fetch_all(ex)
        .await
}

/// The most recent observation for one product across all sources. Ordered by
/// `recorded_at DESC, id DESC` so ties on the timestamp are still stable.
pub async fn fetch_latest(
    ex: &mut PgConnection,
    sku_id: i64,
) -> Result<Option<PriceLog>, sqlx::Error> {
    const QUERY: &str = r#"
SELECT sku_id, price, source, source_url, recorded_at, price_change_pct
FROM price_logs
WHERE sku_id = $1
ORDER BY recorded_at DESC, id DESC
LIMIT 1
;"#;
    sqlx::query_as(QUERY).bind(sku_id).fetch_optional(ex).await
}
