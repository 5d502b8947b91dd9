//! High-level store operations over the database crate: one transaction per
//! operation, transient failures retried, constraint failures surfaced as
//! typed errors carrying the offending natural key.

use {
    crate::retry::{AttemptError, RetryError, Retryer},
    chrono::{DateTime, NaiveDate, Utc},
    database::{
        market_signals,
        price_logs::{self, PriceLog},
        products::{self, Product, ProductRow},
        risk_alerts,
    },
    model::{MarketSignal, ProductIdentity, RiskAlert},
    sqlx::{postgres::PgPoolOptions, PgPool},
    std::time::Duration,
    tokio_util::sync::CancellationToken,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A constraint kept the record out even though the statement itself was
    /// well-formed. Fatal to the record, not to the run.
    #[error("constraint violation for {key}: {source}")]
    Constraint {
        key: String,
        #[source]
        source: anyhow::Error,
    },
    /// The store could not be reached even after all retries. Fatal to the
    /// pipeline run; work already committed stays committed.
    #[error("store unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
    #[error("store operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(anyhow::Error),
}

impl StoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[derive(Clone)]
pub struct Persistence {
    pool: PgPool,
    retryer: Retryer,
}

impl Persistence {
    pub async fn connect(
        url: &str,
        pool_size: u32,
        acquire_timeout: Duration,
        retryer: Retryer,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|err| StoreError::Unavailable(err.into()))?;
        Ok(Self { pool, retryer })
    }

    #[cfg(test)]
    pub fn with_pool(pool: PgPool, retryer: Retryer) -> Self {
        Self { pool, retryer }
    }

    pub async fn upsert_product(
        &self,
        cancel: &CancellationToken,
        identity: &ProductIdentity,
    ) -> Result<i64, StoreError> {
        let product = Product {
            category: model::product::CATEGORY.to_string(),
            chipset: Some(identity.chipset.as_str().to_string()),
            brand: identity.brand.clone(),
            model_name: identity.model_name.clone(),
            vram: Some(identity.vram.clone()),
            is_oc: identity.is_oc,
        };
        Metrics::get().operations.with_label_values(&["upsert_product"]).inc();
        let product = &product;
        self.retryer
            .run(cancel, "upsert_product", move || async move {
                let mut tx = self.pool.begin().await.map_err(AttemptError::from_sqlx)?;
                let id = products::upsert(&mut tx, &product)
                    .await
                    .map_err(AttemptError::from_sqlx)?;
                tx.commit().await.map_err(AttemptError::from_sqlx)?;
                Ok(id)
            })
            .await
            .map_err(|err| classify(format!("({}, {})", product.brand, product.model_name), err))
    }

    pub async fn insert_price(
        &self,
        cancel: &CancellationToken,
        log: &PriceLog,
    ) -> Result<(), StoreError> {
        Metrics::get().operations.with_label_values(&["insert_price"]).inc();
        self.retryer
            .run(cancel, "insert_price", move || async move {
                let mut tx = self.pool.begin().await.map_err(AttemptError::from_sqlx)?;
                price_logs::upsert(&mut tx, log)
                    .await
                    .map_err(AttemptError::from_sqlx)?;
                tx.commit().await.map_err(AttemptError::from_sqlx)
            })
            .await
            .map_err(|err| {
                classify(
                    format!("({}, {}, {})", log.sku_id, log.source, log.recorded_at),
                    err,
                )
            })
    }

    pub async fn insert_signal(
        &self,
        cancel: &CancellationToken,
        signal: &MarketSignal,
    ) -> Result<(), StoreError> {
        let row = market_signals::MarketSignal {
            keyword: signal.keyword.as_str().to_string(),
            post_title: signal.post_title.clone(),
            post_url: signal.post_url.clone(),
            subreddit: signal.subreddit.clone(),
            sentiment_score: signal.sentiment_score,
            mention_count: signal.mention_count,
            date: signal.date,
        };
        Metrics::get().operations.with_label_values(&["insert_signal"]).inc();
        let row = &row;
        self.retryer
            .run(cancel, "insert_signal", move || async move {
                let mut tx = self.pool.begin().await.map_err(AttemptError::from_sqlx)?;
                market_signals::upsert(&mut tx, &row)
                    .await
                    .map_err(AttemptError::from_sqlx)?;
                tx.commit().await.map_err(AttemptError::from_sqlx)
            })
            .await
            .map_err(|err| {
                classify(
                    format!("({}, {}, {})", row.keyword, row.date, row.post_url),
                    err,
                )
            })
    }

    pub async fn insert_alert(
        &self,
        cancel: &CancellationToken,
        alert: &RiskAlert,
    ) -> Result<i64, StoreError> {
        let factors = serde_json::to_value(&alert.contributing_factors)
            .map_err(|err| StoreError::Other(err.into()))?;
        let row = risk_alerts::RiskAlert {
            sku_id: alert.product_id,
            risk_index: alert.risk_index,
            threshold: alert.threshold,
            contributing_factors: factors,
        };
        Metrics::get().operations.with_label_values(&["insert_alert"]).inc();
        let row = &row;
        self.retryer
            .run(cancel, "insert_alert", move || async move {
                let mut tx = self.pool.begin().await.map_err(AttemptError::from_sqlx)?;
                let id = risk_alerts::insert(&mut tx, &row)
                    .await
                    .map_err(AttemptError::from_sqlx)?;
                tx.commit().await.map_err(AttemptError::from_sqlx)?;
                Ok(id)
            })
            .await
            .map_err(|err| classify(format!("sku {}", row.sku_id), err))
    }

    /// Observations inside `[from, to]` ordered by `recorded_at` ascending.
    pub async fn historical_prices(
        &self,
        cancel: &CancellationToken,
        product_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PriceLog>, StoreError> {
        Metrics::get().operations.with_label_values(&["historical_prices"]).inc();
        self.retryer
            .run(cancel, "historical_prices", move || async move {
                let mut con = self.pool.acquire().await.map_err(AttemptError::from_sqlx)?;
                price_logs::fetch_window(&mut con, product_id, from, to)
                    .await
                    .map_err(AttemptError::from_sqlx)
            })
            .await
            .map_err(|err| classify(format!("sku {product_id}"), err))
    }

    pub async fn latest_price(
        &self,
        cancel: &CancellationToken,
        product_id: i64,
    ) -> Result<Option<PriceLog>, StoreError> {
        Metrics::get().operations.with_label_values(&["latest_price"]).inc();
        self.retryer
            .run(cancel, "latest_price", move || async move {
                let mut con = self.pool.acquire().await.map_err(AttemptError::from_sqlx)?;
                price_logs::fetch_latest(&mut con, product_id)
                    .await
                    .map_err(AttemptError::from_sqlx)
            })
            .await
            .map_err(|err| classify(format!("sku {product_id}"), err))
    }

    /// Total mentions per keyword inside `[from, to]`.
    pub async fn keyword_counts(
        &self,
        cancel: &CancellationToken,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        Metrics::get().operations.with_label_values(&["keyword_counts"]).inc();
        self.retryer
            .run(cancel, "keyword_counts", move || async move {
                let mut con = self.pool.acquire().await.map_err(AttemptError::from_sqlx)?;
                market_signals::keyword_counts(&mut con, from, to)
                    .await
                    .map_err(AttemptError::from_sqlx)
            })
            .await
            .map_err(|err| classify(format!("[{from}, {to}]"), err))
    }

    pub async fn all_products(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ProductRow>, StoreError> {
        Metrics::get().operations.with_label_values(&["all_products"]).inc();
        self.retryer
            .run(cancel, "all_products", move || async move {
                let mut con = self.pool.acquire().await.map_err(AttemptError::from_sqlx)?;
                products::all(&mut con).await.map_err(AttemptError::from_sqlx)
            })
            .await
            .map_err(|err| classify("products".to_string(), err))
    }
}

fn classify(key: String, error: RetryError) -> StoreError {
    match error {
        RetryError::Cancelled { .. } => StoreError::Cancelled,
        RetryError::Exhausted { source, .. } => StoreError::Unavailable(source),
        RetryError::Fatal { source, .. } => {
            let constraint = source
                .downcast_ref::<sqlx::Error>()
                .and_then(|err| err.as_database_error())
                .map(|err| !matches!(err.kind(), sqlx::error::ErrorKind::Other))
                .unwrap_or(false);
            if constraint {
                StoreError::Constraint { key, source }
            } else {
                StoreError::Other(source)
            }
        }
    }
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "store")]
struct Metrics {
    /// Number of store operations issued.
    #[metric(labels("operation"))]
    operations: prometheus::IntCounterVec,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}
