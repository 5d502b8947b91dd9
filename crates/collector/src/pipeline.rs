//! Orchestrates one end-to-end pass: extract → normalize → load → analyze.
//!
//! Record-level failures are counted and swallowed; a phase failure does not
//! stop later phases unless the store itself became unavailable, which is
//! fatal to the whole run. Work already committed stays committed.

use {
    crate::{
        analyze::{
            price,
            risk::{self, RiskConfig},
            sentiment,
        },
        extract::{danawa::DanawaClient, reddit::RedditClient},
        normalize,
        persistence::{Persistence, StoreError},
    },
    bigdecimal::BigDecimal,
    chrono::{Duration, Utc},
    database::price_logs::PriceLog,
    futures::StreamExt,
    model::{Keyword, RawListing, RunStats},
    std::time::Instant,
    tokio::sync::Mutex,
    tokio_util::sync::CancellationToken,
};

pub struct Pipeline {
    danawa: DanawaClient,
    reddit: RedditClient,
    persistence: Persistence,
    risk: RiskConfig,
    weights: sentiment::Weights,
    sentiment_window_days: i64,
    /// Held for the duration of a run; a second invocation while locked is
    /// dropped, not queued.
    running: Mutex<()>,
}

/// How a single record failed.
enum RecordError {
    /// Log, count, move on to the next record.
    Skip(String),
    /// The store is gone; no later record or phase can succeed.
    Fatal(StoreError),
    Cancelled,
}

impl From<StoreError> for RecordError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Cancelled => RecordError::Cancelled,
            error if error.is_fatal() => RecordError::Fatal(error),
            error => RecordError::Skip(error.to_string()),
        }
    }
}

impl Pipeline {
    pub fn new(
        danawa: DanawaClient,
        reddit: RedditClient,
        persistence: Persistence,
        risk: RiskConfig,
        weights: sentiment::Weights,
        sentiment_window_days: i64,
    ) -> Self {
        Self {
            danawa,
            reddit,
            persistence,
            risk,
            weights,
            sentiment_window_days,
            running: Mutex::new(()),
        }
    }

    pub async fn run_price_only(&self, cancel: &CancellationToken) -> RunStats {
        self.run("price-only", cancel, |phases| {
            phases.price = true;
        })
        .await
    }

    pub async fn run_signals_only(&self, cancel: &CancellationToken) -> RunStats {
        self.run("signals-only", cancel, |phases| {
            phases.signals = true;
        })
        .await
    }

    pub async fn run_full(&self, cancel: &CancellationToken) -> RunStats {
        self.run("full", cancel, |phases| {
            phases.price = true;
            phases.signals = true;
            phases.analyze = true;
        })
        .await
    }

    async fn run(
        &self,
        kind: &'static str,
        cancel: &CancellationToken,
        select: impl FnOnce(&mut Phases),
    ) -> RunStats {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::warn!(kind, "pipeline already running, skipping this invocation");
            return RunStats {
                success: true,
                skipped_overlapping: true,
                ..Default::default()
            };
        };
        let mut phases = Phases::default();
        select(&mut phases);

        let started = Instant::now();
        let mut stats = RunStats {
            success: true,
            ..Default::default()
        };
        tracing::info!(kind, "pipeline run starting");

        if phases.price && stats.success && !cancel.is_cancelled() {
            self.price_phase(cancel, &mut stats).await;
        }
        if phases.signals && stats.success && !cancel.is_cancelled() {
            self.signals_phase(cancel, &mut stats).await;
        }
        if phases.analyze && stats.success && !cancel.is_cancelled() {
            self.analyze_phase(cancel, &mut stats).await;
        }

        stats.duration = started.elapsed();
        let outcome = if stats.success { "ok" } else { "failed" };
        Metrics::get().runs.with_label_values(&[kind, outcome]).inc();
        tracing::info!(
            kind,
            products = stats.products_upserted,
            prices = stats.prices_inserted,
            signals = stats.signals_inserted,
            alerts = stats.alerts_inserted,
            skipped = stats.records_skipped,
            errors = stats.errors.len(),
            duration = ?stats.duration,
            success = stats.success,
            "pipeline run finished"
        );
        stats
    }

    /// Extract prices → normalize → upsert products → insert history →
    /// compute week-over-week change → insert the current observation.
    async fn price_phase(&self, cancel: &CancellationToken, stats: &mut RunStats) {
        let mut listings = std::pin::pin!(self.danawa.listings(cancel));
        while let Some(listing) = listings.next().await {
            match self.load_listing(cancel, &listing).await {
                Ok(prices) => {
                    stats.products_upserted += 1;
                    stats.prices_inserted += prices;
                }
                Err(RecordError::Skip(reason)) => {
                    tracing::warn!(name = %listing.raw_name, %reason, "skipping listing");
                    Metrics::get().skipped_records.inc();
                    stats.records_skipped += 1;
                    stats.record_error(reason);
                }
                Err(RecordError::Fatal(error)) => {
                    tracing::error!(?error, "store unavailable, aborting run");
                    stats.record_error(error);
                    stats.success = false;
                    return;
                }
                Err(RecordError::Cancelled) => return,
            }
        }
    }

    async fn load_listing(
        &self,
        cancel: &CancellationToken,
        listing: &RawListing,
    ) -> Result<usize, RecordError> {
        let identity = normalize::normalize(&listing.raw_name)
            .map_err(|err| RecordError::Skip(err.to_string()))?;
        let product_id = self.persistence.upsert_product(cancel, &identity).await?;

        // Load the scraped history first so the change window below already
        // sees it.
        let mut inserted = 0;
        for point in &listing.history {
            self.persistence
                .insert_price(
                    cancel,
                    &PriceLog {
                        sku_id: product_id,
                        price: point.price.clone(),
                        source: listing.source.clone(),
                        source_url: listing.source_url.clone(),
                        recorded_at: point.recorded_at,
                        price_change_pct: None,
                    },
                )
                .await?;
            inserted += 1;
        }

        let (from, to) = price::window(listing.recorded_at);
        let window: Vec<BigDecimal> = self
            .persistence
            .historical_prices(cancel, product_id, from, to)
            .await?
            .into_iter()
            .map(|log| log.price)
            .collect();
        let price_change_pct = match price::change_pct(&window, &listing.price) {
            Ok(Some(pct)) => Some(pct),
            Ok(None) => {
                tracing::warn!(product_id, "no observations a week ago, storing null change");
                None
            }
            Err(err) => return Err(RecordError::Skip(err.to_string())),
        };
        self.persistence
            .insert_price(
                cancel,
                &PriceLog {
                    sku_id: product_id,
                    price: listing.price.clone(),
                    source: listing.source.clone(),
                    source_url: listing.source_url.clone(),
                    recorded_at: listing.recorded_at,
                    price_change_pct,
                },
            )
            .await?;
        inserted += 1;
        Ok(inserted)
    }

    /// Extract feeds → insert signals.
    async fn signals_phase(&self, cancel: &CancellationToken, stats: &mut RunStats) {
        let date = Utc::now().date_naive();
        for signal in self.reddit.signals(cancel, date).await {
            match self.persistence.insert_signal(cancel, &signal).await {
                Ok(()) => stats.signals_inserted += 1,
                Err(StoreError::Cancelled) => return,
                Err(error) if error.is_fatal() => {
                    tracing::error!(?error, "store unavailable, aborting run");
                    stats.record_error(error);
                    stats.success = false;
                    return;
                }
                Err(error) => {
                    tracing::warn!(post = %signal.post_url, ?error, "skipping signal");
                    Metrics::get().skipped_records.inc();
                    stats.records_skipped += 1;
                    stats.record_error(error);
                }
            }
        }
    }

    /// Sentiment over the last week plus the risk index for every product the
    /// store knows about.
    async fn analyze_phase(&self, cancel: &CancellationToken, stats: &mut RunStats) {
        let now = Utc::now();
        let today = now.date_naive();
        let from = today - Duration::days(self.sentiment_window_days);
        let counts = match self.persistence.keyword_counts(cancel, from, today).await {
            Ok(counts) => counts,
            Err(StoreError::Cancelled) => return,
            Err(error) => {
                self.phase_failure(stats, error);
                return;
            }
        };
        if counts.is_empty() {
            tracing::warn!("no signals in the window, skipping risk analysis");
            return;
        }
        let sentiment_score = sentiment::score(&counts, &self.weights);
        let new_release_mentions = counts
            .iter()
            .find(|(keyword, _)| keyword == Keyword::NewRelease.as_str())
            .map(|(_, count)| *count)
            .unwrap_or(0);
        tracing::info!(sentiment_score, new_release_mentions, "aggregated signals");

        let products = match self.persistence.all_products(cancel).await {
            Ok(products) => products,
            Err(StoreError::Cancelled) => return,
            Err(error) => {
                self.phase_failure(stats, error);
                return;
            }
        };
        for product in products {
            if cancel.is_cancelled() {
                return;
            }
            if let Err(error) = self
                .assess_product(cancel, product.id, new_release_mentions, sentiment_score, stats)
                .await
            {
                match error {
                    RecordError::Skip(reason) => {
                        tracing::warn!(product_id = product.id, %reason, "skipping risk assessment");
                        stats.records_skipped += 1;
                        stats.record_error(reason);
                    }
                    RecordError::Fatal(error) => {
                        self.phase_failure(stats, error);
                        return;
                    }
                    RecordError::Cancelled => return,
                }
            }
        }
    }

    async fn assess_product(
        &self,
        cancel: &CancellationToken,
        product_id: i64,
        new_release_mentions: i64,
        sentiment_score: f64,
        stats: &mut RunStats,
    ) -> Result<(), RecordError> {
        let now = Utc::now();
        let Some(latest) = self.persistence.latest_price(cancel, product_id).await? else {
            tracing::warn!(product_id, "no price observations, skipping risk assessment");
            return Ok(());
        };
        let (from, to) = price::window(now);
        let window: Vec<BigDecimal> = self
            .persistence
            .historical_prices(cancel, product_id, from, to)
            .await?
            .into_iter()
            .map(|log| log.price)
            .collect();
        let Some(week_ago_avg) = price::average(&window) else {
            tracing::warn!(product_id, "no week-old history, skipping risk assessment");
            return Ok(());
        };
        let Some(current_price) = bigdecimal::ToPrimitive::to_f64(&latest.price) else {
            return Err(RecordError::Skip(format!(
                "unrepresentable price {}",
                latest.price
            )));
        };
        let inputs = risk::RiskInputs {
            current_price,
            week_ago_avg,
            new_release_mentions,
            sentiment_score,
        };
        let assessment = risk::evaluate(&self.risk, product_id, &inputs, now);
        tracing::debug!(product_id, risk = assessment.risk_index, "assessed product");
        if let Some(alert) = assessment.alert {
            self.persistence.insert_alert(cancel, &alert).await?;
            Metrics::get().alerts_fired.inc();
            stats.alerts_inserted += 1;
            tracing::warn!(
                product_id,
                risk = alert.risk_index,
                threshold = alert.threshold,
                "risk alert fired"
            );
        }
        Ok(())
    }

    fn phase_failure(&self, stats: &mut RunStats, error: StoreError) {
        if error.is_fatal() {
            tracing::error!(?error, "store unavailable, aborting run");
            stats.success = false;
        } else {
            tracing::error!(?error, "analysis phase failed");
        }
        stats.record_error(error);
    }
}

#[derive(Default)]
struct Phases {
    price: bool,
    signals: bool,
    analyze: bool,
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "pipeline")]
struct Metrics {
    /// Number of pipeline runs by kind and outcome.
    #[metric(labels("kind", "outcome"))]
    runs: prometheus::IntCounterVec,
    /// Records dropped because of record-level errors.
    skipped_records: prometheus::IntCounter,
    /// Risk alerts persisted.
    alerts_fired: prometheus::IntCounter,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{extract, retry::Retryer},
        sqlx::postgres::PgPoolOptions,
        std::{sync::Arc, time::Duration as StdDuration},
        wiremock::{
            matchers::{method, path},
            Mock, MockServer, ResponseTemplate,
        },
    };

    /// A pipeline whose store points at a lazily-connected pool: extraction
    /// works against wiremock, the first store round-trip fails.
    async fn pipeline(server: &MockServer) -> Pipeline {
        let client = reqwest::Client::builder()
            .user_agent(extract::USER_AGENT)
            .build()
            .unwrap();
        let retryer = Retryer::new(2, StdDuration::ZERO);
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(StdDuration::from_millis(200))
            .connect_lazy("postgresql://postgres@127.0.0.1:1/nope")
            .unwrap();
        Pipeline::new(
            DanawaClient::new(
                client.clone(),
                server.uri().parse().unwrap(),
                retryer.clone(),
                2,
                StdDuration::ZERO,
            ),
            RedditClient::new(
                client,
                server.uri().parse().unwrap(),
                vec!["nvidia".to_string()],
                retryer.clone(),
                StdDuration::ZERO,
            ),
            Persistence::with_pool(pool, retryer),
            RiskConfig { threshold: 100.0 },
            sentiment::Weights::default(),
            sentiment::DEFAULT_WINDOW_DAYS,
        )
    }

    fn feed_with_signal() -> String {
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>r/nvidia</title>
<item><title>price drop</title><link>https://reddit.com/a</link></item>
</channel></rss>"#
            .to_string()
    }

    #[tokio::test]
    async fn store_unavailable_is_fatal_to_the_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/nvidia/.rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed_with_signal()))
            .mount(&server)
            .await;

        let pipeline = pipeline(&server).await;
        let cancel = CancellationToken::new();
        let stats = pipeline.run_signals_only(&cancel).await;
        assert!(!stats.success);
        assert!(!stats.errors.is_empty());
        assert_eq!(stats.signals_inserted, 0);
    }

    #[tokio::test]
    async fn overlapping_invocation_is_skipped_not_queued() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/nvidia/.rss"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(feed_with_signal())
                    .set_delay(StdDuration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let pipeline = Arc::new(pipeline(&server).await);
        let cancel = CancellationToken::new();
        let first = {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run_signals_only(&cancel).await })
        };
        // Give the first run time to take the lock and block on the feed.
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        let second = pipeline.run_signals_only(&cancel).await;
        assert!(second.skipped_overlapping);
        assert_eq!(second.signals_inserted, 0);

        let first = first.await.unwrap();
        assert!(!first.skipped_overlapping);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_the_run() {
        let server = MockServer::start().await;
        let pipeline = pipeline(&server).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stats = pipeline.run_full(&cancel).await;
        // Nothing ran, nothing failed.
        assert!(stats.success);
        assert_eq!(stats.prices_inserted, 0);
        assert_eq!(stats.signals_inserted, 0);
    }
}
