//! Collects market signals from community RSS feeds: every post is scanned
//! case-insensitively against the curated keyword set, one signal per
//! post×keyword at most.

use {
    super::ExtractError,
    crate::retry::{AttemptError, Retryer},
    chrono::NaiveDate,
    feed_rs::model::Feed,
    model::{Keyword, MarketSignal},
    reqwest::{Client, StatusCode},
    std::time::Duration,
    tokio_util::sync::CancellationToken,
    url::Url,
};

/// Marker used to carry a 429 through the retry layer untouched.
#[derive(Debug, thiserror::Error)]
#[error("rate limited")]
struct RateLimited;

pub struct RedditClient {
    client: Client,
    base: Url,
    subreddits: Vec<String>,
    retryer: Retryer,
    /// How long to back off after a 429 before the single retry.
    rate_limit_wait: Duration,
}

impl RedditClient {
    pub fn new(
        client: Client,
        base: Url,
        subreddits: Vec<String>,
        retryer: Retryer,
        rate_limit_wait: Duration,
    ) -> Self {
        Self {
            client,
            base,
            subreddits,
            retryer,
            rate_limit_wait,
        }
    }

    /// Signals from all configured subreddits for the given (UTC) date. A
    /// feed that fails to fetch or parse is skipped with a warning; the other
    /// subreddits still contribute.
    pub async fn signals(&self, cancel: &CancellationToken, date: NaiveDate) -> Vec<MarketSignal> {
        let mut signals = Vec::new();
        for subreddit in &self.subreddits {
            if cancel.is_cancelled() {
                break;
            }
            match self.fetch_feed(cancel, subreddit).await {
                Ok(feed) => {
                    let found = scan_feed(&feed, subreddit, date);
                    tracing::info!(%subreddit, signals = found.len(), "scanned feed");
                    signals.extend(found);
                }
                Err(err) => {
                    tracing::warn!(%subreddit, ?err, "skipping subreddit");
                }
            }
        }
        signals
    }

    /// A 429 triggers one bounded wait followed by exactly one retry; other
    /// transient failures go through the regular retry schedule.
    async fn fetch_feed(
        &self,
        cancel: &CancellationToken,
        subreddit: &str,
    ) -> Result<Feed, ExtractError> {
        match self.try_fetch(cancel, subreddit).await {
            Err(ExtractError::RateLimited) => {
                tracing::warn!(
                    %subreddit,
                    wait = ?self.rate_limit_wait,
                    "rate limited, waiting before the single retry"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ExtractError::RateLimited),
                    _ = tokio::time::sleep(self.rate_limit_wait) => {}
                }
                self.try_fetch(cancel, subreddit).await
            }
            other => other,
        }
    }

    async fn try_fetch(
        &self,
        cancel: &CancellationToken,
        subreddit: &str,
    ) -> Result<Feed, ExtractError> {
        let url = self
            .base
            .join(&format!("r/{subreddit}/.rss"))
            .map_err(|err| ExtractError::Parse(err.to_string()))?;
        let url = &url;
        let bytes = self
            .retryer
            .run(cancel, "reddit feed", move || async move {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(AttemptError::from_reqwest)?;
                let status = response.status();
                if status == StatusCode::TOO_MANY_REQUESTS {
                    // Handled by the caller's single-retry rule, not the
                    // backoff schedule.
                    return Err(AttemptError::fatal(RateLimited));
                }
                if status.is_server_error() {
                    return Err(AttemptError::transient(anyhow::anyhow!(
                        "unexpected status {status}"
                    )));
                }
                if !status.is_success() {
                    return Err(AttemptError::fatal(anyhow::anyhow!(
                        "unexpected status {status}"
                    )));
                }
                response.bytes().await.map_err(AttemptError::from_reqwest)
            })
            .await
            .map_err(|err| match err {
                crate::retry::RetryError::Fatal { ref source, .. }
                    if source.downcast_ref::<RateLimited>().is_some() =>
                {
                    ExtractError::RateLimited
                }
                other => ExtractError::Http(other),
            })?;
        feed_rs::parser::parse(bytes.as_ref()).map_err(|err| ExtractError::Parse(err.to_string()))
    }
}

/// Scans title + body of every entry. A keyword contributes at most one
/// mention per post no matter how often it appears. Entries without a link
/// cannot form the `(keyword, date, post_url)` key and are skipped.
fn scan_feed(feed: &Feed, subreddit: &str, date: NaiveDate) -> Vec<MarketSignal> {
    let mut signals = Vec::new();
    for entry in &feed.entries {
        let Some(post_url) = entry.links.first().map(|link| link.href.clone()) else {
            tracing::warn!(entry = %entry.id, "entry without link, skipping");
            continue;
        };
        let title = entry
            .title
            .as_ref()
            .map(|text| text.content.clone())
            .unwrap_or_default();
        let body = entry
            .summary
            .as_ref()
            .map(|text| text.content.clone())
            .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
            .unwrap_or_default();
        let haystack = format!("{title} {body}").to_lowercase();
        for keyword in Keyword::ALL {
            if haystack.contains(&keyword.as_str().to_lowercase()) {
                signals.push(MarketSignal {
                    keyword,
                    post_title: title.clone(),
                    post_url: post_url.clone(),
                    subreddit: subreddit.to_string(),
                    date,
                    mention_count: 1,
                    sentiment_score: None,
                });
            }
        }
    }
    signals
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        wiremock::{
            matchers::{method, path},
            Mock, MockServer, ResponseTemplate,
        },
    };

    fn rss(items: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>r/nvidia</title>{items}</channel></rss>"#
        )
    }

    fn item(title: &str, link: &str, description: &str) -> String {
        format!(
            "<item><title>{title}</title><link>{link}</link>\
             <description>{description}</description></item>"
        )
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn client_for(server: &MockServer, subreddits: &[&str], wait: Duration) -> RedditClient {
        RedditClient::new(
            Client::new(),
            server.uri().parse().unwrap(),
            subreddits.iter().map(|s| s.to_string()).collect(),
            Retryer::new(3, Duration::ZERO),
            wait,
        )
    }

    #[test]
    fn keyword_scan_is_case_insensitive_and_deduplicated() {
        let body = rss(&[
            item(
                "NEW RELEASE incoming",
                "https://reddit.com/a",
                "new release new release NEW RELEASE",
            ),
            item(
                "price drop on 4070",
                "https://reddit.com/b",
                "also the used market is flooded",
            ),
            item("nothing to see", "https://reddit.com/c", "quiet week"),
        ]
        .concat());
        let feed = feed_rs::parser::parse(body.as_bytes()).unwrap();
        let signals = scan_feed(&feed, "nvidia", today());

        // Post a: one New Release mention despite four occurrences.
        // Post b: Price Drop and Used Market. Post c: nothing.
        assert_eq!(signals.len(), 3);
        assert_eq!(signals[0].keyword, Keyword::NewRelease);
        assert_eq!(signals[0].post_url, "https://reddit.com/a");
        assert_eq!(signals[0].mention_count, 1);
        let keywords: Vec<_> = signals[1..].iter().map(|s| s.keyword).collect();
        assert_eq!(keywords, vec![Keyword::PriceDrop, Keyword::UsedMarket]);
    }

    #[tokio::test]
    async fn collects_signals_from_all_subreddits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/nvidia/.rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&item(
                "Leak: next gen specs",
                "https://reddit.com/x",
                "",
            ))))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/r/pcmasterrace/.rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&item(
                "driver issues again",
                "https://reddit.com/y",
                "",
            ))))
            .mount(&server)
            .await;

        let client = client_for(&server, &["nvidia", "pcmasterrace"], Duration::ZERO);
        let cancel = CancellationToken::new();
        let signals = client.signals(&cancel, today()).await;
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].keyword, Keyword::Leak);
        assert_eq!(signals[0].subreddit, "nvidia");
        assert_eq!(signals[1].keyword, Keyword::Issues);
        assert_eq!(signals[1].subreddit, "pcmasterrace");
    }

    #[tokio::test]
    async fn broken_feed_skips_only_that_subreddit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/nvidia/.rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not really xml"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/r/pcmasterrace/.rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&item(
                "Used market report",
                "https://reddit.com/z",
                "",
            ))))
            .mount(&server)
            .await;

        let client = client_for(&server, &["nvidia", "pcmasterrace"], Duration::ZERO);
        let cancel = CancellationToken::new();
        let signals = client.signals(&cancel, today()).await;
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].subreddit, "pcmasterrace");
    }

    #[tokio::test]
    async fn rate_limit_waits_then_retries_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/nvidia/.rss"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/r/nvidia/.rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&item(
                "price drop everywhere",
                "https://reddit.com/w",
                "",
            ))))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, &["nvidia"], Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let signals = client.signals(&cancel, today()).await;
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].keyword, Keyword::PriceDrop);
    }

    #[tokio::test]
    async fn persistent_rate_limit_gives_up_after_one_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/nvidia/.rss"))
            .respond_with(ResponseTemplate::new(429))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server, &["nvidia"], Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let signals = client.signals(&cancel, today()).await;
        assert!(signals.is_empty());
    }
}
