//! Scrapes current and historical GPU prices from the price-comparison site.
//!
//! One search page per chipset in the closed set, then one price-history call
//! per listing. A single bad listing is logged and skipped; the batch never
//! aborts because of one entry.

use {
    super::ExtractError,
    crate::retry::{AttemptError, Retryer},
    bigdecimal::BigDecimal,
    chrono::{NaiveDate, Utc},
    futures::{stream, Stream, StreamExt},
    model::{Chipset, PricePoint, RawListing},
    reqwest::{Client, Response, StatusCode},
    scraper::{Html, Selector},
    std::time::Duration,
    tokio_util::sync::CancellationToken,
    url::Url,
};

/// Source label persisted with every observation from this extractor.
pub const SOURCE: &str = "다나와";

/// How far back the history endpoint is asked to go.
const HISTORY_DAYS: u32 = 90;

pub struct DanawaClient {
    client: Client,
    base: Url,
    retryer: Retryer,
    fan_out: usize,
    /// Pause between consecutive history calls so we respect the host.
    politeness_delay: Duration,
}

/// One entry of the search results page before enrichment.
#[derive(Clone, Debug, PartialEq)]
struct ParsedListing {
    name: String,
    price: BigDecimal,
    url: String,
    product_code: String,
}

#[derive(serde::Deserialize)]
struct HistoryResponse {
    points: Vec<HistoryPoint>,
}

#[derive(serde::Deserialize)]
struct HistoryPoint {
    date: NaiveDate,
    price: i64,
}

impl DanawaClient {
    pub fn new(
        client: Client,
        base: Url,
        retryer: Retryer,
        fan_out: usize,
        politeness_delay: Duration,
    ) -> Self {
        Self {
            client,
            base,
            retryer,
            fan_out: fan_out.max(1),
            politeness_delay,
        }
    }

    /// All listings for all chipsets in the closed set as a finite lazy
    /// stream. Search pages are fetched one chipset at a time; history
    /// enrichment runs with bounded fan-out.
    pub fn listings<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> impl Stream<Item = RawListing> + 'a {
        stream::iter(Chipset::ALL)
            .then(move |chipset| async move {
                if cancel.is_cancelled() {
                    return Vec::new();
                }
                match self.search(cancel, chipset).await {
                    Ok(listings) => {
                        tracing::info!(%chipset, count = listings.len(), "scraped search page");
                        listings
                    }
                    Err(err) => {
                        tracing::error!(%chipset, ?err, "search page failed, skipping chipset");
                        Vec::new()
                    }
                }
            })
            .flat_map(stream::iter)
            .map(move |listing| self.enrich(cancel, listing))
            .buffered(self.fan_out)
    }

    async fn search(
        &self,
        cancel: &CancellationToken,
        chipset: Chipset,
    ) -> Result<Vec<ParsedListing>, ExtractError> {
        let mut url = self
            .base
            .join("dsearch.php")
            .map_err(|err| ExtractError::Parse(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("k1", chipset.as_str())
            .append_pair("module", "goods");
        let html = self.fetch_text(cancel, url, "danawa search").await?;
        Ok(parse_listings(&html))
    }

    /// Attaches up to [`HISTORY_DAYS`] days of price history. A history
    /// failure degrades to an empty history rather than dropping the listing.
    async fn enrich(&self, cancel: &CancellationToken, listing: ParsedListing) -> RawListing {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.politeness_delay) => {}
        }
        let history = match self.history(cancel, &listing.product_code).await {
            Ok(history) => history,
            Err(err) => {
                tracing::warn!(
                    pcode = %listing.product_code,
                    ?err,
                    "price history unavailable, continuing without it"
                );
                Vec::new()
            }
        };
        RawListing {
            raw_name: listing.name,
            price: listing.price,
            source: SOURCE.to_string(),
            source_url: Some(listing.url),
            recorded_at: Utc::now(),
            history,
        }
    }

    async fn history(
        &self,
        cancel: &CancellationToken,
        product_code: &str,
    ) -> Result<Vec<PricePoint>, ExtractError> {
        let mut url = self
            .base
            .join("info/ajax/price_history.php")
            .map_err(|err| ExtractError::Parse(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("pcode", product_code)
            .append_pair("days", &HISTORY_DAYS.to_string());
        let url = &url;
        let response: HistoryResponse = self
            .retryer
            .run(cancel, "danawa history", move || async move {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(AttemptError::from_reqwest)?;
                let response = classify_status(response)?;
                response
                    .json::<HistoryResponse>()
                    .await
                    .map_err(AttemptError::fatal)
            })
            .await?;
        Ok(response
            .points
            .into_iter()
            .map(|point| PricePoint {
                recorded_at: point
                    .date
                    .and_hms_opt(0, 0, 0)
                    .expect("midnight is always valid")
                    .and_utc(),
                price: point.price.into(),
            })
            .collect())
    }

    async fn fetch_text(
        &self,
        cancel: &CancellationToken,
        url: Url,
        label: &'static str,
    ) -> Result<String, ExtractError> {
        let url = &url;
        let text = self
            .retryer
            .run(cancel, label, move || async move {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(AttemptError::from_reqwest)?;
                let response = classify_status(response)?;
                // Decodes according to the charset the response declares.
                response.text().await.map_err(AttemptError::from_reqwest)
            })
            .await?;
        Ok(text)
    }
}

/// Maps the response status into the retry taxonomy: 5xx and 429 are
/// transient (429 with the server's `Retry-After` hint when present), other
/// 4xx are permanent.
fn classify_status(response: Response) -> Result<Response, AttemptError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error = anyhow::anyhow!("unexpected status {status} for {}", response.url());
    if status == StatusCode::TOO_MANY_REQUESTS {
        match retry_after(&response) {
            Some(hint) => Err(AttemptError::transient_after(error, hint)),
            None => Err(AttemptError::transient(error)),
        }
    } else if status.is_server_error() {
        Err(AttemptError::transient(error))
    } else {
        Err(AttemptError::fatal(error))
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Parses the search results page. Listings that miss a name, price or link
/// are logged and skipped.
fn parse_listings(html: &str) -> Vec<ParsedListing> {
    let document = Html::parse_document(html);
    let item = Selector::parse("li.prod_item").expect("static selector");
    let name = Selector::parse("p.prod_name a").expect("static selector");
    let price = Selector::parse("p.price_sect strong").expect("static selector");

    let mut listings = Vec::new();
    for element in document.select(&item) {
        let parsed = (|| {
            let anchor = element.select(&name).next()?;
            let listing_name = anchor.text().collect::<String>().trim().to_string();
            if listing_name.is_empty() {
                return None;
            }
            let href = anchor.value().attr("href")?.to_string();
            let product_code = Url::parse(&href)
                .ok()?
                .query_pairs()
                .find(|(key, _)| key == "pcode")
                .map(|(_, value)| value.into_owned())?;
            let price_text = element.select(&price).next()?.text().collect::<String>();
            let price = parse_price(&price_text)?;
            Some(ParsedListing {
                name: listing_name,
                price,
                url: href,
                product_code,
            })
        })();
        match parsed {
            Some(listing) => listings.push(listing),
            None => {
                let snippet: String = element.text().collect::<String>();
                tracing::warn!(
                    snippet = snippet.trim(),
                    "skipping unparseable listing"
                );
            }
        }
    }
    listings
}

/// "1,234,560원" → 1234560. Listings without any digits are unparseable.
fn parse_price(text: &str) -> Option<BigDecimal> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<i64>().ok().map(BigDecimal::from)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        wiremock::{
            matchers::{header, method, path, query_param},
            Mock, MockServer, ResponseTemplate,
        },
    };

    const SEARCH_PAGE: &str = r#"
<html><body><ul class="product_list">
  <li class="prod_item">
    <p class="prod_name">
      <a href="https://prod.danawa.com/info/?pcode=111">ASUS Dual 지포스 RTX 4070 SUPER OC D6X 12GB</a>
    </p>
    <p class="price_sect"><strong>1,020,000원</strong></p>
  </li>
  <li class="prod_item">
    <p class="prod_name">
      <a href="https://prod.danawa.com/info/?pcode=222">MSI 게이밍 X 지포스 RTX 4070 SUPER D6X 12GB</a>
    </p>
    <p class="price_sect"><strong>가격비교예정</strong></p>
  </li>
</ul></body></html>"#;

    fn client_for(server: &MockServer, retryer: Retryer) -> DanawaClient {
        DanawaClient::new(
            Client::builder()
                .user_agent(super::super::USER_AGENT)
                .build()
                .unwrap(),
            server.uri().parse().unwrap(),
            retryer,
            4,
            Duration::ZERO,
        )
    }

    fn zero_backoff() -> Retryer {
        Retryer::new(3, Duration::ZERO)
    }

    #[test]
    fn parses_listings_and_skips_unparseable_entries() {
        let listings = parse_listings(SEARCH_PAGE);
        // The second listing has no numeric price and is skipped.
        assert_eq!(listings.len(), 1);
        assert_eq!(
            listings[0],
            ParsedListing {
                name: "ASUS Dual 지포스 RTX 4070 SUPER OC D6X 12GB".to_string(),
                price: 1_020_000.into(),
                url: "https://prod.danawa.com/info/?pcode=111".to_string(),
                product_code: "111".to_string(),
            }
        );
    }

    #[test]
    fn price_parsing() {
        assert_eq!(parse_price("1,234,560원"), Some(1_234_560.into()));
        assert_eq!(parse_price("  980,000원 "), Some(980_000.into()));
        assert_eq!(parse_price("가격비교예정"), None);
    }

    #[tokio::test]
    async fn scrapes_listings_with_history() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dsearch.php"))
            .and(header("user-agent", super::super::USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_string(SEARCH_PAGE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/info/ajax/price_history.php"))
            .and(query_param("pcode", "111"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "points": [
                    { "date": "2024-05-25", "price": 1_050_000 },
                    { "date": "2024-06-01", "price": 1_020_000 },
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, zero_backoff());
        let cancel = CancellationToken::new();
        let listings: Vec<_> = client.listings(&cancel).collect().await;

        // One good listing per chipset page; all four pages serve the same
        // fixture, the bad entry is dropped each time.
        assert_eq!(listings.len(), 4);
        for listing in &listings {
            assert_eq!(listing.source, SOURCE);
            assert_eq!(listing.price, BigDecimal::from(1_020_000));
            assert_eq!(listing.history.len(), 2);
            assert_eq!(listing.history[0].price, BigDecimal::from(1_050_000));
        }
    }

    #[tokio::test]
    async fn search_failure_skips_the_chipset_not_the_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dsearch.php"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server, zero_backoff());
        let cancel = CancellationToken::new();
        let listings: Vec<_> = client.listings(&cancel).collect().await;
        assert!(listings.is_empty());
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dsearch.php"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dsearch.php"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SEARCH_PAGE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/info/ajax/price_history.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "points": []
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, zero_backoff());
        let cancel = CancellationToken::new();
        let listings: Vec<_> = client.listings(&cancel).collect().await;
        assert_eq!(listings.len(), 4);
    }

    #[tokio::test]
    async fn cancellation_stops_the_stream_early() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dsearch.php"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SEARCH_PAGE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/info/ajax/price_history.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "points": []
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, zero_backoff());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let listings: Vec<_> = client.listings(&cancel).collect().await;
        assert!(listings.is_empty());
    }
}
