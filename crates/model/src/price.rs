use {
    bigdecimal::BigDecimal,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// One historical `(time, price)` point for a listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub recorded_at: DateTime<Utc>,
    pub price: BigDecimal,
}

/// A single scraped listing before normalization: the free-form product name
/// as the price site renders it, the current price, and up to ~90 days of
/// historical prices for the same listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    pub raw_name: String,
    pub price: BigDecimal,
    pub source: String,
    pub source_url: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub history: Vec<PricePoint>,
}
