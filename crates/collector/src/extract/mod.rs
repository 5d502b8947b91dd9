//! Extractors for the two upstream sources: the price-comparison site (HTML)
//! and the community forums (RSS/Atom).

pub mod danawa;
pub mod reddit;

use crate::retry::RetryError;

/// Both sources refuse requests without a browser-looking user agent.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                              (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The server asked us to slow down (HTTP 429).
    #[error("rate limited by the upstream host")]
    RateLimited,
    #[error(transparent)]
    Http(#[from] RetryError),
    #[error("parse failure: {0}")]
    Parse(String),
}
