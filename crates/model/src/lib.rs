//! Domain types shared between the collector and the database layer.

pub mod alert;
pub mod price;
pub mod product;
pub mod signal;
pub mod stats;

pub use {
    alert::RiskAlert,
    price::{PricePoint, RawListing},
    product::{Chipset, ProductIdentity},
    signal::{Keyword, MarketSignal},
    stats::RunStats,
};
