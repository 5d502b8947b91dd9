use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::collections::BTreeMap,
};

/// A threshold-crossing risk event for one product.
///
/// Alerts have no natural key; they form an append-only stream and duplicates
/// across pipeline runs are meaningful. Operators may flip `acknowledged`,
/// nothing else mutates after insert.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub product_id: i64,
    pub risk_index: f64,
    /// Threshold in effect when the alert fired.
    pub threshold: f64,
    pub contributing_factors: BTreeMap<String, f64>,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}
