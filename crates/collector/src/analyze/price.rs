use {
    bigdecimal::{BigDecimal, ToPrimitive},
    chrono::{DateTime, Duration, Utc},
};

/// The comparison window is "about a week ago": `[now - 8d, now - 6d]`.
pub const WINDOW_FROM_DAYS: i64 = 8;
pub const WINDOW_TO_DAYS: i64 = 6;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("current price must be positive, got {0}")]
    NonPositivePrice(BigDecimal),
}

pub fn window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        now - Duration::days(WINDOW_FROM_DAYS),
        now - Duration::days(WINDOW_TO_DAYS),
    )
}

/// Week-over-week change in percent, rounded to two decimals:
/// `(current - avg) / avg * 100` where `avg` averages the observations in the
/// window. An empty window yields `Ok(None)` — the caller stores a null
/// change and must accept it.
pub fn change_pct(
    window_prices: &[BigDecimal],
    current: &BigDecimal,
) -> Result<Option<f64>, ValidationError> {
    let current = current
        .to_f64()
        .filter(|price| *price > 0.0)
        .ok_or_else(|| ValidationError::NonPositivePrice(current.clone()))?;
    let Some(avg) = average(window_prices).filter(|avg| *avg > 0.0) else {
        return Ok(None);
    };
    Ok(Some(round2((current - avg) / avg * 100.0)))
}

/// Mean of the window, `None` when it is empty.
pub fn average(window_prices: &[BigDecimal]) -> Option<f64> {
    if window_prices.is_empty() {
        return None;
    }
    let sum: f64 = window_prices
        .iter()
        .map(|price| price.to_f64().unwrap_or(0.0))
        .sum();
    Some(sum / window_prices.len() as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
