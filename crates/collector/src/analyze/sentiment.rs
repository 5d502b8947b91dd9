use model::Keyword;

/// Signals are aggregated over this many days by default.
pub const DEFAULT_WINDOW_DAYS: i64 = 7;

/// Per-keyword mention weights. "New Release" and "Price Drop" move markets;
/// everything else counts once.
#[derive(Clone, Debug, PartialEq)]
pub struct Weights {
    pub new_release: f64,
    pub price_drop: f64,
    pub default: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            new_release: 3.0,
            price_drop: 2.0,
            default: 1.0,
        }
    }
}

impl Weights {
    /// The keyword column read back from the store is free-form text;
    /// anything outside the curated set gets the default weight.
    pub fn of(&self, keyword: &str) -> f64 {
        match keyword.parse::<Keyword>() {
            Ok(Keyword::NewRelease) => self.new_release,
            Ok(Keyword::PriceDrop) => self.price_drop,
            _ => self.default,
        }
    }
}

/// `Σ count_k × weight_k`. Unbounded above; idempotent over identical counts.
pub fn score(counts: &[(String, i64)], weights: &Weights) -> f64 {
    counts
        .iter()
        .map(|(keyword, count)| *count as f64 * weights.of(keyword))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(entries: &[(&str, i64)]) -> Vec<(String, i64)> {
        entries
            .iter()
            .map(|(keyword, count)| (keyword.to_string(), *count))
            .collect()
    }

    #[test]
    fn weighted_sum() {
        let counts = counts(&[("New Release", 5), ("Price Drop", 2), ("Leak", 1)]);
        assert_eq!(score(&counts, &Weights::default()), 20.0);
    }

    #[test]
    fn empty_counts_score_zero() {
        assert_eq!(score(&[], &Weights::default()), 0.0);
    }

    #[test]
    fn unknown_keywords_use_the_default_weight() {
        let counts = counts(&[("Restock", 4)]);
        assert_eq!(score(&counts, &Weights::default()), 4.0);
    }

    #[test]
    fn configured_weights_apply() {
        let weights = Weights {
            new_release: 10.0,
            price_drop: 0.5,
            default: 2.0,
        };
        let counts = counts(&[("New Release", 1), ("Price Drop", 2), ("Issues", 3)]);
        assert_eq!(score(&counts, &weights), 10.0 + 1.0 + 6.0);
    }

    #[test]
    fn idempotent_over_identical_inputs() {
        let counts = counts(&[("New Release", 7), ("Used Market", 3)]);
        let weights = Weights::default();
        assert_eq!(score(&counts, &weights), score(&counts, &weights));
    }
}
