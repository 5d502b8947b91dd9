use {
    chrono::{DateTime, Utc},
    model::RiskAlert,
    std::collections::BTreeMap,
};

/// Contribution of one "New Release" mention to the risk index.
pub const NEW_RELEASE_MENTION_WEIGHT: f64 = 0.3;

#[derive(Clone, Debug)]
pub struct RiskConfig {
    /// A product is high-risk iff its index exceeds this.
    pub threshold: f64,
}

/// Everything the composite formula needs. The caller skips products for
/// which any of these cannot be computed (no 7-day history, no signal data).
#[derive(Clone, Debug, PartialEq)]
pub struct RiskInputs {
    pub current_price: f64,
    pub week_ago_avg: f64,
    pub new_release_mentions: i64,
    pub sentiment_score: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Assessment {
    pub risk_index: f64,
    /// Present iff the index crossed the threshold.
    pub alert: Option<RiskAlert>,
}

/// `risk = (current - week_ago_avg) + mentions × 0.3`, alert iff
/// `risk > threshold`. The alert records the threshold in effect and the
/// factors that produced the index.
pub fn evaluate(
    config: &RiskConfig,
    product_id: i64,
    inputs: &RiskInputs,
    now: DateTime<Utc>,
) -> Assessment {
    let price_delta = inputs.current_price - inputs.week_ago_avg;
    let risk_index = price_delta + inputs.new_release_mentions as f64 * NEW_RELEASE_MENTION_WEIGHT;
    let alert = (risk_index > config.threshold).then(|| {
        let mut contributing_factors = BTreeMap::new();
        contributing_factors.insert("price_delta".to_string(), price_delta);
        contributing_factors.insert(
            "new_release_mentions".to_string(),
            inputs.new_release_mentions as f64,
        );
        contributing_factors.insert("sentiment_score".to_string(), inputs.sentiment_score);
        RiskAlert {
            product_id,
            risk_index,
            threshold: config.threshold,
            contributing_factors,
            acknowledged: false,
            created_at: now,
        }
    });
    Assessment { risk_index, alert }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RiskConfig {
        RiskConfig { threshold: 100.0 }
    }

    #[test]
    fn falling_price_with_few_mentions_stays_quiet() {
        let assessment = evaluate(
            &config(),
            1,
            &RiskInputs {
                current_price: 950_000.0,
                week_ago_avg: 1_000_000.0,
                new_release_mentions: 15,
                sentiment_score: 49.0,
            },
            Utc::now(),
        );
        assert_eq!(assessment.risk_index, -49_995.5);
        assert!(assessment.alert.is_none());
    }

    #[test]
    fn rising_price_with_release_buzz_alerts() {
        let now = Utc::now();
        let assessment = evaluate(
            &config(),
            7,
            &RiskInputs {
                current_price: 1_000_000.0,
                week_ago_avg: 950_000.0,
                new_release_mentions: 200,
                sentiment_score: 620.0,
            },
            now,
        );
        assert_eq!(assessment.risk_index, 50_060.0);
        let alert = assessment.alert.expect("threshold crossed");
        assert_eq!(alert.product_id, 7);
        assert_eq!(alert.threshold, 100.0);
        assert_eq!(alert.created_at, now);
        assert!(!alert.acknowledged);
        assert_eq!(alert.contributing_factors["price_delta"], 50_000.0);
        assert_eq!(alert.contributing_factors["new_release_mentions"], 200.0);
        assert_eq!(alert.contributing_factors["sentiment_score"], 620.0);
    }

    #[test]
    fn exactly_at_threshold_does_not_alert() {
        let assessment = evaluate(
            &config(),
            1,
            &RiskInputs {
                current_price: 1_000_100.0,
                week_ago_avg: 1_000_000.0,
                new_release_mentions: 0,
                sentiment_score: 0.0,
            },
            Utc::now(),
        );
        assert_eq!(assessment.risk_index, 100.0);
        assert!(assessment.alert.is_none());
    }
}
