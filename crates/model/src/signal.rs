use {
    chrono::NaiveDate,
    serde::{Deserialize, Serialize},
};

/// The curated keyword set scanned for in community posts.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum Keyword {
    #[serde(rename = "New Release")]
    #[strum(serialize = "New Release")]
    NewRelease,
    #[serde(rename = "Leak")]
    #[strum(serialize = "Leak")]
    Leak,
    #[serde(rename = "Issues")]
    #[strum(serialize = "Issues")]
    Issues,
    #[serde(rename = "Price Drop")]
    #[strum(serialize = "Price Drop")]
    PriceDrop,
    #[serde(rename = "Used Market")]
    #[strum(serialize = "Used Market")]
    UsedMarket,
}

impl Keyword {
    pub const ALL: [Keyword; 5] = [
        Keyword::NewRelease,
        Keyword::Leak,
        Keyword::Issues,
        Keyword::PriceDrop,
        Keyword::UsedMarket,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::NewRelease => "New Release",
            Keyword::Leak => "Leak",
            Keyword::Issues => "Issues",
            Keyword::PriceDrop => "Price Drop",
            Keyword::UsedMarket => "Used Market",
        }
    }
}

/// One keyword hit inside one community post on one date.
///
/// `(keyword, date, post_url)` is the natural key. `mention_count` starts at
/// 1 and increments once per re-ingest of the same key; it counts
/// reprocessing runs, not occurrences inside the post.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketSignal {
    pub keyword: Keyword,
    pub post_title: String,
    pub post_url: String,
    pub subreddit: String,
    pub date: NaiveDate,
    pub mention_count: i32,
    pub sentiment_score: Option<f64>,
}

#[cfg(test)]
mod tests {
    use {super::*, std::str::FromStr};

    #[test]
    fn keyword_round_trips_through_display() {
        for keyword in Keyword::ALL {
            assert_eq!(Keyword::from_str(keyword.as_str()).unwrap(), keyword);
            assert_eq!(keyword.to_string(), keyword.as_str());
        }
    }
}
