use {chrono::NaiveDate, sqlx::PgConnection, tracing::instrument};

/// One keyword hit inside one community post on one date.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct MarketSignal {
    pub keyword: String,
    pub post_title: String,
    pub post_url: String,
    pub subreddit: String,
    pub sentiment_score: Option<f64>,
    pub mention_count: i32,
    pub date: NaiveDate,
}

/// Inserts the signal with `mention_count = 1` or, if `(keyword, date,
/// post_url)` already exists, updates title and sentiment and increments the
/// stored mention count by one. The increment tracks reprocessing runs while
/// the latest sentiment calculation wins.
#[instrument(skip_all, fields(keyword = %signal.keyword, post = %signal.post_url))]
pub async fn upsert(ex: &mut PgConnection, signal: &MarketSignal) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO market_signals (keyword, post_title, post_url, subreddit, sentiment_score, mention_count, date)
VALUES ($1, $2, $3, $4, $5, 1, $6)
ON CONFLICT (keyword, date, post_url) DO UPDATE SET
    post_title = EXCLUDED.post_title,
    sentiment_score = EXCLUDED.sentiment_score,
    mention_count = market_signals.mention_count + 1
;"#;
    sqlx::query(QUERY)
        .bind(&signal.keyword)
        .bind(&signal.post_title)
        .bind(&signal.post_url)
        .bind(&signal.subreddit)
        .bind(signal.sentiment_score)
        .bind(signal.date)
        .execute(ex)
        .await?;
    Ok(())
}

/// Total mentions per keyword inside `[from, to]`.
pub async fn keyword_counts(
    ex: &mut PgConnection,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<(String, i64)>, sqlx::Error> {
    const QUERY: &str = r#"
SELECT keyword, SUM(mention_count)::bigint
FROM market_signals
WHERE date >= $1 AND date <= $2
GROUP BY keyword
;"#;
    sqlx::query_as(QUERY).bind(from).bind(to).fetch_all(ex).await
}

pub async fn fetch(
    ex: &mut PgConnection,
    keyword: &str,
    date: NaiveDate,
    post_url: &str,
) -> Result<Option<MarketSignal>, sqlx::Error> {
    const QUERY: &str = r#"
SELECT keyword, post_title, post_url, subreddit, sentiment_score, mention_count, date
FROM market_signals
WHERE keyword = $1 AND date = $2 AND post_url = $3
;"#;
    sqlx::query_as(QUERY)
        .bind(keyword)
        .bind(date)
        .bind(post_url)
        .fetch_optional(ex)
        .await
}

#[cfg(test)]
mod tests {
    use {super::*, maplit::hashmap, sqlx::Connection, std::collections::HashMap};

    fn signal() -> MarketSignal {
        MarketSignal {
            keyword: "New Release".to_string(),
            post_title: "RTX 4070 Super launch thread".to_string(),
            post_url: "https://reddit.com/r/nvidia/abc".to_string(),
            subreddit: "nvidia".to_string(),
            sentiment_score: None,
            mention_count: 1,
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        }
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_reingest_increments_mention_count() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let signal = signal();
        upsert(&mut db, &signal).await.unwrap();
        let row = fetch(&mut db, "New Release", signal.date, &signal.post_url)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.mention_count, 1);

        // Second run of the same batch: count increments, sentiment converges.
        let rerun = MarketSignal {
            sentiment_score: Some(20.0),
            ..signal.clone()
        };
        upsert(&mut db, &rerun).await.unwrap();
        let row = fetch(&mut db, "New Release", signal.date, &signal.post_url)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.mention_count, 2);
        assert_eq!(row.sentiment_score, Some(20.0));
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_keyword_counts_sum_over_window() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        for (keyword, post) in [
            ("New Release", "https://reddit.com/a"),
            ("New Release", "https://reddit.com/b"),
            ("Price Drop", "https://reddit.com/a"),
        ] {
            upsert(
                &mut db,
                &MarketSignal {
                    keyword: keyword.to_string(),
                    post_url: post.to_string(),
                    ..signal()
                },
            )
            .await
            .unwrap();
        }
        // Outside the window.
        upsert(
            &mut db,
            &MarketSignal {
                date: date - chrono::Duration::days(30),
                ..signal()
            },
        )
        .await
        .unwrap();

        let counts: HashMap<_, _> = keyword_counts(&mut db, date - chrono::Duration::days(7), date)
            .await
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(
            counts,
            hashmap! {
                "New Release".to_string() => 2,
                "Price Drop".to_string() => 1,
            }
        );
    }
}
