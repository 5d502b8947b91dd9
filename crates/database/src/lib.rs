pub mod market_signals;
pub mod price_logs;
pub mod products;
pub mod risk_alerts;

use sqlx::{Executor, PgPool};

// Design:
//
// Functions that execute multiple statements take `&mut PgTransaction` to
// indicate this and to ensure that the whole function succeeds or fails
// together. Functions that execute a single statement take `&mut
// PgConnection`. We usually call the parameter `ex` for `Executor` which is
// the trait whose methods we use to run queries.
// This scheme allows callers to decide whether they want to use the function
// as part of a bigger transaction or standalone. Note that PgTransaction
// implements Deref to PgConnection. Callers do need to take care of calling
// `commit` on the transaction.
//
// For tests a useful pattern is to start a transaction at the beginning of
// the test, use it for all queries and never commit it. When the uncommitted
// transaction gets dropped it is rolled back. This allows postgres tests to
// run in parallel and makes clearing all tables at the beginning of a test
// obsolete.
//
// Schema migrations are managed outside this crate. The expected tables are:
//
//   products(id BIGSERIAL PRIMARY KEY, category TEXT NOT NULL,
//            chipset TEXT, brand TEXT NOT NULL, model_name TEXT NOT NULL,
//            vram TEXT, is_oc BOOLEAN NOT NULL DEFAULT FALSE,
//            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
//            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
//            UNIQUE (brand, model_name))
//   price_logs(id BIGSERIAL PRIMARY KEY,
//              sku_id BIGINT NOT NULL REFERENCES products ON DELETE CASCADE,
//              price NUMERIC NOT NULL, source TEXT NOT NULL,
//              source_url TEXT, recorded_at TIMESTAMPTZ NOT NULL,
//              price_change_pct DOUBLE PRECISION,
//              UNIQUE (sku_id, source, recorded_at))
//   market_signals(id BIGSERIAL PRIMARY KEY, keyword TEXT NOT NULL,
//                  post_title TEXT NOT NULL, post_url TEXT NOT NULL,
//                  subreddit TEXT NOT NULL,
//                  sentiment_score DOUBLE PRECISION,
//                  mention_count INTEGER NOT NULL DEFAULT 1,
//                  date DATE NOT NULL,
//                  UNIQUE (keyword, date, post_url))
//   risk_alerts(id BIGSERIAL PRIMARY KEY,
//               sku_id BIGINT NOT NULL REFERENCES products ON DELETE CASCADE,
//               risk_index DOUBLE PRECISION NOT NULL,
//               threshold DOUBLE PRECISION NOT NULL,
//               contributing_factors JSONB NOT NULL DEFAULT '{}',
//               acknowledged BOOLEAN NOT NULL DEFAULT FALSE,
//               created_at TIMESTAMPTZ NOT NULL DEFAULT now())
//
// Indexes: price_logs(sku_id, recorded_at DESC), market_signals(keyword, date),
// risk_alerts(sku_id, created_at DESC), risk_alerts(acknowledged, created_at DESC).

pub type PgTransaction<'a> = sqlx::Transaction<'a, sqlx::Postgres>;

/// The names of all tables we use in the db, children first so truncation
/// respects foreign keys.
pub const ALL_TABLES: &[&str] = &["risk_alerts", "price_logs", "market_signals", "products"];

/// Delete all data in the database. Only used by tests.
#[allow(non_snake_case)]
pub async fn clear_DANGER_(ex: &mut PgTransaction<'_>) -> sqlx::Result<()> {
    for table in ALL_TABLES {
        ex.execute(format!("TRUNCATE {table} CASCADE;").as_str())
            .await?;
    }
    Ok(())
}

/// Like above but more ergonomic for some tests that use a pool.
#[allow(non_snake_case)]
pub async fn clear_DANGER(pool: &PgPool) -> sqlx::Result<()> {
    let mut transaction = pool.begin().await?;
    clear_DANGER_(&mut transaction).await?;
    transaction.commit().await
}
