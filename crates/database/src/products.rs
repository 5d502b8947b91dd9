use {
    chrono::{DateTime, Utc},
    sqlx::PgConnection,
    tracing::instrument,
};

/// Spec attributes of a product as observed by the extractor. The natural key
/// is `(brand, model_name)`; everything else is updated on re-observation
/// because the latest observation is authoritative for a product's spec.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Product {
    pub category: String,
    pub chipset: Option<String>,
    pub brand: String,
    pub model_name: String,
    pub vram: Option<String>,
    pub is_oc: bool,
}

/// A full row from the `products` table.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct ProductRow {
    pub id: i64,
    pub category: String,
    pub chipset: Option<String>,
    pub brand: String,
    pub model_name: String,
    pub vram: Option<String>,
    pub is_oc: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inserts the product or, if `(brand, model_name)` already exists, updates
/// its spec columns in place. The row id is preserved across updates.
#[instrument(skip_all, fields(brand = %product.brand, model = %product.model_name))]
pub async fn upsert(ex: &mut PgConnection, product: &Product) -> Result<i64, sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO products (category, chipset, brand, model_name, vram, is_oc, created_at, updated_at)
VALUES ($1, $2, $3, $4, $5, $6, now(), now())
ON CONFLICT (brand, model_name) DO UPDATE SET
    category = EXCLUDED.category,
    chipset = EXCLUDED.chipset,
    vram = EXCLUDED.vram,
    is_oc = EXCLUDED.is_oc,
    updated_at = now()
RETURNING id
;"#;
    sqlx::query_scalar(QUERY)
        .bind(&product.category)
        .bind(&product.chipset)
        .bind(&product.brand)
        .bind(&product.model_name)
        .bind(&product.vram)
        .bind(product.is_oc)
        .fetch_one(ex)
        .await
}

pub async fn fetch(ex: &mut PgConnection, id: i64) -> Result<Option<ProductRow>, sqlx::Error> {
    const QUERY: &str = r#"SELECT * FROM products WHERE id = $1;"#;
    sqlx::query_as(QUERY).bind(id).fetch_optional(ex).await
}

/// All products, oldest first. The risk analysis phase iterates the full set.
pub async fn all(ex: &mut PgConnection) -> Result<Vec<ProductRow>, sqlx::Error> {
    const QUERY: &str = r#"SELECT * FROM products ORDER BY id;"#;
    sqlx::query_as(QUERY).fetch_all(ex).await
}

#[cfg(test)]
mod tests {
    use {super::*, sqlx::Connection};

    fn product() -> Product {
        Product {
            category: "그래픽카드".to_string(),
            chipset: Some("RTX 4070 Super".to_string()),
            brand: "ASUS".to_string(),
            model_name: "Dual".to_string(),
            vram: Some("12GB".to_string()),
            is_oc: true,
        }
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_upsert_preserves_id() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let first = upsert(&mut db, &product()).await.unwrap();

        // Same natural key with a changed spec updates in place.
        let update = Product {
            vram: Some("16GB".to_string()),
            is_oc: false,
            ..product()
        };
        let second = upsert(&mut db, &update).await.unwrap();
        assert_eq!(first, second);

        let row = fetch(&mut db, first).await.unwrap().unwrap();
        assert_eq!(row.vram.as_deref(), Some("16GB"));
        assert!(!row.is_oc);
        assert!(row.updated_at >= row.created_at);

        // A different natural key creates a new row.
        let other = Product {
            model_name: "Gaming".to_string(),
            ..product()
        };
        let third = upsert(&mut db, &other).await.unwrap();
        assert_ne!(first, third);
        assert_eq!(all(&mut db).await.unwrap().len(), 2);
    }
}
