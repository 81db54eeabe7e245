use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::database_ops::catalog::{CatalogQueries, StockLeader, SyncOptions};
use crate::database_ops::store::{DocumentStore, Filter};

#[derive(Debug, Clone, Serialize)]
pub struct CatalogStats {
    pub categories: u64,
    pub products: u64,
    pub average_price: f64,
    pub top_stock_by_category: Vec<StockLeader>,
}

pub async fn collect<S: DocumentStore>(store: &S, options: &SyncOptions) -> Result<CatalogStats> {
    let queries = CatalogQueries::new(store).with_collection(options.products_collection.as_str());
    Ok(CatalogStats {
        categories: store
            .count(&options.categories_collection, &Filter::all())
            .await?,
        products: queries.count_products().await?,
        average_price: queries.average_price().await?,
        top_stock_by_category: queries.top_stock_by_category().await?,
    })
}

pub async fn run<S: DocumentStore>(store: &S, options: &SyncOptions) -> Result<()> {
    let stats = collect(store, options).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    info!(
        categories = stats.categories,
        products = stats.products,
        "stats done"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::db::Db;
    use serde_json::json;

    #[tokio::test]
    async fn collects_counts_and_aggregates() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let options = SyncOptions::default();
        db.insert_one(
            &options.categories_collection,
            json!({"slug": "laptops"}).as_object().cloned().unwrap(),
        )
        .await
        .unwrap();
        db.insert_many(
            &options.products_collection,
            vec![
                json!({"title": "a", "price": 10, "stock": 1, "category": "Laptops"})
                    .as_object()
                    .cloned()
                    .unwrap(),
                json!({"title": "b", "price": 20, "stock": 5, "category": "Laptops"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            ],
        )
        .await
        .unwrap();

        let stats = collect(&db, &options).await.unwrap();
        assert_eq!(stats.categories, 1);
        assert_eq!(stats.products, 2);
        assert_eq!(stats.average_price, 15.0);
        assert_eq!(stats.top_stock_by_category.len(), 1);
        assert_eq!(stats.top_stock_by_category[0].title, json!("b"));
    }
}
