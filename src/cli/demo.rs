//! Walkthrough of the CRUD and query surface against a products collection.
use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::database_ops::catalog::{CatalogQueries, StockLeader};
use crate::database_ops::store::{Document, DocumentStore, Filter, ID_FIELD};

#[derive(Debug, Clone, Serialize)]
pub struct DemoSummary {
    pub created: usize,
    pub listed: Vec<String>,
    pub fetched_title: Option<String>,
    pub updated: u64,
    pub deleted: u64,
    pub priced_549: Vec<String>,
    pub title_matches: Vec<String>,
    pub average_price: f64,
    pub total: u64,
    pub top_stock: Vec<StockLeader>,
}

pub fn sample_products() -> Vec<Document> {
    [
        json!({"title": "iPhone 9", "price": 549, "stock": 94, "category": "smartphones"}),
        json!({"title": "iPhone X", "price": 899, "stock": 34, "category": "smartphones"}),
        json!({"title": "Samsung Universe 9", "price": 1249, "stock": 36, "category": "smartphones"}),
        json!({"title": "OPPOF19", "price": 280, "stock": 123, "category": "smartphones"}),
        json!({"title": "Huawei P30", "price": 499, "stock": 32, "category": "smartphones"}),
        json!({"title": "MacBook Pro", "price": 1749, "stock": 83, "category": "laptops"}),
        json!({"title": "Samsung Galaxy Book", "price": 1499, "stock": 50, "category": "laptops"}),
    ]
    .into_iter()
    .filter_map(|v| match v {
        Value::Object(doc) => Some(doc),
        _ => None,
    })
    .collect()
}

fn titles(docs: &[Document]) -> Vec<String> {
    docs.iter()
        .filter_map(|d| d.get("title").and_then(Value::as_str).map(str::to_string))
        .collect()
}

pub async fn run<S: DocumentStore>(store: &S, collection: &str) -> Result<DemoSummary> {
    store.create_index(collection, "title").await?;

    let mut created = 0;
    for product in sample_products() {
        let id = store.insert_one(collection, product).await?;
        println!("created product {id}");
        created += 1;
    }

    let products = store.find(collection, &Filter::all()).await?;
    let listed = titles(&products);
    println!("\nproducts: {listed:?}");

    let first_id = products
        .first()
        .and_then(|p| p.get(ID_FIELD))
        .and_then(Value::as_i64);

    let (mut fetched_title, mut updated, mut deleted) = (None, 0, 0);
    if let Some(id) = first_id {
        let by_id = Filter::by_id(id);
        fetched_title = store
            .find_one(collection, &by_id)
            .await?
            .and_then(|p| p.get("title").and_then(Value::as_str).map(str::to_string));
        println!("\nfetched: {fetched_title:?}");

        let mut fields = Document::new();
        fields.insert("price".into(), json!(1200));
        updated = store.update_one(collection, &by_id, fields).await?;
        println!("\nupdated: {updated}");

        deleted = store.delete_one(collection, &by_id).await?;
        println!("\ndeleted: {deleted}");
    }

    let queries = CatalogQueries::new(store).with_collection(collection);
    let priced_549 = titles(&queries.products_by_price(549.0).await?);
    println!("\nprice 549: {priced_549:?}");
    let title_matches = titles(&queries.products_by_title("iPhone").await?);
    println!("\ntitle contains 'iPhone': {title_matches:?}");

    let average_price = queries.average_price().await?;
    let total = queries.count_products().await?;
    let top_stock = queries.top_stock_by_category().await?;
    println!("\naverage price: {average_price}");
    println!("\ntotal products: {total}");
    println!("\ntop stock per category: {}", serde_json::to_string(&top_stock)?);

    info!(collection, created, updated, deleted, "demo done");
    Ok(DemoSummary {
        created,
        listed,
        fetched_title,
        updated,
        deleted,
        priced_549,
        title_matches,
        average_price,
        total,
        top_stock,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::db::Db;

    #[tokio::test]
    async fn demo_walks_through_crud_and_queries() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let summary = run(&db, "products").await.unwrap();

        assert_eq!(summary.created, 7);
        assert_eq!(summary.listed.len(), 7);
        assert_eq!(summary.fetched_title.as_deref(), Some("iPhone 9"));
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.deleted, 1);
        assert!(summary.priced_549.is_empty());
        assert_eq!(summary.title_matches, vec!["iPhone X"]);
        assert_eq!(summary.total, 6);
        assert_eq!(summary.average_price, 1029.17);
        assert_eq!(summary.top_stock[0].title, json!("OPPOF19"));
        assert_eq!(summary.top_stock[1].title, json!("MacBook Pro"));
    }
}
