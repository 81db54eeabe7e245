use regex::RegexBuilder;
use serde::Serialize;
use serde_json::Value;

use crate::database_ops::catalog::PRODUCTS_COLLECTION;
use crate::database_ops::store::{Document, DocumentStore, Filter};
use crate::error::StoreError;

/// Highest-stock product of one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockLeader {
    pub category: Value,
    pub title: Value,
    pub stock: Value,
}

/// Read-only queries over the products collection.
pub struct CatalogQueries<'a, S> {
    store: &'a S,
    collection: String,
}

impl<'a, S: DocumentStore> CatalogQueries<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            collection: PRODUCTS_COLLECTION.to_string(),
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub async fn products_by_price(&self, price: f64) -> Result<Vec<Document>, StoreError> {
        self.store
            .find(&self.collection, &Filter::eq("price", price))
            .await
    }

    /// Case-insensitive regex match on `title`.
    pub async fn products_by_title(&self, pattern: &str) -> Result<Vec<Document>, StoreError> {
        let re = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        let products = self.store.find(&self.collection, &Filter::all()).await?;
        Ok(products
            .into_iter()
            .filter(|p| p.get("title").and_then(Value::as_str).is_some_and(|t| re.is_match(t)))
            .collect())
    }

    /// Average `price` rounded to cents; 0 when there are no priced products.
    pub async fn average_price(&self) -> Result<f64, StoreError> {
        let avg = self.store.average(&self.collection, "price").await?;
        Ok(avg.map(round_cents).unwrap_or(0.0))
    }

    pub async fn count_products(&self) -> Result<u64, StoreError> {
        self.store.count(&self.collection, &Filter::all()).await
    }

    pub async fn top_stock_by_category(&self) -> Result<Vec<StockLeader>, StoreError> {
        let leaders = self
            .store
            .group_argmax(&self.collection, "category", "stock")
            .await?;
        Ok(leaders
            .into_iter()
            .map(|leader| StockLeader {
                category: leader.group,
                title: leader.document.get("title").cloned().unwrap_or(Value::Null),
                stock: leader.max,
            })
            .collect())
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
