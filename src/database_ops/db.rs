use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    QueryBuilder, Row, Sqlite, SqlitePool,
};
use tracing::{debug, info, instrument};

use crate::database_ops::store::{
    validate_collection, validate_field, Document, DocumentStore, Filter, ID_FIELD,
};
use crate::error::StoreError;

/// SQLite-backed document store. Every collection lives in one `documents`
/// table; bodies are JSON text and `id` is the store identity.
#[derive(Clone, Debug)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let connect_options = SqliteConnectOptions::from_str(database_url)
            .map_err(StoreError::Connect)?
            .create_if_missing(true);

        // One long-lived connection: in-memory databases live exactly as long
        // as it does.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await
            .map_err(StoreError::Connect)?;

        Self::ensure_schema(&pool).await?;
        info!("connected to document store");
        Ok(Self { pool })
    }

    async fn ensure_schema(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                body TEXT NOT NULL
            )
        "#,
        )
        .execute(pool)
        .await
        .map_err(StoreError::Connect)?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS documents_collection_idx ON documents (collection, id)",
        )
        .execute(pool)
        .await
        .map_err(StoreError::Connect)?;
        Ok(())
    }

    /// Release the connection. `is_connected` reports false afterwards.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("document store closed");
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.pool.is_closed() {
            return Err(StoreError::NotConnected);
        }
        Ok(())
    }

    async fn select(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<i64>,
    ) -> Result<Vec<Document>, StoreError> {
        self.ensure_connected()?;
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT id, body FROM documents WHERE ");
        push_match(&mut qb, collection, filter)?;
        qb.push(" ORDER BY id");
        if let Some(limit) = limit {
            qb.push(" LIMIT ").push_bind(limit);
        }
        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::op("find", collection))?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id").map_err(StoreError::op("find", collection))?;
            let body: String = row
                .try_get("body")
                .map_err(StoreError::op("find", collection))?;
            let mut document: Document =
                serde_json::from_str(&body).map_err(|source| StoreError::Json {
                    collection: collection.to_string(),
                    source,
                })?;
            document.insert(ID_FIELD.to_string(), Value::from(id));
            documents.push(document);
        }
        Ok(documents)
    }
}

fn json_path(field: &str) -> String {
    format!("'$.{field}'")
}

fn encode_body(collection: &str, mut document: Document) -> Result<String, StoreError> {
    document.remove(ID_FIELD);
    serde_json::to_string(&document).map_err(|source| StoreError::Json {
        collection: collection.to_string(),
        source,
    })
}

/// Appends `collection = ? AND <clauses>` to the builder.
fn push_match(
    qb: &mut QueryBuilder<'_, Sqlite>,
    collection: &str,
    filter: &Filter,
) -> Result<(), StoreError> {
    qb.push("collection = ")
        .push_bind(validate_collection(collection)?.to_string());

    for (field, value) in filter.clauses() {
        qb.push(" AND ");
        if field == ID_FIELD {
            match value.as_i64() {
                Some(id) => {
                    qb.push("id = ").push_bind(id);
                }
                None => {
                    qb.push("0");
                }
            }
            continue;
        }

        let path = json_path(validate_field(field)?);
        match value {
            Value::Null => {
                qb.push(format!("json_extract(body, {path}) IS NULL"));
            }
            Value::Bool(flag) => {
                let ty = if *flag { "true" } else { "false" };
                qb.push(format!("json_type(body, {path}) = '{ty}'"));
            }
            Value::Number(n) => {
                qb.push(format!(
                    "json_type(body, {path}) IN ('integer', 'real') AND json_extract(body, {path}) = "
                ));
                match n.as_i64() {
                    Some(i) => qb.push_bind(i),
                    None => qb.push_bind(n.as_f64().unwrap_or(f64::NAN)),
                };
            }
            Value::String(s) => {
                qb.push(format!("json_type(body, {path}) = 'text' AND json_extract(body, {path}) = "))
                    .push_bind(s.clone());
            }
            Value::Array(_) | Value::Object(_) => {
                let ty = if value.is_array() { "array" } else { "object" };
                qb.push(format!(
                    "json_type(body, {path}) = '{ty}' AND json_extract(body, {path}) = json("
                ))
                    .push_bind(value.to_string())
                    .push(")");
            }
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for Db {
    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<i64>, StoreError> {
        self.ensure_connected()?;
        validate_collection(collection)?;
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(StoreError::op("insert", collection))?;
        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            let body = encode_body(collection, document)?;
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO documents (collection, body) VALUES (?, ?) RETURNING id",
            )
            .bind(collection)
            .bind(body)
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::op("insert", collection))?;
            ids.push(id);
        }
        tx.commit()
            .await
            .map_err(StoreError::op("insert", collection))?;
        debug!(collection, inserted = ids.len(), "documents inserted");
        Ok(ids)
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        self.select(collection, filter, None).await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self.select(collection, filter, Some(1)).await?.into_iter().next())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Document,
    ) -> Result<u64, StoreError> {
        let Some(mut document) = self.find_one(collection, filter).await? else {
            return Ok(0);
        };
        let id = document
            .remove(ID_FIELD)
            .and_then(|v| v.as_i64())
            .unwrap_or_default();

        let mut changed = false;
        for (key, value) in fields {
            if key == ID_FIELD {
                continue;
            }
            if document.get(&key) != Some(&value) {
                document.insert(key, value);
                changed = true;
            }
        }
        if !changed {
            return Ok(0);
        }

        let body = encode_body(collection, document)?;
        let result = sqlx::query("UPDATE documents SET body = ? WHERE id = ?")
            .bind(body)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::op("update", collection))?;
        Ok(result.rows_affected())
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        self.ensure_connected()?;
        let mut qb = QueryBuilder::<Sqlite>::new(
            "DELETE FROM documents WHERE id = (SELECT id FROM documents WHERE ",
        );
        push_match(&mut qb, collection, filter)?;
        qb.push(" ORDER BY id LIMIT 1)");
        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(StoreError::op("delete", collection))?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&self, collection: &str) -> Result<u64, StoreError> {
        self.ensure_connected()?;
        let result = sqlx::query("DELETE FROM documents WHERE collection = ?")
            .bind(validate_collection(collection)?)
            .execute(&self.pool)
            .await
            .map_err(StoreError::op("delete_all", collection))?;
        Ok(result.rows_affected())
    }

    async fn create_index(&self, collection: &str, field: &str) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let collection = validate_collection(collection)?;
        let field = validate_field(field)?;
        let name = format!("idx_{}_{}", collection, field)
            .replace(['-', '.'], "_");
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS \"{name}\" ON documents (collection, json_extract(body, {}))",
            json_path(field)
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(StoreError::op("create_index", collection))?;
        info!(collection, field, index = %name, "index ready");
        Ok(())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        self.ensure_connected()?;
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM documents WHERE ");
        push_match(&mut qb, collection, filter)?;
        let count = qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::op("count", collection))?;
        Ok(count.max(0) as u64)
    }

    async fn average(&self, collection: &str, field: &str) -> Result<Option<f64>, StoreError> {
        self.ensure_connected()?;
        let path = json_path(validate_field(field)?);
        let sql = format!(
            "SELECT AVG(json_extract(body, {path})) FROM documents \
             WHERE collection = ? AND json_type(body, {path}) IN ('integer', 'real')"
        );
        let avg: Option<f64> = sqlx::query_scalar(&sql)
            .bind(validate_collection(collection)?)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::op("average", collection))?;
        Ok(avg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_db() -> Db {
        Db::connect("sqlite::memory:").await.unwrap()
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn insert_and_find_assigns_identity_in_order() {
        let db = memory_db().await;
        let ids = db
            .insert_many(
                "products",
                vec![
                    doc(json!({"title": "iPhone 9", "price": 549})),
                    doc(json!({"title": "iPhone X", "price": 899})),
                ],
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids[0] < ids[1]);

        let all = db.find("products", &Filter::all()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["title"], json!("iPhone 9"));
        assert_eq!(all[0][ID_FIELD], json!(ids[0]));

        let one = db
            .find_one("products", &Filter::by_id(ids[1]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(one["title"], json!("iPhone X"));
    }

    #[tokio::test]
    async fn caller_supplied_identity_is_ignored() {
        let db = memory_db().await;
        let id = db
            .insert_one("products", doc(json!({"_id": 999, "title": "x"})))
            .await
            .unwrap();
        assert_ne!(id, 999);
        let stored = db.find_one("products", &Filter::all()).await.unwrap().unwrap();
        assert_eq!(stored[ID_FIELD], json!(id));
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let db = memory_db().await;
        db.insert_one("categories", doc(json!({"slug": "laptops"})))
            .await
            .unwrap();
        db.insert_one("products", doc(json!({"title": "MacBook Pro"})))
            .await
            .unwrap();
        assert_eq!(db.count("categories", &Filter::all()).await.unwrap(), 1);
        assert_eq!(db.delete_all("products").await.unwrap(), 1);
        assert_eq!(db.count("categories", &Filter::all()).await.unwrap(), 1);
        assert_eq!(db.count("products", &Filter::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn filters_match_by_json_type() {
        let db = memory_db().await;
        db.insert_many(
            "products",
            vec![
                doc(json!({"title": "a", "price": 549, "featured": true, "meta": {"sku": "A1"}})),
                doc(json!({"title": "b", "price": "549", "featured": false})),
                doc(json!({"title": "c", "price": 549.0, "discount": null})),
            ],
        )
        .await
        .unwrap();

        let titles = |docs: Vec<Document>| {
            docs.into_iter()
                .map(|d| d["title"].as_str().unwrap().to_string())
                .collect::<Vec<_>>()
        };

        let by_price = db.find("products", &Filter::eq("price", 549)).await.unwrap();
        assert_eq!(titles(by_price), vec!["a", "c"]);

        let by_text = db.find("products", &Filter::eq("price", "549")).await.unwrap();
        assert_eq!(titles(by_text), vec!["b"]);

        let featured = db.find("products", &Filter::eq("featured", true)).await.unwrap();
        assert_eq!(titles(featured), vec!["a"]);

        let nested = db
            .find("products", &Filter::eq("meta.sku", "A1"))
            .await
            .unwrap();
        assert_eq!(titles(nested), vec!["a"]);

        let no_discount = db
            .find("products", &Filter::eq("discount", Value::Null))
            .await
            .unwrap();
        assert_eq!(titles(no_discount), vec!["a", "b", "c"]);

        let combined = db
            .find("products", &Filter::eq("price", 549).and("title", "c"))
            .await
            .unwrap();
        assert_eq!(titles(combined), vec!["c"]);
    }

    #[tokio::test]
    async fn number_and_structured_filters_do_not_match_other_json_types() {
        let db = memory_db().await;
        db.insert_many(
            "products",
            vec![
                doc(json!({"title": "flag", "featured": true, "tags": "[1,2]", "meta": "{\"sku\":\"A1\"}"})),
                doc(json!({"title": "real", "featured": 1, "tags": [1, 2], "meta": {"sku": "A1"}})),
            ],
        )
        .await
        .unwrap();

        let featured = db.find("products", &Filter::eq("featured", 1)).await.unwrap();
        assert_eq!(featured.len(), 1);
        assert_eq!(featured[0]["title"], json!("real"));

        let tags = db
            .find("products", &Filter::eq("tags", json!([1, 2])))
            .await
            .unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0]["title"], json!("real"));

        let meta = db
            .find("products", &Filter::eq("meta", json!({"sku": "A1"})))
            .await
            .unwrap();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta[0]["title"], json!("real"));

        assert_eq!(db.count("products", &Filter::eq("featured", 1.0)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rejects_unsafe_field_names() {
        let db = memory_db().await;
        let err = db
            .find("products", &Filter::eq("price') OR 1=1 --", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidField(_)));
    }

    #[tokio::test]
    async fn update_one_sets_fields_on_first_match() {
        let db = memory_db().await;
        let ids = db
            .insert_many(
                "products",
                vec![
                    doc(json!({"title": "iPhone 9", "price": 549})),
                    doc(json!({"title": "iPhone 9", "price": 549})),
                ],
            )
            .await
            .unwrap();

        let modified = db
            .update_one(
                "products",
                &Filter::eq("title", "iPhone 9"),
                doc(json!({"price": 1200})),
            )
            .await
            .unwrap();
        assert_eq!(modified, 1);

        let first = db.find_one("products", &Filter::by_id(ids[0])).await.unwrap().unwrap();
        let second = db.find_one("products", &Filter::by_id(ids[1])).await.unwrap().unwrap();
        assert_eq!(first["price"], json!(1200));
        assert_eq!(second["price"], json!(549));

        let unchanged = db
            .update_one("products", &Filter::by_id(ids[0]), doc(json!({"price": 1200})))
            .await
            .unwrap();
        assert_eq!(unchanged, 0);

        let missing = db
            .update_one("products", &Filter::eq("title", "nope"), doc(json!({"price": 1})))
            .await
            .unwrap();
        assert_eq!(missing, 0);
    }

    #[tokio::test]
    async fn delete_one_removes_a_single_match() {
        let db = memory_db().await;
        db.insert_many(
            "products",
            vec![
                doc(json!({"category": "laptops"})),
                doc(json!({"category": "laptops"})),
            ],
        )
        .await
        .unwrap();
        let deleted = db
            .delete_one("products", &Filter::eq("category", "laptops"))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(db.count("products", &Filter::all()).await.unwrap(), 1);
        let none = db
            .delete_one("products", &Filter::eq("category", "phones"))
            .await
            .unwrap();
        assert_eq!(none, 0);
    }

    #[tokio::test]
    async fn replace_collection_swaps_contents() {
        let db = memory_db().await;
        db.insert_one("categories", doc(json!({"slug": "old"})))
            .await
            .unwrap();
        let inserted = db
            .replace_collection(
                "categories",
                vec![doc(json!({"slug": "beauty"})), doc(json!({"slug": "laptops"}))],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        let slugs: Vec<Value> = db
            .find("categories", &Filter::all())
            .await
            .unwrap()
            .into_iter()
            .map(|d| d["slug"].clone())
            .collect();
        assert_eq!(slugs, vec![json!("beauty"), json!("laptops")]);
    }

    #[tokio::test]
    async fn average_ignores_non_numeric_values() {
        let db = memory_db().await;
        assert_eq!(db.average("products", "price").await.unwrap(), None);
        db.insert_many(
            "products",
            vec![
                doc(json!({"price": 10})),
                doc(json!({"price": 20.0})),
                doc(json!({"price": "free"})),
                doc(json!({"title": "no price"})),
            ],
        )
        .await
        .unwrap();
        assert_eq!(db.average("products", "price").await.unwrap(), Some(15.0));
    }

    #[tokio::test]
    async fn create_index_is_idempotent() {
        let db = memory_db().await;
        db.create_index("products", "title").await.unwrap();
        db.create_index("products", "title").await.unwrap();
        db.insert_one("products", doc(json!({"title": "Lamp"})))
            .await
            .unwrap();
        assert_eq!(
            db.count("products", &Filter::eq("title", "Lamp")).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn closed_store_refuses_operations() {
        let db = memory_db().await;
        assert!(db.is_connected());
        db.close().await;
        assert!(!db.is_connected());
        let err = db.find("products", &Filter::all()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotConnected));
        let err = db.insert_many("products", vec![doc(json!({}))]).await.unwrap_err();
        assert!(matches!(err, StoreError::NotConnected));
    }

    #[tokio::test]
    async fn file_backed_store_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("catalog.db").display());

        let db = Db::connect(&url).await.unwrap();
        db.insert_one("categories", doc(json!({"slug": "groceries"})))
            .await
            .unwrap();
        db.close().await;

        let reopened = Db::connect(&url).await.unwrap();
        let found = reopened
            .find_one("categories", &Filter::eq("slug", "groceries"))
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn connect_fails_for_unreachable_path() {
        let err = Db::connect("sqlite:///nonexistent-dir/definitely/missing.db")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Connect(_)));
    }
}
