pub mod provider;
pub mod queries;

pub use provider::CatalogProvider;
pub use queries::{CatalogQueries, StockLeader};

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::database_ops::store::{Document, DocumentStore, Filter};
use crate::error::SyncError;

pub const CATEGORIES_COLLECTION: &str = "categories";
pub const PRODUCTS_COLLECTION: &str = "products";

/// Upper bound on simultaneous category product fetches.
pub const MAX_FETCH_CONCURRENCY: usize = 16;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub categories_collection: String,
    pub products_collection: String,
    /// Category product lists fetched in flight at once (1 = strictly sequential).
    pub fetch_concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            categories_collection: CATEGORIES_COLLECTION.to_string(),
            products_collection: PRODUCTS_COLLECTION.to_string(),
            fetch_concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorySyncReport {
    pub inserted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CategoryOutcome {
    Inserted { slug: String, count: usize },
    Skipped { slug: String, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductSyncReport {
    pub inserted: usize,
    pub outcomes: Vec<CategoryOutcome>,
}

impl ProductSyncReport {
    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, CategoryOutcome::Skipped { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub categories: CategorySyncReport,
    pub products: ProductSyncReport,
}

/// A category document as read back for the product phase.
#[derive(Debug, Clone)]
struct CategoryTarget {
    name: String,
    slug: String,
    products_url: String,
}

impl CategoryTarget {
    fn from_document(doc: &Document) -> Result<Self, String> {
        let field = |key: &str| doc.get(key).and_then(Value::as_str).map(str::to_string);
        let slug = field("slug").ok_or("category document has no slug")?;
        let products_url = field("products_url").ok_or("category document has no products_url")?;
        let name = field("name").unwrap_or_else(|| name_from_slug(&slug));
        Ok(Self {
            name,
            slug,
            products_url,
        })
    }
}

enum CategoryFetch {
    Skipped { slug: String, reason: String },
    Fetched { target: CategoryTarget, products: Vec<Value> },
}

/// Full-replace synchronization of a categorized catalog API into two
/// document collections.
///
/// Phase A replaces the categories collection from the category listing.
/// Phase B replaces the products collection category by category; a category
/// whose product fetch fails is skipped without aborting the run.
pub struct CatalogSync<S> {
    store: S,
    provider: CatalogProvider,
    options: SyncOptions,
}

impl<S: DocumentStore> CatalogSync<S> {
    pub fn new(store: S, provider: CatalogProvider) -> Self {
        Self {
            store,
            provider,
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }


    fn require_connection(&self) -> Result<(), SyncError> {
        if self.store.is_connected() {
            Ok(())
        } else {
            error!("document store is not connected");
            Err(SyncError::NotConnected)
        }
    }

    /// Phase A followed by Phase B. Phase B only runs if Phase A succeeded.
    pub async fn run(&self) -> Result<SyncRunReport, SyncError> {
        let started_at = Utc::now();
        let categories = self.sync_categories().await?;
        let products = self.sync_products().await?;
        let finished_at = Utc::now();
        info!(
            categories = categories.inserted,
            products = products.inserted,
            skipped = products.skipped(),
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "catalog sync completed"
        );
        Ok(SyncRunReport {
            started_at,
            finished_at,
            categories,
            products,
        })
    }

    /// Phase A: replace the categories collection from the category listing.
    ///
    /// The listing is fetched and validated before anything is deleted, so a
    /// failed fetch leaves the previous categories in place.
    pub async fn sync_categories(&self) -> Result<CategorySyncReport, SyncError> {
        self.require_connection()?;

        let url = self.provider.categories_url().to_string();
        let listing = self.provider.fetch_categories().await?;
        let entries = listing.as_array().ok_or_else(|| SyncError::Shape {
            url: url.clone(),
            detail: "expected an array of categories".to_string(),
        })?;
        if entries.is_empty() {
            warn!(url = %url, "category listing is empty");
            return Err(SyncError::EmptyListing { url });
        }

        let documents = entries
            .iter()
            .map(|entry| category_document(&self.provider, entry))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|detail| SyncError::Shape {
                url: url.clone(),
                detail,
            })?;

        let collection = &self.options.categories_collection;
        let inserted = self
            .store
            .replace_collection(collection, documents)
            .await
            .inspect_err(|err| error!(collection = %collection, error = %err, "category replace failed"))?;
        info!(collection = %collection, inserted, "categories inserted");
        Ok(CategorySyncReport { inserted })
    }

    /// Phase B: replace the products collection, one category at a time.
    ///
    /// Succeeds only if at least one product was inserted overall.
    pub async fn sync_products(&self) -> Result<ProductSyncReport, SyncError> {
        self.require_connection()?;

        let products_collection = &self.options.products_collection;
        let cleared = self.store.delete_all(products_collection).await?;
        info!(collection = %products_collection, cleared, "products cleared");

        let categories = self
            .store
            .find(&self.options.categories_collection, &Filter::all())
            .await?;

        let limit = self.options.fetch_concurrency.clamp(1, MAX_FETCH_CONCURRENCY);
        let mut fetches = stream::iter(categories.iter().map(|doc| self.fetch_category(doc)))
            .buffered(limit);

        let mut total = 0usize;
        let mut outcomes = Vec::with_capacity(categories.len());
        while let Some(fetched) = fetches.next().await {
            match fetched {
                CategoryFetch::Skipped { slug, reason } => {
                    warn!(slug = %slug, reason = %reason, "skipping category");
                    outcomes.push(CategoryOutcome::Skipped { slug, reason });
                }
                CategoryFetch::Fetched { target, products } => {
                    let batch: Vec<Document> = products
                        .into_iter()
                        .filter_map(|product| tag_product(product, &target))
                        .collect();
                    let count = self
                        .store
                        .insert_many(products_collection, batch)
                        .await
                        .inspect_err(|err| error!(slug = %target.slug, error = %err, "product insert failed"))?
                        .len();
                    total += count;
                    info!(category = %target.name, slug = %target.slug, count, "products inserted");
                    outcomes.push(CategoryOutcome::Inserted {
                        slug: target.slug,
                        count,
                    });
                }
            }
        }

        let report = ProductSyncReport {
            inserted: total,
            outcomes,
        };
        info!(total, skipped = report.skipped(), "product sync finished");
        if total == 0 {
            return Err(SyncError::NoProducts {
                skipped: report.skipped(),
            });
        }
        Ok(report)
    }

    async fn fetch_category(&self, doc: &Document) -> CategoryFetch {
        let target = match CategoryTarget::from_document(doc) {
            Ok(target) => target,
            Err(reason) => {
                let slug = doc
                    .get("slug")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                return CategoryFetch::Skipped {
                    slug,
                    reason: reason.to_string(),
                };
            }
        };

        info!(category = %target.name, slug = %target.slug, "fetching products");
        match self.provider.fetch_json(&target.products_url).await {
            Ok(mut body) => match body.get_mut("products").map(Value::take) {
                Some(Value::Array(products)) => CategoryFetch::Fetched { target, products },
                _ => CategoryFetch::Skipped {
                    slug: target.slug,
                    reason: "response has no products list".to_string(),
                },
            },
            Err(err) => CategoryFetch::Skipped {
                slug: target.slug,
                reason: err.to_string(),
            },
        }
    }
}

/// Derive the stored category document from one listing entry.
///
/// Objects provide `slug` and optionally `name`; a bare string is the slug.
pub fn category_document(provider: &CatalogProvider, entry: &Value) -> Result<Document, String> {
    let (slug, name) = match entry {
        Value::Object(obj) => {
            let slug = obj
                .get("slug")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let name = obj.get("name").and_then(Value::as_str).map(str::to_string);
            (slug, name)
        }
        Value::String(slug) => (slug.clone(), None),
        other => return Err(format!("unexpected category entry: {other}")),
    };
    let name = name.unwrap_or_else(|| name_from_slug(&slug));

    let mut doc = Document::new();
    doc.insert("name".into(), Value::String(name));
    doc.insert("products_url".into(), Value::String(provider.products_url(&slug)));
    doc.insert("slug".into(), Value::String(slug));
    Ok(doc)
}

/// `"smart-home"` -> `"Smart Home"`.
pub fn name_from_slug(slug: &str) -> String {
    title_case(&slug.replace('-', " "))
}

/// Uppercase the first letter of every run of letters, lowercase the rest.
fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_word = false;
    for ch in input.chars() {
        if ch.is_alphabetic() {
            if in_word {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(ch);
            in_word = false;
        }
    }
    out
}

/// Tag a source product with its category and move `id` to `product_id`.
fn tag_product(product: Value, target: &CategoryTarget) -> Option<Document> {
    let Value::Object(mut product) = product else {
        warn!(slug = %target.slug, "dropping non-object product entry");
        return None;
    };
    product.insert("category".into(), Value::String(target.name.clone()));
    product.insert("category_slug".into(), Value::String(target.slug.clone()));
    if let Some(id) = product.remove("id") {
        product.insert("product_id".into(), id);
    }
    Some(product)
}
