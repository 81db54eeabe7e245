use std::cmp::Ordering;
use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::StoreError;

/// A stored document: any JSON object.
pub type Document = Map<String, Value>;

/// Field carrying the store-assigned identity on every document read back.
pub const ID_FIELD: &str = "_id";

/// Conjunction of field-equality clauses. The empty filter matches everything.
///
/// Field names are dotted paths (`dimensions.width`); `_id` matches the store
/// identity. A `null` clause matches documents where the field is null or absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(field, value)
    }

    pub fn by_id(id: i64) -> Self {
        Self::eq(ID_FIELD, id)
    }

    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), value.into()));
        self
    }

    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// Winner of a per-group argmax.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupLeader {
    pub group: Value,
    pub max: Value,
    pub document: Document,
}

/// Create/read/update/delete and aggregation contract over named collections.
///
/// Natural iteration order of `find` is insertion order.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Bulk insert; returns the store-assigned ids in input order.
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<i64>, StoreError>;

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError>;

    /// Sets `fields` on the first matching document; returns the number of
    /// documents actually modified.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Document,
    ) -> Result<u64, StoreError>;

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    async fn delete_all(&self, collection: &str) -> Result<u64, StoreError>;

    async fn create_index(&self, collection: &str, field: &str) -> Result<(), StoreError>;

    async fn insert_one(&self, collection: &str, document: Document) -> Result<i64, StoreError> {
        let ids = self.insert_many(collection, vec![document]).await?;
        Ok(ids.first().copied().unwrap_or_default())
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self.find(collection, filter).await?.into_iter().next())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        Ok(self.find(collection, filter).await?.len() as u64)
    }

    /// Mean of the numeric values of `field`; `None` when there are none.
    async fn average(&self, collection: &str, field: &str) -> Result<Option<f64>, StoreError> {
        let values: Vec<f64> = self
            .find(collection, &Filter::all())
            .await?
            .iter()
            .filter_map(|doc| lookup(doc, field).and_then(Value::as_f64))
            .collect();
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(values.iter().sum::<f64>() / values.len() as f64))
    }

    async fn group_argmax(
        &self,
        collection: &str,
        group_field: &str,
        sort_field: &str,
    ) -> Result<Vec<GroupLeader>, StoreError> {
        let documents = self.find(collection, &Filter::all()).await?;
        Ok(group_argmax(documents, group_field, sort_field))
    }

    /// Delete every document in `collection`, then bulk-insert `documents`.
    /// Not atomic: a failed insert leaves the collection empty.
    async fn replace_collection(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<usize, StoreError> {
        let deleted = self.delete_all(collection).await?;
        debug!(collection, deleted, "collection cleared");
        let ids = self.insert_many(collection, documents).await?;
        Ok(ids.len())
    }
}

/// Resolve a dotted path inside a document.
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Per group, the first document after a stable descending sort on
/// `sort_field`. Non-numeric or missing sort values sort last. Groups come out
/// ordered by their leader's position in the sorted sequence.
pub fn group_argmax(
    mut documents: Vec<Document>,
    group_field: &str,
    sort_field: &str,
) -> Vec<GroupLeader> {
    documents.sort_by(|a, b| {
        let a = lookup(a, sort_field).and_then(Value::as_f64);
        let b = lookup(b, sort_field).and_then(Value::as_f64);
        match (a, b) {
            (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });

    let mut seen = HashSet::new();
    let mut leaders = Vec::new();
    for document in documents {
        let group = lookup(&document, group_field).cloned().unwrap_or(Value::Null);
        if !seen.insert(group.to_string()) {
            continue;
        }
        let max = lookup(&document, sort_field)
            .filter(|v| v.is_number())
            .cloned()
            .unwrap_or(Value::Null);
        leaders.push(GroupLeader {
            group,
            max,
            document,
        });
    }
    leaders
}

/// Validate a dotted field path: `[A-Za-z0-9_]` segments separated by dots.
pub(crate) fn validate_field(path: &str) -> Result<&str, StoreError> {
    let valid = !path.is_empty()
        && path.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(path)
    } else {
        Err(StoreError::InvalidField(path.to_string()))
    }
}

pub(crate) fn validate_collection(name: &str) -> Result<&str, StoreError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidCollection(name.to_string()))
    }
}
