pub mod object_id;
pub mod populate;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::query::filter::{lookup, sort_cmp};
use crate::query::{Filter, Projection, QueryDescriptor, SortDirection};

pub use object_id::ObjectId;
pub use sqlite::SqliteStore;

/// A stored record. `_id` always holds the object id string.
pub type Document = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    InvalidQuery(String),

    #[error("`{value}` is already taken.")]
    Duplicate { field: String, value: String },
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Filter, sort, skip, limit and projection from the descriptor. Population is left to
    /// [`populate`].
    async fn find(
        &self,
        collection: &str,
        query: &QueryDescriptor,
    ) -> Result<Vec<Document>, StoreError>;

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StoreError>;

    /// `doc` must already carry its `_id`. Fields the entity declares unique are claimed in
    /// the same transaction, so a taken value fails with [`StoreError::Duplicate`].
    async fn insert(&self, collection: &str, doc: Document) -> Result<Document, StoreError>;

    /// Merges top-level fields into the record. Returns false when no record matched.
    /// Unique fields are re-claimed atomically, as for [`DocumentStore::insert`].
    async fn update_one(
        &self,
        collection: &str,
        id: &str,
        changes: Document,
    ) -> Result<bool, StoreError>;

    async fn delete_one(&self, collection: &str, id: &str) -> Result<bool, StoreError>;
}

/// Runs a descriptor over documents already in insertion order.
pub fn evaluate(docs: Vec<Document>, query: &QueryDescriptor) -> Result<Vec<Document>, StoreError> {
    let matcher = query.filter.compile().map_err(StoreError::InvalidQuery)?;
    let mut selected: Vec<Document> = docs.into_iter().filter(|d| matcher.matches(d)).collect();

    if !query.sort.is_empty() {
        selected.sort_by(|a, b| {
            query
                .sort
                .iter()
                .map(|(field, direction)| {
                    let ord = sort_cmp(lookup(a, field), lookup(b, field));
                    match direction {
                        SortDirection::Asc => ord,
                        SortDirection::Desc => ord.reverse(),
                    }
                })
                .find(|ord| ord.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
    let limit = query
        .limit
        .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
        .unwrap_or(usize::MAX);

    selected
        .into_iter()
        .skip(skip)
        .take(limit)
        .map(|doc| project(doc, &query.projection))
        .collect()
}

/// Applies an inclusion or exclusion projection. `_id` is kept unless excluded explicitly.
pub fn project(doc: Document, projection: &Projection) -> Result<Document, StoreError> {
    if projection.is_empty() {
        return Ok(doc);
    }

    let non_id = projection.0.iter().filter(|(field, _)| field != "_id");
    let (mut includes, mut excludes) = (false, false);
    for (_, include) in non_id {
        if *include {
            includes = true;
        } else {
            excludes = true;
        }
    }
    if includes && excludes {
        return Err(StoreError::InvalidQuery(
            "Projection cannot have a mix of inclusion and exclusion.".to_string(),
        ));
    }

    let drop_id = projection.excludes("_id");
    if includes {
        let mut out = Document::new();
        if !drop_id {
            if let Some(id) = doc.get("_id") {
                out.insert("_id".to_string(), id.clone());
            }
        }
        for (field, _) in projection.0.iter().filter(|(f, i)| *i && f != "_id") {
            if let Some(value) = lookup(&doc, field) {
                insert_path(&mut out, field, value.clone());
            }
        }
        return Ok(out);
    }

    let mut out = doc;
    for (field, _) in projection.0.iter().filter(|(_, include)| !*include) {
        remove_path(&mut out, field);
    }
    Ok(out)
}

fn insert_path(doc: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(inner) = child {
                insert_path(inner, rest, value);
            }
        }
    }
}

pub fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(inner)) = doc.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}
