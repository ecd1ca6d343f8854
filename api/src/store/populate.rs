use std::collections::HashMap;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;

use super::{Document, DocumentStore, StoreError};
use crate::models::entity::{entity, EntityMeta};
use crate::query::{Condition, Filter, QueryDescriptor};

/// Replaces referenced ids with the documents they point at, one dotted path at a time.
///
/// A path may continue past a reference into the referenced entity, so
/// `customer_program.program` first resolves the customer program and then its program.
/// Dangling single references become `null` and dangling list entries are dropped.
pub async fn populate(
    store: &dyn DocumentStore,
    meta: &'static EntityMeta,
    docs: &mut [Document],
    paths: &[String],
) -> Result<(), StoreError> {
    for path in paths {
        populate_path(store, meta, docs, path).await?;
    }
    Ok(())
}

fn populate_path<'a>(
    store: &'a dyn DocumentStore,
    meta: &'static EntityMeta,
    docs: &'a mut [Document],
    path: &'a str,
) -> BoxFuture<'a, Result<(), StoreError>> {
    async move {
        let relation = meta.resolve_relation(path).ok_or_else(|| {
            StoreError::InvalidQuery(format!(
                "Cannot populate path `{}` of {}.",
                path, meta.collection
            ))
        })?;
        let target = entity(relation.target).ok_or_else(|| {
            StoreError::InvalidQuery(format!("Unknown collection {}.", relation.target))
        })?;
        let rest = path[relation.path.len()..].strip_prefix('.');
        let segments: Vec<&str> = relation.path.split('.').collect();

        let mut ids = Vec::new();
        for doc in docs.iter() {
            if let Some(value) = doc.get(segments[0]) {
                collect_ids(value, &segments[1..], &mut ids);
            }
        }
        ids.sort();
        ids.dedup();
        if ids.is_empty() {
            return Ok(());
        }

        let filter = Filter::new().with(
            "_id",
            Condition::In(ids.into_iter().map(Value::String).collect()),
        );
        let mut fetched = store
            .find(target.collection, &QueryDescriptor::with_filter(filter))
            .await?;
        for doc in fetched.iter_mut() {
            for hidden in target.hidden_fields() {
                doc.remove(hidden);
            }
        }
        if let Some(rest) = rest {
            populate_path(store, target, &mut fetched, rest).await?;
        }

        let by_id: HashMap<String, Value> = fetched
            .into_iter()
            .filter_map(|doc| {
                let id = doc.get("_id")?.as_str()?.to_string();
                Some((id, Value::Object(doc)))
            })
            .collect();

        for doc in docs.iter_mut() {
            if let Some(value) = doc.get_mut(segments[0]) {
                replace_ids(value, &segments[1..], &by_id);
            }
        }
        Ok(())
    }
    .boxed()
}

/// Id carried by a reference, whether still raw or already populated.
fn leaf_id(value: &Value) -> Option<&str> {
    match value {
        Value::String(id) => Some(id),
        Value::Object(obj) => obj.get("_id").and_then(Value::as_str),
        _ => None,
    }
}

fn collect_ids(value: &Value, segments: &[&str], out: &mut Vec<String>) {
    if let Value::Array(items) = value {
        for item in items {
            collect_ids(item, segments, out);
        }
        return;
    }
    match segments.split_first() {
        None => {
            if let Some(id) = leaf_id(value) {
                out.push(id.to_string());
            }
        }
        Some((head, rest)) => {
            if let Some(child) = value.as_object().and_then(|obj| obj.get(*head)) {
                collect_ids(child, rest, out);
            }
        }
    }
}

fn replace_ids(value: &mut Value, segments: &[&str], by_id: &HashMap<String, Value>) {
    match (segments.split_first(), value) {
        (None, Value::Array(items)) => {
            let resolved: Vec<Value> = items
                .iter()
                .filter_map(|item| leaf_id(item).and_then(|id| by_id.get(id)).cloned())
                .collect();
            *items = resolved;
        }
        (Some(_), Value::Array(items)) => {
            for item in items.iter_mut() {
                replace_ids(item, segments, by_id);
            }
        }
        (None, value) => {
            if let Some(id) = leaf_id(&*value).map(str::to_string) {
                *value = by_id.get(&id).cloned().unwrap_or(Value::Null);
            }
        }
        (Some((head, rest)), Value::Object(obj)) => {
            if let Some(child) = obj.get_mut(*head) {
                replace_ids(child, rest, by_id);
            }
        }
        _ => {}
    }
}
