use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};

use super::{evaluate, Document, DocumentStore, StoreError};
use crate::models::entity::entity;
use crate::query::{Filter, QueryDescriptor};

/// Documents kept as JSON text in a single SQLite table, keyed by `(collection, id)`.
///
/// Values of fields the entity registry marks unique are also written to `unique_keys`,
/// whose primary key makes a second claim on the same value fail inside the transaction.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    body: String,
}

fn unique_fields(collection: &str) -> Vec<&'static str> {
    entity(collection)
        .map(|meta| {
            meta.fields
                .iter()
                .filter(|f| f.unique)
                .map(|f| f.name)
                .collect()
        })
        .unwrap_or_default()
}

fn unique_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

async fn claim(
    conn: &mut SqliteConnection,
    collection: &str,
    id: &str,
    field: &str,
    value: &str,
) -> Result<(), StoreError> {
    let result =
        sqlx::query("INSERT INTO unique_keys (collection, field, value, id) VALUES (?, ?, ?, ?)")
            .bind(collection)
            .bind(field)
            .bind(value)
            .bind(id)
            .execute(&mut *conn)
            .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate {
            field: field.to_string(),
            value: value.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

async fn release(
    conn: &mut SqliteConnection,
    collection: &str,
    id: &str,
    field: Option<&str>,
) -> Result<(), StoreError> {
    match field {
        Some(field) => {
            sqlx::query("DELETE FROM unique_keys WHERE collection = ? AND id = ? AND field = ?")
                .bind(collection)
                .bind(id)
                .bind(field)
                .execute(&mut *conn)
                .await?;
        }
        None => {
            sqlx::query("DELETE FROM unique_keys WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}

impl SqliteStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new();
        if url.contains(":memory:") {
            // every connection would otherwise see its own empty database
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            pool_options = pool_options.max_connections(5);
        }
        let pool = pool_options.connect_with(options).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS unique_keys (
                collection TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                id TEXT NOT NULL,
                PRIMARY KEY (collection, field, value)
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, collection: &str, id: Option<&str>) -> Result<Vec<Document>, StoreError> {
        let rows = match id {
            Some(id) => {
                sqlx::query_as::<_, DocumentRow>(
                    "SELECT body FROM documents WHERE collection = ? AND id = ?",
                )
                .bind(collection)
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, DocumentRow>(
                    "SELECT body FROM documents WHERE collection = ? ORDER BY rowid",
                )
                .bind(collection)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter()
            .map(|row| serde_json::from_str::<Document>(&row.body).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn find(
        &self,
        collection: &str,
        query: &QueryDescriptor,
    ) -> Result<Vec<Document>, StoreError> {
        let docs = self.load(collection, query.filter.id_lookup()).await?;
        evaluate(docs, query)
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StoreError> {
        let matcher = filter.compile().map_err(StoreError::InvalidQuery)?;
        let docs = self.load(collection, filter.id_lookup()).await?;
        Ok(docs.into_iter().find(|doc| matcher.matches(doc)))
    }

    async fn insert(&self, collection: &str, doc: Document) -> Result<Document, StoreError> {
        let id = doc
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::InvalidQuery("document has no _id".to_string()))?
            .to_string();
        let body = serde_json::to_string(&doc)?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO documents (collection, id, body, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(collection)
        .bind(&id)
        .bind(&body)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(StoreError::InvalidQuery(format!(
                    "A document with _id {} already exists.",
                    id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        for field in unique_fields(collection) {
            if let Some(value) = doc.get(field).and_then(unique_value) {
                claim(&mut tx, collection, &id, field, &value).await?;
            }
        }

        tx.commit().await?;
        Ok(doc)
    }

    async fn update_one(
        &self,
        collection: &str,
        id: &str,
        changes: Document,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT body FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(false);
        };

        for field in unique_fields(collection) {
            let Some(value) = changes.get(field) else {
                continue;
            };
            release(&mut tx, collection, id, Some(field)).await?;
            if let Some(value) = unique_value(value) {
                claim(&mut tx, collection, id, field, &value).await?;
            }
        }

        let mut doc: Document = serde_json::from_str(&row.body)?;
        for (field, value) in changes {
            if field != "_id" {
                doc.insert(field, value);
            }
        }

        sqlx::query(
            "UPDATE documents SET body = ?, updated_at = ? WHERE collection = ? AND id = ?",
        )
        .bind(serde_json::to_string(&doc)?)
        .bind(Utc::now())
        .bind(collection)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn delete_one(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        release(&mut tx, collection, id, None).await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
