use axum::{
    extract::{rejection::JsonRejection, Path, RawQuery, State},
    http::{header::LOCATION, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::{json, Value};

use super::{hooks, ok, respond};
use crate::{
    error::{AppError, ErrorKind},
    models::{
        entity::EntityMeta,
        user::ChangePasswordPayload,
        validate::{validate, Mode},
    },
    query::{translate, Condition, Filter, QueryDescriptor},
    store::{populate::populate, Document, ObjectId},
    AppState,
};

fn parse_id(raw: &str) -> Result<ObjectId, AppError> {
    ObjectId::parse(raw).ok_or_else(|| AppError::bad_request(format!("{} is not a valid ID.", raw)))
}

fn not_found(meta: &EntityMeta, id: &str) -> AppError {
    AppError::not_found(format!("{} #{} could not be found.", meta.label, id))
}

pub(crate) fn strip_hidden(meta: &EntityMeta, doc: &mut Document) {
    for field in meta.hidden_fields() {
        doc.remove(field);
    }
}

/// Hashes every secret field present in `doc`.
async fn hash_secrets(
    state: &AppState,
    meta: &EntityMeta,
    doc: &mut Document,
) -> Result<(), AppError> {
    for field in meta.fields.iter().filter(|f| f.secret) {
        if let Some(Value::String(plain)) = doc.get(field.name) {
            let digest = state.hasher.hash(plain).await?;
            doc.insert(field.name.to_string(), Value::String(digest));
        }
    }
    Ok(())
}

/// Rejects values already held by another record for fields declared unique.
async fn check_unique(
    state: &AppState,
    meta: &EntityMeta,
    doc: &Document,
    own_id: Option<&str>,
) -> Result<(), AppError> {
    let mut taken = serde_json::Map::new();
    for field in meta.fields.iter().filter(|f| f.unique) {
        let Some(value) = doc.get(field.name).filter(|v| !v.is_null()) else {
            continue;
        };
        let mut filter = Filter::new().with(field.name, Condition::Eq(value.clone()));
        if let Some(id) = own_id {
            filter.push("_id", Condition::Ne(json!(id)));
        }
        if state.store.find_one(meta.collection, &filter).await?.is_some() {
            taken.insert(
                field.name.to_string(),
                json!(format!("`{}` is already taken.", value.as_str().unwrap_or_default())),
            );
        }
    }
    if taken.is_empty() {
        Ok(())
    } else {
        Err(AppError::new(ErrorKind::Conflict, Value::Object(taken)))
    }
}

fn validation_failed(errors: crate::models::validate::FieldErrors) -> AppError {
    AppError::bad_request(json!(errors))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(meta): Extension<&'static EntityMeta>,
    RawQuery(raw): RawQuery,
) -> Result<Json<Vec<Document>>, AppError> {
    let query = translate(raw.as_deref().unwrap_or_default());
    tracing::debug!(collection = meta.collection, ?query, "listing");

    let mut docs = state.store.find(meta.collection, &query).await?;
    for doc in docs.iter_mut() {
        strip_hidden(meta, doc);
    }
    populate(state.store.as_ref(), meta, &mut docs, &query.population).await?;
    Ok(Json(docs))
}

pub async fn get_one(
    State(state): State<AppState>,
    Extension(meta): Extension<&'static EntityMeta>,
    Path(id): Path<String>,
    RawQuery(raw): RawQuery,
) -> Result<Json<Document>, AppError> {
    let id = parse_id(&id)?;
    let query = translate(raw.as_deref().unwrap_or_default());

    let lookup = QueryDescriptor {
        projection: query.projection,
        ..QueryDescriptor::with_filter(Filter::by_id(id.as_str()))
    };
    let mut docs = state.store.find(meta.collection, &lookup).await?;
    if docs.is_empty() {
        return Err(not_found(meta, id.as_str()));
    }
    docs.truncate(1);
    strip_hidden(meta, &mut docs[0]);

    let mut paths: Vec<String> = meta
        .default_population
        .iter()
        .map(|p| p.to_string())
        .collect();
    for path in query.population {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    populate(state.store.as_ref(), meta, &mut docs, &paths).await?;

    let doc = docs.pop().ok_or_else(|| not_found(meta, id.as_str()))?;
    Ok(Json(doc))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(meta): Extension<&'static EntityMeta>,
    body: Result<Json<Document>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = body?;
    let id = match body.get("_id") {
        None | Some(Value::Null) => ObjectId::new(),
        Some(Value::String(raw)) => parse_id(raw)?,
        Some(other) => return Err(AppError::bad_request(format!("{} is not a valid ID.", other))),
    };

    let mut doc = validate(meta, body, Mode::Create).map_err(validation_failed)?;
    check_unique(&state, meta, &doc, None).await?;
    hash_secrets(&state, meta, &mut doc).await?;
    hooks::prepare_create(meta, &mut doc);

    hooks::check_parent(&state, meta, &doc).await?;

    doc.insert("_id".to_string(), json!(id.as_str()));
    let doc = state.store.insert(meta.collection, doc).await?;
    tracing::info!(collection = meta.collection, id = %id, "created");

    let message = match hooks::after_create(&state, meta, &doc).await {
        Ok(message) => message,
        Err(err) => {
            // the parent vanished after the check; undo the insert
            if let Err(cleanup) = state.store.delete_one(meta.collection, id.as_str()).await {
                tracing::error!(
                    collection = meta.collection,
                    id = %id,
                    "rollback failed: {}",
                    cleanup
                );
            }
            return Err(err);
        }
    };
    let location = format!(
        "{}/{}/{}",
        state.config.server.api_url.trim_end_matches('/'),
        meta.collection,
        id
    );
    Ok((
        [(LOCATION, location)],
        respond(StatusCode::CREATED, &message),
    )
        .into_response())
}

pub async fn update(
    State(state): State<AppState>,
    Extension(meta): Extension<&'static EntityMeta>,
    Path(id): Path<String>,
    body: Result<Json<Document>, JsonRejection>,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    let Json(body) = body?;

    let mut changes = validate(meta, body, Mode::Update).map_err(validation_failed)?;
    check_unique(&state, meta, &changes, Some(id.as_str())).await?;
    hash_secrets(&state, meta, &mut changes).await?;
    let notify = hooks::prepare_update(&state, meta, id.as_str(), &mut changes).await?;

    if !state
        .store
        .update_one(meta.collection, id.as_str(), changes)
        .await?
    {
        return Err(not_found(meta, id.as_str()));
    }
    if notify {
        hooks::notify_coach(&state, meta, id.as_str()).await;
    }
    Ok(ok())
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(meta): Extension<&'static EntityMeta>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    if !state.store.delete_one(meta.collection, id.as_str()).await? {
        return Err(not_found(meta, id.as_str()));
    }
    tracing::info!(collection = meta.collection, id = %id, "deleted");
    Ok(ok())
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(meta): Extension<&'static EntityMeta>,
    Path(id): Path<String>,
    body: Result<Json<ChangePasswordPayload>, JsonRejection>,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    let Json(payload) = body?;
    if payload.password.is_empty() {
        return Err(AppError::bad_request(json!({
            "password": "Path `password` is required."
        })));
    }

    let digest = state.hasher.hash(&payload.password).await?;
    let mut changes = Document::new();
    changes.insert("password".to_string(), Value::String(digest));
    if !state
        .store
        .update_one(meta.collection, id.as_str(), changes)
        .await?
    {
        return Err(not_found(meta, id.as_str()));
    }
    Ok(ok())
}
