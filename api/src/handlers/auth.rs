use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::AUTHORIZATION, HeaderMap},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};

use super::resource::strip_hidden;
use crate::{
    error::AppError,
    models::{
        entity::entity,
        user::{AuthResponse, LoginPayload, ACCOUNT_COLLECTIONS},
        validate::now_timestamp,
    },
    query::{Condition, Filter},
    store::Document,
    AppState,
};

const WRONG_CREDENTIALS: &str = "Wrong username or password.";

/// `GET /login` with `Authorization: Basic base64(email:password)`.
pub async fn login_basic(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AuthResponse>, AppError> {
    let payload = basic_credentials(&headers).unwrap_or(LoginPayload {
        email: String::new(),
        password: String::new(),
    });
    authenticate(&state, payload).await.map(Json)
}

/// `POST /login` with a JSON `{email, password}` body.
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginPayload>, JsonRejection>,
) -> Result<Json<AuthResponse>, AppError> {
    let Json(payload) = payload?;
    authenticate(&state, payload).await.map(Json)
}

fn basic_credentials(headers: &HeaderMap) -> Option<LoginPayload> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.split(' ').nth(1)?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (email, password) = decoded.split_once(':')?;
    Some(LoginPayload {
        email: email.to_string(),
        password: password.to_string(),
    })
}

async fn find_account(
    state: &AppState,
    email: &str,
) -> Result<Option<(&'static str, Document)>, AppError> {
    let filter = Filter::new().with("email", Condition::Eq(json!(email.trim())));
    for collection in ACCOUNT_COLLECTIONS {
        if let Some(doc) = state.store.find_one(collection, &filter).await? {
            return Ok(Some((collection, doc)));
        }
    }
    Ok(None)
}

async fn authenticate(state: &AppState, payload: LoginPayload) -> Result<AuthResponse, AppError> {
    if payload.email.is_empty() || payload.password.is_empty() {
        return Err(AppError::unauthorized(WRONG_CREDENTIALS));
    }

    let Some((collection, mut account)) = find_account(state, &payload.email).await? else {
        state.hasher.verify_decoy(&payload.password).await?;
        return Err(AppError::unauthorized(WRONG_CREDENTIALS));
    };

    let digest = account
        .get("password")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !state.hasher.verify(&payload.password, digest).await? {
        return Err(AppError::unauthorized(WRONG_CREDENTIALS));
    }

    if let Some(required) = &state.config.auth.login_required_status {
        let status = account.get("status").and_then(Value::as_str);
        if status != Some(required.as_str()) {
            return Err(AppError::unauthorized("Account not yet activated."));
        }
    }

    let id = account
        .get("_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let now = now_timestamp();
    let mut changes = Document::new();
    changes.insert("last_login_date".to_string(), json!(now));
    state.store.update_one(collection, &id, changes).await?;
    account.insert("last_login_date".to_string(), json!(now));

    let token = state.tokens.issue(&id)?;
    if let Some(meta) = entity(collection) {
        strip_hidden(meta, &mut account);
    }
    tracing::info!(account = %id, collection, "login succeeded");

    Ok(AuthResponse {
        user: Value::Object(account),
        token,
    })
}
