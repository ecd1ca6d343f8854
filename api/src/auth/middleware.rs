use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, Method},
    middleware::Next,
    response::Response,
};

use super::exemption::ExemptionMatcher;
use super::token::{TokenError, TokenService};
use crate::{error::AppError, AppState};

/// Authenticated caller, stored in the request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
}

pub struct RequestAuthorizer {
    exemptions: ExemptionMatcher,
    tokens: Arc<TokenService>,
}

impl RequestAuthorizer {
    pub fn new(exemptions: ExemptionMatcher, tokens: Arc<TokenService>) -> Self {
        Self { exemptions, tokens }
    }

    /// `Ok(None)` means the route is exempt and no identity was checked.
    pub async fn authorize(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
    ) -> Result<Option<Identity>, AppError> {
        if self.exemptions.is_exempt(path, method) {
            return Ok(None);
        }

        let token = bearer_token(headers).ok_or(TokenError::Missing)?.to_owned();
        let tokens = Arc::clone(&self.tokens);
        let subject = tokio::task::spawn_blocking(move || tokens.verify(&token)).await??;

        Ok(Some(Identity { subject }))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let parts: Vec<&str> = value.split(' ').collect();
    match parts.as_slice() {
        ["Bearer", token] if !token.is_empty() => Some(token),
        _ => None,
    }
}

pub async fn authorize(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let outcome = state
        .authorizer
        .authorize(request.method(), request.uri().path(), request.headers())
        .await;

    match outcome {
        Ok(Some(identity)) => {
            tracing::debug!(subject = %identity.subject, "request authorized");
            request.extensions_mut().insert(identity);
        }
        Ok(None) => {
            tracing::debug!(path = %request.uri().path(), "route exempt from authentication");
        }
        Err(err) if !state.config.auth.enforce => {
            tracing::warn!("authorization failed, passing request through: {}", err);
        }
        Err(err) => return Err(err),
    }

    Ok(next.run(request).await)
}
