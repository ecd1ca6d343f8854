use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderMap, HeaderValue, Method, StatusCode, Uri,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch},
    Extension, Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth::middleware::authorize,
    error::{AppError, ErrorKind},
    handlers::{auth, resource},
    models::entity::{EntityMeta, ENTITIES},
    AppState,
};

fn entity_routes(meta: &'static EntityMeta) -> Router<AppState> {
    let base = format!("/{}", meta.collection);
    let mut router = Router::new()
        .route(&base, get(resource::list).post(resource::create))
        .route(
            &format!("{}/:id", base),
            get(resource::get_one)
                .patch(resource::update)
                .delete(resource::delete),
        );
    if meta.account {
        router = router.route(
            &format!("{}/changePassword/:id", base),
            patch(resource::change_password),
        );
    }
    router.layer(Extension(meta))
}

async fn not_found(uri: Uri) -> AppError {
    AppError::not_found(format!("url: '{}' not found.", uri.path()))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

/// Rejects non-JSON writes, renders bare 405s as error envelopes and advertises JSON.
async fn json_only(request: Request, next: Next) -> Response {
    let writes = matches!(*request.method(), Method::POST | Method::PATCH);
    let mut response = if writes && !is_json(request.headers()) {
        AppError::bare(ErrorKind::UnsupportedMediaType).into_response()
    } else {
        next.run(request).await
    };

    if response.status() == StatusCode::METHOD_NOT_ALLOWED
        && !response.headers().contains_key(CONTENT_TYPE)
    {
        response = AppError::bare(ErrorKind::MethodNotAllowed).into_response();
    }
    response.headers_mut().insert(
        ACCEPT,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    response
}

/// Any origin for `*`, otherwise that origin alone.
fn cors(allowed: &str) -> CorsLayer {
    let origin = match HeaderValue::from_str(allowed.trim_end_matches('/')) {
        Ok(origin) if allowed != "*" => AllowOrigin::list([origin]),
        _ => AllowOrigin::from(Any),
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(Any)
        .expose_headers(Any)
}

pub fn router(state: AppState) -> Router {
    let resources = ENTITIES
        .iter()
        .fold(Router::new(), |router, meta| router.merge(entity_routes(meta)));

    Router::new()
        .route("/login", get(auth::login_basic).post(auth::login))
        .merge(resources)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), authorize))
        .layer(middleware::from_fn(json_only))
        .layer(DefaultBodyLimit::max(state.config.server.body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors(&state.config.server.cors_origin))
        .with_state(state)
}
