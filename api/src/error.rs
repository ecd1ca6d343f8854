use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::auth::token::TokenError;
use crate::store::StoreError;

/// Every failure the API can report, with its fixed status and message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    PaymentRequired,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    ProxyAuthenticationRequired,
    RequestTimeout,
    Conflict,
    Gone,
    UnsupportedMediaType,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    HttpVersionNotSupported,
}

impl ErrorKind {
    fn table(self) -> (StatusCode, &'static str, &'static str) {
        match self {
            ErrorKind::BadRequest => (
                StatusCode::BAD_REQUEST,
                "BadRequest",
                "Cannot process the request may a malformed syntax request, invalid message framing, or deceptive request routing.",
            ),
            ErrorKind::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Unauthorized",
                "Unauthorized Access. Authentication required or invalid.",
            ),
            ErrorKind::PaymentRequired => (
                StatusCode::PAYMENT_REQUIRED,
                "PaymentRequired",
                "Payment Required.",
            ),
            ErrorKind::Forbidden => (
                StatusCode::FORBIDDEN,
                "Forbidden",
                "The request is valid but you do not have access to this resource.",
            ),
            ErrorKind::NotFound => (
                StatusCode::NOT_FOUND,
                "NotFound",
                "The requested resource could not be found.",
            ),
            ErrorKind::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                "MethodNotAllowed",
                "A request method is not supported for the requested resource.",
            ),
            ErrorKind::NotAcceptable => (
                StatusCode::NOT_ACCEPTABLE,
                "NotAcceptable",
                "The requested resource is capable of generating only content not acceptable according to the Accept headers sent in the request.",
            ),
            ErrorKind::ProxyAuthenticationRequired => (
                StatusCode::PROXY_AUTHENTICATION_REQUIRED,
                "ProxyAuthenticationRequired",
                "The client must first authenticate itself with the proxy.",
            ),
            ErrorKind::RequestTimeout => (
                StatusCode::REQUEST_TIMEOUT,
                "RequestTimeout",
                "The server timed out waiting for the request.",
            ),
            ErrorKind::Conflict => (
                StatusCode::CONFLICT,
                "Conflict",
                "Indicates that the request could not be processed because of conflict in the current state of the resource, such as an edit conflict between multiple simultaneous updates.",
            ),
            ErrorKind::Gone => (
                StatusCode::GONE,
                "Gone",
                "The requested resource is no longer available and will not be available again.",
            ),
            ErrorKind::UnsupportedMediaType => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UnsupportedMediaType",
                "The request entity has a media type which the server or resource does not support. This API only supports JSON payload.",
            ),
            ErrorKind::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Oooops something wrong happened.",
            ),
            ErrorKind::NotImplemented => (
                StatusCode::NOT_IMPLEMENTED,
                "NotImplemented",
                "The server either does not recognize the request method, or it lacks the ability to fulfil the request.",
            ),
            ErrorKind::BadGateway => (
                StatusCode::BAD_GATEWAY,
                "BadGateway",
                "The server was acting as a gateway or proxy and received an invalid response from the upstream server.",
            ),
            ErrorKind::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "ServiceUnavailable",
                "The server is currently unavailable (because it is overloaded or down for maintenance).",
            ),
            ErrorKind::GatewayTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "GatewayTimeout",
                "The server was acting as a gateway or proxy and did not receive a timely response from the upstream server.",
            ),
            ErrorKind::HttpVersionNotSupported => (
                StatusCode::HTTP_VERSION_NOT_SUPPORTED,
                "HttpVersionNotSupported",
                "The server does not support the HTTP protocol version used in the request.",
            ),
        }
    }

    pub fn status(self) -> StatusCode {
        self.table().0
    }

    pub fn name(self) -> &'static str {
        self.table().1
    }

    pub fn message(self) -> &'static str {
        self.table().2
    }
}

#[derive(Debug)]
pub struct AppError {
    pub kind: ErrorKind,
    pub description: Option<Value>,
}

impl AppError {
    pub fn new(kind: ErrorKind, description: impl Into<Value>) -> Self {
        Self {
            kind,
            description: Some(description.into()),
        }
    }

    pub fn bare(kind: ErrorKind) -> Self {
        Self {
            kind,
            description: None,
        }
    }

    pub fn bad_request(description: impl Into<Value>) -> Self {
        Self::new(ErrorKind::BadRequest, description)
    }

    pub fn unauthorized(description: impl Into<Value>) -> Self {
        Self::new(ErrorKind::Unauthorized, description)
    }

    pub fn not_found(description: impl Into<Value>) -> Self {
        Self::new(ErrorKind::NotFound, description)
    }

    /// Logs the cause and hides it from the client.
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        tracing::error!("internal error: {}", cause);
        Self::bare(ErrorKind::InternalServerError)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.description {
            Some(Value::String(desc)) => write!(f, "{}: {}", self.kind.name(), desc),
            Some(desc) => write!(f, "{}: {}", self.kind.name(), desc),
            None => write!(f, "{}", self.kind.name()),
        }
    }
}

impl std::error::Error for AppError {}

impl From<StoreError> for AppError {
    fn from(inner: StoreError) -> Self {
        match inner {
            StoreError::InvalidQuery(msg) => AppError::bad_request(msg),
            StoreError::Duplicate { field, value } => AppError::new(
                ErrorKind::Conflict,
                json!({ field: format!("`{}` is already taken.", value) }),
            ),
            other => AppError::internal(other),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(inner: TokenError) -> Self {
        match inner {
            TokenError::Creation(_) => AppError::internal(inner),
            other => AppError::unauthorized(other.to_string()),
        }
    }
}

impl From<argon2::password_hash::Error> for AppError {
    fn from(inner: argon2::password_hash::Error) -> Self {
        AppError::internal(format!("password hashing: {}", inner))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(inner: tokio::task::JoinError) -> Self {
        AppError::internal(format!("blocking task: {}", inner))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(inner: serde_json::Error) -> Self {
        AppError::internal(format!("serialization: {}", inner))
    }
}

impl From<JsonRejection> for AppError {
    fn from(inner: JsonRejection) -> Self {
        match inner {
            JsonRejection::MissingJsonContentType(_) => {
                AppError::bare(ErrorKind::UnsupportedMediaType)
            }
            other => AppError::bad_request(other.body_text()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        if status.is_server_error() {
            tracing::error!("{} {}", status.as_u16(), self);
        } else {
            tracing::warn!("{} {}", status.as_u16(), self);
        }

        let mut error = json!({
            "status_code": status.as_u16(),
            "name": self.kind.name(),
            "message": self.kind.message(),
        });
        if let Some(description) = self.description {
            error["description"] = description;
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}
