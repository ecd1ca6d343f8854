pub mod auth;
pub mod hooks;
pub mod resource;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// `{"response": {"status_code", "message"}}` with the same status on the wire.
pub fn respond(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "response": {
                "status_code": status.as_u16(),
                "message": message,
            }
        })),
    )
        .into_response()
}

pub fn ok() -> Response {
    respond(StatusCode::OK, "OK.")
}
