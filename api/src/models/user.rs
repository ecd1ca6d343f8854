use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token payload. `sub` is the account id.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordPayload {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: Value,
    pub token: String,
}

/// Collections holding loginable accounts, in lookup order.
pub const ACCOUNT_COLLECTIONS: [&str; 3] = ["users", "coaches", "customers"];
