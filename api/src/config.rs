use std::env;

use axum::http::Method;

use crate::auth::exemption::{ExemptionEntry, MatchMode};
use crate::auth::password::HashCost;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database_url: String,
    pub token: TokenConfig,
    pub hash_cost: HashCost,
    pub auth: AuthConfig,
    pub mail_from: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub api_url: String,
    pub frontend_url: String,
    /// `*` or a single origin allowed by CORS.
    pub cors_origin: String,
    pub body_limit: usize,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub secret: String,
    pub expires_in: chrono::Duration,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub exemptions: Vec<ExemptionEntry>,
    pub match_mode: MatchMode,
    /// When false, authorization failures are logged and the request still proceeds.
    pub enforce: bool,
    pub login_required_status: Option<String>,
}

const DEFAULT_EXEMPT_ROUTES: &str = "/login,/users POST,/coaches POST,/customers POST";

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port: u16 = parse_var("PORT", 3000)?;
        let server = ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            api_url: env::var("API_URL").unwrap_or_else(|_| format!("http://localhost:{}", port)),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            cors_origin: env::var("CORS_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            body_limit: parse_var("REQUEST_BODY_MAX_SIZE", 50 * 1024 * 1024)?,
        };

        let secret = env::var("TOKEN_SECRET").map_err(|_| ConfigError::Missing("TOKEN_SECRET"))?;
        let expires_raw = env::var("TOKEN_EXPIRES_IN").unwrap_or_else(|_| "1d".to_string());
        let expires_in = parse_duration(&expires_raw).ok_or(ConfigError::Invalid {
            name: "TOKEN_EXPIRES_IN",
            value: expires_raw.clone(),
        })?;

        let defaults = HashCost::default();
        let hash_cost = HashCost {
            memory_kib: parse_var("HASH_MEMORY_KIB", defaults.memory_kib)?,
            iterations: parse_var("HASH_ITERATIONS", defaults.iterations)?,
            parallelism: parse_var("HASH_PARALLELISM", defaults.parallelism)?,
        };

        let routes_raw =
            env::var("AUTH_EXEMPT_ROUTES").unwrap_or_else(|_| DEFAULT_EXEMPT_ROUTES.to_string());
        let exemptions = parse_exemptions(&routes_raw).ok_or(ConfigError::Invalid {
            name: "AUTH_EXEMPT_ROUTES",
            value: routes_raw.clone(),
        })?;

        let match_raw = env::var("AUTH_EXEMPT_MATCH").unwrap_or_else(|_| "segment".to_string());
        let match_mode = match match_raw.as_str() {
            "segment" => MatchMode::Segment,
            "substring" => MatchMode::Substring,
            _ => {
                return Err(ConfigError::Invalid {
                    name: "AUTH_EXEMPT_MATCH",
                    value: match_raw,
                })
            }
        };

        Ok(Self {
            server,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://efit.db?mode=rwc".to_string()),
            token: TokenConfig { secret, expires_in },
            hash_cost,
            auth: AuthConfig {
                exemptions,
                match_mode,
                enforce: parse_var("AUTH_ENFORCE", true)?,
                login_required_status: env::var("LOGIN_REQUIRED_STATUS")
                    .ok()
                    .filter(|s| !s.is_empty()),
            },
            mail_from: env::var("MAIL_FROM").unwrap_or_else(|_| "noreply@efit.local".to_string()),
        })
    }

    /// Every setting at its default, with the given token secret.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                api_url: "http://localhost:3000".to_string(),
                frontend_url: "http://localhost:3000".to_string(),
                cors_origin: "*".to_string(),
                body_limit: 50 * 1024 * 1024,
            },
            database_url: "sqlite://efit.db?mode=rwc".to_string(),
            token: TokenConfig {
                secret: secret.into(),
                expires_in: chrono::Duration::days(1),
            },
            hash_cost: HashCost::default(),
            auth: AuthConfig {
                exemptions: parse_exemptions(DEFAULT_EXEMPT_ROUTES).unwrap_or_default(),
                match_mode: MatchMode::Segment,
                enforce: true,
                login_required_status: None,
            },
            mail_from: "noreply@efit.local".to_string(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

/// Accepts `45s`, `30m`, `12h`, `1d` or a bare number of seconds. Out of range values give `None`.
pub fn parse_duration(raw: &str) -> Option<chrono::Duration> {
    let raw = raw.trim();
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let amount: i64 = digits.parse().ok()?;
    match unit.trim() {
        "s" => chrono::Duration::try_seconds(amount),
        "m" => chrono::Duration::try_minutes(amount),
        "h" => chrono::Duration::try_hours(amount),
        "d" => chrono::Duration::try_days(amount),
        _ => None,
    }
}

/// Comma separated entries of `path [METHOD ...]`.
pub fn parse_exemptions(raw: &str) -> Option<Vec<ExemptionEntry>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let mut parts = entry.split_whitespace();
            let path = parts.next()?.to_string();
            let methods = parts
                .map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
                .collect::<Option<Vec<_>>>()?;
            Some(ExemptionEntry {
                path,
                methods: if methods.is_empty() {
                    None
                } else {
                    Some(methods)
                },
            })
        })
        .collect()
}
