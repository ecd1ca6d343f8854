pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod mail;
pub mod models;
pub mod query;
pub mod rest;
pub mod store;

use std::sync::Arc;

use auth::{CredentialHasher, ExemptionMatcher, RequestAuthorizer, TokenService};
use config::Config;
use mail::Mailer;
use store::DocumentStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn DocumentStore>,
    pub hasher: CredentialHasher,
    pub tokens: Arc<TokenService>,
    pub authorizer: Arc<RequestAuthorizer>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn DocumentStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self, argon2::Error> {
        let hasher = CredentialHasher::new(config.hash_cost)?;
        let tokens = Arc::new(TokenService::new(
            &config.token.secret,
            config.token.expires_in,
        ));
        let exemptions =
            ExemptionMatcher::new(config.auth.exemptions.clone(), config.auth.match_mode);
        let authorizer = Arc::new(RequestAuthorizer::new(exemptions, Arc::clone(&tokens)));

        Ok(Self {
            config: Arc::new(config),
            store,
            hasher,
            tokens,
            authorizer,
            mailer,
        })
    }
}
