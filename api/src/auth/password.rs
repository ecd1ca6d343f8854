use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::error::AppError;

/// Argon2id work factor. Raising any field makes every hash slower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CredentialHasher {
    params: Params,
    /// Digest checked when no account matches, so unknown and known emails cost the same.
    decoy: Arc<OnceCell<String>>,
}

impl CredentialHasher {
    pub fn new(cost: HashCost) -> Result<Self, argon2::Error> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)?;
        Ok(Self {
            params,
            decoy: Arc::new(OnceCell::new()),
        })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hashes on the blocking pool so request tasks keep running.
    pub async fn hash(&self, secret: &str) -> Result<String, AppError> {
        let argon2 = self.argon2();
        let secret = secret.to_owned();
        let digest = tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(secret.as_bytes(), &salt)
                .map(|hash| hash.to_string())
        })
        .await??;
        Ok(digest)
    }

    /// A digest that does not parse never verifies.
    pub async fn verify(&self, secret: &str, digest: &str) -> Result<bool, AppError> {
        let argon2 = self.argon2();
        let secret = secret.to_owned();
        let digest = digest.to_owned();
        let matched = tokio::task::spawn_blocking(move || match PasswordHash::new(&digest) {
            Ok(parsed) => argon2.verify_password(secret.as_bytes(), &parsed).is_ok(),
            Err(e) => {
                tracing::warn!("stored digest is not a PHC string: {}", e);
                false
            }
        })
        .await?;
        Ok(matched)
    }

    /// Burns one verification against a fixed digest. Always `false`.
    pub async fn verify_decoy(&self, secret: &str) -> Result<bool, AppError> {
        let digest = self
            .decoy
            .get_or_try_init(|| self.hash("efit-decoy-credential"))
            .await?;
        self.verify(secret, digest).await?;
        Ok(false)
    }
}
