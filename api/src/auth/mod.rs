pub mod exemption;
pub mod middleware;
pub mod password;
pub mod token;

pub use exemption::{ExemptionEntry, ExemptionMatcher, MatchMode};
pub use middleware::{Identity, RequestAuthorizer};
pub use password::{CredentialHasher, HashCost};
pub use token::{TokenError, TokenService};
