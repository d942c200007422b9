use thiserror::Error;

use super::BoxFuture;
use crate::identity::ActorIdentity;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token is invalid: {0}")]
    Invalid(String),
    #[error("token has expired")]
    Expired,
    #[error("token verifier unavailable: {0}")]
    Unavailable(String),
}

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> BoxFuture<'_, Result<ActorIdentity, TokenError>>;
}
