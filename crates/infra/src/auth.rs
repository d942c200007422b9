use blessing_domain::identity::ActorIdentity;
use blessing_domain::ports::BoxFuture;
use blessing_domain::ports::auth::{TokenError, TokenVerifier};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

use crate::config::AppConfig;

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[allow(dead_code)]
    exp: usize,
}

/// HS256 bearer tokens signed with the shared `jwt_secret`.
#[derive(Clone)]
pub struct JwtTokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtTokenVerifier {
    pub fn new(secret: &str, audience: Option<&str>, issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        match audience.map(str::trim).filter(|aud| !aud.is_empty()) {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = issuer.map(str::trim).filter(|iss| !iss.is_empty()) {
            validation.set_issuer(&[issuer]);
        }
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.jwt_secret,
            config.jwt_audience.as_deref(),
            config.jwt_issuer.as_deref(),
        )
    }

    fn verify_sync(&self, token: &str) -> Result<ActorIdentity, TokenError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(err.to_string()),
            }
        })?;
        let user_id = data.claims.sub.trim().to_string();
        if user_id.is_empty() {
            return Err(TokenError::Invalid("token subject is empty".into()));
        }
        Ok(ActorIdentity {
            user_id,
            email: data.claims.email,
        })
    }
}

impl TokenVerifier for JwtTokenVerifier {
    fn verify(&self, token: &str) -> BoxFuture<'_, Result<ActorIdentity, TokenError>> {
        let result = self.verify_sync(token);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims<'a> {
        sub: &'a str,
        exp: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        email: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        aud: Option<&'a str>,
    }

    fn token(secret: &str, claims: &TestClaims<'_>) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("encode")
    }

    fn future_exp() -> usize {
        (blessing_domain::util::now_ms() / 1000) as usize + 3600
    }

    #[tokio::test]
    async fn valid_token_yields_identity() {
        let verifier = JwtTokenVerifier::new("secret", None, None);
        let token = token(
            "secret",
            &TestClaims {
                sub: "u-1",
                exp: future_exp(),
                email: Some("ana@example.com"),
                aud: None,
            },
        );
        let identity = verifier.verify(&token).await.expect("identity");
        assert_eq!(identity.user_id, "u-1");
        assert_eq!(identity.email.as_deref(), Some("ana@example.com"));
    }

    #[tokio::test]
    async fn wrong_secret_and_expired_tokens_are_rejected() {
        let verifier = JwtTokenVerifier::new("secret", None, None);
        let forged = token(
            "other",
            &TestClaims {
                sub: "u-1",
                exp: future_exp(),
                email: None,
                aud: None,
            },
        );
        assert!(matches!(
            verifier.verify(&forged).await,
            Err(TokenError::Invalid(_))
        ));

        let expired = token(
            "secret",
            &TestClaims {
                sub: "u-1",
                exp: 1,
                email: None,
                aud: None,
            },
        );
        assert!(matches!(
            verifier.verify(&expired).await,
            Err(TokenError::Expired)
        ));
    }

    #[tokio::test]
    async fn configured_audience_is_enforced() {
        let verifier = JwtTokenVerifier::new("secret", Some("blessing"), None);
        let wrong = token(
            "secret",
            &TestClaims {
                sub: "u-1",
                exp: future_exp(),
                email: None,
                aud: Some("someone-else"),
            },
        );
        assert!(verifier.verify(&wrong).await.is_err());

        let right = token(
            "secret",
            &TestClaims {
                sub: "u-1",
                exp: future_exp(),
                email: None,
                aud: Some("blessing"),
            },
        );
        assert!(verifier.verify(&right).await.is_ok());
    }
}
