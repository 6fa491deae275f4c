//! Bearer-token issuance and validation.
//!
//! Tokens are HMAC-signed JWTs carrying the subject and an expiry. There is no
//! revocation list; a token stays valid until it expires.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts},
    Json,
};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AuthConfig;
use crate::{GatewayError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

/// A validated credential: who the caller is and until when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub subject: String,
    pub expiry: DateTime<Utc>,
}

pub struct TokenAuthority {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenAuthority {
    pub fn new(secret: &str, algorithm: Algorithm, ttl: Duration) -> Self {
        Self {
            algorithm,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.jwt_secret, config.jwt_algorithm, config.token_ttl)
    }

    pub fn issue(&self, subject: &str) -> Result<String> {
        let exp = Utc::now().timestamp() + self.ttl.as_secs() as i64;
        self.sign(&Claims {
            sub: subject.to_string(),
            exp,
        })
    }

    pub(crate) fn sign(&self, claims: &Claims) -> Result<String> {
        Ok(encode(&Header::new(self.algorithm), claims, &self.encoding)?)
    }

    pub fn validate(&self, token: &str) -> Result<AuthToken> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| GatewayError::Unauthorized(format!("Invalid token: {}", e)))?;

        let expiry = Utc
            .timestamp_opt(data.claims.exp, 0)
            .single()
            .ok_or_else(|| GatewayError::Unauthorized("Invalid token expiry".to_string()))?;

        Ok(AuthToken {
            subject: data.claims.sub,
            expiry,
        })
    }
}

/// Checks a username/password pair. How credentials are stored is up to the
/// implementation.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, username: &str, password: &str) -> bool;
}

/// A single operator account taken from configuration.
pub struct StaticCredentials {
    username: String,
    password: String,
}

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.admin_username.clone(), config.admin_password.clone())
    }
}

impl CredentialVerifier for StaticCredentials {
    fn verify(&self, username: &str, password: &str) -> bool {
        username == self.username && password == self.password
    }
}

/// Extractor that rejects the request unless it carries a valid bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub AuthToken);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<TokenAuthority>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| GatewayError::Unauthorized("Missing bearer token".to_string()))?;

        let header = header
            .to_str()
            .map_err(|_| GatewayError::Unauthorized("Malformed authorization header".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| GatewayError::Unauthorized("Missing bearer token".to_string()))?;

        let authority = Arc::<TokenAuthority>::from_ref(state);
        match authority.validate(token) {
            Ok(auth) => Ok(AuthenticatedUser(auth)),
            Err(e) => {
                warn!("Rejected request to {}: {}", parts.uri.path(), e);
                Err(e)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

pub async fn login(
    State(tokens): State<Arc<TokenAuthority>>,
    State(credentials): State<Arc<dyn CredentialVerifier>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenResponse>> {
    if !credentials.verify(&request.username, &request.password) {
        warn!("Failed login for {}", request.username);
        return Err(GatewayError::Unauthorized("Invalid credentials".to_string()));
    }

    info!("Issued token for {}", request.username);
    Ok(Json(TokenResponse {
        access_token: tokens.issue(&request.username)?,
        token_type: "bearer".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> TokenAuthority {
        TokenAuthority::new("test-secret", Algorithm::HS256, Duration::from_secs(600))
    }

    #[test]
    fn test_issue_then_validate() {
        let authority = authority();
        let token = authority.issue("admin").unwrap();
        let auth = authority.validate(&token).unwrap();
        assert_eq!(auth.subject, "admin");
        assert!(auth.expiry > Utc::now());
    }

    #[test]
    fn test_expired_token_rejected() {
        let authority = authority();
        let token = authority
            .sign(&Claims {
                sub: "admin".to_string(),
                exp: Utc::now().timestamp() - 5,
            })
            .unwrap();
        assert!(matches!(
            authority.validate(&token),
            Err(GatewayError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let other = TokenAuthority::new("other-secret", Algorithm::HS256, Duration::from_secs(600));
        let token = other.issue("admin").unwrap();
        assert!(matches!(
            authority().validate(&token),
            Err(GatewayError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(authority().validate("not.a.jwt").is_err());
        assert!(authority().validate("").is_err());
    }

    #[test]
    fn test_static_credentials() {
        let creds = StaticCredentials::new("admin", "s3cret");
        assert!(creds.verify("admin", "s3cret"));
        assert!(!creds.verify("admin", "wrong"));
        assert!(!creds.verify("root", "s3cret"));
    }
}
