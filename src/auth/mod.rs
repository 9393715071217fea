//! Token verification boundary for the realtime relay.
//!
//! The message router never trusts a client-asserted user id: it only binds
//! an identity that a [`TokenVerifier`] has vouched for. The surrounding
//! storefront application issues the tokens; the relay only checks them.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,  // User ID
    pub exp: i64,     // Expiration time
    pub iat: i64,     // Issued at
}

/// Verified-identity capability consumed by the message router.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Returns the verified user id for `token`, or rejects.
    async fn verify(&self, token: &str) -> Result<String, AuthError>;
}

/// HS256 JWT verifier backed by a shared secret.
pub struct JwtVerifier {
    jwt_secret: String,
    token_expiry_hours: i64,
}

impl JwtVerifier {
    pub fn new(jwt_secret: String, token_expiry_hours: i64) -> Self {
        Self {
            jwt_secret,
            token_expiry_hours,
        }
    }

    /// Issue a token for `user_id`. Token issuance belongs to the storefront
    /// login flow; this lives here so the two sides share one secret and
    /// claim layout.
    pub fn issue_token(&self, user_id: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let exp = (now + Duration::hours(self.token_expiry_hours)).timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            exp,
            iat: now.timestamp(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )?;

        Ok(token)
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<String, AuthError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )?;

        Ok(data.claims.sub)
    }
}
