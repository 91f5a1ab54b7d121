/*!
 * # Authentication
 *
 * Bearer JWTs (HS256) identify the calling account. The `sub` claim carries
 * the account id; administrators carry the `admin` role.
 *
 * Handlers declare what they need through the [`AuthenticatedAccount`] and
 * [`AdminAccount`] extractors.
 */

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header, request::Parts};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::errors::ServiceError;

pub const ADMIN_ROLE: &str = "admin";

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String, // Account id
    #[serde(default)]
    pub roles: Vec<String>,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies bearer tokens.
pub struct JwtAuth {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Mints a token for `account_id`, valid for `ttl`.
    pub fn issue(
        &self,
        account_id: Uuid,
        roles: &[&str],
        ttl: std::time::Duration,
    ) -> Result<String, ServiceError> {
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(ttl)
            .map_err(|_| ServiceError::InternalError("Invalid token duration".to_string()))?;
        let claims = Claims {
            sub: account_id.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ServiceError::InternalError(format!("token encoding failed: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ServiceError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ServiceError::Unauthorized("Token has expired".to_string())
                }
                _ => {
                    debug!(error = %e, "rejected bearer token");
                    ServiceError::Unauthorized("Invalid token".to_string())
                }
            })
    }
}

/// The account making the request.
#[derive(Debug, Clone)]
pub struct AuthenticatedAccount {
    pub account_id: Uuid,
    pub roles: Vec<String>,
}

impl AuthenticatedAccount {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }
}

/// An authenticated account holding the administrator role.
#[derive(Debug, Clone)]
pub struct AdminAccount(pub AuthenticatedAccount);

impl AdminAccount {
    pub fn account_id(&self) -> Uuid {
        self.0.account_id
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, ServiceError> {
    let value = parts
        .headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ServiceError::Unauthorized("Missing bearer token".to_string()))?
        .to_str()
        .map_err(|_| ServiceError::Unauthorized("Malformed authorization header".to_string()))?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized("Missing bearer token".to_string()))
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedAccount
where
    S: Send + Sync,
    Arc<JwtAuth>: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = Arc::<JwtAuth>::from_ref(state);
        let claims = auth.verify(bearer_token(parts)?)?;
        let account_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ServiceError::Unauthorized("Invalid token subject".to_string()))?;
        Ok(Self {
            account_id,
            roles: claims.roles,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminAccount
where
    S: Send + Sync,
    Arc<JwtAuth>: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let account = AuthenticatedAccount::from_request_parts(parts, state).await?;
        if !account.is_admin() {
            return Err(ServiceError::Forbidden(
                "Administrator role required".to_string(),
            ));
        }
        Ok(Self(account))
    }
}
