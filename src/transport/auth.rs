//! Delivery tokens
//!
//! A delivery token is an HS256 JWT minted per function invocation and
//! carrying the three scope claims. The ingest endpoint derives the only topic
//! a publisher may write to from those claims, so a token can never publish
//! outside its own function's scope.

use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::broker::topic::{Topic, TopicError};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingHeader,
    #[error("malformed authorization header")]
    MalformedHeader,
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("missing claim {0}")]
    MissingClaim(&'static str),
    #[error("invalid scope: {0}")]
    InvalidScope(#[from] TopicError),
}

/// The function a token is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogScope {
    pub subscription_id: String,
    pub boundary_id: String,
    pub function_id: String,
}

impl LogScope {
    pub fn new(
        subscription_id: impl Into<String>,
        boundary_id: impl Into<String>,
        function_id: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            boundary_id: boundary_id.into(),
            function_id: function_id.into(),
        }
    }

    pub fn topic(&self) -> Result<Topic, TopicError> {
        Topic::for_function(&self.subscription_id, &self.boundary_id, &self.function_id)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogClaims {
    pub subscription_id: String,
    pub boundary_id: String,
    pub function_id: String,
    pub exp: i64,
}

// Claims as they arrive off the wire, before presence of each field is checked.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClaims {
    #[serde(default)]
    subscription_id: Option<String>,
    #[serde(default)]
    boundary_id: Option<String>,
    #[serde(default)]
    function_id: Option<String>,
}

pub fn mint_token(scope: &LogScope, key: &str, expiry: Duration) -> Result<String, AuthError> {
    let exp = (chrono::Utc::now() + chrono::Duration::seconds(expiry.as_secs() as i64)).timestamp();
    let claims = LogClaims {
        subscription_id: scope.subscription_id.clone(),
        boundary_id: scope.boundary_id.clone(),
        function_id: scope.function_id.clone(),
        exp,
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(key.as_bytes()),
    )?;
    Ok(token)
}

/// Checks the signature and expiry and returns the scope the token grants.
pub fn verify_token(token: &str, key: &str) -> Result<LogScope, AuthError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<RawClaims>(
        token,
        &DecodingKey::from_secret(key.as_bytes()),
        &validation,
    )?;
    let claims = data.claims;

    let scope = LogScope {
        subscription_id: required(claims.subscription_id, "subscriptionId")?,
        boundary_id: required(claims.boundary_id, "boundaryId")?,
        function_id: required(claims.function_id, "functionId")?,
    };
    scope.topic()?;
    Ok(scope)
}

/// Pulls the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingHeader)?;
    let (scheme, token) = header
        .trim()
        .split_once(char::is_whitespace)
        .ok_or(AuthError::MalformedHeader)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::MalformedHeader);
    }
    Ok(token)
}

fn required(value: Option<String>, name: &'static str) -> Result<String, AuthError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::MissingClaim(name))
}
