//! # Authentication
//!
//! ## Tokens
//!
//! HS256 JWT bearer token. `sub` is the voter id, `exp` is checked with no
//! leeway.
//!
//! ## Credentials
//!
//! Salted SHA-256 digest, compared in constant time.
use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::Error,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::{error::AppError, models::Voter, state::SharedState, store::Store};

const STRETCH_ROUNDS: usize = 10_000;

pub fn new_salt() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn hash_password(password: &str, salt: &str) -> String {
    let mut digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(password.as_bytes())
        .finalize();

    for _ in 0..STRETCH_ROUNDS {
        digest = Sha256::new()
            .chain_update(digest)
            .chain_update(salt.as_bytes())
            .finalize();
    }

    hex::encode(digest)
}

pub fn verify_password(password: &str, salt: &str, expected: &str) -> bool {
    hash_password(password, salt)
        .as_bytes()
        .ct_eq(expected.as_bytes())
        .into()
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    iat: i64,
    exp: i64,
}

pub fn issue_token(secret: &[u8], voter_id: Uuid, ttl_secs: i64) -> Result<String, Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: voter_id,
        iat: now,
        exp: now + ttl_secs,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
}

/// Voter id carried by a valid, unexpired token.
pub fn verify_token(secret: &[u8], token: &str) -> Option<Uuid> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .ok()
        .map(|data| data.claims.sub)
}

/// Authenticated caller, rejected with 401 before the handler runs.
pub struct AuthVoter(pub Voter);

/// Authenticated admin, 403 for everyone else.
pub struct AuthAdmin(pub Voter);

impl FromRequestParts<SharedState> for AuthVoter {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        let voter_id = verify_token(state.config.token_secret.as_bytes(), token)
            .ok_or(AppError::Unauthorized)?;

        let voter = state
            .store
            .voter(voter_id)
            .await
            .map_err(|e| AppError::Rejected(e.into()))?
            .ok_or(AppError::Unauthorized)?;

        Ok(AuthVoter(voter))
    }
}

impl FromRequestParts<SharedState> for AuthAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let AuthVoter(voter) = AuthVoter::from_request_parts(parts, state).await?;

        if !voter.is_admin {
            return Err(AppError::Forbidden);
        }

        Ok(AuthAdmin(voter))
    }
}
