//! Session token pair issuance and verification.
//!
//! Access and refresh tokens are both HS256 JWTs sharing one secret; the
//! `token_use` claim keeps a refresh token from being replayed as an
//! access token.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use smartgrid_core::apps::OrgRole;
use smartgrid_core::{Error, Result};
use uuid::Uuid;

use crate::config::Config;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub org_id: String,
    pub role: String,
    pub token_use: String,
    pub exp: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub expires_in: i64,
}

pub fn issue_session(
    config: &Config,
    user_id: Uuid,
    org_id: Uuid,
    role: OrgRole,
) -> Result<SessionTokens> {
    let access_exp = (Utc::now() + Duration::seconds(config.access_ttl_seconds)).timestamp();
    let refresh_exp = (Utc::now() + Duration::seconds(config.refresh_ttl_seconds)).timestamp();

    let access_token = sign(
        config,
        SessionClaims {
            sub: user_id.to_string(),
            org_id: org_id.to_string(),
            role: role.as_str().to_string(),
            token_use: "access".to_string(),
            exp: as_exp(access_exp)?,
        },
    )?;
    let refresh_token = sign(
        config,
        SessionClaims {
            sub: user_id.to_string(),
            org_id: org_id.to_string(),
            role: role.as_str().to_string(),
            token_use: "refresh".to_string(),
            exp: as_exp(refresh_exp)?,
        },
    )?;

    Ok(SessionTokens {
        access_token,
        refresh_token,
        expires_at: access_exp,
        expires_in: config.access_ttl_seconds,
    })
}

pub fn verify_access_token(config: &Config, token: &str) -> Result<SessionClaims> {
    let decoded = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|err| Error::Unauthorized(format!("Invalid token: {}", err)))?;
    if decoded.claims.token_use != "access" {
        return Err(Error::Unauthorized(
            "Refresh token cannot be used for access".to_string(),
        ));
    }
    Ok(decoded.claims)
}

fn sign(config: &Config, claims: SessionClaims) -> Result<String> {
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|err| Error::Storage(format!("Failed to encode JWT: {}", err)))
}

fn as_exp(timestamp: i64) -> Result<usize> {
    usize::try_from(timestamp)
        .map_err(|_| Error::Storage("Failed to encode token expiration".to_string()))
}
