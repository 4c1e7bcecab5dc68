//! Credential verification at the edge of the server.
//!
//! Everything downstream of this module trusts the [`Identity`] it
//! produces. User IDs are only ever taken from a verified token's `sub`
//! claim, never from request bodies or frames.

use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use courier_shared::{OnlineUser, UserId};
use courier_store::User;

use crate::config::ServerConfig;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingHeader,

    #[error("invalid authorization header format")]
    MalformedHeader,

    #[error("missing token query parameter")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("token has no subject")]
    MissingSubject,

    #[error("no JWT key configured (set JWT_PUBLIC_KEY or JWT_SECRET)")]
    NoKeyMaterial,
}

/// Claims carried by access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: String,
    pub exp: u64,
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub name: String,
    pub email: String,
    pub role: String,
}

impl Identity {
    /// Presence record published while this identity is connected.
    pub fn presence(&self) -> OnlineUser {
        OnlineUser {
            id: self.user_id.clone(),
            name: self.name.clone(),
            role: self.role.clone(),
        }
    }

    /// User directory entry refreshed when this identity connects.
    pub fn directory_entry(&self) -> User {
        User {
            id: self.user_id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
        }
    }
}

/// Verifies access tokens against one configured key.
#[derive(Clone)]
pub struct Authenticator {
    key: DecodingKey,
    validation: Validation,
}

impl Authenticator {
    /// RS256 verification with a PEM-encoded public key.
    pub fn rs256_pem(pem: &str) -> Result<Self, AuthError> {
        Ok(Self {
            key: DecodingKey::from_rsa_pem(pem.as_bytes())?,
            validation: Validation::new(Algorithm::RS256),
        })
    }

    /// HS256 verification with a shared secret.
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Prefer the public key when both are configured.
    pub fn from_config(config: &ServerConfig) -> Result<Self, AuthError> {
        if let Some(pem) = &config.jwt_public_key {
            return Self::rs256_pem(pem);
        }
        if let Some(secret) = &config.jwt_secret {
            return Ok(Self::hs256(secret.as_bytes()));
        }
        Err(AuthError::NoKeyMaterial)
    }

    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)?;
        let claims = data.claims;
        if claims.sub.is_empty() {
            return Err(AuthError::MissingSubject);
        }
        Ok(Identity {
            user_id: UserId(claims.sub),
            name: claims.name,
            email: claims.email,
            role: claims.role,
        })
    }

    /// Verify the `Authorization: Bearer` header of a REST request.
    pub fn verify_headers(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        self.verify(bearer_token(headers)?)
    }

    /// Verify the `token` query parameter of a WebSocket upgrade.
    pub fn verify_query(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        match token {
            Some(t) if !t.is_empty() => self.verify(t),
            _ => Err(AuthError::MissingToken),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get("authorization")
        .ok_or(AuthError::MissingHeader)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Ok(token),
        _ => Err(AuthError::MalformedHeader),
    }
}
