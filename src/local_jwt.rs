//! Locally signed HMAC tokens.
//!
//! Issue and validate share the same precondition check (enabled flag, non-empty
//! key, one of HS256/HS384/HS512) so a caller can tell "feature off" apart from
//! "misconfigured". Verification is handed exactly one algorithm, the configured
//! one, so a token signed with anything else never verifies.

use crate::{config::LocalJwtConfig, error::ErrorKind, now_unix};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind as JwtErrorKind, Algorithm,
    DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{error, instrument};

pub type Claims = Map<String, Value>;

#[derive(Debug, Error)]
pub enum LocalJwtError {
    #[error("local JWT authentication is not enabled in the configuration")]
    NotEnabled,
    #[error("JWT signing key is not configured")]
    KeyMissing,
    #[error("JWT signing method is not configured or invalid: {0:?}")]
    MethodInvalid(String),
    #[error("error signing token: {0}")]
    Sign(String),
    #[error("token expired")]
    Expired,
    #[error("invalid signature")]
    SignatureInvalid,
    #[error("malformed token: {0}")]
    MalformedClaims(String),
    #[error("token claims are empty")]
    Empty,
}

impl LocalJwtError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotEnabled | Self::KeyMissing | Self::MethodInvalid(_) | Self::Sign(_) => {
                ErrorKind::Configuration
            }
            Self::Expired | Self::SignatureInvalid | Self::MalformedClaims(_) | Self::Empty => {
                ErrorKind::Token
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalJwt {
    config: LocalJwtConfig,
}

impl LocalJwt {
    #[must_use]
    pub fn new(config: LocalJwtConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Resolve the signing algorithm and key from the configuration.
    /// # Errors
    /// [`LocalJwtError::NotEnabled`], [`LocalJwtError::KeyMissing`] or
    /// [`LocalJwtError::MethodInvalid`], checked in that order.
    pub fn check(&self) -> Result<(Algorithm, &[u8]), LocalJwtError> {
        if !self.config.enabled {
            return Err(LocalJwtError::NotEnabled);
        }

        let key = self
            .config
            .signing_key
            .as_ref()
            .map(|k| k.expose_secret().as_bytes())
            .filter(|k| !k.is_empty())
            .ok_or(LocalJwtError::KeyMissing)?;

        let algorithm = match self.config.signing_method.as_str() {
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            other => return Err(LocalJwtError::MethodInvalid(other.to_string())),
        };

        Ok((algorithm, key))
    }

    /// Sign `claims`, adding `iat` and, when configured, `exp`.
    /// # Errors
    /// Configuration errors from [`LocalJwt::check`] or [`LocalJwtError::Sign`].
    pub fn issue(&self, claims: &Claims) -> Result<String, LocalJwtError> {
        self.issue_at(claims, now_unix())
    }

    /// Same as [`LocalJwt::issue`] with an explicit issued-at time (unix seconds).
    /// # Errors
    /// Configuration errors from [`LocalJwt::check`] or [`LocalJwtError::Sign`].
    #[instrument(skip(self, claims))]
    pub fn issue_at(&self, claims: &Claims, issued_at: i64) -> Result<String, LocalJwtError> {
        let (algorithm, key) = self.check().inspect_err(|e| {
            error!("Local JWT checks failed for token creation: {e}");
        })?;

        let mut token_claims = claims.clone();
        token_claims.insert("iat".to_string(), Value::from(issued_at));
        if self.config.expiration_minutes > 0 {
            let exp = issued_at.saturating_add(self.config.expiration_minutes.saturating_mul(60));
            token_claims.insert("exp".to_string(), Value::from(exp));
        }

        encode(
            &Header::new(algorithm),
            &token_claims,
            &EncodingKey::from_secret(key),
        )
        .map_err(|e| {
            error!("Error signing token: {e}");
            LocalJwtError::Sign(e.to_string())
        })
    }

    /// Verify `token` and return its claims.
    /// # Errors
    /// Configuration errors from [`LocalJwt::check`], or `Expired`, `SignatureInvalid`,
    /// `MalformedClaims`, `Empty`.
    #[instrument(skip_all)]
    pub fn validate(&self, token: &str) -> Result<Claims, LocalJwtError> {
        let (algorithm, key) = self.check().inspect_err(|e| {
            error!("Local JWT checks failed for validation: {e}");
        })?;

        let mut validation = Validation::new(algorithm);
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();
        if self.config.expiration_minutes > 0 {
            validation.set_required_spec_claims(&["exp"]);
        }

        let token_data = decode::<Claims>(token, &DecodingKey::from_secret(key), &validation)
            .map_err(|e| match e.kind() {
                JwtErrorKind::ExpiredSignature => {
                    error!("JWT token has expired");
                    LocalJwtError::Expired
                }
                JwtErrorKind::InvalidSignature | JwtErrorKind::InvalidAlgorithm => {
                    error!("JWT token signature is invalid");
                    LocalJwtError::SignatureInvalid
                }
                _ => {
                    error!("Error parsing local JWT token: {e}");
                    LocalJwtError::MalformedClaims(e.to_string())
                }
            })?;

        if token_data.claims.is_empty() {
            error!("Token claims are empty");
            return Err(LocalJwtError::Empty);
        }

        Ok(token_data.claims)
    }
}
