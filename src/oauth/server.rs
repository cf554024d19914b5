//! Verification of bearer tokens issued by external identity providers.
//!
//! Keys are selected per issuer: the unverified `iss` claim picks the issuer, the
//! issuer's discovery document names its JWKS URL, and the header `kid` picks the
//! key. Key sets are fetched once and kept until [`InboundValidator::refresh`].

use crate::{
    config::InboundConfig, error::ErrorKind, local_jwt::Claims, oauth::unverified_payload,
};
use jsonwebtoken::{
    decode, decode_header, errors::ErrorKind as JwtErrorKind, jwk::JwkSet, Algorithm,
    DecodingKey, Validation,
};
use reqwest::Client;
use serde::Deserialize;
use std::{collections::HashMap, str::FromStr, sync::Arc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

const ASYMMETRIC_ALGORITHMS: [Algorithm; 8] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

#[derive(Debug, Error)]
pub enum InboundError {
    #[error("inbound OAuth validation is not enabled in the configuration")]
    NotEnabled,
    #[error("invalid inbound OAuth configuration: {0}")]
    InvalidConfiguration(String),
    #[error("unable to parse token: {0}")]
    Parse(String),
    #[error("issuer {0} is not trusted")]
    UntrustedIssuer(String),
    #[error("unable to resolve issuer {issuer}: {reason}")]
    IssuerUnresolvable { issuer: String, reason: String },
    #[error("unable to load key set for issuer {issuer}: {reason}")]
    KeySetUnavailable { issuer: String, reason: String },
    #[error("key {kid} not found for issuer {issuer}")]
    KeyNotFound { issuer: String, kid: String },
    #[error("unsupported signing algorithm {0}")]
    UnsupportedAlgorithm(String),
    #[error("token expired")]
    Expired,
    #[error("invalid signature")]
    SignatureInvalid,
    #[error("token claims rejected: {0}")]
    ClaimsInvalid(String),
    #[error("no bearer token presented")]
    MissingToken,
    #[error("authorization header is not of the form 'Bearer <token>'")]
    MalformedHeader,
    #[error("none of the required roles {0:?} granted")]
    Forbidden(Vec<String>),
}

impl InboundError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotEnabled | Self::InvalidConfiguration(_) => ErrorKind::Configuration,
            Self::IssuerUnresolvable { .. } | Self::KeySetUnavailable { .. } => {
                ErrorKind::Transport
            }
            Self::Parse(_)
            | Self::UntrustedIssuer(_)
            | Self::KeyNotFound { .. }
            | Self::UnsupportedAlgorithm(_)
            | Self::Expired
            | Self::SignatureInvalid
            | Self::ClaimsInvalid(_)
            | Self::MissingToken
            | Self::MalformedHeader
            | Self::Forbidden(_) => ErrorKind::Token,
        }
    }
}

/// A verified token together with the required roles it was granted.
#[derive(Debug, Clone)]
pub struct AuthorizedClaims {
    pub claims: Claims,
    pub roles: Vec<String>,
}

/// Take the token out of an `Authorization: Bearer <token>` header value.
fn bearer_token(authorization: Option<&str>) -> Result<&str, InboundError> {
    let value = authorization
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(InboundError::MissingToken)?;

    match value.split(' ').collect::<Vec<_>>().as_slice() {
        [scheme, token] if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() => {
            Ok(*token)
        }
        _ => Err(InboundError::MalformedHeader),
    }
}

/// Required roles present in the `roles` claim, in the order they were required.
fn granted_roles(claims: &Claims, required: &[&str]) -> Vec<String> {
    let held: Vec<&str> = claims
        .get("roles")
        .and_then(|roles| roles.as_array())
        .map(|roles| roles.iter().filter_map(|role| role.as_str()).collect())
        .unwrap_or_default();

    required
        .iter()
        .filter(|role| held.contains(*role))
        .map(|role| (*role).to_string())
        .collect()
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

#[derive(Debug)]
struct IssuerEntry {
    jwks_uri: String,
    key_set: RwLock<Option<Arc<JwkSet>>>,
}

#[derive(Debug)]
pub struct InboundValidator {
    enabled: bool,
    trusted_issuers: Vec<String>,
    audience: Option<String>,
    algorithms: Vec<Algorithm>,
    http: Client,
    issuers: RwLock<HashMap<String, Arc<IssuerEntry>>>,
}

impl InboundValidator {
    /// # Errors
    /// Returns [`InboundError::InvalidConfiguration`] for an unknown or symmetric algorithm name.
    pub fn new(config: &InboundConfig, http: Client) -> Result<Self, InboundError> {
        let algorithms = if config.allowed_algorithms.is_empty() {
            ASYMMETRIC_ALGORITHMS.to_vec()
        } else {
            config
                .allowed_algorithms
                .iter()
                .map(|name| {
                    Algorithm::from_str(name)
                        .ok()
                        .filter(|alg| ASYMMETRIC_ALGORITHMS.contains(alg))
                        .ok_or_else(|| {
                            InboundError::InvalidConfiguration(format!(
                                "algorithm {name} is not an allowed asymmetric algorithm"
                            ))
                        })
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        if config.enabled && config.trusted_issuers.is_empty() {
            warn!("No trusted issuers configured, key sets will be fetched for any issuer");
        }

        Ok(Self {
            enabled: config.enabled,
            trusted_issuers: config
                .trusted_issuers
                .iter()
                .map(|issuer| issuer.trim_end_matches('/').to_string())
                .collect(),
            audience: config.audience.clone(),
            algorithms,
            http,
            issuers: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Verify `token` against its issuer's key set and return its claims.
    /// # Errors
    /// Any [`InboundError`]; nothing is retried.
    #[instrument(skip_all)]
    pub async fn validate(&self, token: &str) -> Result<Claims, InboundError> {
        if !self.enabled {
            return Err(InboundError::NotEnabled);
        }

        let header = decode_header(token).map_err(|e| InboundError::Parse(e.to_string()))?;

        if !self.algorithms.contains(&header.alg) {
            error!(alg = ?header.alg, "Token signed with an unsupported algorithm");
            return Err(InboundError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let kid = header
            .kid
            .ok_or_else(|| InboundError::Parse("token header has no kid".to_string()))?;

        let issuer = unverified_payload(token)
            .and_then(|claims| claims.get("iss").and_then(|v| v.as_str()).map(str::to_string))
            .ok_or_else(|| InboundError::Parse("token has no iss claim".to_string()))?;

        if !self.is_trusted(&issuer) {
            error!(issuer = %issuer, "Token issuer is not trusted");
            return Err(InboundError::UntrustedIssuer(issuer));
        }

        let entry = self.entry(&issuer).await?;
        let key_set = self.key_set(&issuer, &entry).await?;

        let jwk = key_set.find(&kid).ok_or_else(|| {
            error!(issuer = %issuer, kid = %kid, "Signing key not found in key set");
            InboundError::KeyNotFound {
                issuer: issuer.clone(),
                kid: kid.clone(),
            }
        })?;

        let key = DecodingKey::from_jwk(jwk).map_err(|e| InboundError::KeySetUnavailable {
            issuer: issuer.clone(),
            reason: format!("key {kid} is unusable: {e}"),
        })?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = 0;
        validation.set_issuer(&[&issuer]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let token_data = decode::<Claims>(token, &key, &validation).map_err(|e| match e.kind() {
            JwtErrorKind::ExpiredSignature => InboundError::Expired,
            JwtErrorKind::InvalidIssuer
            | JwtErrorKind::InvalidAudience
            | JwtErrorKind::MissingRequiredClaim(_)
            | JwtErrorKind::ImmatureSignature => InboundError::ClaimsInvalid(e.to_string()),
            _ => InboundError::SignatureInvalid,
        })?;

        debug!(issuer = %issuer, kid = %kid, "Token verified");

        Ok(token_data.claims)
    }

    /// Check an `Authorization` header value before protected logic runs.
    ///
    /// The token must verify like in [`Self::validate`]. When `required_roles` is not
    /// empty, at least one of them must appear in the token's `roles` claim and the
    /// matching ones are returned.
    /// # Errors
    /// [`InboundError::MissingToken`], [`InboundError::MalformedHeader`],
    /// [`InboundError::Forbidden`] or any error of [`Self::validate`].
    #[instrument(skip_all)]
    pub async fn authorize(
        &self,
        authorization: Option<&str>,
        required_roles: &[&str],
    ) -> Result<AuthorizedClaims, InboundError> {
        let token =
            bearer_token(authorization).inspect_err(|e| warn!("Rejected request: {e}"))?;
        let claims = self.validate(token).await?;

        let roles = granted_roles(&claims, required_roles);
        if !required_roles.is_empty() && roles.is_empty() {
            warn!(required = ?required_roles, "Required role not found in token");
            return Err(InboundError::Forbidden(
                required_roles.iter().map(|role| (*role).to_string()).collect(),
            ));
        }

        Ok(AuthorizedClaims { claims, roles })
    }

    /// Fetch the key set of `issuer` again, replacing the cached one.
    ///
    /// The cached set is kept when the fetch fails.
    /// # Errors
    /// [`InboundError::IssuerUnresolvable`] or [`InboundError::KeySetUnavailable`].
    pub async fn refresh(&self, issuer: &str) -> Result<(), InboundError> {
        let entry = self.entry(issuer).await?;

        let mut key_set = entry.key_set.write().await;
        let fresh = self.fetch_key_set(issuer, &entry.jwks_uri).await?;
        info!(issuer = %issuer, keys = fresh.keys.len(), "Key set refreshed");
        *key_set = Some(Arc::new(fresh));

        Ok(())
    }

    /// Whether a key set for `issuer` has been fetched.
    pub async fn is_populated(&self, issuer: &str) -> bool {
        let entry = self.issuers.read().await.get(issuer).cloned();
        match entry {
            Some(entry) => entry.key_set.read().await.is_some(),
            None => false,
        }
    }

    fn is_trusted(&self, issuer: &str) -> bool {
        self.trusted_issuers.is_empty()
            || self
                .trusted_issuers
                .iter()
                .any(|trusted| trusted == issuer.trim_end_matches('/'))
    }

    async fn entry(&self, issuer: &str) -> Result<Arc<IssuerEntry>, InboundError> {
        if let Some(entry) = self.issuers.read().await.get(issuer) {
            return Ok(entry.clone());
        }

        let jwks_uri = self.discover(issuer).await?;

        let mut issuers = self.issuers.write().await;
        let entry = issuers.entry(issuer.to_string()).or_insert_with(|| {
            Arc::new(IssuerEntry {
                jwks_uri,
                key_set: RwLock::new(None),
            })
        });

        Ok(entry.clone())
    }

    async fn key_set(
        &self,
        issuer: &str,
        entry: &IssuerEntry,
    ) -> Result<Arc<JwkSet>, InboundError> {
        if let Some(key_set) = entry.key_set.read().await.as_ref() {
            return Ok(key_set.clone());
        }

        let mut slot = entry.key_set.write().await;
        if let Some(key_set) = slot.as_ref() {
            return Ok(key_set.clone());
        }

        let key_set = Arc::new(self.fetch_key_set(issuer, &entry.jwks_uri).await?);
        *slot = Some(key_set.clone());

        Ok(key_set)
    }

    async fn discover(&self, issuer: &str) -> Result<String, InboundError> {
        let url = format!("{}{DISCOVERY_PATH}", issuer.trim_end_matches('/'));
        let unresolvable = |reason: String| {
            error!(issuer = %issuer, "Unable to resolve issuer: {reason}");
            InboundError::IssuerUnresolvable {
                issuer: issuer.to_string(),
                reason,
            }
        };

        let span = info_span!("oauth.discovery", http.method = "GET", url = %url);
        let response = self
            .http
            .get(&url)
            .send()
            .instrument(span)
            .await
            .map_err(|e| unresolvable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unresolvable(format!("{url} returned {}", response.status())));
        }

        let document: DiscoveryDocument = response
            .json()
            .await
            .map_err(|e| unresolvable(e.to_string()))?;

        debug!(issuer = %issuer, jwks_uri = %document.jwks_uri, "Issuer discovered");

        Ok(document.jwks_uri)
    }

    async fn fetch_key_set(&self, issuer: &str, jwks_uri: &str) -> Result<JwkSet, InboundError> {
        let unavailable = |reason: String| {
            error!(issuer = %issuer, "Unable to load key set: {reason}");
            InboundError::KeySetUnavailable {
                issuer: issuer.to_string(),
                reason,
            }
        };

        let span = info_span!("oauth.jwks", http.method = "GET", url = %jwks_uri);
        let response = self
            .http
            .get(jwks_uri)
            .send()
            .instrument(span)
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unavailable(format!(
                "{jwks_uri} returned {}",
                response.status()
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| unavailable(e.to_string()))
    }
}
