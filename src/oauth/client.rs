//! Outbound access tokens, one renewal task per configured identity.

use crate::{
    config::{ClientTokenConfig, ResolutionPolicy},
    error::ErrorKind,
    now_unix,
    oauth::{
        renew::{RenewalTask, RETRY_BACKOFF},
        unverified_payload,
    },
    vault::{SecretError, VaultResolver},
};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    sync::{watch, Mutex},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned status {status}")]
    Status { endpoint: String, status: StatusCode },
    #[error("invalid token response from {endpoint}: {reason}")]
    Protocol { endpoint: String, reason: String },
}

impl FetchError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Status { .. } | Self::Protocol { .. } => ErrorKind::Protocol,
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error("OAuth client config {id} is incomplete: missing {missing}")]
    Incomplete { id: String, missing: &'static str },
}

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("found no OAuth client config {0}")]
    UnknownIdentity(String),
    #[error("credentials for OAuth client config {0} are not resolved")]
    Unresolved(String),
    #[error("token unavailable for OAuth client config {id}")]
    TokenUnavailable {
        id: String,
        #[source]
        source: FetchError,
    },
}

impl OutboundError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownIdentity(_) | Self::Unresolved(_) => ErrorKind::Configuration,
            Self::TokenUnavailable { source, .. } => source.kind(),
        }
    }
}

/// Credential material for one identity after secret resolution. Never mutated.
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    pub id: String,
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: Option<SecretString>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub scope: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: SecretString,
    /// Unix seconds, when known.
    pub expires_at: Option<i64>,
}

/// What readers of an identity's slot see. Only the identity's renewal task writes it.
#[derive(Debug, Clone, Default)]
pub(crate) struct Snapshot {
    pub(crate) credential: Option<Arc<ResolvedCredential>>,
    pub(crate) token: Option<AccessToken>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityStatus {
    pub resolved: bool,
    pub cached: bool,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct IdpTokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Read `exp` from a JWT payload **without verifying its signature**.
///
/// Trust boundary: the token comes straight from the identity provider's token
/// endpoint over the provider's own transport, so its self-reported expiry is only
/// used to schedule renewal. It is never used to authorize anything.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn unverified_expiry(token: &str) -> Option<i64> {
    let claims = unverified_payload(token)?;
    let exp = claims.get("exp")?;

    exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64))
}

/// Resolve the credential set for `config`, from Vault when a path is configured.
///
/// A disabled Vault is not fatal: the static fields are used instead.
/// # Errors
/// Returns an error if Vault fails for a configured path or the result is incomplete.
pub async fn resolve(
    config: &ClientTokenConfig,
    resolver: &VaultResolver,
) -> Result<ResolvedCredential, ResolveError> {
    let secrets = match config.vault_path.as_deref().filter(|p| !p.is_empty()) {
        Some(path) => match resolver.get_secrets(path).await {
            Ok(secrets) => secrets,
            Err(SecretError::NotEnabled) => {
                warn!(
                    config_id = %config.id,
                    "Vault not enabled, using static OAuth client configuration"
                );
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        },
        None => HashMap::new(),
    };

    let from_vault = |key: &Option<String>| {
        key.as_deref()
            .and_then(|k| secrets.get(k))
            .filter(|v| !v.is_empty())
            .cloned()
    };

    let token_endpoint = from_vault(&config.vault_token_endpoint_key)
        .unwrap_or_else(|| config.token_endpoint.clone());
    let client_id =
        from_vault(&config.vault_client_id_key).unwrap_or_else(|| config.client_id.clone());
    let client_secret = from_vault(&config.vault_client_secret_key)
        .map(SecretString::from)
        .or_else(|| config.client_secret.clone());
    let username = from_vault(&config.vault_username_key)
        .or_else(|| config.username.clone())
        .filter(|u| !u.is_empty());
    let password = from_vault(&config.vault_password_key)
        .map(SecretString::from)
        .or_else(|| config.password.clone())
        .filter(|p| !p.expose_secret().is_empty());

    let incomplete = |missing| ResolveError::Incomplete {
        id: config.id.clone(),
        missing,
    };

    if token_endpoint.is_empty() {
        return Err(incomplete("token_endpoint"));
    }
    if client_id.is_empty() {
        return Err(incomplete("client_id"));
    }
    match (&username, &password) {
        (Some(_), None) => return Err(incomplete("password")),
        (None, Some(_)) => return Err(incomplete("username")),
        _ => {}
    }

    Ok(ResolvedCredential {
        id: config.id.clone(),
        token_endpoint,
        client_id,
        client_secret,
        username,
        password,
        scope: config.scope.clone(),
    })
}

/// Request a token from the identity provider.
///
/// Uses the password grant when a resource owner is configured, client credentials otherwise.
/// # Errors
/// Returns [`FetchError`] on network failure, a non-200 status or a malformed body.
pub async fn fetch_token(
    http: &Client,
    credential: &ResolvedCredential,
) -> Result<AccessToken, FetchError> {
    let endpoint = credential.token_endpoint.as_str();

    let mut form: Vec<(&str, &str)> = vec![("client_id", credential.client_id.as_str())];
    if let Some(secret) = &credential.client_secret {
        form.push(("client_secret", secret.expose_secret()));
    }
    match (&credential.username, &credential.password) {
        (Some(username), Some(password)) => {
            form.push(("username", username.as_str()));
            form.push(("password", password.expose_secret()));
            form.push(("grant_type", "password"));
        }
        _ => form.push(("grant_type", "client_credentials")),
    }
    if let Some(scope) = &credential.scope {
        form.push(("scope", scope.as_str()));
    }

    let span = info_span!(
        "oauth.token",
        http.method = "POST",
        url = %endpoint,
        config_id = %credential.id
    );
    let response = http
        .post(endpoint)
        .form(&form)
        .send()
        .instrument(span)
        .await
        .map_err(|source| FetchError::Transport {
            endpoint: endpoint.to_string(),
            source,
        })?;

    if response.status() != StatusCode::OK {
        return Err(FetchError::Status {
            endpoint: endpoint.to_string(),
            status: response.status(),
        });
    }

    let body: IdpTokenResponse = response.json().await.map_err(|e| FetchError::Protocol {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;

    if body.access_token.is_empty() {
        return Err(FetchError::Protocol {
            endpoint: endpoint.to_string(),
            reason: "empty access_token".to_string(),
        });
    }

    // A non-positive lifetime says nothing about expiry.
    let expires_at = unverified_expiry(&body.access_token).or_else(|| {
        body.expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| now_unix().saturating_add(secs))
    });

    Ok(AccessToken {
        value: SecretString::from(body.access_token),
        expires_at,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct ManagerOptions {
    pub policy: ResolutionPolicy,
    /// Wait after a failed fetch or resolution before trying again.
    pub retry_backoff: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            policy: ResolutionPolicy::FailFast,
            retry_backoff: RETRY_BACKOFF,
        }
    }
}

#[derive(Default)]
struct Supervisor {
    pending: Vec<RenewalTask>,
    running: JoinSet<()>,
}

/// Holds every outbound identity and serves their latest tokens.
pub struct TokenManager {
    http: Client,
    slots: HashMap<String, watch::Receiver<Snapshot>>,
    cancel: CancellationToken,
    supervisor: Mutex<Supervisor>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("identities", &self.slots.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Resolve every identity and start its renewal task.
    pub async fn start(
        configs: &[ClientTokenConfig],
        resolver: Arc<VaultResolver>,
        http: Client,
        options: ManagerOptions,
    ) -> Self {
        let manager = Self::new(configs, resolver, http, options).await;
        manager.spawn_renewals().await;
        manager
    }

    /// Resolve every identity without starting any renewal task.
    ///
    /// Identities that fail to resolve are dropped for good under
    /// [`ResolutionPolicy::FailFast`] and handed to their task to retry under
    /// [`ResolutionPolicy::Retry`].
    pub async fn new(
        configs: &[ClientTokenConfig],
        resolver: Arc<VaultResolver>,
        http: Client,
        options: ManagerOptions,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut slots = HashMap::new();
        let mut pending = Vec::new();

        for config in configs {
            let (tx, rx) = watch::channel(Snapshot::default());
            slots.insert(config.id.clone(), rx);

            match resolve(config, &resolver).await {
                Ok(credential) => {
                    debug!(config_id = %config.id, "OAuth client credentials resolved");
                    tx.send_replace(Snapshot {
                        credential: Some(Arc::new(credential)),
                        token: None,
                    });
                }
                Err(e) => match options.policy {
                    ResolutionPolicy::FailFast => {
                        error!(
                            config_id = %config.id,
                            "Unable to resolve OAuth client credentials, identity disabled: {e}"
                        );
                        continue;
                    }
                    ResolutionPolicy::Retry => {
                        warn!(
                            config_id = %config.id,
                            "Unable to resolve OAuth client credentials, will retry: {e}"
                        );
                    }
                },
            }

            pending.push(RenewalTask {
                config: config.clone(),
                resolver: resolver.clone(),
                http: http.clone(),
                tx,
                cancel: cancel.child_token(),
                backoff: options.retry_backoff,
            });
        }

        Self {
            http,
            slots,
            cancel,
            supervisor: Mutex::new(Supervisor {
                pending,
                running: JoinSet::new(),
            }),
        }
    }

    /// Spawn the renewal tasks prepared by [`TokenManager::new`]. Idempotent.
    pub async fn spawn_renewals(&self) {
        let mut supervisor = self.supervisor.lock().await;
        for task in std::mem::take(&mut supervisor.pending) {
            supervisor.running.spawn(task.run());
        }
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    #[must_use]
    pub fn status(&self, id: &str) -> Option<IdentityStatus> {
        self.slots.get(id).map(|rx| {
            let snapshot = rx.borrow();
            IdentityStatus {
                resolved: snapshot.credential.is_some(),
                cached: snapshot.token.is_some(),
                expires_at: snapshot.token.as_ref().and_then(|t| t.expires_at),
            }
        })
    }

    /// Latest token for `id`; on a cache miss, one synchronous fetch whose result is
    /// returned but not cached.
    /// # Errors
    /// - [`OutboundError::UnknownIdentity`] if `id` is not configured.
    /// - [`OutboundError::Unresolved`] if its credentials never resolved.
    /// - [`OutboundError::TokenUnavailable`] if the fallback fetch failed.
    pub async fn token(&self, id: &str) -> Result<SecretString, OutboundError> {
        let Some(rx) = self.slots.get(id) else {
            error!(config_id = %id, "Found no OAuth client config");
            return Err(OutboundError::UnknownIdentity(id.to_string()));
        };

        let (cached, credential) = {
            let snapshot = rx.borrow();
            (snapshot.token.clone(), snapshot.credential.clone())
        };

        if let Some(token) = cached {
            return Ok(token.value);
        }

        error!(config_id = %id, "No token in local cache");

        let credential = credential.ok_or_else(|| OutboundError::Unresolved(id.to_string()))?;

        fetch_token(&self.http, &credential)
            .await
            .map(|token| token.value)
            .map_err(|source| {
                error!(config_id = %id, "Unable to retrieve OAuth2 token from IDP: {source}");
                OutboundError::TokenUnavailable {
                    id: id.to_string(),
                    source,
                }
            })
    }

    /// Signal every renewal task and wait for all of them to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let mut supervisor = self.supervisor.lock().await;
        supervisor.pending.clear();
        while let Some(result) = supervisor.running.join_next().await {
            if let Err(e) = result {
                error!("Renewal task ended abnormally: {e}");
            }
        }

        debug!("All renewal tasks stopped");
    }
}

impl Drop for TokenManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
