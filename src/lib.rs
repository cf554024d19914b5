//! # Custodian
//!
//! Credential lifecycle for a backend service:
//!
//! - **Local tokens** ([`local_jwt`]): HMAC-signed JWTs issued and verified in-process.
//! - **Outbound tokens** ([`oauth::client`]): one OAuth2 access token per configured
//!   external identity, renewed in the background before it expires.
//! - **Inbound tokens** ([`oauth::server`]): bearer tokens from external identity
//!   providers, verified against the issuer's discovered JWKS.
//! - **Secrets** ([`vault`]): client credentials read from Vault instead of the config file.
//!
//! [`Custodian`] owns all of them. Build it once at startup, pass it by handle, and
//! call [`Custodian::shutdown`] before exiting so every renewal task stops cleanly.

pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod local_jwt;
pub mod oauth;
pub mod vault;

use crate::{
    config::Config,
    local_jwt::LocalJwt,
    oauth::{InboundValidator, ManagerOptions, TokenManager},
    vault::VaultResolver,
};
use anyhow::{Context, Result};
use jsonwebtoken::get_current_timestamp;
use std::sync::Arc;
use tracing::{debug, info};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Current unix time in seconds.
pub(crate) fn now_unix() -> i64 {
    i64::try_from(get_current_timestamp()).unwrap_or(i64::MAX)
}

#[derive(Debug)]
pub struct Custodian {
    secrets: Arc<VaultResolver>,
    local: LocalJwt,
    outbound: TokenManager,
    inbound: InboundValidator,
}

impl Custodian {
    /// Build every component from `config` and start the outbound renewal tasks.
    /// # Errors
    /// Returns an error if the HTTP or Vault clients cannot be built, or if an enabled
    /// feature is misconfigured.
    pub async fn new(config: &Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let http = http::client()?;

        let secrets = Arc::new(
            VaultResolver::new(&config.vault).context("Invalid Vault configuration")?,
        );

        let local = LocalJwt::new(config.auth.server.local_jwt.clone());
        if local.is_enabled() {
            let (algorithm, _) = local.check().context("Invalid local JWT configuration")?;
            debug!(?algorithm, "Local JWT enabled");
        }

        let inbound = InboundValidator::new(&config.auth.server.oauth, http.clone())
            .context("Invalid inbound OAuth configuration")?;

        let outbound = TokenManager::start(
            &config.auth.client.oauth,
            secrets.clone(),
            http,
            ManagerOptions {
                policy: config.auth.client.resolution_policy,
                ..ManagerOptions::default()
            },
        )
        .await;

        info!(
            identities = config.auth.client.oauth.len(),
            vault = secrets.is_enabled(),
            local_jwt = local.is_enabled(),
            inbound = inbound.is_enabled(),
            "Credential manager started"
        );

        Ok(Self {
            secrets,
            local,
            outbound,
            inbound,
        })
    }

    #[must_use]
    pub fn secrets(&self) -> &VaultResolver {
        &self.secrets
    }

    #[must_use]
    pub fn local(&self) -> &LocalJwt {
        &self.local
    }

    #[must_use]
    pub fn outbound(&self) -> &TokenManager {
        &self.outbound
    }

    #[must_use]
    pub fn inbound(&self) -> &InboundValidator {
        &self.inbound
    }

    /// Stop every renewal task and wait for them to exit.
    pub async fn shutdown(&self) {
        self.outbound.shutdown().await;
        info!("Credential manager stopped");
    }
}
