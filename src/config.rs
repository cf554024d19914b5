//! YAML configuration.
//!
//! The file mirrors the platform layout the services have always used:
//!
//! ```yaml
//! auth:
//!   server:
//!     oauth: { enabled: true, trusted_issuers: ["https://idp.tld/realms/main"] }
//!     local_jwt: { enabled: true, signing_key: "...", signing_method: HS256 }
//!   client:
//!     resolution_policy: fail-fast
//!     oauth:
//!       - id: billing
//!         token_endpoint: https://idp.tld/realms/main/protocol/openid-connect/token
//!         client_id: billing
//!         client_secret: "..."
//! vault:
//!   enabled: false
//! ```
//!
//! A missing file is not an error: every feature defaults to disabled.

use anyhow::{anyhow, Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::{collections::HashSet, fs, io::ErrorKind, path::Path, time::Duration};
use tracing::{debug, info};

pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub auth: AuthConfig,
    pub vault: VaultConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub server: ServerAuthConfig,
    pub client: ClientAuthConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerAuthConfig {
    pub oauth: InboundConfig,
    pub local_jwt: LocalJwtConfig,
}

/// Inbound bearer-token verification against external identity providers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InboundConfig {
    pub enabled: bool,
    /// Issuers whose key sets may be fetched. Empty accepts any issuer.
    pub trusted_issuers: Vec<String>,
    /// Expected `aud`; not checked when unset.
    pub audience: Option<String>,
    /// Subset of RS256/384/512, PS256/384/512, ES256/384. Empty allows all of them.
    pub allowed_algorithms: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LocalJwtConfig {
    pub enabled: bool,
    pub signing_key: Option<SecretString>,
    /// HS256, HS384 or HS512
    pub signing_method: String,
    /// Token lifetime; zero or negative issues tokens without `exp`.
    pub expiration_minutes: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientAuthConfig {
    pub resolution_policy: ResolutionPolicy,
    pub oauth: Vec<ClientTokenConfig>,
}

/// What to do when an identity's credentials cannot be resolved at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionPolicy {
    /// Log the failure and never start the identity's renewal task.
    #[default]
    FailFast,
    /// Start the renewal task anyway and keep retrying resolution with backoff.
    Retry,
}

impl std::str::FromStr for ResolutionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail-fast" => Ok(Self::FailFast),
            "retry" => Ok(Self::Retry),
            _ => Err(format!("invalid resolution policy: {s}")),
        }
    }
}

/// One external identity needing an outbound access token.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientTokenConfig {
    pub id: String,
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: Option<SecretString>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub scope: Option<String>,
    pub renew_check_interval_seconds: u64,
    pub renew_lead_time_minutes: u64,
    pub vault_path: Option<String>,
    pub vault_client_id_key: Option<String>,
    pub vault_client_secret_key: Option<String>,
    pub vault_username_key: Option<String>,
    pub vault_password_key: Option<String>,
    pub vault_token_endpoint_key: Option<String>,
}

impl Default for ClientTokenConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            token_endpoint: String::new(),
            client_id: String::new(),
            client_secret: None,
            username: None,
            password: None,
            scope: None,
            renew_check_interval_seconds: 30,
            renew_lead_time_minutes: 5,
            vault_path: None,
            vault_client_id_key: None,
            vault_client_secret_key: None,
            vault_username_key: None,
            vault_password_key: None,
            vault_token_endpoint_key: None,
        }
    }
}

impl ClientTokenConfig {
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.renew_check_interval_seconds)
    }

    #[must_use]
    pub fn lead_time(&self) -> Duration {
        Duration::from_secs(self.renew_lead_time_minutes.saturating_mul(60))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub enabled: bool,
    pub address_list: Vec<String>,
    pub insecure_skip_verify: bool,
    /// PEM file with the CA used to verify Vault.
    pub ca_cert: Option<String>,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    /// Addresses point at a local Vault Agent that authenticates on our behalf.
    pub is_local_agent: bool,
    pub token: VaultTokenAuth,
    pub cert: VaultCertAuth,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address_list: Vec::new(),
            insecure_skip_verify: false,
            ca_cert: None,
            timeout_seconds: 30,
            max_retries: 2,
            is_local_agent: false,
            token: VaultTokenAuth::default(),
            cert: VaultCertAuth::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VaultTokenAuth {
    pub enabled: bool,
    /// File holding the token; takes precedence over `token`.
    pub token_path: Option<String>,
    pub token: Option<SecretString>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VaultCertAuth {
    pub enabled: bool,
    pub cert_file: String,
    pub key_file: String,
}

impl Config {
    /// Load the configuration from `path`, falling back to defaults when the file does not exist.
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid YAML or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let config = match fs::read_to_string(path) {
            Ok(contents) => Self::from_yaml(&contents)
                .with_context(|| format!("Invalid configuration file {}", path.display()))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "Configuration file not found, using defaults"
                );
                Self::default()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Unable to read configuration {}", path.display()))
            }
        };

        config.validate()?;

        debug!(
            clients = config.auth.client.oauth.len(),
            vault = config.vault.enabled,
            local_jwt = config.auth.server.local_jwt.enabled,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// # Errors
    /// Returns an error if `contents` is not a valid configuration document.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// # Errors
    /// Returns an error describing the first inconsistency found.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for client in &self.auth.client.oauth {
            if client.id.is_empty() {
                return Err(anyhow!("OAuth client config without id"));
            }
            if !ids.insert(client.id.as_str()) {
                return Err(anyhow!("Duplicate OAuth client config id: {}", client.id));
            }
            if client.renew_check_interval_seconds == 0 {
                return Err(anyhow!(
                    "OAuth client config {}: renew_check_interval_seconds must be positive",
                    client.id
                ));
            }
        }

        if self.vault.enabled && self.vault.address_list.is_empty() {
            return Err(anyhow!("Vault is enabled but address_list is empty"));
        }

        Ok(())
    }
}
