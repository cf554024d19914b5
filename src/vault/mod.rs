//! Secret resolution against one or more Vault nodes.

use crate::{
    config::VaultConfig,
    error::ErrorKind,
    APP_USER_AGENT,
};
use anyhow::{anyhow, Result};
use reqwest::{Certificate, Client, Identity, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::{collections::HashMap, fs, time::Duration};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info_span, instrument, warn, Instrument};
use url::Url;

const CERT_LOGIN_PATH: &str = "/v1/auth/cert/login";

const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(250);
const RETRY_BACKOFF_MAX: Duration = Duration::from_millis(1500);

/// Exponential wait before retry `attempt` (1-based), capped at [`RETRY_BACKOFF_MAX`].
fn retry_backoff(attempt: u32) -> Duration {
    RETRY_BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(RETRY_BACKOFF_MAX)
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("vault not enabled")]
    NotEnabled,
    #[error("no auth methods configured for vault")]
    AuthMethodMissing,
    #[error("unable to read secrets from vault path {0}")]
    ReadFailed(String),
    #[error("vault client setup failed: {0}")]
    Client(String),
}

impl SecretError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotEnabled | Self::AuthMethodMissing | Self::Client(_) => {
                ErrorKind::Configuration
            }
            Self::ReadFailed(_) => ErrorKind::Transport,
        }
    }
}

fn vault_error_message(json_response: &Value) -> &str {
    json_response
        .get("errors")
        .and_then(|v| v.get(0))
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// # Errors
/// Returns an error if `url` cannot be parsed, has no host, or uses an unsupported scheme.
pub fn endpoint_url(url: &str, path: &str) -> Result<String> {
    let url = Url::parse(url)?;

    let scheme = url.scheme();

    let host = url
        .host()
        .ok_or_else(|| anyhow!("Error parsing URL: no host specified"))?
        .to_owned();

    let port = match url.port() {
        Some(p) => p,
        None => match scheme {
            "http" => 80,
            "https" => 443,
            _ => return Err(anyhow!("Error parsing URL: unsupported scheme {scheme}")),
        },
    };

    Ok(format!("{scheme}://{host}:{port}{path}"))
}

/// Pull string secrets out of a read response. KV v2 nests them one level deeper.
fn secrets_from_response(json_response: &Value) -> HashMap<String, String> {
    let Some(data) = json_response.get("data") else {
        return HashMap::new();
    };

    let data = match data.get("data") {
        Some(inner) if inner.is_object() => inner,
        _ => data,
    };

    data.as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

enum VaultAuth {
    Token(SecretString),
    Cert,
    /// A local Vault Agent adds its auto-auth token to every request.
    Agent,
    Missing,
}

struct VaultNode {
    address: String,
    client: Client,
}

pub struct VaultResolver {
    enabled: bool,
    auth: VaultAuth,
    nodes: Vec<VaultNode>,
    max_retries: u32,
}

impl std::fmt::Debug for VaultResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let auth = match self.auth {
            VaultAuth::Token(_) => "token",
            VaultAuth::Cert => "cert",
            VaultAuth::Agent => "agent",
            VaultAuth::Missing => "none",
        };
        f.debug_struct("VaultResolver")
            .field("enabled", &self.enabled)
            .field("auth", &auth)
            .field(
                "addresses",
                &self.nodes.iter().map(|n| n.address.as_str()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl VaultResolver {
    /// A resolver that answers every lookup with [`SecretError::NotEnabled`].
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            auth: VaultAuth::Missing,
            nodes: Vec::new(),
            max_retries: 0,
        }
    }

    /// Build one HTTP client per configured address.
    ///
    /// Token auth wins over cert auth; the client certificate is only loaded when cert
    /// auth is the method in use.
    /// # Errors
    /// Returns [`SecretError::Client`] if a token file, CA or client certificate cannot be loaded.
    pub fn new(config: &VaultConfig) -> Result<Self, SecretError> {
        if !config.enabled {
            return Ok(Self::disabled());
        }

        let auth = if config.token.enabled {
            VaultAuth::Token(load_token(config)?)
        } else if config.cert.enabled {
            VaultAuth::Cert
        } else if config.is_local_agent {
            VaultAuth::Agent
        } else {
            VaultAuth::Missing
        };

        let identity = match auth {
            VaultAuth::Cert => Some(load_identity_pem(config)?),
            _ => None,
        };

        let nodes = config
            .address_list
            .iter()
            .map(|address| {
                Ok(VaultNode {
                    address: address.clone(),
                    client: build_client(config, identity.as_deref())
                        .map_err(|e| SecretError::Client(e.to_string()))?,
                })
            })
            .collect::<Result<Vec<_>, SecretError>>()?;

        debug!(
            addresses = nodes.len(),
            local_agent = config.is_local_agent,
            "Created Vault clients"
        );

        Ok(Self {
            enabled: true,
            auth,
            nodes,
            max_retries: config.max_retries,
        })
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Read the secrets stored at `path`, trying every node in order.
    /// # Errors
    /// - [`SecretError::NotEnabled`] when Vault is disabled.
    /// - [`SecretError::AuthMethodMissing`] when neither token nor cert auth is configured.
    /// - [`SecretError::ReadFailed`] when no node returned a non-empty secret set.
    #[instrument(skip(self))]
    pub async fn get_secrets(&self, path: &str) -> Result<HashMap<String, String>, SecretError> {
        if !self.enabled {
            return Err(SecretError::NotEnabled);
        }

        for node in &self.nodes {
            let token = match &self.auth {
                VaultAuth::Token(token) => Some(token.clone()),
                VaultAuth::Agent => None,
                VaultAuth::Cert => match self.cert_login(node).await {
                    Ok(token) => Some(token),
                    Err(e) => {
                        error!(address = %node.address, "Error logging in to Vault with cert: {e}");
                        continue;
                    }
                },
                VaultAuth::Missing => return Err(SecretError::AuthMethodMissing),
            };

            match self.read(node, token.as_ref(), path).await {
                Ok(secrets) if !secrets.is_empty() => return Ok(secrets),
                Ok(_) => {
                    error!(address = %node.address, "Result from retrieving secret from Vault is empty");
                }
                Err(e) => {
                    error!(address = %node.address, "Error retrieving secret: {e}");
                }
            }
        }

        Err(SecretError::ReadFailed(path.to_string()))
    }

    async fn cert_login(&self, node: &VaultNode) -> Result<SecretString> {
        let login_url = endpoint_url(&node.address, CERT_LOGIN_PATH)?;

        let span = info_span!("vault.cert_login", http.method = "POST", url = %login_url);
        let response = self
            .send(|| node.client.post(&login_url))
            .instrument(span)
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let json_response: Value = response.json().await.unwrap_or_default();

            return Err(anyhow!(
                "{} - {}, {}",
                login_url,
                status,
                vault_error_message(&json_response)
            ));
        }

        let json_response: Value = response.json().await?;
        let token = json_response
            .get("auth")
            .and_then(|v| v.get("client_token"))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Error parsing JSON response: no client_token found"))?;

        Ok(SecretString::from(token.to_string()))
    }

    async fn read(
        &self,
        node: &VaultNode,
        token: Option<&SecretString>,
        path: &str,
    ) -> Result<HashMap<String, String>> {
        let read_url = endpoint_url(
            &node.address,
            &format!("/v1/{}", path.trim_start_matches('/')),
        )?;

        let span = info_span!("vault.read", http.method = "GET", url = %read_url);
        let response = self
            .send(|| {
                let request = node.client.get(&read_url);
                match token {
                    Some(token) => request.header("X-Vault-Token", token.expose_secret()),
                    None => request,
                }
            })
            .instrument(span)
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let json_response: Value = response.json().await.unwrap_or_default();

            return Err(anyhow!(
                "{} - {}, {}",
                read_url,
                status,
                vault_error_message(&json_response)
            ));
        }

        let json_response: Value = response.json().await?;

        Ok(secrets_from_response(&json_response))
    }

    /// Send a request, retrying transport errors and 5xx responses up to `max_retries` times.
    async fn send<F>(&self, request: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let result = request().send().await;

            let retryable = match &result {
                Ok(response) => response.status().is_server_error(),
                Err(_) => true,
            };

            if !retryable || attempt >= self.max_retries {
                return Ok(result?);
            }

            attempt += 1;
            let backoff = retry_backoff(attempt);
            warn!(attempt, "Vault request failed, backing off for {:?}", backoff);
            sleep(backoff).await;
        }
    }
}

fn load_token(config: &VaultConfig) -> Result<SecretString, SecretError> {
    match (&config.token.token_path, &config.token.token) {
        (Some(token_path), _) if !token_path.is_empty() => fs::read_to_string(token_path)
            .map(|token| SecretString::from(token.trim().to_string()))
            .map_err(|e| {
                SecretError::Client(format!("unable to read token file {token_path}: {e}"))
            }),
        (_, Some(token)) => Ok(token.clone()),
        _ => Err(SecretError::Client(
            "token auth enabled but no token configured".to_string(),
        )),
    }
}

fn load_identity_pem(config: &VaultConfig) -> Result<Vec<u8>, SecretError> {
    let read = |file: &str| {
        fs::read(file).map_err(|e| SecretError::Client(format!("unable to read {file}: {e}")))
    };

    let mut pem = read(&config.cert.cert_file)?;
    pem.extend_from_slice(b"\n");
    pem.extend(read(&config.cert.key_file)?);

    Ok(pem)
}

fn build_client(config: &VaultConfig, identity_pem: Option<&[u8]>) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(APP_USER_AGENT)
        .timeout(Duration::from_secs(config.timeout_seconds));

    if config.insecure_skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    } else if let Some(ca_cert) = &config.ca_cert {
        let pem = fs::read(ca_cert)?;
        builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
    }

    if let Some(pem) = identity_pem {
        builder = builder.use_rustls_tls().identity(Identity::from_pem(pem)?);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{VaultCertAuth, VaultConfig, VaultTokenAuth};
    use anyhow::{anyhow, Result};
    use serde_json::json;
    use std::net::TcpListener;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn token_config(addresses: Vec<String>) -> VaultConfig {
        VaultConfig {
            enabled: true,
            address_list: addresses,
            max_retries: 0,
            token: VaultTokenAuth {
                enabled: true,
                token_path: None,
                token: Some(SecretString::from("vault-token".to_string())),
            },
            ..VaultConfig::default()
        }
    }

    #[test]
    fn endpoint_url_defaults_https_port() -> Result<()> {
        let url = endpoint_url("https://vault.tld", "/v1/secret/app")?;
        assert_eq!(url, "https://vault.tld:443/v1/secret/app");
        Ok(())
    }

    #[test]
    fn endpoint_url_rejects_unsupported_scheme() -> Result<()> {
        let err = endpoint_url("ftp://vault.tld", "/v1/test")
            .err()
            .ok_or_else(|| anyhow!("expected error"))?;
        assert!(err.to_string().contains("unsupported scheme"));
        Ok(())
    }

    #[test]
    fn secrets_from_kv_v1_and_v2() {
        let v1 = json!({"data": {"client_id": "a", "ttl": 30}});
        let secrets = secrets_from_response(&v1);
        assert_eq!(secrets.get("client_id").map(String::as_str), Some("a"));
        assert!(!secrets.contains_key("ttl"));

        let v2 = json!({"data": {"data": {"client_id": "b"}, "metadata": {"version": 3}}});
        let secrets = secrets_from_response(&v2);
        assert_eq!(secrets.get("client_id").map(String::as_str), Some("b"));
        assert_eq!(secrets.len(), 1);
    }

    #[tokio::test]
    async fn disabled_returns_not_enabled() {
        let resolver = VaultResolver::disabled();
        let result = resolver.get_secrets("secret/app").await;
        assert!(matches!(result, Err(SecretError::NotEnabled)));
    }

    #[tokio::test]
    async fn missing_auth_method() -> Result<()> {
        let config = VaultConfig {
            enabled: true,
            address_list: vec!["http://127.0.0.1:1".to_string()],
            ..VaultConfig::default()
        };
        let resolver = VaultResolver::new(&config)?;
        let result = resolver.get_secrets("secret/app").await;
        assert!(matches!(result, Err(SecretError::AuthMethodMissing)));
        Ok(())
    }

    #[test]
    fn token_auth_without_token_is_rejected() {
        let mut config = token_config(vec!["http://127.0.0.1:1".to_string()]);
        config.token.token = None;
        assert!(matches!(
            VaultResolver::new(&config),
            Err(SecretError::Client(_))
        ));
    }

    #[tokio::test]
    async fn reads_with_token_from_file() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/secret/data/billing"))
            .and(header("X-Vault-Token", "file-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"data": {"client_secret": "from-vault"}}
            })))
            .mount(&server)
            .await;

        let token_path = std::env::temp_dir().join(format!(
            "custodian-vault-token-{}",
            std::process::id()
        ));
        fs::write(&token_path, "file-token\n")?;

        let mut config = token_config(vec![server.uri()]);
        config.token.token = None;
        config.token.token_path = Some(token_path.display().to_string());

        let resolver = VaultResolver::new(&config)?;
        let secrets = resolver.get_secrets("secret/data/billing").await?;
        let _ = fs::remove_file(&token_path);

        assert_eq!(
            secrets.get("client_secret").map(String::as_str),
            Some("from-vault")
        );
        Ok(())
    }

    #[tokio::test]
    async fn falls_through_to_next_address() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let broken = MockServer::start().await;
        let healthy = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/secret/app"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "errors": ["sealed"]
            })))
            .expect(1)
            .mount(&broken)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/secret/app"))
            .and(header("X-Vault-Token", "vault-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"username": "svc"}
            })))
            .mount(&healthy)
            .await;

        let resolver = VaultResolver::new(&token_config(vec![broken.uri(), healthy.uri()]))?;
        let secrets = resolver.get_secrets("/secret/app").await?;
        assert_eq!(secrets.get("username").map(String::as_str), Some("svc"));
        Ok(())
    }

    #[tokio::test]
    async fn retries_server_errors_on_same_address() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/secret/app"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/secret/app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"password": "p"}
            })))
            .mount(&server)
            .await;

        let mut config = token_config(vec![server.uri()]);
        config.max_retries = 1;
        let resolver = VaultResolver::new(&config)?;
        let secrets = resolver.get_secrets("secret/app").await?;
        assert_eq!(secrets.get("password").map(String::as_str), Some("p"));
        Ok(())
    }

    #[test]
    fn retry_backoff_is_capped() {
        assert_eq!(retry_backoff(1), Duration::from_millis(250));
        assert_eq!(retry_backoff(2), Duration::from_millis(500));
        assert_eq!(retry_backoff(3), Duration::from_millis(1000));
        assert_eq!(retry_backoff(4), RETRY_BACKOFF_MAX);
        assert_eq!(retry_backoff(u32::MAX), RETRY_BACKOFF_MAX);

        let total: Duration = (1..=12).map(retry_backoff).sum();
        assert!(total <= RETRY_BACKOFF_MAX * 12);
    }

    #[tokio::test]
    async fn many_retries_finish_in_bounded_time() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/secret/app"))
            .respond_with(ResponseTemplate::new(503))
            .expect(7)
            .mount(&server)
            .await;

        let mut config = token_config(vec![server.uri()]);
        config.max_retries = 6;
        let resolver = VaultResolver::new(&config)?;

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            resolver.get_secrets("secret/app"),
        )
        .await
        .map_err(|_| anyhow!("retries did not finish in time"))?;
        assert!(matches!(result, Err(SecretError::ReadFailed(_))));
        Ok(())
    }

    #[tokio::test]
    async fn empty_or_failed_reads_are_read_failed() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let empty = MockServer::start().await;
        let forbidden = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/secret/app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .mount(&empty)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/secret/app"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "errors": ["permission denied"]
            })))
            .mount(&forbidden)
            .await;

        let resolver = VaultResolver::new(&token_config(vec![empty.uri(), forbidden.uri()]))?;
        let result = resolver.get_secrets("secret/app").await;
        assert!(matches!(result, Err(SecretError::ReadFailed(p)) if p == "secret/app"));
        Ok(())
    }

    #[tokio::test]
    async fn cert_login_then_read() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/auth/cert/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "auth": {"client_token": "cert-token", "lease_duration": 60}
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/secret/app"))
            .and(header("X-Vault-Token", "cert-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"client_id": "from-cert"}
            })))
            .mount(&server)
            .await;

        let mut resolver = VaultResolver::new(&token_config(vec![server.uri()]))?;
        // TLS client identity is irrelevant against a plain HTTP mock.
        resolver.auth = VaultAuth::Cert;

        let secrets = resolver.get_secrets("secret/app").await?;
        assert_eq!(
            secrets.get("client_id").map(String::as_str),
            Some("from-cert")
        );
        Ok(())
    }

    #[tokio::test]
    async fn failed_cert_login_is_read_failed() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/auth/cert/login"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "errors": ["invalid certificate"]
            })))
            .mount(&server)
            .await;

        let mut resolver = VaultResolver::new(&token_config(vec![server.uri()]))?;
        resolver.auth = VaultAuth::Cert;

        let result = resolver.get_secrets("secret/app").await;
        assert!(matches!(result, Err(SecretError::ReadFailed(_))));
        Ok(())
    }

    fn cert_config(addresses: Vec<String>, cert_file: &str, key_file: &str) -> VaultConfig {
        VaultConfig {
            enabled: true,
            address_list: addresses,
            max_retries: 0,
            cert: VaultCertAuth {
                enabled: true,
                cert_file: cert_file.to_string(),
                key_file: key_file.to_string(),
            },
            ..VaultConfig::default()
        }
    }

    #[test]
    fn cert_auth_requires_loadable_identity() -> Result<()> {
        let addresses = vec!["http://127.0.0.1:1".to_string()];

        let missing = cert_config(
            addresses.clone(),
            "/nonexistent/custodian-client.crt",
            "/nonexistent/custodian-client.key",
        );
        assert!(matches!(
            VaultResolver::new(&missing),
            Err(SecretError::Client(_))
        ));

        let dir = std::env::temp_dir();
        let cert_file = dir.join(format!("custodian-bad-cert-{}.pem", std::process::id()));
        let key_file = dir.join(format!("custodian-bad-key-{}.pem", std::process::id()));
        fs::write(&cert_file, "not a certificate")?;
        fs::write(&key_file, "not a key")?;

        let invalid = cert_config(
            addresses,
            &cert_file.display().to_string(),
            &key_file.display().to_string(),
        );
        let result = VaultResolver::new(&invalid);
        let _ = fs::remove_file(&cert_file);
        let _ = fs::remove_file(&key_file);

        assert!(matches!(result, Err(SecretError::Client(_))));
        Ok(())
    }

    #[tokio::test]
    async fn token_auth_wins_over_cert_auth() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/auth/cert/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "auth": {"client_token": "cert-token"}
            })))
            .expect(0)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/secret/app"))
            .and(header("X-Vault-Token", "vault-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"client_id": "from-token"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        // The certificate files are never read while token auth is in use.
        let mut config = cert_config(
            vec![server.uri()],
            "/nonexistent/custodian-client.crt",
            "/nonexistent/custodian-client.key",
        );
        config.token = token_config(Vec::new()).token;

        let resolver = VaultResolver::new(&config)?;
        assert!(format!("{resolver:?}").contains("token"));

        let secrets = resolver.get_secrets("secret/app").await?;
        assert_eq!(
            secrets.get("client_id").map(String::as_str),
            Some("from-token")
        );
        Ok(())
    }

    #[tokio::test]
    async fn local_agent_reads_without_token() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/secret/app"))
            .and(|request: &Request| !request.headers.contains_key("x-vault-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"client_secret": "from-agent"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = VaultConfig {
            enabled: true,
            address_list: vec![server.uri()],
            max_retries: 0,
            is_local_agent: true,
            ..VaultConfig::default()
        };

        let resolver = VaultResolver::new(&config)?;
        let secrets = resolver.get_secrets("secret/app").await?;
        assert_eq!(
            secrets.get("client_secret").map(String::as_str),
            Some("from-agent")
        );
        Ok(())
    }
}
