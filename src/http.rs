use crate::APP_USER_AGENT;
use anyhow::Result;
use reqwest::Client;
use std::time::Duration;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_IDLE_CONNECTIONS: usize = 20;

/// HTTP transport shared by the token manager and the inbound validator.
/// # Errors
/// Returns an error if the TLS backend cannot be initialized.
pub fn client() -> Result<Client> {
    Ok(Client::builder()
        .user_agent(APP_USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
        .build()?)
}
