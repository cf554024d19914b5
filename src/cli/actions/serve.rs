use crate::{config::Config, Custodian};
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::signal;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub config: PathBuf,
}

/// Start the credential manager and keep it running until interrupted.
/// # Errors
/// Returns an error if the configuration is invalid or signal handlers cannot be installed.
pub async fn execute(args: Args) -> Result<()> {
    let config = Config::load(&args.config)?;

    log_startup(&args, &config);

    let custodian = Custodian::new(&config).await?;

    shutdown_signal().await?;
    info!("Shutdown signal received");

    custodian.shutdown().await;

    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Unable to install SIGTERM handler")?;

        tokio::select! {
            result = signal::ctrl_c() => result.context("Unable to listen for SIGINT")?,
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c()
        .await
        .context("Unable to listen for Ctrl+C")?;

    Ok(())
}

fn log_startup(args: &Args, config: &Config) {
    let identities: Vec<&str> = config
        .auth
        .client
        .oauth
        .iter()
        .map(|c| c.id.as_str())
        .collect();

    let entries = [
        ("config", args.config.display().to_string()),
        ("vault", config.vault.enabled.to_string()),
        ("vault_addresses", config.vault.address_list.join(", ")),
        ("local_jwt", config.auth.server.local_jwt.enabled.to_string()),
        ("inbound_oauth", config.auth.server.oauth.enabled.to_string()),
        (
            "trusted_issuers",
            config.auth.server.oauth.trusted_issuers.join(", "),
        ),
        (
            "resolution_policy",
            format!("{:?}", config.auth.client.resolution_policy),
        ),
        ("outbound_identities", identities.join(", ")),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\nStartup configuration:", banner());
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn banner() -> String {
    format!(
        "custodian {} - {}",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    )
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_commit() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit("abc"), "abc");
        assert_eq!(short_commit(" unknown "), "unknown");
    }

    #[test]
    fn test_banner_has_version() {
        assert!(banner().contains(env!("CARGO_PKG_VERSION")));
    }
}
