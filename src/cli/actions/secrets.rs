use crate::{config::Config, vault::VaultResolver};
use anyhow::{Context, Result};
use std::path::PathBuf;

#[derive(Debug)]
pub struct Args {
    pub config: PathBuf,
    pub path: String,
}

/// Print the key names found at `args.path`. Values are never printed.
/// # Errors
/// Returns an error if Vault is disabled, misconfigured or the read fails.
pub async fn execute(args: Args) -> Result<()> {
    let config = Config::load(&args.config)?;

    let resolver = VaultResolver::new(&config.vault).context("Invalid Vault configuration")?;
    let secrets = resolver
        .get_secrets(&args.path)
        .await
        .with_context(|| format!("Unable to read {}", args.path))?;

    let mut keys: Vec<&String> = secrets.keys().collect();
    keys.sort();
    for key in keys {
        println!("{key}");
    }

    Ok(())
}
