use crate::{
    config::Config,
    http,
    oauth::{ManagerOptions, TokenManager},
    vault::VaultResolver,
};
use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use std::{path::PathBuf, sync::Arc};

#[derive(Debug)]
pub struct Args {
    pub config: PathBuf,
    pub id: String,
}

/// Fetch one token for `args.id` and print it.
///
/// No renewal task is started: the token comes from a single request to the IDP.
/// # Errors
/// Returns an error if the configuration is invalid or no token can be obtained.
pub async fn execute(args: Args) -> Result<()> {
    let config = Config::load(&args.config)?;

    let resolver = Arc::new(
        VaultResolver::new(&config.vault).context("Invalid Vault configuration")?,
    );

    let configs: Vec<_> = config
        .auth
        .client
        .oauth
        .into_iter()
        .filter(|c| c.id == args.id)
        .collect();

    let manager = TokenManager::new(
        &configs,
        resolver,
        http::client()?,
        ManagerOptions::default(),
    )
    .await;

    let token = manager
        .token(&args.id)
        .await
        .with_context(|| format!("Unable to get a token for {}", args.id))?;

    println!("{}", token.expose_secret());

    Ok(())
}
