use crate::{
    cli::{
        actions::{jwt, secrets, serve, token, Action},
        commands::ARG_CONFIG,
    },
    config::DEFAULT_CONFIG_PATH,
    local_jwt::Claims,
};
use anyhow::{anyhow, Context, Result};
use secrecy::SecretString;
use std::path::PathBuf;

/// # Errors
/// Returns an error if required arguments are missing or malformed.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let config = matches
        .get_one::<PathBuf>(ARG_CONFIG)
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    // Closure to fetch a required string argument of a subcommand
    let required = |sub: &clap::ArgMatches, name: &str| -> Result<String> {
        sub.get_one::<String>(name)
            .cloned()
            .with_context(|| format!("missing required argument: {name}"))
    };

    match matches.subcommand() {
        Some(("serve", _)) => Ok(Action::Serve(serve::Args { config })),
        Some(("token", sub)) => Ok(Action::Token(token::Args {
            config,
            id: required(sub, "id")?,
        })),
        Some(("issue", sub)) => {
            let claims: Claims = serde_json::from_str(&required(sub, "claims")?)
                .context("--claims must be a JSON object")?;
            Ok(Action::Issue(jwt::IssueArgs { config, claims }))
        }
        Some(("verify", sub)) => Ok(Action::Verify(jwt::VerifyArgs {
            config,
            token: SecretString::from(required(sub, "token")?),
            inbound: sub.get_flag("inbound"),
            roles: sub
                .get_many::<String>("role")
                .map(|roles| roles.cloned().collect())
                .unwrap_or_default(),
        })),
        Some(("secrets", sub)) => Ok(Action::Secrets(secrets::Args {
            config,
            path: required(sub, "path")?,
        })),
        Some((name, _)) => Err(anyhow!("unknown command: {name}")),
        None => Err(anyhow!("no command given")),
    }
}
