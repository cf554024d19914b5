use crate::{
    config::Config,
    http,
    local_jwt::{Claims, LocalJwt},
    oauth::InboundValidator,
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;

#[derive(Debug)]
pub struct IssueArgs {
    pub config: PathBuf,
    pub claims: Claims,
}

#[derive(Debug)]
pub struct VerifyArgs {
    pub config: PathBuf,
    pub token: SecretString,
    pub inbound: bool,
    /// Roles of which the inbound token must hold at least one.
    pub roles: Vec<String>,
}

/// Print a local JWT carrying `args.claims`.
/// # Errors
/// Returns an error if local JWT is disabled or misconfigured.
pub fn issue(args: IssueArgs) -> Result<()> {
    let config = Config::load(&args.config)?;

    let token = LocalJwt::new(config.auth.server.local_jwt)
        .issue(&args.claims)
        .context("Unable to issue local JWT")?;

    println!("{token}");

    Ok(())
}

/// Verify a token, locally or against its issuer, and print its claims as JSON.
/// # Errors
/// Returns an error if the token is rejected.
pub async fn verify(args: VerifyArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    let token = args.token.expose_secret();

    let claims = if args.inbound {
        let header = format!("Bearer {token}");
        let roles: Vec<&str> = args.roles.iter().map(String::as_str).collect();
        let authorized = InboundValidator::new(&config.auth.server.oauth, http::client()?)?
            .authorize(Some(header.as_str()), &roles)
            .await
            .context("Inbound token rejected")?;
        if !authorized.roles.is_empty() {
            eprintln!("Granted roles: {}", authorized.roles.join(", "));
        }
        authorized.claims
    } else {
        LocalJwt::new(config.auth.server.local_jwt)
            .validate(token)
            .context("Local token rejected")?
    };

    println!("{}", serde_json::to_string_pretty(&claims)?);

    Ok(())
}
