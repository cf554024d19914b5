use crate::cli::actions::{jwt, secrets, serve, token, Action};
use anyhow::Result;

/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Serve(args) => serve::execute(args).await,
        Action::Token(args) => token::execute(args).await,
        Action::Issue(args) => jwt::issue(args),
        Action::Verify(args) => jwt::verify(args).await,
        Action::Secrets(args) => secrets::execute(args).await,
    }
}
