pub mod jwt;
pub mod secrets;
pub mod serve;
pub mod token;

// Single dispatch point lives in `run`.
mod run;

#[derive(Debug)]
pub enum Action {
    Serve(serve::Args),
    Token(token::Args),
    Issue(jwt::IssueArgs),
    Verify(jwt::VerifyArgs),
    Secrets(secrets::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
