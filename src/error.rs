use std::fmt;

/// Coarse classification shared by every error in the crate.
///
/// Callers map it to a request outcome: `Token` is an authentication failure,
/// `Configuration` an operator problem, `Transport` and `Protocol` an upstream one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Feature disabled or missing key/method/credentials.
    Configuration,
    /// Network or timeout talking to the IDP, the secret store or a JWKS endpoint.
    Transport,
    /// Unexpected status code or malformed response body.
    Protocol,
    /// Expired, badly signed or malformed token. Never retried.
    Token,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Transport => write!(f, "transport"),
            Self::Protocol => write!(f, "protocol"),
            Self::Token => write!(f, "token"),
        }
    }
}
