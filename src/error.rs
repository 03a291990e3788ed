//! Typed failures at the boundaries of the remote panel.
//!
//! `AuthError` covers the login handshake, `PanelError` covers every
//! authenticated data call (enumeration, counts, allocation), and
//! `ConfigError` covers loading and validating `HarvestConfig`. The
//! orchestrator and CLI wrap these in `anyhow` with context.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to load login page: {0}")]
    LoginPage(#[source] reqwest::Error),

    #[error("login challenge not found or unsolvable")]
    ChallengeUnsolved,

    #[error("credential submission failed: {0}")]
    SignIn(#[source] reqwest::Error),

    #[error("expected a redirect after sign-in, got HTTP {0}")]
    UnexpectedStatus(u16),

    #[error("sign-in redirect carried no usable Location header")]
    MissingRedirect,

    #[error("failed to reach dashboard after sign-in: {0}")]
    Dashboard(#[source] reqwest::Error),

    #[error("invalid panel URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("unexpected response shape: {0}")]
    Parse(String),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid panel URL: {0}")]
    Url(#[from] url::ParseError),
}

impl From<reqwest::Error> for PanelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PanelError::Timeout
        } else {
            PanelError::Transport(err)
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
