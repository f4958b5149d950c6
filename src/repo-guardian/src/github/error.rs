//! GitHub client error types.

use thiserror::Error;

/// Errors that can occur during GitHub API operations.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// HTTP transport failure (connection, TLS, timeout).
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success response from the GitHub API.
    #[error("GitHub API error during {operation}: status {status}: {message}")]
    Api {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// Failed to read the App private key file.
    #[error("reading private key '{path}': {source}")]
    PrivateKey {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to build or sign the App JWT.
    #[error("signing app JWT: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The client was built without App credentials but an App-authenticated
    /// operation was requested.
    #[error("client has no GitHub App credentials")]
    NoAppCredentials,
}
