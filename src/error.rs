//! Error types for the OIDC proxy

use std::io;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::oidc::OidcError;

/// Result type alias for the OIDC proxy
pub type Result<T> = std::result::Result<T, Error>;

/// OIDC proxy errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider discovery failed
    #[error("OIDC discovery failed: {0}")]
    Discovery(#[source] OidcError),

    /// No registered upstream prefix matches the request path
    #[error("no valid upstream for path {0}")]
    NoUpstream(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status reported to the client for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoUpstream(_) | Self::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}
