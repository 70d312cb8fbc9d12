//! OIDC Proxy Library
//!
//! Authenticating reverse proxy that keeps an OpenID Connect session in
//! browser cookies and forwards requests to upstream services with identity
//! headers attached.
//!
//! # Features
//!
//! - **Cookie sessions**: refresh, ID and access tokens in `HttpOnly` cookies
//! - **Silent refresh**: expired ID tokens are renewed with the refresh token
//! - **Identity headers**: `X-Forwarded-User`, `-Email`, `-Groups`,
//!   `-Preferred-Username`, with client-supplied values always stripped
//! - **Longest-prefix routing** to any number of upstreams
//! - **Hardened transport**: TLS 1.2+ with ECDHE AEAD suites, HTTP/2 via ALPN
//!
//! Credential failures never block a request; they downgrade it to
//! anonymous and leave authorization to the upstream.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod oidc;
pub mod proxy;
pub mod routing;
pub mod session;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
