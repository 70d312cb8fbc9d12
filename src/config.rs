//! Configuration management

use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

pub use oidc_proxy_core::ClaimNames;

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `${VAR}` resolution.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// OIDC provider and session cookie configuration
    pub oidc: OidcConfig,
    /// Upstreams, matched by longest path prefix
    pub upstreams: Vec<UpstreamConfig>,
    /// Upstream transport configuration
    pub proxy: ProxyConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (OIDC_PROXY_ prefix)
        figment = figment.merge(Env::prefixed("OIDC_PROXY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        // Expand ${VAR} in URLs and the client secret
        config.expand_env_vars();

        config.validate()?;
        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) {
        // Pattern: ${VAR} or ${VAR:-default}
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        self.oidc.issuer_uri = Self::expand_string(&re, &self.oidc.issuer_uri);
        self.oidc.redirect_uri = Self::expand_string(&re, &self.oidc.redirect_uri);
        self.oidc.client.secret = Self::expand_string(&re, &self.oidc.client.secret);

        for upstream in &mut self.upstreams {
            match upstream {
                UpstreamConfig::Url(url) | UpstreamConfig::Mapping { url, .. } => {
                    *url = Self::expand_string(&re, url);
                }
            }
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Check the values the gateway cannot start without.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.oidc.issuer_uri).map_err(|e| {
            Error::Config(format!("invalid oidc.issuer_uri '{}': {e}", self.oidc.issuer_uri))
        })?;
        Url::parse(&self.oidc.redirect_uri).map_err(|e| {
            Error::Config(format!(
                "invalid oidc.redirect_uri '{}': {e}",
                self.oidc.redirect_uri
            ))
        })?;
        if self.oidc.client.id.is_empty() {
            return Err(Error::Config("oidc.client.id is required".to_string()));
        }
        if self.upstreams.is_empty() {
            return Err(Error::Config("at least one upstream is required".to_string()));
        }
        for upstream in &self.upstreams {
            upstream.target()?;
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// How long in-flight requests may drain after a shutdown signal
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// OIDC relying-party configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    /// Issuer URL; discovery is performed against
    /// `<issuer_uri>/.well-known/openid-configuration`
    pub issuer_uri: String,
    /// OAuth2 client credentials
    pub client: ClientCredentials,
    /// Callback URL registered with the provider
    pub redirect_uri: String,
    /// `SameSite` attribute for session cookies (`Lax`, `Strict` or `None`)
    pub cookie_same_site: String,
    /// Scopes requested in addition to `openid`
    pub scopes: Vec<String>,
    /// Claim names used to build the forwarded identity
    pub claims: ClaimNames,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer_uri: String::new(),
            client: ClientCredentials::default(),
            redirect_uri: String::new(),
            cookie_same_site: "Lax".to_string(),
            scopes: Vec::new(),
            claims: ClaimNames::default(),
        }
    }
}

impl OidcConfig {
    /// Requested scopes with `openid` guaranteed to be present exactly once
    #[must_use]
    pub fn effective_scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = Vec::with_capacity(self.scopes.len() + 1);
        for scope in &self.scopes {
            if !scopes.contains(scope) {
                scopes.push(scope.clone());
            }
        }
        if !scopes.iter().any(|s| s == "openid") {
            scopes.push("openid".to_string());
        }
        scopes
    }
}

/// OAuth2 client credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientCredentials {
    /// Client ID; also the expected ID token audience
    pub id: String,
    /// Client secret. Supports: literal value or `env:VAR_NAME`
    pub secret: String,
}

impl ClientCredentials {
    /// Resolve the client secret (expand `env:` references)
    #[must_use]
    pub fn resolve_secret(&self) -> String {
        if let Some(var_name) = self.secret.strip_prefix("env:") {
            env::var(var_name).unwrap_or_else(|_| self.secret.clone())
        } else {
            self.secret.clone()
        }
    }
}

/// One upstream entry.
///
/// A bare URL uses its own path as the routing prefix (`/` when empty);
/// the mapping form sets the prefix explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpstreamConfig {
    /// `http://service:8080/api` routes `/api` to `http://service:8080`
    Url(String),
    /// Explicit prefix to base URL mapping
    Mapping {
        /// Path prefix matched against the request path
        prefix: String,
        /// Upstream base URL
        url: String,
    },
}

impl UpstreamConfig {
    /// Parse the upstream URL
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL does not parse or has no host.
    pub fn target(&self) -> Result<Url> {
        let raw = match self {
            Self::Url(url) | Self::Mapping { url, .. } => url,
        };
        let url = Url::parse(raw)
            .map_err(|e| Error::Config(format!("parsing proxy target '{raw}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
            return Err(Error::Config(format!(
                "proxy target '{raw}' must be an absolute http(s) URL"
            )));
        }
        Ok(url)
    }

    /// Routing prefix for this upstream
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is invalid.
    pub fn prefix(&self) -> Result<String> {
        match self {
            Self::Mapping { prefix, .. } => Ok(prefix.clone()),
            Self::Url(_) => {
                let target = self.target()?;
                let path = target.path();
                Ok(if path.is_empty() { "/".to_string() } else { path.to_string() })
            }
        }
    }
}

/// Minimum TLS protocol version for upstream connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TlsVersion {
    /// TLS 1.2 (ECDHE AEAD suites only)
    #[default]
    #[serde(rename = "1.2")]
    Tls12,
    /// TLS 1.3 only
    #[serde(rename = "1.3")]
    Tls13,
}

/// Upstream transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// TLS version floor
    pub min_tls_version: TlsVersion,
    /// TCP connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// How long an idle pooled connection is kept
    #[serde(with = "humantime_serde")]
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections kept per upstream host
    pub pool_max_idle_per_host: usize,
    /// Extra PEM bundle trusted for upstream TLS, on top of the system and
    /// Mozilla roots
    pub ca_file: Option<PathBuf>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            min_tls_version: TlsVersion::Tls12,
            connect_timeout: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 100,
            ca_file: None,
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
