//! OpenID Provider discovery (`.well-known/openid-configuration`).

use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use super::OidcError;

/// OpenID Provider metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier; must equal the configured issuer
    pub issuer: String,

    /// Authorization endpoint URL
    pub authorization_endpoint: String,

    /// Token endpoint URL
    pub token_endpoint: String,

    /// `UserInfo` endpoint (optional)
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,

    /// JWKS document URL
    pub jwks_uri: String,

    /// RP-initiated logout endpoint (optional)
    #[serde(default)]
    pub end_session_endpoint: Option<String>,

    /// Supported scopes (may be string or array)
    #[serde(default, deserialize_with = "deserialize_space_list")]
    pub scopes_supported: Vec<String>,

    /// ID token signing algorithms; `RS256` when not advertised
    #[serde(
        default = "default_signing_algs",
        deserialize_with = "deserialize_space_list"
    )]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

fn default_signing_algs() -> Vec<String> {
    vec!["RS256".to_string()]
}

/// Deserialize a list that may be either a space-separated string or an array
fn deserialize_space_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(s) => Ok(s.split_whitespace().map(String::from).collect()),
        StringOrVec::Vec(v) => Ok(v),
    }
}

/// Discovery document URL for an issuer
pub(crate) fn discovery_url(issuer: &str) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    )
}

impl ProviderMetadata {
    /// Fetch and check the discovery document for `issuer`
    ///
    /// # Errors
    ///
    /// Returns an error if the document is unreachable, malformed, or names a
    /// different issuer.
    pub async fn discover(client: &Client, issuer: &str) -> Result<Self, OidcError> {
        let url = discovery_url(issuer);
        debug!(url = %url, "Discovering OpenID provider metadata");

        if !issuer.starts_with("https://") {
            warn!(issuer = %issuer, "OIDC issuer is not HTTPS");
        }

        let response = client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(OidcError::Metadata(format!(
                "GET {url} returned HTTP {}",
                response.status()
            )));
        }

        let metadata: Self = response
            .json()
            .await
            .map_err(|e| OidcError::Metadata(format!("failed to parse {url}: {e}")))?;

        if metadata.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
            return Err(OidcError::Metadata(format!(
                "issuer mismatch: expected {issuer}, got {}",
                metadata.issuer
            )));
        }

        debug!(
            issuer = %metadata.issuer,
            jwks_uri = %metadata.jwks_uri,
            "Discovered OpenID provider"
        );
        Ok(metadata)
    }
}
