//! Discovered OIDC provider.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, Validation};
use reqwest::{Client, header::ACCEPT};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{IdToken, IdentityProvider, JwksCache, OidcError, ProviderMetadata, TokenSet};
use super::claims::Claims;
use crate::config::OidcConfig;

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

/// Relying-party view of a discovered provider.
pub struct OidcProvider {
    http: Client,
    metadata: ProviderMetadata,
    authorization_endpoint: Url,
    jwks: JwksCache,
    algorithms: Vec<Algorithm>,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: Vec<String>,
}

impl OidcProvider {
    /// Run discovery against the configured issuer.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails or the metadata is unusable.
    pub async fn discover(config: &OidcConfig) -> Result<Self, OidcError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let metadata = ProviderMetadata::discover(&http, &config.issuer_uri).await?;
        Self::from_metadata(http, metadata, config)
    }

    /// Build from already-fetched metadata.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Metadata`] if the authorization endpoint does not
    /// parse or no advertised signing algorithm is supported.
    pub fn from_metadata(
        http: Client,
        metadata: ProviderMetadata,
        config: &OidcConfig,
    ) -> Result<Self, OidcError> {
        let authorization_endpoint = Url::parse(&metadata.authorization_endpoint).map_err(|e| {
            OidcError::Metadata(format!(
                "invalid authorization_endpoint '{}': {e}",
                metadata.authorization_endpoint
            ))
        })?;

        let algorithms: Vec<Algorithm> = metadata
            .id_token_signing_alg_values_supported
            .iter()
            .filter_map(|name| match Algorithm::from_str(name) {
                Ok(alg) => Some(alg),
                Err(_) => {
                    debug!(alg = %name, "Ignoring unsupported signing algorithm");
                    None
                }
            })
            .collect();
        if algorithms.is_empty() {
            return Err(OidcError::Metadata(format!(
                "no supported ID token signing algorithm in {:?}",
                metadata.id_token_signing_alg_values_supported
            )));
        }

        let jwks = JwksCache::new(http.clone(), metadata.jwks_uri.clone());

        Ok(Self {
            http,
            authorization_endpoint,
            jwks,
            algorithms,
            client_id: config.client.id.clone(),
            client_secret: config.client.resolve_secret(),
            redirect_uri: config.redirect_uri.clone(),
            scopes: config.effective_scopes(),
            metadata,
        })
    }

    /// Discovered metadata
    #[must_use]
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    /// Accepted ID token signing algorithms
    #[must_use]
    pub fn algorithms(&self) -> &[Algorithm] {
        &self.algorithms
    }

    fn validation(&self, alg: Algorithm) -> Validation {
        let mut v = Validation::new(alg);
        v.leeway = 60; // 60-second clock skew tolerance
        v.set_issuer(&[self.metadata.issuer.as_str()]);
        v.set_audience(&[self.client_id.as_str()]);
        v.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        v
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenSet, OidcError> {
        let response = self
            .http
            .post(&self.metadata.token_endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(ACCEPT, "application/json")
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OidcError::TokenEndpoint { status, body });
        }

        let token: TokenResponse = response.json().await?;
        Ok(TokenSet {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            id_token: token.id_token,
        })
    }
}

/// Pull the identity fields out of verified claims.
fn id_token_from_claims(claims: Claims) -> Result<IdToken, OidcError> {
    let string_claim = |name: &'static str| {
        claims
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or(OidcError::MissingClaim(name))
    };
    let subject = string_claim("sub")?;
    let issuer = string_claim("iss")?;
    let expiry = claims
        .get("exp")
        .and_then(Value::as_u64)
        .ok_or(OidcError::MissingClaim("exp"))?;

    Ok(IdToken {
        subject,
        issuer,
        expiry,
        claims,
    })
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    async fn verify(&self, raw: &str) -> Result<IdToken, OidcError> {
        let header = jsonwebtoken::decode_header(raw)?;
        if !self.algorithms.contains(&header.alg) {
            return Err(OidcError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let keys = self
            .jwks
            .decoding_keys(header.kid.as_deref(), header.alg)
            .await?;
        let validation = self.validation(header.alg);

        let mut last_err = None;
        for key in &keys {
            match jsonwebtoken::decode::<Claims>(raw, key, &validation) {
                Ok(data) => return id_token_from_claims(data.claims),
                Err(e) => last_err = Some(e),
            }
        }

        Err(match last_err {
            Some(e) => OidcError::Jwt(e),
            None => OidcError::UnknownKeyId(header.kid.unwrap_or_else(|| "(none)".to_string())),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, OidcError> {
        let mut tokens = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await?;

        // Providers that do not rotate refresh tokens omit the field.
        if tokens.refresh_token.as_deref().is_none_or(str::is_empty) {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        Ok(tokens)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, OidcError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.redirect_uri),
        ])
        .await
    }

    async fn user_info(&self, access_token: &str) -> Result<Claims, OidcError> {
        let Some(endpoint) = &self.metadata.userinfo_endpoint else {
            return Err(OidcError::UserInfo(
                "provider does not advertise a userinfo endpoint".to_string(),
            ));
        };

        let response = self
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(OidcError::UserInfo(format!("HTTP {}", response.status())));
        }

        match response.json::<Value>().await? {
            Value::Object(claims) => Ok(claims),
            other => {
                warn!(kind = %json_kind(&other), "UserInfo response is not a JSON object");
                Err(OidcError::UserInfo("response is not a JSON object".to_string()))
            }
        }
    }

    fn authorization_url(&self, state: &str) -> String {
        let mut url = self.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state);
        url.into()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
