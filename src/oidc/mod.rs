//! OpenID Connect relying party.
//!
//! [`OidcProvider`] is built once at startup from the provider's discovery
//! document and shared read-only. The session layer only talks to it through
//! the [`IdentityProvider`] trait, so tests can substitute a fake provider.

mod discovery;
mod jwks;
mod provider;

use async_trait::async_trait;

pub use discovery::ProviderMetadata;
pub use jwks::JwksCache;
pub use provider::OidcProvider;

/// Claim normalization, shared with the core crate.
pub mod claims {
    pub use oidc_proxy_core::{
        ClaimNames, ClaimValue, Claims, Identity, merge_claims, normalize_groups, safe_header,
    };
}

use claims::Claims;

/// Error variants for OIDC operations.
#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    /// JWT decode, signature or standard-claim validation failed.
    #[error("JWT verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The token endpoint response carried no `id_token`.
    #[error("token response did not include an id_token")]
    MissingIdToken,

    /// No key in the provider's JWKS matches the token's `kid`.
    #[error("Unknown key ID: {0}")]
    UnknownKeyId(String),

    /// The token is signed with an algorithm the provider does not advertise.
    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The discovery document is unusable.
    #[error("Invalid provider metadata: {0}")]
    Metadata(String),

    /// The token endpoint rejected the grant.
    #[error("Token endpoint returned HTTP {status}: {body}")]
    TokenEndpoint {
        /// HTTP status code
        status: u16,
        /// Response body, as returned by the provider
        body: String,
    },

    /// `UserInfo` retrieval failed.
    #[error("UserInfo request failed: {0}")]
    UserInfo(String),

    /// Network or HTTP error while talking to the provider.
    #[error("OIDC provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A required claim is missing from a verified token.
    #[error("Missing claim: {0}")]
    MissingClaim(&'static str),
}

/// A verified ID token.
#[derive(Debug, Clone)]
pub struct IdToken {
    /// `sub` claim
    pub subject: String,
    /// `iss` claim
    pub issuer: String,
    /// `exp` claim, seconds since the Unix epoch
    pub expiry: u64,
    /// All decoded claims
    pub claims: Claims,
}

/// Tokens returned by the token endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSet {
    /// OAuth2 access token
    pub access_token: String,
    /// Refresh token, when the provider issued one
    pub refresh_token: Option<String>,
    /// Raw ID token, when the provider issued one
    pub id_token: Option<String>,
}

impl TokenSet {
    /// The raw ID token, or [`OidcError::MissingIdToken`].
    pub fn require_id_token(&self) -> Result<&str, OidcError> {
        self.id_token.as_deref().ok_or(OidcError::MissingIdToken)
    }
}

/// Operations the session layer needs from an OIDC provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify a raw ID token: signature, expiry, issuer and audience.
    async fn verify(&self, raw: &str) -> Result<IdToken, OidcError>;

    /// Exchange a refresh token for a new token set.
    ///
    /// When the provider does not rotate the refresh token, the returned set
    /// carries the one that was passed in.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, OidcError>;

    /// Exchange an authorization code for a token set.
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, OidcError>;

    /// Fetch `UserInfo` claims for an access token.
    async fn user_info(&self, access_token: &str) -> Result<Claims, OidcError>;

    /// Authorization URL carrying `state`.
    fn authorization_url(&self, state: &str) -> String;
}
