//! Per-request identity resolution.
//!
//! The filter never fails a request: every credential problem downgrades the
//! request to anonymous and is only logged.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, info, warn};

use super::cookies::{
    ACCESS_TOKEN_COOKIE, CookieSettings, ID_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE, SessionTokens,
    request_host,
};
use crate::oidc::claims::{ClaimNames, Identity, merge_claims};
use crate::oidc::{IdToken, IdentityProvider};

/// Subject header
pub const USER_HEADER: HeaderName = HeaderName::from_static("x-forwarded-user");
/// Email header
pub const EMAIL_HEADER: HeaderName = HeaderName::from_static("x-forwarded-email");
/// Comma-joined groups header
pub const GROUPS_HEADER: HeaderName = HeaderName::from_static("x-forwarded-groups");
/// Preferred username header
pub const USERNAME_HEADER: HeaderName =
    HeaderName::from_static("x-forwarded-preferred-username");

const IDENTITY_HEADERS: [HeaderName; 4] =
    [USER_HEADER, EMAIL_HEADER, GROUPS_HEADER, USERNAME_HEADER];

/// Resolves the caller's identity from session cookies.
pub struct SessionFilter {
    provider: Arc<dyn IdentityProvider>,
    cookies: CookieSettings,
    claim_names: ClaimNames,
}

impl SessionFilter {
    /// Create a filter over a provider
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        cookies: CookieSettings,
        claim_names: ClaimNames,
    ) -> Self {
        Self {
            provider,
            cookies,
            claim_names,
        }
    }

    /// Resolve the identity for a request.
    ///
    /// Returns the identity together with the jar holding any cookies that
    /// must be written back (refreshed tokens, re-saved ID token).
    pub async fn resolve(&self, jar: CookieJar, host: Option<&str>) -> (Identity, CookieJar) {
        let tokens = SessionTokens::from_jar(&jar);
        let mut jar = jar;
        let mut access_token = tokens.access_token;

        let mut verified = None;
        if let Some(raw) = tokens.id_token {
            match self.provider.verify(&raw).await {
                Ok(token) => verified = Some((token, raw)),
                Err(e) => debug!(error = %e, "ID token cookie rejected"),
            }
        }

        let (token, raw) = match verified {
            Some(valid) => valid,
            None => {
                let Some(refresh_token) = tokens.refresh_token else {
                    return (Identity::anonymous(), jar);
                };
                let (refreshed, updated) = self.refresh(&refresh_token, jar, host).await;
                jar = updated;
                let Some((token, raw, access)) = refreshed else {
                    return (Identity::anonymous(), jar);
                };
                access_token = Some(access).filter(|a| !a.is_empty());
                (token, raw)
            }
        };

        let identity = self.identity(token, access_token.as_deref()).await;
        jar = self.cookies.set(jar, ID_TOKEN_COOKIE, raw, host);
        (identity, jar)
    }

    /// Run the refresh grant.
    ///
    /// The new refresh and access tokens are saved before the new ID token is
    /// checked, so a rotated refresh token is not lost.
    async fn refresh(
        &self,
        refresh_token: &str,
        mut jar: CookieJar,
        host: Option<&str>,
    ) -> (Option<(IdToken, String, String)>, CookieJar) {
        let tokens = match self.provider.refresh(refresh_token).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Failed to exchange refresh token");
                return (None, jar);
            }
        };
        info!("Retrieved new OIDC token");

        if let Some(rotated) = &tokens.refresh_token {
            jar = self.cookies.set(jar, REFRESH_TOKEN_COOKIE, rotated.clone(), host);
        }
        jar = self
            .cookies
            .set(jar, ACCESS_TOKEN_COOKIE, tokens.access_token.clone(), host);

        let raw = match tokens.require_id_token() {
            Ok(raw) => raw.to_string(),
            Err(e) => {
                info!(error = %e, "Refresh response had no ID token");
                return (None, jar);
            }
        };
        match self.provider.verify(&raw).await {
            Ok(token) => (Some((token, raw, tokens.access_token)), jar),
            Err(e) => {
                warn!(error = %e, "Failed to validate refreshed token");
                (None, jar)
            }
        }
    }

    /// Build the canonical identity, merging `UserInfo` claims when possible.
    async fn identity(&self, token: IdToken, access_token: Option<&str>) -> Identity {
        let mut claims = token.claims;
        if let Some(access_token) = access_token {
            match self.provider.user_info(access_token).await {
                Ok(extra) => {
                    debug!(count = extra.len(), "Merged UserInfo claims");
                    merge_claims(&mut claims, extra);
                }
                Err(e) => warn!(error = %e, "Failed to fetch UserInfo"),
            }
        }

        let identity =
            Identity::from_claims(&token.subject, &token.issuer, &claims, &self.claim_names);
        debug!(
            sub = %identity.subject,
            iss = %identity.issuer,
            groups = identity.groups.len(),
            "Resolved OIDC identity"
        );
        identity
    }
}

/// Replace identity headers with values from `identity`.
///
/// Client-supplied identity headers are always removed. For anonymous
/// requests nothing is added back.
pub fn apply_identity_headers(headers: &mut HeaderMap, identity: &Identity) {
    for name in &IDENTITY_HEADERS {
        headers.remove(name);
    }
    if !identity.is_authenticated() {
        return;
    }

    let groups = identity.groups.join(",");
    let values = [
        (USER_HEADER, identity.subject.as_str()),
        (EMAIL_HEADER, identity.email.as_str()),
        (GROUPS_HEADER, groups.as_str()),
        (USERNAME_HEADER, identity.username.as_str()),
    ];
    for (name, value) in values {
        match HeaderValue::from_str(value) {
            Ok(v) => {
                headers.insert(name, v);
            }
            Err(_) => warn!(header = %name, "Identity value is not a valid header value, skipped"),
        }
    }
}

/// Session middleware: resolve identity, rewrite headers, forward.
pub async fn session_middleware(
    State(filter): State<Arc<SessionFilter>>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let host = request_host(request.headers(), request.uri());
    debug!(path = %request.uri().path(), "Checking for OIDC session cookie");

    let (identity, jar) = filter.resolve(jar, host.as_deref()).await;
    apply_identity_headers(request.headers_mut(), &identity);
    request.extensions_mut().insert(identity);

    (jar, next.run(request).await).into_response()
}
