//! Session cookies.
//!
//! The three tokens travel as independent cookies scoped to the request host.
//! Cookie lifetime is effectively unbounded; session validity comes from the
//! ID token's own expiry.

use axum::http::{HeaderMap, Uri, header::HOST};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::OffsetDateTime;
use tracing::warn;

use crate::oidc::TokenSet;

/// Refresh token cookie
pub const REFRESH_TOKEN_COOKIE: &str = "oidc-token";
/// ID token cookie
pub const ID_TOKEN_COOKIE: &str = "oidc-id_token";
/// Access token cookie
pub const ACCESS_TOKEN_COOKIE: &str = "oidc-access-token";

const ALL_COOKIES: [&str; 3] = [REFRESH_TOKEN_COOKIE, ID_TOKEN_COOKIE, ACCESS_TOKEN_COOKIE];

/// Tokens read from an inbound request. Empty cookies count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionTokens {
    /// `oidc-token`
    pub refresh_token: Option<String>,
    /// `oidc-id_token`
    pub id_token: Option<String>,
    /// `oidc-access-token`
    pub access_token: Option<String>,
}

impl SessionTokens {
    /// Read the session cookies from a jar
    #[must_use]
    pub fn from_jar(jar: &CookieJar) -> Self {
        let read = |name: &str| {
            jar.get(name)
                .map(|c| c.value().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            refresh_token: read(REFRESH_TOKEN_COOKIE),
            id_token: read(ID_TOKEN_COOKIE),
            access_token: read(ACCESS_TOKEN_COOKIE),
        }
    }
}

/// Parse a `SameSite` setting. Unknown values fall back to `Lax`.
#[must_use]
pub fn parse_same_site(value: &str) -> SameSite {
    match value.to_ascii_lowercase().as_str() {
        "lax" => SameSite::Lax,
        "strict" => SameSite::Strict,
        "none" => SameSite::None,
        _ => {
            warn!(value = %value, "Unknown cookie SameSite mode, using Lax");
            SameSite::Lax
        }
    }
}

/// Host the request was addressed to, with any port removed.
#[must_use]
pub fn request_host(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(axum::http::uri::Authority::as_str))?;
    let host = strip_port(host);
    (!host.is_empty()).then(|| host.to_string())
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        // [v6]:port
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Cookie attributes shared by every session cookie.
#[derive(Debug, Clone, Copy)]
pub struct CookieSettings {
    same_site: SameSite,
}

impl CookieSettings {
    /// Settings with the given `SameSite` mode
    #[must_use]
    pub fn new(same_site: &str) -> Self {
        Self {
            same_site: parse_same_site(same_site),
        }
    }

    fn build(&self, name: &'static str, value: String, host: Option<&str>) -> Cookie<'static> {
        let mut cookie = Cookie::build((name, value))
            .http_only(true)
            .secure(true)
            .path("/")
            .same_site(self.same_site)
            .build();
        if let Some(host) = host {
            cookie.set_domain(host.to_string());
        }
        cookie
    }

    /// Add one session cookie to the jar
    #[must_use]
    pub fn set(
        &self,
        jar: CookieJar,
        name: &'static str,
        value: impl Into<String>,
        host: Option<&str>,
    ) -> CookieJar {
        let mut cookie = self.build(name, value.into(), host);
        cookie.set_expires(OffsetDateTime::now_utc() + time::Duration::days(365 * 999));
        jar.add(cookie)
    }

    /// Store a token set. Absent tokens leave their cookie untouched.
    #[must_use]
    pub fn store(&self, jar: CookieJar, tokens: &TokenSet, host: Option<&str>) -> CookieJar {
        let mut jar = self.set(jar, ACCESS_TOKEN_COOKIE, tokens.access_token.clone(), host);
        if let Some(refresh) = &tokens.refresh_token {
            jar = self.set(jar, REFRESH_TOKEN_COOKIE, refresh.clone(), host);
        }
        if let Some(id_token) = &tokens.id_token {
            jar = self.set(jar, ID_TOKEN_COOKIE, id_token.clone(), host);
        }
        jar
    }

    /// Expire every session cookie
    #[must_use]
    pub fn clear(&self, mut jar: CookieJar, host: Option<&str>) -> CookieJar {
        for name in ALL_COOKIES {
            let mut cookie = self.build(name, String::new(), host);
            cookie.set_max_age(time::Duration::ZERO);
            cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
            jar = jar.add(cookie);
        }
        jar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use pretty_assertions::assert_eq;

    #[test]
    fn tokens_are_read_by_name() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("oidc-token=r; oidc-id_token=i; oidc-access-token="),
        );
        let jar = CookieJar::from_headers(&headers);

        let tokens = SessionTokens::from_jar(&jar);

        assert_eq!(
            tokens,
            SessionTokens {
                refresh_token: Some("r".into()),
                id_token: Some("i".into()),
                access_token: None,
            }
        );
    }

    #[test]
    fn same_site_parsing_falls_back_to_lax() {
        assert_eq!(parse_same_site("Strict"), SameSite::Strict);
        assert_eq!(parse_same_site("none"), SameSite::None);
        assert_eq!(parse_same_site("LAX"), SameSite::Lax);
        assert_eq!(parse_same_site("sideways"), SameSite::Lax);
    }

    #[test]
    fn host_has_port_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("app.example.com:8443"));
        assert_eq!(
            request_host(&headers, &Uri::from_static("/")).as_deref(),
            Some("app.example.com")
        );

        headers.insert(HOST, HeaderValue::from_static("[::1]:8080"));
        assert_eq!(
            request_host(&headers, &Uri::from_static("/")).as_deref(),
            Some("::1")
        );

        let uri = Uri::from_static("https://h2.example.com/path");
        assert_eq!(
            request_host(&HeaderMap::new(), &uri).as_deref(),
            Some("h2.example.com")
        );
    }

    #[test]
    fn cookies_carry_session_attributes() {
        let settings = CookieSettings::new("Strict");
        let jar = settings.set(CookieJar::new(), ID_TOKEN_COOKIE, "abc", Some("app.example.com"));

        let cookie = jar.get(ID_TOKEN_COOKIE).unwrap();

        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.domain(), Some("app.example.com"));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        let expires = cookie.expires_datetime().unwrap();
        assert!(expires.year() > OffsetDateTime::now_utc().year() + 900);
    }

    #[test]
    fn store_keeps_absent_tokens_untouched() {
        let settings = CookieSettings::new("Lax");
        let tokens = TokenSet {
            access_token: "a".into(),
            refresh_token: None,
            id_token: Some("i".into()),
        };

        let jar = settings.store(CookieJar::new(), &tokens, None);

        assert_eq!(jar.get(ACCESS_TOKEN_COOKIE).map(Cookie::value), Some("a"));
        assert_eq!(jar.get(ID_TOKEN_COOKIE).map(Cookie::value), Some("i"));
        assert!(jar.get(REFRESH_TOKEN_COOKIE).is_none());
    }

    #[test]
    fn clear_expires_all_cookies() {
        let settings = CookieSettings::new("Lax");
        let jar = settings.clear(CookieJar::new(), Some("app.example.com"));

        for name in ALL_COOKIES {
            let cookie = jar.get(name).unwrap();
            assert_eq!(cookie.value(), "");
            assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
        }
    }
}
