//! Authorization endpoints under `/auth`.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode, Uri, header::LOCATION},
    response::{Html, IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use base64::{
    Engine as _,
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::cookies::{CookieSettings, request_host};
use crate::oidc::IdentityProvider;

/// State shared by the auth endpoints
#[derive(Clone)]
pub struct AuthState {
    /// Provider used for code exchange and verification
    pub provider: Arc<dyn IdentityProvider>,
    /// Session cookie attributes
    pub cookies: CookieSettings,
}

/// OAuth callback query parameters
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// Opaque state; carries the path to return to
    pub state: Option<String>,

    /// Error code
    pub error: Option<String>,

    /// Error description
    pub error_description: Option<String>,
}

/// `?path=` parameter of `/auth/redirect`
#[derive(Debug, Default, Deserialize)]
pub struct RedirectParams {
    /// Path to return to after sign-in
    pub path: Option<String>,
}

/// Encode a return path as `state`.
#[must_use]
pub fn encode_state(path: &str) -> String {
    URL_SAFE.encode(path.as_bytes())
}

/// Decode `state` into a same-origin absolute path, falling back to `/`.
#[must_use]
pub fn decode_state(state: Option<&str>) -> String {
    state
        .and_then(|s| {
            URL_SAFE
                .decode(s)
                .or_else(|_| URL_SAFE_NO_PAD.decode(s))
                .ok()
        })
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .filter(|path| is_local_path(path))
        .unwrap_or_else(|| "/".to_string())
}

/// `/x` is local; `//host`, `/\host` and anything with a scheme are not.
fn is_local_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.starts_with("//")
        && !path.starts_with("/\\")
        && !path.chars().any(char::is_control)
}

/// `GET /auth/sign_in`: the authorization URL as plain text.
pub async fn sign_in(State(auth): State<AuthState>) -> String {
    let url = auth.provider.authorization_url(&encode_state("/"));
    debug!(url = %url, "Fetching redirect URI");
    url
}

/// `GET /auth/redirect`: 302 to the provider, remembering `?path=`.
pub async fn redirect(
    State(auth): State<AuthState>,
    Query(params): Query<RedirectParams>,
) -> Response {
    let path = params
        .path
        .filter(|p| is_local_path(p))
        .unwrap_or_else(|| "/".to_string());
    let url = auth.provider.authorization_url(&encode_state(&path));
    debug!(path = %path, url = %url, "Redirecting request to provider");
    (StatusCode::FOUND, [(LOCATION, url)]).into_response()
}

/// `GET /auth/callback`: exchange the code, set cookies, bounce back.
pub async fn callback(
    State(auth): State<AuthState>,
    headers: HeaderMap,
    uri: Uri,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    if let Some(error) = params.error {
        let description = params
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "Provider returned an authorization error");
        return error_response(&error, &description);
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return error_response("missing_code", "Authorization code not provided");
    };

    let tokens = match auth.provider.exchange_code(&code).await {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!(error = %e, "Failed to exchange authorization code");
            return error_response("exchange_failed", &e.to_string());
        }
    };

    let raw = match tokens.require_id_token() {
        Ok(raw) => raw,
        Err(e) => {
            info!("{e}");
            return error_response("missing_id_token", &e.to_string());
        }
    };

    let id_token = match auth.provider.verify(raw).await {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %e, "Failed to verify OIDC token");
            return error_response("invalid_id_token", &e.to_string());
        }
    };
    info!(sub = %id_token.subject, iss = %id_token.issuer, "Identified OIDC user");

    let target = decode_state(params.state.as_deref());
    let host = request_host(&headers, &uri);
    let jar = auth.cookies.store(jar, &tokens, host.as_deref());
    debug!(target = %target, "Redirecting user after successful callback");

    (jar, Html(bounce_page(&target))).into_response()
}

/// `GET /auth/sign_out`: expire the session cookies and bounce home.
pub async fn sign_out(
    State(auth): State<AuthState>,
    headers: HeaderMap,
    uri: Uri,
    jar: CookieJar,
) -> Response {
    let host = request_host(&headers, &uri);
    let jar = auth.cookies.clear(jar, host.as_deref());
    (jar, Html(bounce_page("/"))).into_response()
}

fn error_response(error: &str, description: &str) -> Response {
    (StatusCode::BAD_REQUEST, Html(error_page(error, description))).into_response()
}

/// Minimal HTML escaping for text and attribute values
fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Page that lets the browser commit `Set-Cookie` before navigating.
fn bounce_page(target: &str) -> String {
    let href = escape_html(target);
    // JSON string literal; `<` is escaped so the value cannot close the script tag
    let js = serde_json::to_string(target)
        .unwrap_or_else(|_| "\"/\"".to_string())
        .replace('<', "\\u003c");
    format!(r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta http-equiv="refresh" content="0;url={href}">
    <title>Signing in</title>
</head>
<body>
    <p>Signing in. <a href="{href}">Continue</a></p>
    <script>window.location.replace({js});</script>
</body>
</html>"#)
}

fn error_page(error: &str, description: &str) -> String {
    let error = escape_html(error);
    let description = escape_html(description);
    format!(r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Sign-in Failed</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
        }}
        .container {{ text-align: center; padding: 2rem; max-width: 480px; }}
        .error-code {{ font-family: monospace; margin-top: 1rem; opacity: 0.7; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Sign-in Failed</h1>
        <p>{description}</p>
        <p class="error-code">Error: {error}</p>
        <p><a href="/auth/redirect">Try again</a></p>
    </div>
</body>
</html>"#)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_callback_params_deserialize() {
        let params: CallbackParams =
            serde_urlencoded::from_str("code=abc123&state=L2FwcC9ob21l").unwrap();

        assert_eq!(params.code, Some("abc123".to_string()));
        assert_eq!(params.state, Some("L2FwcC9ob21l".to_string()));
        assert!(params.error.is_none());
    }

    #[test]
    fn state_round_trips_the_path() {
        let state = encode_state("/app/home?tab=1");
        assert_eq!(decode_state(Some(&state)), "/app/home?tab=1");
    }

    #[test]
    fn state_without_padding_is_accepted() {
        let state = URL_SAFE_NO_PAD.encode("/ab");
        assert_eq!(decode_state(Some(&state)), "/ab");
    }

    #[test]
    fn off_origin_targets_fall_back_to_root() {
        for target in ["//evil.example", "https://evil.example/", "/\\evil.example", "app"] {
            let state = encode_state(target);
            assert_eq!(decode_state(Some(&state)), "/", "target {target}");
        }
    }

    #[test]
    fn missing_or_garbage_state_falls_back_to_root() {
        assert_eq!(decode_state(None), "/");
        assert_eq!(decode_state(Some("***")), "/");
        // "state" is the literal the sign-in endpoint used to send
        assert_eq!(decode_state(Some("state")), "/");
    }

    #[test]
    fn bounce_page_escapes_target() {
        let page = bounce_page("/a\"><script>alert(1)</script>");
        assert!(!page.contains("<script>alert"));
        assert!(page.contains("&quot;&gt;&lt;script&gt;"));
        assert!(page.contains("\\u003cscript>alert(1)\\u003c/script>"));
    }

    #[test]
    fn error_page_escapes_description() {
        let page = error_page("bad", "<b>oops</b>");
        assert!(page.contains("&lt;b&gt;oops&lt;/b&gt;"));
    }
}
