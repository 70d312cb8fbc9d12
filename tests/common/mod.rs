//! Shared fixtures: a wiremock OpenID provider, HS256 token minting and an
//! upstream that echoes what it received.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::{
    Json,
    body::Body,
    extract::Request,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oidc_proxy::config::{ClientCredentials, OidcConfig};
use oidc_proxy::oidc::OidcProvider;
use oidc_proxy::routing::Upstream;

pub const CLIENT_ID: &str = "gateway";
pub const CLIENT_SECRET: &str = "s3cret";
pub const KEY_ID: &str = "test-key";
pub const SUBJECT: &str = "user-123";

/// Base64 of this key is identical in every alphabet, so the JWK `k` value
/// decodes the same regardless of padding rules.
const SIGNING_SECRET: &[u8] = b"oidc-proxy-integration-test-hmac-key";

pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Sign arbitrary claims with the test key.
pub fn sign(claims: &Value) -> String {
    sign_with_kid(claims, KEY_ID)
}

/// Sign with the test key but advertise another `kid`.
pub fn sign_with_kid(claims: &Value, kid: &str) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(SIGNING_SECRET)).unwrap()
}

/// Sign with a key the provider does not publish.
pub fn sign_with_foreign_key(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(KEY_ID.to_string());
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(b"not-the-published-key")).unwrap()
}

/// A wiremock server speaking just enough OpenID Connect.
pub struct TestProvider {
    pub server: MockServer,
}

impl TestProvider {
    /// Start the server with discovery and JWKS mounted.
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let issuer = server.uri();

        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": issuer,
                "authorization_endpoint": format!("{issuer}/authorize"),
                "token_endpoint": format!("{issuer}/token"),
                "userinfo_endpoint": format!("{issuer}/userinfo"),
                "jwks_uri": format!("{issuer}/certs"),
                "scopes_supported": ["openid", "email", "profile"],
                "id_token_signing_alg_values_supported": ["RS256", "HS256"]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/certs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": [{
                    "kty": "oct",
                    "kid": KEY_ID,
                    "alg": "HS256",
                    "k": URL_SAFE_NO_PAD.encode(SIGNING_SECRET)
                }]
            })))
            .mount(&server)
            .await;

        Self { server }
    }

    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub fn oidc_config(&self) -> OidcConfig {
        OidcConfig {
            issuer_uri: self.issuer(),
            client: ClientCredentials {
                id: CLIENT_ID.into(),
                secret: CLIENT_SECRET.into(),
            },
            redirect_uri: "https://app.example.com/auth/callback".into(),
            scopes: vec!["email".into(), "profile".into()],
            ..OidcConfig::default()
        }
    }

    /// Run discovery against the mock.
    pub async fn provider(&self) -> Arc<OidcProvider> {
        Arc::new(OidcProvider::discover(&self.oidc_config()).await.unwrap())
    }

    /// Standard ID token claims expiring `ttl_secs` from now (negative for
    /// already expired).
    pub fn claims(&self, ttl_secs: i64) -> Value {
        json!({
            "iss": self.issuer(),
            "sub": SUBJECT,
            "aud": CLIENT_ID,
            "iat": now() - 10,
            "exp": now() + ttl_secs,
            "email": "alice@example.com",
            "preferred_username": "alice",
            "groups": ["admin", "dev"]
        })
    }

    /// A valid ID token.
    pub fn id_token(&self) -> String {
        sign(&self.claims(3600))
    }

    /// An ID token that expired an hour ago.
    pub fn expired_id_token(&self) -> String {
        sign(&self.claims(-3600))
    }

    /// Answer a grant type at the token endpoint.
    pub async fn token_endpoint(&self, grant_type: &str, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains(format!("grant_type={grant_type}")))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    /// How many times the JWKS has been downloaded.
    pub async fn jwks_fetches(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/certs")
            .count()
    }

    /// Answer `UserInfo` requests.
    pub async fn userinfo(&self, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }
}

/// Upstream that reports the path and headers it was called with.
pub struct Echo;

#[async_trait]
impl Upstream for Echo {
    async fn serve(&self, request: Request<Body>) -> Response {
        Json(json!({
            "path": request.uri().path(),
            "headers": header_map(request.headers()),
        }))
        .into_response()
    }
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
        .collect()
}

/// Collect a response body as JSON.
pub async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Collect a response body as text.
pub async fn text_body(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// All `Set-Cookie` values on a response.
pub fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(axum::http::header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// The `Set-Cookie` value for one cookie name.
pub fn set_cookie<'a>(cookies: &'a [String], name: &str) -> Option<&'a String> {
    let prefix = format!("{name}=");
    cookies.iter().find(|c| c.starts_with(&prefix))
}

/// Value part of a `Set-Cookie` header.
pub fn cookie_value(set_cookie: &str) -> &str {
    set_cookie
        .split(';')
        .next()
        .and_then(|pair| pair.split_once('='))
        .map_or("", |(_, value)| value)
}
