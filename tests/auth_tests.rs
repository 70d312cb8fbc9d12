//! `/auth/*` endpoint tests against a mock OpenID provider.

mod common;

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use pretty_assertions::assert_eq;
use serde_json::json;
use tower::ServiceExt;
use url::Url;
use wiremock::ResponseTemplate;

use common::{CLIENT_ID, Echo, TestProvider, cookie_value, set_cookie, set_cookies, text_body};
use oidc_proxy::gateway::create_router;
use oidc_proxy::routing::{Route, UpstreamRouter};

async fn app(idp: &TestProvider) -> Router {
    let upstreams = UpstreamRouter::new(vec![Route::new("/", Arc::new(Echo))]);
    create_router(idp.provider().await, Arc::new(upstreams), &idp.oidc_config())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, "app.example.com:8443")
        .body(Body::empty())
        .unwrap()
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

fn decoded_state(url: &Url) -> String {
    let state = query_param(url, "state").expect("state parameter");
    String::from_utf8(URL_SAFE.decode(state).unwrap()).unwrap()
}

#[tokio::test]
async fn sign_in_returns_authorization_url() {
    let idp = TestProvider::start().await;
    let app = app(&idp).await;

    let response = app.oneshot(get("/auth/sign_in")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let url = Url::parse(&text_body(response).await).unwrap();
    assert!(url.as_str().starts_with(&format!("{}/authorize?", idp.issuer())));
    assert_eq!(query_param(&url, "client_id").as_deref(), Some(CLIENT_ID));
    assert_eq!(query_param(&url, "response_type").as_deref(), Some("code"));
    assert_eq!(
        query_param(&url, "redirect_uri").as_deref(),
        Some("https://app.example.com/auth/callback")
    );
    assert_eq!(
        query_param(&url, "scope").as_deref(),
        Some("email profile openid")
    );
    assert_eq!(decoded_state(&url), "/");
}

#[tokio::test]
async fn redirect_remembers_requested_path() {
    let idp = TestProvider::start().await;
    let app = app(&idp).await;

    let response = app
        .oneshot(get("/auth/redirect?path=%2Freports%2Fq3"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    let url = Url::parse(location).unwrap();
    assert_eq!(url.path(), "/authorize");
    assert_eq!(decoded_state(&url), "/reports/q3");
}

#[tokio::test]
async fn redirect_ignores_offsite_path() {
    let idp = TestProvider::start().await;
    let app = app(&idp).await;

    let response = app
        .oneshot(get("/auth/redirect?path=%2F%2Fevil.example"))
        .await
        .unwrap();

    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert_eq!(decoded_state(&Url::parse(location).unwrap()), "/");
}

#[tokio::test]
async fn callback_sets_session_cookies_and_bounces() {
    // GIVEN: a token endpoint that accepts the authorization code
    let idp = TestProvider::start().await;
    let id_token = idp.id_token();
    idp.token_endpoint(
        "authorization_code",
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "token_type": "Bearer",
            "refresh_token": "refresh-1",
            "id_token": id_token,
        })),
    )
    .await;
    let app = app(&idp).await;
    let state = URL_SAFE.encode("/reports");

    // WHEN: the browser returns from the provider
    let response = app
        .oneshot(get(&format!("/auth/callback?code=abc&state={state}")))
        .await
        .unwrap();

    // THEN: all session cookies are set for the request host
    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 3);
    for cookie in &cookies {
        assert!(cookie.contains("HttpOnly"), "{cookie}");
        assert!(cookie.contains("Secure"), "{cookie}");
        assert!(cookie.contains("SameSite=Lax"), "{cookie}");
        assert!(cookie.contains("Path=/"), "{cookie}");
        assert!(cookie.contains("Domain=app.example.com"), "{cookie}");
    }
    assert_eq!(
        set_cookie(&cookies, "oidc-id_token").map(|c| cookie_value(c)),
        Some(id_token.as_str())
    );
    assert_eq!(
        set_cookie(&cookies, "oidc-token").map(|c| cookie_value(c)),
        Some("refresh-1")
    );
    assert_eq!(
        set_cookie(&cookies, "oidc-access-token").map(|c| cookie_value(c)),
        Some("access-1")
    );

    let page = text_body(response).await;
    assert!(page.contains(r#"window.location.replace("/reports")"#));
    assert!(page.contains(r#"content="0;url=/reports""#));
}

#[tokio::test]
async fn callback_with_provider_error_is_bad_request() {
    let idp = TestProvider::start().await;
    let app = app(&idp).await;

    let response = app
        .oneshot(get(
            "/auth/callback?error=access_denied&error_description=User%20declined",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(set_cookies(&response).is_empty());
    let page = text_body(response).await;
    assert!(page.contains("User declined"));
    assert!(page.contains("access_denied"));
}

#[tokio::test]
async fn callback_without_code_is_bad_request() {
    let idp = TestProvider::start().await;
    let app = app(&idp).await;

    let response = app.oneshot(get("/auth/callback?state=Lw==")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn callback_with_rejected_code_is_bad_request() {
    let idp = TestProvider::start().await;
    idp.token_endpoint(
        "authorization_code",
        ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})),
    )
    .await;
    let app = app(&idp).await;

    let response = app.oneshot(get("/auth/callback?code=stale")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(set_cookies(&response).is_empty());
}

#[tokio::test]
async fn callback_with_unverifiable_id_token_is_bad_request() {
    let idp = TestProvider::start().await;
    let forged = common::sign_with_foreign_key(&idp.claims(3600));
    idp.token_endpoint(
        "authorization_code",
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "token_type": "Bearer",
            "id_token": forged,
        })),
    )
    .await;
    let app = app(&idp).await;

    let response = app.oneshot(get("/auth/callback?code=abc")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(set_cookies(&response).is_empty());
}

#[tokio::test]
async fn callback_without_id_token_is_bad_request() {
    let idp = TestProvider::start().await;
    idp.token_endpoint(
        "authorization_code",
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "token_type": "Bearer",
        })),
    )
    .await;
    let app = app(&idp).await;

    let response = app.oneshot(get("/auth/callback?code=abc")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sign_out_expires_session_cookies() {
    let idp = TestProvider::start().await;
    let app = app(&idp).await;

    let mut request = get("/auth/sign_out");
    request.headers_mut().insert(
        header::COOKIE,
        "oidc-token=r; oidc-id_token=i; oidc-access-token=a"
            .parse()
            .unwrap(),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    for name in ["oidc-token", "oidc-id_token", "oidc-access-token"] {
        let cookie = set_cookie(&cookies, name).unwrap_or_else(|| panic!("{name} cleared"));
        assert_eq!(cookie_value(cookie), "");
        assert!(cookie.contains("Max-Age=0"), "{cookie}");
    }
    assert!(text_body(response).await.contains(r#"window.location.replace("/")"#));
}
