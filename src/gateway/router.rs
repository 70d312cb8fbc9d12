//! HTTP router

use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::config::OidcConfig;
use crate::oidc::IdentityProvider;
use crate::routing::{UpstreamRouter, route_request};
use crate::session::{AuthState, CookieSettings, SessionFilter, handlers, session_middleware};

/// Create the router.
///
/// `/auth/*` endpoints are answered locally; every other request passes the
/// session middleware and is routed to an upstream.
pub fn create_router(
    provider: Arc<dyn IdentityProvider>,
    upstreams: Arc<UpstreamRouter>,
    oidc: &OidcConfig,
) -> Router {
    let cookies = CookieSettings::new(&oidc.cookie_same_site);
    let filter = Arc::new(SessionFilter::new(
        Arc::clone(&provider),
        cookies,
        oidc.claims.clone(),
    ));

    let proxied = Router::new()
        .fallback(route_request)
        .layer(middleware::from_fn_with_state(filter, session_middleware))
        .with_state(upstreams);

    Router::new()
        .route("/auth/sign_in", get(handlers::sign_in))
        .route("/auth/redirect", get(handlers::redirect))
        .route("/auth/callback", get(handlers::callback))
        .route("/auth/sign_out", get(handlers::sign_out))
        .with_state(AuthState { provider, cookies })
        .fallback_service(proxied)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}
