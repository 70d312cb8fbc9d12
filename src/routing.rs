//! Longest-prefix upstream routing.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Request, State},
    response::{IntoResponse, Response},
};
use oidc_proxy_core::longest_prefix;
use tracing::{info, warn};

use crate::config::Config;
use crate::proxy::{self, ProxyHandler};
use crate::{Error, Result};

/// Something that can answer a routed request.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Serve the request. Failures are reported as responses.
    async fn serve(&self, request: Request<Body>) -> Response;
}

/// A registered prefix and its handler.
#[derive(Clone)]
pub struct Route {
    /// Literal path prefix
    pub prefix: String,
    /// Handler for matching requests
    pub handler: Arc<dyn Upstream>,
}

impl Route {
    /// Create a route
    pub fn new(prefix: impl Into<String>, handler: Arc<dyn Upstream>) -> Self {
        Self {
            prefix: prefix.into(),
            handler,
        }
    }
}

/// Immutable, ordered route table.
pub struct UpstreamRouter {
    routes: Vec<Route>,
}

impl UpstreamRouter {
    /// Create from routes in registration order
    #[must_use]
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// Build one proxy handler per configured upstream, all sharing one
    /// pooled client.
    ///
    /// # Errors
    ///
    /// Returns an error if an upstream URL is invalid or the client cannot be
    /// built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = proxy::build_client(&config.proxy)?;
        let mut routes = Vec::with_capacity(config.upstreams.len());
        for upstream in &config.upstreams {
            let target = upstream.target()?;
            let prefix = upstream.prefix()?;
            info!(prefix = %prefix, upstream = %proxy::redact_url(&target), "Registered upstream");
            routes.push(Route::new(
                prefix,
                Arc::new(ProxyHandler::new(target, client.clone())),
            ));
        }
        Ok(Self::new(routes))
    }

    /// Registered routes
    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Route with the longest prefix of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoUpstream`] if no prefix matches.
    pub fn select(&self, path: &str) -> Result<&Route> {
        longest_prefix(&self.routes, path, |route| route.prefix.as_str())
            .ok_or_else(|| Error::NoUpstream(path.to_string()))
    }

    /// Dispatch a request, answering 502 when nothing matches.
    pub async fn serve(&self, request: Request<Body>) -> Response {
        match self.select(request.uri().path()) {
            Ok(route) => route.handler.serve(request).await,
            Err(e) => {
                warn!(path = %request.uri().path(), "No upstream matched");
                e.into_response()
            }
        }
    }
}

/// Fallback handler dispatching through the shared router
pub async fn route_request(
    State(router): State<Arc<UpstreamRouter>>,
    request: Request<Body>,
) -> Response {
    router.serve(request).await
}
