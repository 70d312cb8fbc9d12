//! Reverse proxy handler.
//!
//! One [`ProxyHandler`] is bound to one upstream base URL. Request and
//! response bodies are streamed through without buffering.

pub mod tls;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{Body, HttpBody},
    extract::{ConnectInfo, Request},
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri,
        header::{CONNECTION, HOST},
        uri::Scheme,
    },
    response::{IntoResponse, Response},
};
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ProxyConfig;
use crate::routing::Upstream;
use crate::Result;

/// `X-Forwarded-Host`
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
/// `X-Forwarded-Proto`
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
/// `X-Forwarded-For`
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Headers that apply to a single connection and are never forwarded
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// What the observer sees once the upstream has answered.
#[derive(Debug, Clone)]
pub struct ProxyEvent {
    /// Request method
    pub method: Method,
    /// Upstream URL with any password replaced by `xxxxx`
    pub url: String,
    /// Response `Content-Length`, when known
    pub content_length: Option<u64>,
    /// Response status
    pub status: StatusCode,
}

/// Non-mutating callback fired after each upstream response.
pub type Observer = Arc<dyn Fn(&ProxyEvent) + Send + Sync>;

/// Default observer: one structured log line per proxied request.
pub fn log_event(event: &ProxyEvent) {
    info!(
        method = %event.method,
        url = %event.url,
        content_length = ?event.content_length,
        status = event.status.as_u16(),
        "Upstream responded"
    );
}

/// Build the pooled upstream HTTP client.
///
/// # Errors
///
/// Returns an error if the TLS configuration or client cannot be built.
pub fn build_client(config: &ProxyConfig) -> Result<Client> {
    let tls = tls::client_config(config.min_tls_version, config.ca_file.as_deref())?;
    let client = Client::builder()
        .use_preconfigured_tls(tls)
        .connect_timeout(config.connect_timeout)
        .pool_idle_timeout(config.pool_idle_timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        // Redirects are the browser's business
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    Ok(client)
}

/// Replace any password in `url` with `xxxxx`.
#[must_use]
pub fn redact_url(url: &Url) -> String {
    if url.password().is_none() {
        return url.to_string();
    }
    let mut redacted = url.clone();
    let _ = redacted.set_password(Some("xxxxx"));
    redacted.to_string()
}

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in named.iter().map(String::as_str).chain(HOP_BY_HOP) {
        headers.remove(name);
    }
}

/// Forwards requests to a single upstream.
pub struct ProxyHandler {
    target: Url,
    client: Client,
    observer: Observer,
}

impl ProxyHandler {
    /// Create a handler for `target` using a shared client
    #[must_use]
    pub fn new(target: Url, client: Client) -> Self {
        Self {
            target,
            client,
            observer: Arc::new(log_event),
        }
    }

    /// Replace the response observer
    #[must_use]
    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = observer;
        self
    }

    /// Upstream base URL
    #[must_use]
    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Upstream URL for an inbound URI: target scheme and authority, inbound
    /// path and query.
    #[must_use]
    pub fn upstream_url(&self, uri: &Uri) -> Url {
        let mut url = self.target.clone();
        url.set_path(uri.path());
        url.set_query(uri.query());
        url
    }

    /// Forward a request and stream the upstream response back.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Http`] if the upstream cannot be reached.
    pub async fn forward(&self, request: Request<Body>) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let url = self.upstream_url(&parts.uri);

        let mut headers = parts.headers;
        let inbound_host = headers
            .get(HOST)
            .cloned()
            .or_else(|| {
                parts
                    .uri
                    .authority()
                    .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
            });
        let inbound_proto = if parts.uri.scheme() == Some(&Scheme::HTTPS) {
            "https"
        } else {
            "http"
        };
        let client_ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        strip_hop_by_hop(&mut headers);
        // Host is derived from the upstream URL
        headers.remove(HOST);
        if let Some(host) = inbound_host {
            headers.insert(X_FORWARDED_HOST, host);
        }
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(inbound_proto));
        if let Some(ip) = client_ip {
            append_forwarded_for(&mut headers, &ip.to_string());
        }

        let mut upstream_request = self
            .client
            .request(parts.method.clone(), url.clone())
            .headers(headers);
        if body.size_hint().exact() != Some(0) {
            upstream_request =
                upstream_request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        debug!(method = %parts.method, url = %redact_url(&url), "Forwarding request");
        let upstream = upstream_request.send().await?;

        let status = upstream.status();
        (self.observer)(&ProxyEvent {
            method: parts.method,
            url: redact_url(&url),
            content_length: upstream.content_length(),
            status,
        });

        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: &str) {
    let prior: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let value = if prior.is_empty() {
        ip.to_string()
    } else {
        format!("{}, {ip}", prior.join(", "))
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

#[async_trait]
impl Upstream for ProxyHandler {
    async fn serve(&self, request: Request<Body>) -> Response {
        match self.forward(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(target = %redact_url(&self.target), error = %e, "Upstream request failed");
                e.into_response()
            }
        }
    }
}
