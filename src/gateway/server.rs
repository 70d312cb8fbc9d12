//! Gateway server

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use url::Url;

use super::router::create_router;
use crate::config::Config;
use crate::oidc::OidcProvider;
use crate::routing::UpstreamRouter;
use crate::{Error, Result};

/// OIDC proxy server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Discovered provider, shared read-only
    provider: Arc<OidcProvider>,
    /// Upstream route table
    upstreams: Arc<UpstreamRouter>,
}

impl Gateway {
    /// Create a new gateway.
    ///
    /// Upstreams are built first so a bad URL fails before any network
    /// traffic; provider discovery failure is fatal.
    pub async fn new(config: Config) -> Result<Self> {
        let upstreams = Arc::new(UpstreamRouter::from_config(&config)?);

        let provider = OidcProvider::discover(&config.oidc)
            .await
            .map_err(Error::Discovery)?;
        info!(
            issuer = %provider.metadata().issuer,
            userinfo = provider.metadata().userinfo_endpoint.is_some(),
            "Discovered OIDC provider"
        );

        Ok(Self {
            config,
            provider: Arc::new(provider),
            upstreams,
        })
    }

    /// Discovered provider
    #[must_use]
    pub fn provider(&self) -> &OidcProvider {
        &self.provider
    }

    /// Configured `(prefix, target)` pairs in registration order
    #[must_use]
    pub fn upstream_targets(&self) -> Vec<(String, Url)> {
        self.config
            .upstreams
            .iter()
            .filter_map(|u| Some((u.prefix().ok()?, u.target().ok()?)))
            .collect()
    }

    /// The HTTP application
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(
            self.provider.clone(),
            Arc::clone(&self.upstreams),
            &self.config.oidc,
        )
    }

    /// Run the gateway until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = self.router();
        let listener = TcpListener::bind(addr).await?;
        info!(address = %addr, "OIDC proxy listening");

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        let mut drain_rx = shutdown_tx.subscribe();
        let drain_timeout = self.config.server.shutdown_timeout;

        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(shutdown_tx));

        // In-flight requests get `shutdown_timeout` to finish after the signal
        let drain_deadline = async move {
            let _ = drain_rx.recv().await;
            tokio::time::sleep(drain_timeout).await;
        };

        tokio::select! {
            result = server.into_future() => result?,
            () = drain_deadline => {
                warn!(timeout = ?drain_timeout, "Graceful shutdown timed out, dropping open connections");
            }
        }

        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
