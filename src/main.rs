//! OIDC Proxy - authenticating reverse proxy for OpenID Connect sessions

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use oidc_proxy::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    proxy::redact_url,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // Handle subcommands
    match cli.command {
        Some(Command::Check) => run_check(&cli).await,
        Some(Command::Serve) | None => run_server(&cli).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            Some(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Validate configuration and provider discovery without serving
async fn run_check(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let metadata = gateway.provider().metadata();
    println!("✅ Configuration is valid\n");
    println!("Provider: {}", metadata.issuer);
    println!("   Authorization: {}", metadata.authorization_endpoint);
    println!("   Token:         {}", metadata.token_endpoint);
    println!("   JWKS:          {}", metadata.jwks_uri);
    if let Some(ref userinfo) = metadata.userinfo_endpoint {
        println!("   UserInfo:      {userinfo}");
    }
    let algorithms: Vec<String> = gateway
        .provider()
        .algorithms()
        .iter()
        .map(|alg| format!("{alg:?}"))
        .collect();
    println!("   Algorithms:    {}", algorithms.join(", "));

    println!("\nUpstreams:");
    for (prefix, target) in gateway.upstream_targets() {
        println!("   {prefix:<20} → {}", redact_url(&target));
    }

    ExitCode::SUCCESS
}

/// Run the proxy server
async fn run_server(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        upstreams = config.upstreams.len(),
        issuer = %config.oidc.issuer_uri,
        "Starting OIDC proxy"
    );

    // Discovery failure is fatal before serving
    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
