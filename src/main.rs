//! B2 Gateway - HTTP front for browser file operations on Backblaze B2.
//!
//! This binary starts the HTTP server and configures all components.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use b2_gateway::{
    config::{CheckConfig, Cli, Command, ServeConfig},
    create_router,
    gateway::Gateway,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Check(config) => run_check(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let settings = config.gateway_settings();

    info!("B2 Gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Auth URL: {}", config.provider.auth_url);
    info!("  Bucket id: {}", settings.bucket_id);
    info!("  Root prefix: {}", settings.root_prefix);
    info!(
        "  Folder scoping: {}",
        if settings.folder_scoping { "on" } else { "off" }
    );
    info!("  Session TTL: {}s", settings.session_ttl.as_secs());
    match config.cors_origins {
        Some(ref origins) => info!("  CORS origins: {}", origins.join(", ")),
        None => warn!("  CORS: any origin allowed"),
    }

    let client = match config.provider.build_client() {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create provider client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let gateway = Gateway::new(client, settings);

    // Authorize up front so bad credentials fail at startup, not on first request
    info!("Authorizing with B2...");
    match gateway.authorize().await {
        Ok(session) => {
            info!("  Authorized, API URL: {}", session.api_url);
        }
        Err(e) => {
            error!("  Authorization failed: {}", e);
            error!("  Please check B2_KEY_ID, B2_APP_KEY and the auth URL");
            return ExitCode::FAILURE;
        }
    }

    let router = create_router(gateway, config.router_config());
    let addr = config.bind_address();

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("Server listening on: http://{}", addr);
    info!("  curl http://{}/health", addr);
    info!("  curl 'http://{}/api/files?action=folders'", addr);

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}

/// Resolve when the process receives Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "b2_gateway=debug,tower_http=debug"
    } else {
        "b2_gateway=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    println!("B2 Gateway Configuration Check");
    println!("══════════════════════════════");
    println!();

    if let Err(e) = config.provider.validate() {
        println!("✗ Configuration: {}", e);
        return ExitCode::FAILURE;
    }
    println!("✓ Auth URL: {}", config.provider.auth_url);
    println!("✓ Root prefix: {}", config.provider.root_prefix);
    println!();

    let client = match config.provider.build_client() {
        Ok(client) => client,
        Err(e) => {
            println!("✗ HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let gateway = Gateway::new(client, config.provider.gateway_settings());

    print!("Authorizing... ");
    match gateway.authorize().await {
        Ok(session) => {
            println!("✓ success");
            println!("  API URL: {}", session.api_url);
            println!("  Download URL: {}", session.download_url);
        }
        Err(e) => {
            println!("✗ failed");
            println!();
            println!("Error: {}", e);
            println!();
            println!("Please check:");
            println!("  - B2_KEY_ID and B2_APP_KEY are correct");
            println!("  - The key has not been deleted or expired");
            return ExitCode::FAILURE;
        }
    }

    print!("Resolving bucket... ");
    match gateway.bucket_name().await {
        Ok(name) => println!("✓ {}", name),
        Err(e) => {
            println!("✗ failed");
            println!();
            println!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if config.list_folders {
        println!();
        println!("Folders under '{}':", config.provider.root_prefix);
        println!("─────────────────");

        match gateway.list_folders().await {
            Ok(folders) if folders.is_empty() => println!("  (no folders found)"),
            Ok(folders) => {
                for folder in &folders {
                    println!("  {}", folder);
                }
                println!();
                println!("Total: {} folder(s)", folders.len());
            }
            Err(e) => println!("  Error listing folders: {}", e),
        }
    }

    println!();
    println!("══════════════════════════════");
    println!("✓ All checks passed!");

    ExitCode::SUCCESS
}
