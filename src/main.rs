use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

mod cli;

use sso_gateway::config::{self, Config, DirectorySource};
use sso_gateway::directory::{InMemoryDirectory, PgDirectory, UserDirectory};
use sso_gateway::keys::{self, EnvKeyProvider, KeyProvider, StaticKeyProvider};
use sso_gateway::token::IssueRequest;
use sso_gateway::{api, telemetry, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init()?;

    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(port).await,
        Some(cli::Commands::Token { command }) => handle_token_command(command).await,
        Some(cli::Commands::Keygen) => {
            println!("{}", keys::generate_secret_hex());
            Ok(())
        }
        None => run_server(None).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn build_directory(cfg: &Config) -> anyhow::Result<Arc<dyn UserDirectory>> {
    match &cfg.directory {
        DirectorySource::Postgres(url) => {
            tracing::info!("Connecting to user directory database...");
            let db = PgDirectory::connect(url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            Ok(Arc::new(db))
        }
        DirectorySource::File(path) => {
            let dir = InMemoryDirectory::from_json_file(path)?;
            tracing::info!(users = dir.len(), path = %path, "Loaded user directory file");
            Ok(Arc::new(dir))
        }
    }
}

fn key_provider(cfg: &Config) -> anyhow::Result<Arc<dyn KeyProvider>> {
    Ok(Arc::new(StaticKeyProvider::new(cfg.signing_secret.as_bytes())?))
}

async fn run_server(port: Option<u16>) -> anyhow::Result<()> {
    // Fails closed: no secret, no server.
    let cfg = config::load()?;
    let port = port.unwrap_or(cfg.port);

    let directory = build_directory(&cfg).await?;
    let state = Arc::new(AppState::new(&cfg, key_provider(&cfg)?, directory));

    tracing::info!(
        generate_max = cfg.generate_limit.max_requests,
        generate_window_secs = cfg.generate_limit.window.as_secs(),
        validate_max = cfg.validate_limit.max_requests,
        validate_window_secs = cfg.validate_limit.window.as_secs(),
        trusted_proxy_hops = cfg.trusted_proxy_hops,
        "rate limits configured (per instance)"
    );

    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("SSO gateway listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn handle_token_command(cmd: cli::TokenCommands) -> anyhow::Result<()> {
    match cmd {
        cli::TokenCommands::Issue {
            user_id,
            target_app,
            expires_in,
            permissions,
        } => {
            let cfg = config::load()?;
            let directory = build_directory(&cfg).await?;
            let state = AppState::new(&cfg, key_provider(&cfg)?, directory);

            let issued = state
                .issuer
                .issue(
                    IssueRequest::new(user_id, target_app)
                        .expires_in(expires_in)
                        .permissions(permissions.unwrap_or_default()),
                )
                .await?;
            println!(
                "Token issued:\n  User:    {} <{}>\n  Expires: {}\n  Token:   {}",
                issued.user.id,
                issued.user.email,
                chrono::DateTime::from_timestamp_millis(issued.expires_at)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| issued.expires_at.to_string()),
                issued.token
            );
        }
        cli::TokenCommands::Verify { token, require } => {
            // Only the key is needed to verify; no directory.
            dotenvy::dotenv().ok();
            let keys: Arc<dyn KeyProvider> = Arc::new(EnvKeyProvider::from_env()?);
            let validator = sso_gateway::token::TokenValidator::new(keys);
            match validator.validate(&token, &require.unwrap_or_default()) {
                Ok(v) => println!("{}", serde_json::to_string_pretty(&v)?),
                Err(e) => anyhow::bail!("token rejected: {}", e),
            }
        }
    }
    Ok(())
}
