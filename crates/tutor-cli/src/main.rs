//! Tutoring service CLI
//!
//! Loads configuration and credentials, wires the collaborators, and serves
//! the HTTP API until Ctrl+C.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tutor_sandbox::{SandboxManager, SandboxProvider};
use tutor_service::{
    create_router, AnthropicClient, AppState, CompletionClient, Config, Credentials,
    MemoryStorage, MemoryStore, ObjectStorage, Store, StoreBackend, SupabaseClient,
};

/// Tutoring service - chat, practice questions, and explanation videos
#[derive(Parser, Debug)]
#[command(name = "tutor")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: tutor.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port for the HTTP API server (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Environment file to load before reading credentials
    #[arg(long, value_name = "FILE")]
    env_file: Option<PathBuf>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Tutoring service starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads settings, builds every collaborator once, and serves the API.
async fn run(args: Args) -> anyhow::Result<()> {
    load_env_file(args.env_file.as_deref())?;

    let mut config = load_config(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.port = port;
    }
    config.validate()?;

    let credentials = Credentials::from_env(config.store)?;
    tracing::debug!(credentials = ?credentials, "Credentials loaded");

    let completion: Arc<dyn CompletionClient> = Arc::new(AnthropicClient::new(
        credentials.anthropic_api_key.clone(),
        config.fast_model.clone(),
        config.capable_model.clone(),
    ));
    let sandboxes = connect_sandboxes().await?;
    let (store, storage) = build_backends(config.store, &credentials)?;

    print_config(&config);

    let state = AppState::new(
        &config,
        store,
        storage,
        completion,
        sandboxes,
        credentials.clerk_webhook_secret.clone(),
    );
    let router = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind HTTP server to {addr}: {e}"))?;

    println!("HTTP API server running on http://{addr}");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Loads `path`, or `.env` from the working directory when it exists.
fn load_env_file(path: Option<&Path>) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            dotenvy::from_path(path).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to load env file '{}': {e}\n\nSuggestion: Check the path or remove the --env-file flag",
                    path.display()
                )
            })?;
        }
        None => {
            if let Ok(path) = dotenvy::dotenv() {
                tracing::debug!(path = %path.display(), "Loaded .env");
            }
        }
    }
    Ok(())
}

fn load_config(config_path: Option<&Path>) -> anyhow::Result<Config> {
    match config_path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

async fn connect_sandboxes() -> anyhow::Result<Arc<dyn SandboxProvider>> {
    let manager = SandboxManager::new().map_err(|e| {
        anyhow::anyhow!(
            "Docker is not available: {e}\n\nSuggestion: Make sure Docker is installed and running"
        )
    })?;
    manager.health_check().await.map_err(|e| {
        anyhow::anyhow!(
            "Docker health check failed: {e}\n\nSuggestion: Make sure Docker is running and accessible"
        )
    })?;
    Ok(Arc::new(manager))
}

type Backends = (Arc<dyn Store>, Arc<dyn ObjectStorage>);

fn build_backends(backend: StoreBackend, credentials: &Credentials) -> anyhow::Result<Backends> {
    match backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, data will not survive a restart");
            let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
            let storage: Arc<dyn ObjectStorage> = Arc::new(MemoryStorage::new());
            Ok((store, storage))
        }
        StoreBackend::Supabase => {
            let (Some(url), Some(key)) = (
                credentials.supabase_url.as_deref(),
                credentials.supabase_admin_key(),
            ) else {
                anyhow::bail!("Supabase backend selected but SUPABASE_URL or SUPABASE_KEY is unset");
            };
            let client = Arc::new(SupabaseClient::new(url, key));
            let store: Arc<dyn Store> = client.clone();
            let storage: Arc<dyn ObjectStorage> = client;
            Ok((store, storage))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}

fn print_config(config: &Config) {
    println!("Configuration:");
    println!("  Topic:         {}", config.topic);
    println!("  Fast model:    {}", config.fast_model);
    println!("  Capable model: {}", config.capable_model);
    println!("  Sandbox image: {}", config.sandbox.image);
    println!("  Bucket:        {}", config.storage.bucket);
    println!("  Retention:     {}h", config.storage.retention_hours);
}
