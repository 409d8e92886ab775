//! CLI entry point for credvault.
//!
//! This binary provides the `credvault` command for operating a vault
//! deployment: creating the sealed master key, checking stored payloads,
//! and inspecting or disconnecting a single owner's integration.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use credvault_lifecycle::CredentialLifecycleManager;
use credvault_vault::{FileKeyBlobStore, KeyBlobStore, VaultConfig, VaultService};

use crate::config::CliConfig;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// credvault: multi-tenant OAuth credential vault.
#[derive(Parser)]
#[command(
    name = "credvault",
    version,
    about = "Multi-tenant OAuth credential vault",
    long_about = "Stores third-party OAuth credentials encrypted at rest. The encryption \
                  password is read from CREDVAULT_ENCRYPTION_PASSWORD (a .env file is honoured)."
)]
struct Cli {
    /// Path to a TOML config file with [vault] and [providers.*] sections.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and seal the master key blob if none exists.
    Init,

    /// Verify that every stored payload decrypts under the current key.
    Check,

    /// Show the connection status of one owner's integration.
    Status {
        owner_id: String,
        integration_type: String,
    },

    /// Refresh one owner's access token now.
    Refresh {
        owner_id: String,
        integration_type: String,
    },

    /// Deactivate one owner's integration and revoke its token.
    Disconnect {
        owner_id: String,
        integration_type: String,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing("info");

    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref(), |key| std::env::var(key).ok())?;

    match cli.command {
        Commands::Init => cmd_init(&config),
        Commands::Check => cmd_check(&config),
        Commands::Status {
            owner_id,
            integration_type,
        } => cmd_status(&config, &owner_id, &integration_type),
        Commands::Refresh {
            owner_id,
            integration_type,
        } => cmd_refresh(&config, &owner_id, &integration_type).await,
        Commands::Disconnect {
            owner_id,
            integration_type,
        } => cmd_disconnect(&config, &owner_id, &integration_type).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn cmd_init(config: &CliConfig) -> Result<()> {
    let blobs = FileKeyBlobStore::new(&config.vault.key_blob_path);
    let existed = blobs.exists()?;

    // Unsealing an existing blob doubles as a password check.
    bootstrap(&config.vault)?;

    if existed {
        println!(
            "master key already initialized at {} (password verified)",
            blobs.path().display()
        );
    } else {
        println!("sealed new master key at {}", blobs.path().display());
    }
    Ok(())
}

fn cmd_check(config: &CliConfig) -> Result<()> {
    let manager = lifecycle(config)?;
    let report = manager.verify_all()?;

    println!("records checked: {}", report.records);
    println!("records ok:      {}", report.ok);
    println!("records failed:  {}", report.failed.len());
    for id in &report.failed {
        println!("  failed: {id}");
    }

    if !report.is_clean() {
        bail!("{} record(s) failed integrity verification", report.failed.len());
    }
    Ok(())
}

fn cmd_status(config: &CliConfig, owner_id: &str, integration_type: &str) -> Result<()> {
    let manager = lifecycle(config)?;
    let status = manager.status(owner_id, integration_type)?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn cmd_refresh(config: &CliConfig, owner_id: &str, integration_type: &str) -> Result<()> {
    let manager = lifecycle(config)?;
    let credential = manager
        .force_refresh(owner_id, integration_type)
        .await
        .context("token refresh failed")?;

    match credential.expires_at {
        Some(at) => println!("token refreshed, expires at {}", at.to_rfc3339()),
        None => println!("token refreshed"),
    }
    Ok(())
}

async fn cmd_disconnect(config: &CliConfig, owner_id: &str, integration_type: &str) -> Result<()> {
    let manager = lifecycle(config)?;
    if manager.disconnect(owner_id, integration_type).await? {
        println!("disconnected {owner_id}/{integration_type}");
    } else {
        println!("{owner_id}/{integration_type} was not connected");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn bootstrap(vault: &VaultConfig) -> Result<VaultService> {
    let password = VaultConfig::password_from_env()?;
    let service = VaultService::bootstrap(vault.clone(), password.as_bytes())
        .context("failed to start vault service")?;
    info!(database = %vault.database_path.display(), "vault unsealed");
    Ok(service)
}

fn lifecycle(config: &CliConfig) -> Result<CredentialLifecycleManager> {
    let service = bootstrap(&config.vault)?;
    let providers = config.provider_registry()?;
    Ok(CredentialLifecycleManager::new(&service, providers))
}

/// Initialize the tracing subscriber with the given default level.
///
/// The level can be overridden at runtime via the `RUST_LOG` environment
/// variable.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
