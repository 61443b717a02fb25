//! share-ctl - Maintenance commands for Sharecast
//!
//! Batch operations meant for cron (pulling posts, sweeping pending shares,
//! refreshing tokens) plus provider configuration management.

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use libsharecast::logging::{LogFormat, LoggingConfig};
use libsharecast::service::registry::ProviderSnapshot;
use libsharecast::{Config, ProviderRecord, Result, SharecastError, SharecastService};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "share-ctl")]
#[command(version)]
#[command(about = "Maintenance commands for Sharecast")]
#[command(long_about = "\
share-ctl - Maintenance commands for Sharecast

DESCRIPTION:
    share-ctl runs the batch operations of the social media connector and
    manages the configured platform providers. Batch commands report every
    per-item failure and a summary line, and exit with status 0 unless the
    whole run failed.

COMMANDS:
    posts pull        Import recent posts of every account that supports it
    shares publish    Queue publish jobs for pending shares of live entries
    tokens refresh    Refresh tokens expiring within the refresh window
    providers         List, save, delete, reorder, export and apply providers

USAGE EXAMPLES:
    # Import the 20 most recent posts per account
    share-ctl posts pull --limit 20

    # Show which shares would be queued
    share-ctl shares publish --dry-run

    # Refresh tokens (run daily)
    share-ctl tokens refresh

    # Copy provider configuration to another environment
    share-ctl providers export > providers.toml
    share-ctl --config staging.toml providers apply providers.toml

CONFIGURATION:
    Configuration file: ~/.config/sharecast/config.toml
    Database location: ~/.local/share/sharecast/sharecast.db

    Override with:
        --config PATH        - Path to config file
        SHARECAST_CONFIG     - Path to config file

EXIT CODES:
    0 - Success (including batches with per-item failures)
    1 - Operation failed (configuration, database, platform)
    3 - Invalid input
    4 - Not found
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format: text, json or pretty
    #[arg(long, global = true, value_name = "FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Platform posts
    Posts {
        #[command(subcommand)]
        command: PostsCommand,
    },

    /// Shares of content entries
    Shares {
        #[command(subcommand)]
        command: SharesCommand,
    },

    /// OAuth tokens
    Tokens {
        #[command(subcommand)]
        command: TokensCommand,
    },

    /// Provider configuration
    Providers {
        #[command(subcommand)]
        command: ProvidersCommand,
    },
}

#[derive(Subcommand, Debug)]
enum PostsCommand {
    /// Import recent posts of every account that supports pulling
    Pull {
        /// Posts to import per account
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
}

#[derive(Subcommand, Debug)]
enum SharesCommand {
    /// Queue publish jobs for pending shares of live entries
    Publish {
        /// List matching shares without queueing jobs
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Debug)]
enum TokensCommand {
    /// Refresh used tokens expiring within the refresh window
    Refresh {
        /// Refresh window in days (overrides config)
        #[arg(long, value_name = "DAYS")]
        window_days: Option<i64>,
    },
}

#[derive(Subcommand, Debug)]
enum ProvidersCommand {
    /// List configured providers
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Create a provider, or update the one with the given handle
    Save {
        #[arg(long)]
        name: String,

        #[arg(long)]
        handle: String,

        /// Adapter type, e.g. facebook-pages, instagram, twitter
        #[arg(long = "type", value_name = "TYPE")]
        kind: String,

        /// OAuth client id; `$VAR` is read from the environment at use
        #[arg(long)]
        client_id: Option<String>,

        /// OAuth client secret; `$VAR` is read from the environment at use
        #[arg(long)]
        client_secret: Option<String>,

        /// Request posting permissions on connect
        #[arg(long)]
        enable_posting: bool,

        #[arg(long)]
        disabled: bool,
    },

    /// Delete a provider with its tokens, accounts, shares and posts
    Delete { id: i64 },

    /// Set the display order, first id first
    Reorder {
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Print the provider configuration as TOML
    Export,

    /// Replace the provider configuration with a TOML snapshot
    Apply { file: PathBuf },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    LoggingConfig::from_section(&config.logging, cli.log_format, cli.verbose).init();
    debug!(command = ?cli.command, database = %config.database.path, "Running command");

    let service = SharecastService::from_config(config).await?;

    match cli.command {
        Commands::Posts {
            command: PostsCommand::Pull { limit },
        } => cmd_posts_pull(&service, limit).await,
        Commands::Shares {
            command: SharesCommand::Publish { dry_run },
        } => cmd_shares_publish(&service, dry_run).await,
        Commands::Tokens {
            command: TokensCommand::Refresh { window_days },
        } => cmd_tokens_refresh(&service, window_days).await,
        Commands::Providers { command } => cmd_providers(&service, command).await,
    }
}

/// Import posts; per-account failures are reported, not fatal
async fn cmd_posts_pull(service: &SharecastService, limit: u32) -> Result<()> {
    let report = service.posts().pull_all(limit).await?;

    for failure in &report.failures {
        println!("Warning: {}", failure);
    }
    if report.is_success() {
        println!(
            "Successfully pulled {} post(s) from {} account(s)",
            report.imported, report.accounts
        );
    } else {
        println!(
            "Pulled {} post(s) from {} account(s), {} failure(s)",
            report.imported,
            report.accounts,
            report.failures.len()
        );
    }
    Ok(())
}

async fn cmd_shares_publish(service: &SharecastService, dry_run: bool) -> Result<()> {
    println!("Publishing shares ...");
    let queued = service
        .shares()
        .publish_shares_from_pending_entries(Utc::now(), dry_run)
        .await?;

    for share in &queued {
        println!("- Share to {} for entry #{}", share.account_name, share.entry_id);
    }
    if dry_run {
        println!("Dry run: {} share(s) would be queued", queued.len());
    } else {
        println!("Queued {} share(s)", queued.len());
    }
    Ok(())
}

/// Refresh tokens; per-token failures are reported, not fatal
async fn cmd_tokens_refresh(service: &SharecastService, window_days: Option<i64>) -> Result<()> {
    let days = window_days.unwrap_or(service.config().tokens.refresh_window_days);
    if days < 0 {
        return Err(SharecastError::InvalidInput(format!(
            "Invalid refresh window '{}'. Must be zero or more days",
            days
        )));
    }

    let report = service
        .tokens()
        .refresh_sweep(Duration::days(days), Utc::now())
        .await?;

    for id in &report.skipped {
        println!("Token ID {} skipped, still {} days valid", id, days);
    }
    for id in &report.unsupported {
        println!("Token ID {} skipped, provider cannot refresh tokens", id);
    }
    for id in &report.refreshed {
        println!("Token ID {} refreshed", id);
    }
    for failure in &report.failures {
        println!("Warning: {}", failure);
    }

    if report.is_success() {
        println!("Successfully refreshed {} token(s)", report.refreshed.len());
    } else {
        println!(
            "Refreshed {} token(s), {} failure(s)",
            report.refreshed.len(),
            report.failures.len()
        );
    }
    Ok(())
}

async fn cmd_providers(service: &SharecastService, command: ProvidersCommand) -> Result<()> {
    let registry = service.registry();

    match command {
        ProvidersCommand::List { format } => {
            if format != "text" && format != "json" {
                return Err(SharecastError::InvalidInput(format!(
                    "Invalid format '{}'. Must be 'text' or 'json'",
                    format
                )));
            }

            let providers = registry.all().await?;
            if format == "json" {
                let json: Vec<serde_json::Value> = providers
                    .iter()
                    .map(|p| {
                        serde_json::json!({
                            "id": p.id(),
                            "uid": p.uid(),
                            "name": p.name(),
                            "handle": p.handle(),
                            "type": p.kind(),
                            "enabled": p.enabled(),
                            "sortOrder": p.sort_order(),
                            "capabilities": p.capabilities().iter().map(|c| c.to_string()).collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::Value::Array(json));
            } else {
                for p in providers {
                    println!(
                        "{} | {} | {} | {} | {}",
                        p.id(),
                        p.handle(),
                        p.name(),
                        p.kind(),
                        if p.enabled() { "enabled" } else { "disabled" }
                    );
                }
            }
        }
        ProvidersCommand::Save {
            name,
            handle,
            kind,
            client_id,
            client_secret,
            enable_posting,
            disabled,
        } => {
            let mut record = match registry.by_handle(handle.trim()).await? {
                Some(existing) => existing.record().clone(),
                None => ProviderRecord::new(name.clone(), handle.clone(), kind.clone()),
            };
            record.name = name;
            record.kind = kind;
            record.enabled = !disabled;
            record.settings.enable_posting = enable_posting;
            if client_id.is_some() {
                record.settings.client_id = client_id;
            }
            if client_secret.is_some() {
                record.settings.client_secret = client_secret;
            }

            let provider = registry.save(record).await?;
            println!("Saved provider {} ({})", provider.handle(), provider.id());
        }
        ProvidersCommand::Delete { id } => {
            if !registry.delete(id).await? {
                return Err(SharecastError::NotFound(format!("provider {}", id)));
            }
            println!("Deleted provider {}", id);
        }
        ProvidersCommand::Reorder { ids } => {
            registry.reorder(&ids).await?;
            println!("Reordered {} provider(s)", ids.len());
        }
        ProvidersCommand::Export => {
            print!("{}", registry.export().await?.to_toml()?);
        }
        ProvidersCommand::Apply { file } => {
            let snapshot = read_snapshot(&file)?;
            let changes = registry.apply(snapshot).await?;
            for change in &changes {
                println!("{} {}", change.action.as_str(), change.key);
            }
            println!("Applied {} change(s)", changes.len());
        }
    }

    Ok(())
}

fn read_snapshot(path: &Path) -> Result<ProviderSnapshot> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        SharecastError::InvalidInput(format!("Cannot read {}: {}", path.display(), e))
    })?;
    ProviderSnapshot::from_toml(&raw)
}
