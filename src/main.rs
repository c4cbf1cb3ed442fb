//! drive-auth - multi-account Google Drive credential manager
//!
//! Logs accounts in, refreshes and revokes their tokens, and reports who
//! each account is signed in as.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use drive_auth::api::DriveClientFactory;
use drive_auth::auth::{
    persisted_status, AuthBackend, AuthConfig, AuthResult, CredentialStatus, FileTokenStore,
    LoopbackAuthorizer, OAuthClient, RevokeOutcome, SessionRegistry,
};
use drive_auth::config::Config;

#[derive(Parser)]
#[command(name = "drive-auth")]
#[command(about = "Multi-account OAuth credential manager for Google Drive", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate accounts, reusing or refreshing cached tokens when possible
    Login {
        /// Only this account (default: all configured accounts)
        #[arg(short, long)]
        account: Option<String>,
    },

    /// Revoke tokens and delete cached credentials
    Logout {
        #[arg(short, long)]
        account: Option<String>,
    },

    /// Show the state of each account's cached token (no network access)
    Status,

    /// Authenticate and show who each account is signed in as
    Whoami,

    /// List configured accounts and their token files
    Accounts,
}

fn drive_backend(auth_config: &AuthConfig, redirect_port: u16) -> Result<AuthBackend> {
    let oauth = OAuthClient::new(auth_config)?;
    Ok(AuthBackend {
        store: Arc::new(FileTokenStore),
        server: Arc::new(oauth.clone()),
        authorizer: Arc::new(LoopbackAuthorizer::new(oauth, redirect_port)),
        clients: Arc::new(DriveClientFactory::new()),
    })
}

/// Build the registry with every configured account registered.
///
/// Accounts naming their own client-secrets file get their own OAuth client;
/// the shared `[oauth]` client is only loaded when some account needs it.
fn build_registry(config: &Config) -> Result<SessionRegistry> {
    let base_dir = std::env::current_dir().context("Could not determine working directory")?;
    let port = config.oauth.redirect_port;

    let mut accounts = Vec::new();
    for account in config.accounts() {
        let own = match config.account_auth_config(&account, &base_dir)? {
            Some(auth_config) => Some(drive_backend(&auth_config, port)?),
            None => None,
        };
        accounts.push((account, own));
    }

    let shared = if accounts.iter().any(|(_, own)| own.is_none()) {
        drive_backend(&config.auth_config(&base_dir)?, port)?
    } else {
        accounts
            .iter()
            .find_map(|(_, own)| own.clone())
            .context("No accounts configured")?
    };

    let mut registry = SessionRegistry::new(shared, config.session_settings());
    for (account, own) in accounts {
        let path = config.token_path(&account, &base_dir);
        let registered = match own {
            Some(backend) => registry.register_with_backend(&account.name, path, backend),
            None => registry.register(&account.name, path),
        };
        registered.context("Invalid account list in config")?;
    }
    Ok(registry)
}

fn selected(registry: &SessionRegistry, account: Option<String>) -> Vec<String> {
    match account {
        Some(name) => vec![name],
        None => registry.accounts().into_iter().map(String::from).collect(),
    }
}

/// Cancellation token tripped by Ctrl-C, so a pending browser login can be abandoned.
fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}

/// Authenticate each account; returns the names that failed.
async fn login_accounts(registry: &mut SessionRegistry, accounts: &[String]) -> Result<Vec<String>> {
    let cancel = ctrl_c_token();
    let mut failed = Vec::new();

    for name in accounts {
        match registry.authenticate_with_cancel(name, &cancel).await? {
            AuthResult::ReadyFromCache => println!("{}: already logged in (cached token valid).", name),
            AuthResult::Refreshed => println!("{}: token refreshed.", name),
            AuthResult::ReauthorizedInteractively => println!("{}: login successful.", name),
            AuthResult::Failed(e) => {
                eprintln!("{}: login failed: {}", name, e);
                failed.push(name.clone());
            }
        }
    }
    Ok(failed)
}

async fn login(config: &Config, account: Option<String>) -> Result<()> {
    let mut registry = build_registry(config)?;
    let accounts = selected(&registry, account);

    let failed = login_accounts(&mut registry, &accounts).await?;
    if !failed.is_empty() {
        bail!("Login failed for: {}", failed.join(", "));
    }
    Ok(())
}

async fn logout(config: &Config, account: Option<String>) -> Result<()> {
    let mut registry = build_registry(config)?;

    for name in selected(&registry, account) {
        match registry.revoke(&name).await? {
            RevokeOutcome::Complete => println!("{}: logged out.", name),
            RevokeOutcome::Partial { remote, store } => {
                println!("{}: logged out locally.", name);
                if let Some(e) = remote {
                    eprintln!("  Warning: server-side revocation failed: {}", e);
                }
                if let Some(e) = store {
                    eprintln!("  Warning: token file could not be removed: {}", e);
                }
            }
        }
    }
    Ok(())
}

/// Reads token files only, so it works without an OAuth client configured.
fn status(config: &Config) -> Result<()> {
    let base_dir = std::env::current_dir().context("Could not determine working directory")?;
    let scopes = config.required_scopes();
    let mut any_missing = false;

    for account in config.accounts() {
        let name = &account.name;
        let path = config.token_path(&account, &base_dir);
        match persisted_status(&FileTokenStore, &path, &scopes) {
            Ok(CredentialStatus::Valid { expiry }) => {
                println!("{:<12} valid (expires {})", name, expiry.to_rfc3339());
            }
            Ok(CredentialStatus::Refreshable) => {
                println!("{:<12} expired, refresh token present", name)
            }
            Ok(CredentialStatus::Dead) => {
                println!("{:<12} expired, no refresh token", name);
                any_missing = true;
            }
            Ok(CredentialStatus::Insufficient { missing }) => {
                println!("{:<12} missing scopes: {}", name, missing.join(", "));
                any_missing = true;
            }
            Ok(CredentialStatus::Absent) => {
                println!("{:<12} none", name);
                any_missing = true;
            }
            Err(e) => {
                println!("{:<12} unreadable: {}", name, e);
                any_missing = true;
            }
        }
    }

    if any_missing {
        println!("\nRun 'drive-auth login' to authenticate.");
    }
    Ok(())
}

async fn whoami(config: &Config) -> Result<()> {
    let mut registry = build_registry(config)?;
    let accounts = selected(&registry, None);
    login_accounts(&mut registry, &accounts).await?;

    let profiles = registry.snapshot_authenticated().await;
    if profiles.is_empty() {
        bail!("No authenticated accounts.");
    }

    println!();
    for (name, profile) in &profiles {
        println!("{}:", name);
        println!(
            "  Display Name: {}",
            profile.display_name.as_deref().unwrap_or("(none)")
        );
        println!(
            "  Email:        {}",
            profile.email_address.as_deref().unwrap_or("(none)")
        );
        if let Some(ref id) = profile.permission_id {
            println!("  ID:           {}", id);
        }
    }
    Ok(())
}

fn list_accounts(config: &Config) -> Result<()> {
    let base_dir = std::env::current_dir().context("Could not determine working directory")?;
    for account in config.accounts() {
        println!(
            "{:<12} {}",
            account.name,
            config.token_path(&account, &base_dir).display()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Login { account } => {
            tracing::info!("Starting authentication flow...");
            login(&config, account).await?;
        }
        Commands::Logout { account } => {
            tracing::info!("Logging out...");
            logout(&config, account).await?;
        }
        Commands::Status => {
            status(&config)?;
        }
        Commands::Whoami => {
            whoami(&config).await?;
        }
        Commands::Accounts => {
            list_accounts(&config)?;
        }
    }

    Ok(())
}
