//! CLI entry point for the One-Time Secret client.
//!
//! This binary provides the `ots` command: credential management against the
//! encrypted local store, plus create / retrieve / inspect / burn operations
//! against the remote API.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ots_client::{
    ApiClient, ClientConfig, CreateSecretRequest, CredentialManager, ErrorResponse, OtsError,
    SecretMetadata, TTL_PRESETS,
};
use ots_vault::{SecureStore, StoreOptions, open_secure_store};
use secrecy::{ExposeSecret, SecretString};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// One-Time Secret: share a secret through a link that works once.
#[derive(Parser)]
#[command(
    name = "ots",
    version,
    about = "One-Time Secret command-line client",
    long_about = "Create single-use secret links, retrieve them, and inspect or burn \
                  secrets you created. Credentials are kept in an encrypted local vault."
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the encrypted vault.
    #[arg(long, global = true, env = "OTS_HOME", default_value = ".ots")]
    data_dir: PathBuf,

    /// Keep credentials in the OS keychain when one is available.
    #[arg(long, global = true)]
    os_keychain: bool,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save API credentials and check that the service accepts them.
    Login {
        /// Account e-mail.
        #[arg(long)]
        username: String,
        /// API endpoint.
        #[arg(long, default_value = ots_client::config::DEFAULT_API_BASE)]
        endpoint: String,
    },

    /// Remove stored credentials.
    Logout,

    /// Show the stored account.
    Whoami,

    /// Create a secret and print its links.
    Create {
        /// Secret text. Prompted for when omitted.
        secret: Option<String>,
        /// Lifetime in seconds (300 to 604800).
        #[arg(long)]
        ttl: Option<u32>,
        /// Passphrase the recipient must supply.
        #[arg(long)]
        passphrase: bool,
        /// E-mail the link to this address.
        #[arg(long)]
        recipient: Option<String>,
    },

    /// Retrieve a secret. It is burned by the server afterwards.
    Retrieve {
        secret_key: String,
        /// Prompt for a passphrase.
        #[arg(long)]
        passphrase: bool,
    },

    /// Show metadata for a secret you created.
    Metadata { metadata_key: String },

    /// Burn a secret before it is read.
    Burn { metadata_key: String },

    /// List recently created secrets.
    Recent,

    /// Check that the service is reachable.
    Status,

    /// List the TTL presets.
    Ttls,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(if cli.verbose { "debug" } else { "warn" });

    if let Err(e) = run(cli).await {
        report(&e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Ttls = cli.command {
        for (label, secs) in TTL_PRESETS {
            println!("  {label:<12} {secs}");
        }
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let store = open_store(&cli.data_dir, cli.os_keychain).await?;
    let client = ApiClient::new(config, Arc::clone(&store)).context("failed to build API client")?;

    match cli.command {
        Commands::Login { username, endpoint } => {
            cmd_login(store, client, &username, &endpoint).await
        }
        Commands::Logout => {
            CredentialManager::new(store, client).logout().await?;
            println!("  Logged out.");
            Ok(())
        }
        Commands::Whoami => cmd_whoami(store, client).await,
        Commands::Create {
            secret,
            ttl,
            passphrase,
            recipient,
        } => cmd_create(&client, secret, ttl, passphrase, recipient).await,
        Commands::Retrieve {
            secret_key,
            passphrase,
        } => cmd_retrieve(&client, &secret_key, passphrase).await,
        Commands::Metadata { metadata_key } => {
            print_metadata(&client.get_metadata(&metadata_key).await?);
            Ok(())
        }
        Commands::Burn { metadata_key } => {
            let meta = client.burn_secret(&metadata_key).await?;
            println!("  Secret burned ({}).", meta.state);
            Ok(())
        }
        Commands::Recent => {
            let recent = client.recent_metadata().await?;
            if recent.is_empty() {
                println!("  No recent secrets.");
            }
            for meta in &recent {
                println!(
                    "  {}  {:<8}  expires in {}s",
                    meta.metadata_key, meta.state, meta.secret_ttl_seconds
                );
            }
            Ok(())
        }
        Commands::Status => {
            let status = client.check_status().await?;
            match &status.version {
                Some(version) => println!("  Service: {} (v{version})", status.status),
                None => println!("  Service: {}", status.status),
            }
            Ok(())
        }
        Commands::Ttls => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn cmd_login(
    store: Arc<dyn SecureStore>,
    client: ApiClient,
    username: &str,
    endpoint: &str,
) -> Result<()> {
    let token = prompt_secret("API token")?;
    let manager = CredentialManager::new(store, client);

    match manager.save_credentials(username, token, endpoint).await {
        Ok(()) => {
            println!("  Logged in as {username}.");
            Ok(())
        }
        Err(e) => {
            if let Some(note) = login_failure_note(&e) {
                println!("  {note}");
            }
            Err(e.into())
        }
    }
}

/// What a failed login left behind, for errors that need saying.
fn login_failure_note(err: &OtsError) -> Option<&'static str> {
    match err {
        OtsError::Validation { .. } => None,
        OtsError::Storage(_) => Some("Credentials were not saved."),
        _ => Some("Credentials saved, but the service could not be reached."),
    }
}

async fn cmd_whoami(store: Arc<dyn SecureStore>, client: ApiClient) -> Result<()> {
    let manager = CredentialManager::new(store, client);
    match manager.load_credentials().await? {
        Some(creds) => {
            println!("  Account:  {}", creds.username);
            println!("  Endpoint: {}", creds.endpoint);
        }
        None => println!("  Not logged in (anonymous requests)."),
    }
    Ok(())
}

async fn cmd_create(
    client: &ApiClient,
    secret: Option<String>,
    ttl: Option<u32>,
    passphrase: bool,
    recipient: Option<String>,
) -> Result<()> {
    let secret = match secret {
        Some(secret) => SecretString::new(secret),
        None => prompt_secret("Secret")?,
    };

    let mut request = CreateSecretRequest::new(secret.expose_secret().as_str());
    if let Some(ttl) = ttl {
        request = request.with_ttl(ttl);
    }
    if passphrase {
        let phrase = prompt_secret("Passphrase")?;
        request = request.with_passphrase(phrase.expose_secret().as_str());
    }
    if let Some(recipient) = recipient {
        request = request.with_recipient(recipient);
    }

    let meta = client.create_secret(&request).await?;
    println!("  Share:   {}", client.secret_link(&meta.secret_key)?);
    println!("  Private: {}", client.metadata_link(&meta.metadata_key)?);
    println!("  Expires in {}s", meta.secret_ttl_seconds);
    Ok(())
}

async fn cmd_retrieve(client: &ApiClient, secret_key: &str, passphrase: bool) -> Result<()> {
    let phrase = if passphrase {
        Some(prompt_secret("Passphrase")?)
    } else {
        None
    };
    let value = client
        .retrieve_secret(
            secret_key,
            phrase.as_ref().map(|p| p.expose_secret().as_str()),
        )
        .await?;
    println!("{}", value.value.expose_secret());
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();
}

/// File config (when given) overlaid with `OTS_*` variables.
fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    let base = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            ClientConfig::from_toml_str(&raw)?
        }
        None => ClientConfig::default(),
    };
    Ok(base.overlay_env(|key| std::env::var(key).ok())?)
}

/// Open and unlock the secure store.
async fn open_store(data_dir: &Path, os_keychain: bool) -> Result<Arc<dyn SecureStore>> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    let store = open_secure_store(&StoreOptions::new(data_dir).with_os_keychain(os_keychain));
    tracing::debug!(backend = store.backend_name(), "secure store selected");

    let password = match std::env::var("OTS_VAULT_PASSWORD") {
        Ok(password) if !password.is_empty() => SecretString::new(password),
        _ => prompt_secret("Vault password")?,
    };
    store
        .initialize(password.expose_secret())
        .await
        .map_err(OtsError::from)?;
    Ok(store)
}

fn prompt_secret(prompt: &str) -> Result<SecretString> {
    let value = dialoguer::Password::new()
        .with_prompt(prompt)
        .interact()
        .with_context(|| format!("failed to read {}", prompt.to_lowercase()))?;
    if value.is_empty() {
        bail!("{prompt} cannot be empty");
    }
    Ok(SecretString::new(value))
}

fn print_metadata(meta: &SecretMetadata) {
    println!("  Metadata key: {}", meta.metadata_key);
    println!("  State:        {}", meta.state);
    println!("  Created:      {}", meta.created_at.to_rfc3339());
    println!("  Updated:      {}", meta.updated_at.to_rfc3339());
    println!("  Expires in:   {}s", meta.secret_ttl_seconds);
    if meta.passphrase_required {
        println!("  Passphrase:   required");
    }
    if !meta.recipient.is_empty() {
        println!("  Recipients:   {}", meta.recipient.join(", "));
    }
}

/// Print a classified client error as `CODE: message`, anything else with
/// its context chain.
fn report(err: &anyhow::Error) {
    match err.downcast_ref::<OtsError>() {
        Some(ots) => {
            let response = ErrorResponse::from(ots);
            eprintln!("error [{}]: {}", response.code, response.message);
            for (field, message) in &response.fields {
                eprintln!("  {field}: {message}");
            }
            if let Ok(json) = serde_json::to_string(&response) {
                tracing::debug!(response = %json, "error response");
            }
        }
        None => eprintln!("error: {err:#}"),
    }
}

#[cfg(test)]
mod tests {
    use ots_vault::VaultError;

    use super::*;

    #[test]
    fn login_notes_match_what_was_stored() {
        let invalid = OtsError::invalid_field("endpoint", "endpoint has no host");
        assert_eq!(login_failure_note(&invalid), None);

        let storage = OtsError::Storage(VaultError::Io(std::io::Error::other("disk full")));
        assert_eq!(login_failure_note(&storage), Some("Credentials were not saved."));

        let probe = OtsError::Auth {
            status: 401,
            message: "Not authorized".into(),
        };
        assert_eq!(
            login_failure_note(&probe),
            Some("Credentials saved, but the service could not be reached.")
        );
    }
}
