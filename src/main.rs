//! Operator CLI: key generation, user provisioning, and manual checks of
//! password digests and session tokens.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use hackweight_auth::auth::Authenticator;
use hackweight_auth::config::{load_config, RuntimeConfig};
use hackweight_auth::crypto::passwords::{hash_password, verify_password, HashParams};
use hackweight_auth::crypto::primitives::SessionKey;
use hackweight_auth::logging::{init_logging, verbosity_filter, LogConfig, LogFormat};
use hackweight_auth::store::SqliteCredentialStore;

#[derive(Debug, Parser)]
#[command(name = "hackweight-auth", version, about = "Hack Weight credential and session tooling")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, global = true, env = "HACKWEIGHT_CONFIG", default_value = "config.json")]
    config: PathBuf,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Full)]
    log_format: LogFormat,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a fresh random session key (base64) for `key_env` / `key_path`.
    GenerateKey,
    /// Hash a password with the default parameters.
    HashPassword { plaintext: String },
    /// Check a password against a digest.
    VerifyPassword { plaintext: String, digest: String },
    /// Create a user, or replace an existing user's password.
    CreateUser { username: String, password: String },
    /// Check a username/password pair against the credential store.
    CheckUser { username: String, password: String },
    /// Seal a payload into a session token.
    SealToken { payload: String },
    /// Open a session token and print its payload.
    OpenToken {
        token: String,
        /// Evaluate expiry at this RFC 3339 instant instead of now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only the store and session commands read the config file.
    let config = if needs_config(&cli.command) {
        Some(
            load_config(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?,
        )
    } else {
        None
    };

    let filter = verbosity_filter(
        cli.verbose,
        config.as_ref().and_then(|c| c.log_level.as_deref()),
    );
    init_logging(LogConfig {
        format: cli.log_format,
        filter,
    })
    .map_err(|e| anyhow::anyhow!("logging setup failed: {e}"))?;

    match cli.command {
        Command::GenerateKey => {
            println!("{}", SessionKey::generate().to_base64());
        }
        Command::HashPassword { plaintext } => {
            println!("{}", hash_password(&plaintext, &HashParams::default())?);
        }
        Command::VerifyPassword { plaintext, digest } => {
            let matches = verify_password(&plaintext, &digest)?;
            println!("{}", if matches { "match" } else { "no-match" });
        }
        Command::CreateUser { username, password } => {
            authenticator(loaded(&config)?)?.provision(&username, &password)?;
            println!("user created or updated successfully");
        }
        Command::CheckUser { username, password } => {
            let valid = authenticator(loaded(&config)?)?.authenticate(&username, &password)?;
            println!("{}", if valid { "valid" } else { "invalid" });
        }
        Command::SealToken { payload } => {
            let codec = loaded(&config)?.session_codec();
            println!("{}", codec.seal(payload.as_bytes(), Utc::now())?);
        }
        Command::OpenToken { token, at } => {
            let codec = loaded(&config)?.session_codec();
            match codec.open(&token, at.unwrap_or_else(Utc::now)) {
                Ok(payload) => println!("{}", String::from_utf8_lossy(&payload)),
                Err(err) => bail!("{} ({err})", err.rejection().message()),
            }
        }
    }

    Ok(())
}

fn needs_config(command: &Command) -> bool {
    !matches!(
        command,
        Command::GenerateKey | Command::HashPassword { .. } | Command::VerifyPassword { .. }
    )
}

fn loaded(config: &Option<RuntimeConfig>) -> Result<&RuntimeConfig> {
    config.as_ref().context("configuration was not loaded")
}

fn authenticator(config: &RuntimeConfig) -> Result<Authenticator<SqliteCredentialStore>> {
    let store = SqliteCredentialStore::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    Ok(Authenticator::new(store, config.credential_verifier()?).with_realm(config.realm.clone()))
}
