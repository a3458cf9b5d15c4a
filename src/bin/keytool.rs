//! Keytool - manage keys in a configured key store
//!
//! Works against whichever backend the config file names (memory, file or
//! sled). Passwords come from flags or the environment.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ledger_orchestrator::config::{Config, LoggingConfig};
use ledger_orchestrator::crypto::EncryptedPrivateKey;
use ledger_orchestrator::keystore::{self, Authentication, Identity};
use ledger_orchestrator::logging::init_logging;
use ledger_orchestrator::wallet::WalletApi;
use ledger_orchestrator::KeyPair;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Key store management for the ledger client", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, default_value = "ledger.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a key and store it under an alias
    New {
        alias: String,

        #[arg(long, env = "LEDGER_KEY_PASSWORD")]
        password: String,
    },

    /// List stored identities
    List,

    /// Print the key re-encrypted under a new password
    Export {
        /// Alias or address
        identity: String,

        #[arg(long, env = "LEDGER_KEY_PASSWORD")]
        password: String,

        #[arg(long, env = "LEDGER_EXPORT_PASSWORD")]
        export_password: String,
    },

    /// Import an exported key under an alias or address
    Import {
        identity: String,

        /// Exported key text
        encrypted: String,

        /// Password the export was made with
        #[arg(long, env = "LEDGER_EXPORT_PASSWORD")]
        export_password: String,

        /// Password to store it under
        #[arg(long, env = "LEDGER_KEY_PASSWORD")]
        password: String,
    },

    /// Delete a stored key
    Remove {
        identity: String,

        #[arg(long, env = "LEDGER_KEY_PASSWORD")]
        password: String,
    },
}

fn parse_identity(value: &str) -> Result<Identity> {
    value
        .parse()
        .with_context(|| format!("'{}' is neither an address nor a valid alias", value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)?;
    let logging = if args.verbose {
        LoggingConfig {
            level: "debug".to_string(),
            ..config.logging.clone()
        }
    } else {
        config.logging.clone()
    };
    init_logging(&logging);

    let store = keystore::open(&config.keystore)
        .await
        .with_context(|| format!("Failed to open {:?} key store", config.keystore.backend))?;
    let wallet = WalletApi::new(store.clone());

    match args.command {
        Commands::New { alias, password } => {
            let identity = parse_identity(&alias)?;
            let address = wallet.create_key(&Authentication::of(identity, password)).await?;
            println!("{}", address);
        }
        Commands::List => {
            for identity in wallet.list_identities().await? {
                println!("{}", identity);
            }
        }
        Commands::Export {
            identity,
            password,
            export_password,
        } => {
            let auth = Authentication::of(parse_identity(&identity)?, password);
            let exported = store.export(&auth, &export_password).await?;
            println!("{}", exported);
        }
        Commands::Import {
            identity,
            encrypted,
            export_password,
            password,
        } => {
            let encrypted: EncryptedPrivateKey =
                encrypted.parse().context("Malformed exported key")?;
            let key = KeyPair::decrypt(&encrypted, &export_password)?;
            let auth = Authentication::of(parse_identity(&identity)?, password);
            wallet.import_key(&auth, &key).await?;
            println!("{}", key.address());
        }
        Commands::Remove { identity, password } => {
            let auth = Authentication::of(parse_identity(&identity)?, password);
            store.remove(&auth).await?;
        }
    }

    info!(backend = store.backend(), "Done");
    Ok(())
}
