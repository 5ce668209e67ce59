use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use issuer_kms::config::Config;
use issuer_kms::error::Result;
use issuer_kms::providers::eth;
use issuer_kms::storage::local::LocalStorageFileManager;

#[derive(Parser)]
#[command(name = "issuer-kms")]
#[command(about = "Key management utilities for the identity issuer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a raw 32-byte hex secp256k1 private key into the local
    /// storage back-end
    ImportEthKey {
        /// Private key, hex-encoded
        #[arg(long = "privateKey")]
        private_key: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "issuer_kms=info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::ImportEthKey { private_key } => {
            let config = Config::load()?;
            let storage = LocalStorageFileManager::new(&config.local_storage_dir);
            let key_id = eth::import_eth_private_key(&storage, &private_key).await?;
            println!("imported key under path {}", key_id.id);
        }
    }
    Ok(())
}
