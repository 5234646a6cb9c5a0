use anyhow::Result;
use clap::{Parser, Subcommand};
use pki_vault::configs::AppConfig;
use pki_vault::store::Store;
use pki_vault::webserver;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pki-vault", about = "X.509 certificate and private key vault")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations and exit.
    Migrate,
    /// Bind the HTTP listeners and serve the API.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_file(&cli.config)?;

    match cli.command {
        Command::Migrate => {
            let store = Store::connect(&config.dsn).await?;
            store.migrate_from(&config.migration.base_path).await?;
            println!("✓ migrations applied");
        }
        Command::Serve => {
            webserver::serve(config).await?;
        }
    }

    Ok(())
}
