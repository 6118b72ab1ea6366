use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use flotilla::server::{ServerConfig, serve};
use flotilla::store::Store;

#[derive(Parser)]
#[command(name = "flotilla")]
#[command(version, about = "Orchestration platform for AI agent harnesses")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Data directory for the store and artifacts.
    #[arg(long, default_value = ".flotilla", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the platform HTTP server.
    Serve {
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Run store migrations and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("flotilla={default_level}").into()),
        )
        .init();

    match cli.command {
        Commands::Serve { port } => {
            serve(ServerConfig {
                port,
                data_dir: cli.data_dir,
            })
            .await
        }
        Commands::Migrate => {
            tokio::fs::create_dir_all(&cli.data_dir).await?;
            let store = Store::open(&cli.data_dir.join("platform.db"))?;
            store.migrate().await?;
            println!("migrations applied at {}", cli.data_dir.display());
            Ok(())
        }
    }
}
