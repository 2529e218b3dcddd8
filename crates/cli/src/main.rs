use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use palace_daemon::{Engine, run_stdio_server};
use palace_memory::StorePaths;

#[derive(Debug, Parser)]
#[command(name = "palace", version, about = "A local cognitive memory store for autonomous agents")]
struct Cli {
    /// Store directory (default: ~/.open-palace).
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the JSON operation surface over stdio (the default).
    Serve,
    /// Initialise a fresh store and exit.
    Init {
        /// Skip creating the primary entity.
        #[arg(long)]
        skip_agents: bool,
    },
    /// Run the health check and print the report.
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli.store.unwrap_or_else(StorePaths::default_root);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let engine = Engine::boot(root, None).await?;
            run_stdio_server(engine).await
        }
        Commands::Init { skip_agents } => {
            let engine = Engine::boot(root, None).await?;
            let response = engine
                .handle(
                    "onboarding_init",
                    serde_json::json!({ "skip_agents": skip_agents }),
                )
                .await;
            println!("{}", response.text);
            if response.is_error {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Doctor => {
            let engine = Engine::boot(root, None).await?;
            let response = engine
                .handle(
                    "system_execute",
                    serde_json::json!({ "name": "health", "params": {} }),
                )
                .await;
            println!("{}", response.text);
            if response.is_error {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
