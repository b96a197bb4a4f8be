//! `hub-enginectl` — command-line front end over a running `hub-engine`'s
//! control surface (deploy/start/stop/reload/status/item-metrics).
//!
//! ```bash
//! hub-enginectl deploy clinic-a --snapshot production.json
//! hub-enginectl status clinic-a
//! hub-enginectl item-metrics clinic-a ADT-Router
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hub-enginectl")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Control-surface CLI for the hub-engine integration bus runtime")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the running engine's control surface.
    #[arg(long, global = true, default_value = "http://127.0.0.1:7650")]
    engine_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploys a configuration snapshot as a new (or replacement) production.
    Deploy {
        /// Production/project id to deploy under.
        project_id: String,
        /// Path to a JSON `ProductionSnapshot` document.
        #[arg(long)]
        snapshot: PathBuf,
    },
    /// Starts every host in an already-deployed production.
    Start {
        /// Production/project id.
        project_id: String,
    },
    /// Stops every host in a production, leaving it deployed.
    Stop {
        /// Production/project id.
        project_id: String,
    },
    /// Applies a new snapshot to a running production without a full redeploy.
    Reload {
        /// Production/project id.
        project_id: String,
        /// Path to the replacement JSON `ProductionSnapshot` document.
        #[arg(long)]
        snapshot: PathBuf,
    },
    /// Prints every host's current lifecycle state.
    Status {
        /// Production/project id.
        project_id: String,
    },
    /// Prints one item's processed/dropped/restart/error counters.
    ItemMetrics {
        /// Production/project id.
        project_id: String,
        /// Item name within that production.
        item_name: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    match cli.command {
        Commands::Deploy { project_id, snapshot } => {
            let body = tokio::fs::read(&snapshot).await?;
            let url = format!("{}/productions/{project_id}/deploy", cli.engine_url);
            print_response(client.post(url).body(body).send().await?).await
        }
        Commands::Start { project_id } => {
            let url = format!("{}/productions/{project_id}/start", cli.engine_url);
            print_response(client.post(url).send().await?).await
        }
        Commands::Stop { project_id } => {
            let url = format!("{}/productions/{project_id}/stop", cli.engine_url);
            print_response(client.post(url).send().await?).await
        }
        Commands::Reload { project_id, snapshot } => {
            let body = tokio::fs::read(&snapshot).await?;
            let url = format!("{}/productions/{project_id}/reload", cli.engine_url);
            print_response(client.post(url).body(body).send().await?).await
        }
        Commands::Status { project_id } => {
            let url = format!("{}/productions/{project_id}/status", cli.engine_url);
            print_response(client.get(url).send().await?).await
        }
        Commands::ItemMetrics { project_id, item_name } => {
            let url = format!("{}/productions/{project_id}/items/{item_name}/metrics", cli.engine_url);
            print_response(client.get(url).send().await?).await
        }
    }
}

async fn print_response(response: reqwest::Response) -> anyhow::Result<()> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_success() {
        println!("{body}");
        Ok(())
    } else {
        anyhow::bail!("{status}: {body}")
    }
}
