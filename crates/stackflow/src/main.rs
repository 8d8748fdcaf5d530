mod commands;
mod settings;

use clap::{Parser, Subcommand};
use stackflow_cloud::SnapshotStore;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stackflow")]
#[command(about = "Dependency-ordered cloud resource orchestration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the dependency catalog and print create/delete order
    Graph,
    /// Resolve a template into instances and references
    Plan {
        /// Template file (YAML)
        template: PathBuf,
    },
    /// Inspect router snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommands),
    /// Show the effective configuration
    Config,
    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum SnapshotCommands {
    /// Summarize a snapshot file
    Show {
        /// Snapshot file (JSON)
        file: PathBuf,
    },
    /// List stored snapshots, newest first
    List {
        /// Snapshot directory (defaults to the configured one)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if matches!(cli.command, Commands::Version) {
        println!("stackflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let (settings, source) = stackflow_config::load_settings()?;
    if let Some(path) = &source {
        tracing::debug!(path = %path.display(), "Loaded config file");
    }
    let catalog = settings::catalog(&settings)?;

    match cli.command {
        Commands::Graph => commands::graph::handle(&catalog)?,
        Commands::Plan { template } => commands::plan::handle(&catalog, &template)?,
        Commands::Snapshot(SnapshotCommands::Show { file }) => {
            commands::snapshot::handle_show(&file).await?
        }
        Commands::Snapshot(SnapshotCommands::List { dir }) => {
            let dir = match dir {
                Some(dir) => dir,
                None => settings.snapshot_dir()?,
            };
            commands::snapshot::handle_list(&SnapshotStore::new(dir)).await?
        }
        Commands::Config => commands::config::handle(&settings, source.as_deref())?,
        Commands::Version => {}
    }

    Ok(())
}
