use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::model::ModelCommands;

#[derive(Parser)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about = "Retrieval quality and resource cost benchmarks for vector-search backends", long_about = None)]
struct Cli {
    /// Config file (default: ./vecbench.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query set against the configured backend
    Run {
        /// Query set with ground truth (JSON, JSON array or JSON Lines)
        #[arg(short, long)]
        queries: Option<PathBuf>,

        /// Results requested per query
        #[arg(short, long)]
        limit: Option<usize>,

        /// Evaluate only the first N queries
        #[arg(long)]
        query_limit: Option<usize>,

        /// Cutoffs, comma separated (default: 100..=1000 step 100)
        #[arg(long, value_delimiter = ',')]
        cutoffs: Option<Vec<usize>>,

        /// Container to sample while queries run
        #[arg(long)]
        container: Option<String>,

        /// Seconds between samples
        #[arg(long)]
        interval: Option<u64>,

        /// Skip resource sampling
        #[arg(long, conflicts_with_all = ["container", "interval"])]
        no_sampler: bool,

        /// Write the full result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the result as JSON instead of the summary
        #[arg(long)]
        json: bool,
    },

    /// Take one resource sample of a container
    Snapshot {
        /// Container name or id
        #[arg(long)]
        container: Option<String>,

        /// Docker endpoint (unix://, tcp://, http://)
        #[arg(long)]
        docker_host: Option<String>,

        /// Host path whose filesystem usage is reported
        #[arg(long)]
        disk_path: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage the embedding model files
    Model {
        #[command(subcommand)]
        command: ModelCommands,
    },
}

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            queries,
            limit,
            query_limit,
            cutoffs,
            container,
            interval,
            no_sampler,
            output,
            json,
        } => commands::run::execute(commands::run::RunOptions {
            config: cli.config,
            queries,
            search_limit: limit,
            query_limit,
            cutoffs,
            container,
            interval_secs: interval,
            no_sampler,
            output,
            json,
        }),
        Commands::Snapshot {
            container,
            docker_host,
            disk_path,
            json,
        } => commands::snapshot::execute(commands::snapshot::SnapshotOptions {
            config: cli.config,
            container,
            docker_host,
            disk_path,
            json,
        }),
        Commands::Model { command } => commands::model::execute(command, cli.config),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
