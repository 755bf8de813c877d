mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "webpilot")]
#[command(about = "LLM-driven browser automation engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run environment diagnostics
    Doctor,

    /// Manage the selector memory store
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },

    /// Execute a single browser action
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// Overall store statistics
    Stats,
    /// Most active domains
    Top {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Per-domain statistics
    Domain { domain: String },
    /// Token-overlap selector search
    Similar {
        domain: String,
        description: String,
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
    /// Export learned selectors as a JSON snapshot
    Export {
        /// Output path (defaults to the exports directory)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Remove action history older than N days
    Cleanup {
        #[arg(short, long, default_value_t = 30)]
        days: i64,
    },
}

#[derive(Subcommand)]
enum RunCommands {
    /// Navigate to a URL
    Navigate { url: String },
    /// Click an element
    Click {
        /// Natural-language description of the element
        description: String,
        /// Explicit primary selector
        #[arg(short, long)]
        selector: Option<String>,
        /// Fallback selectors, in priority order
        #[arg(short, long)]
        fallback: Vec<String>,
        /// Navigate here first
        #[arg(short, long)]
        url: Option<String>,
    },
    /// Type text into an element
    Type {
        description: String,
        text: String,
        #[arg(short, long)]
        selector: Option<String>,
        #[arg(short, long)]
        url: Option<String>,
    },
    /// Capture a screenshot
    Screenshot {
        #[arg(short, long)]
        url: Option<String>,
    },
    /// Capture a DOM snapshot
    Snapshot {
        #[arg(short, long)]
        url: Option<String>,
    },
    /// Extract visible page text
    Text {
        #[arg(short, long)]
        url: Option<String>,
    },
    /// Wait for a number of seconds
    Wait { seconds: u64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    match cli.command {
        Commands::Doctor => commands::doctor::run().await,
        Commands::Memory { command } => commands::memory_cmd::run(command),
        Commands::Run { command } => commands::run_cmd::run(command).await,
    }
}
