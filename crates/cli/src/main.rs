//! Bizpilot CLI: the main entry point.
//!
//! Commands:
//! - `init`   Write a default config file
//! - `serve`  Start the HTTP API server
//! - `ask`    Run one assistant turn locally

use bizpilot_core::records::{OwnerId, RecordId};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "bizpilot",
    about = "Bizpilot: a business copilot for tasks, finance, documents and marketing",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "BIZPILOT_LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration to ~/.bizpilot/config.toml
    Init,

    /// Start the HTTP API server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ask the assistant one question
    Ask {
        /// Owner whose business data the assistant works with
        #[arg(short, long, env = "BIZPILOT_OWNER")]
        owner: OwnerId,

        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<RecordId>,

        /// Execute the suggested actions after printing them
        #[arg(long)]
        execute: bool,

        /// The message to send
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        message: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Init => commands::init::run().await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Ask {
            owner,
            conversation,
            execute,
            message,
        } => commands::ask::run(owner, conversation, &message.join(" "), execute).await?,
    }

    Ok(())
}

/// Logs go to stderr so `ask` output stays clean on stdout.
fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
