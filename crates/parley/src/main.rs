//! parley - talk to an agent or run a validated one-shot function

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{ask_command, func_command, init_command, status_command, AskOptions, FuncOptions};

/// parley - LLM agents in your terminal
#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Agent loop, tool calling and validated LLM functions")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config and memory directory
    Init,
    /// Show configuration status
    Status,
    /// Chat with the agent
    Ask {
        /// Message to send; interactive mode when omitted
        #[arg(short, long)]
        message: Option<String>,
        /// Conversation kept in the memory bank
        #[arg(short, long, default_value = "default")]
        session: String,
        /// Ask the agent to reply with JSON
        #[arg(long)]
        json: bool,
        /// Debug logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Run a prompt as a one-shot function with optional JSON shape
    Func {
        /// System prompt describing the function
        #[arg(short, long)]
        prompt: String,
        /// JSON shape the reply must conform to
        #[arg(long)]
        shape: Option<String>,
        /// Backend calls allowed before giving up
        #[arg(short, long)]
        attempts: Option<u32>,
        /// Input to the function
        query: String,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(matches!(cli.command, Commands::Ask { verbose: true, .. }));

    let result = match cli.command {
        Commands::Init => init_command().await,
        Commands::Status => status_command().await,
        Commands::Ask {
            message,
            session,
            json,
            verbose: _,
        } => {
            ask_command(AskOptions {
                message,
                session,
                json,
            })
            .await
        }
        Commands::Func {
            prompt,
            shape,
            attempts,
            query,
        } => {
            func_command(FuncOptions {
                prompt,
                shape,
                attempts,
                query,
            })
            .await
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
