//! CLI module — command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod config;
pub mod run;
pub mod tools;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

use mcpdrive::agent::GenerationMode;

#[derive(Parser)]
#[command(name = "mcpdrive")]
#[command(version)]
#[command(about = "Drive MCP tool servers with a language model", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.mcpdrive/config.json)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one generation cycle and print the answer
    Run {
        /// MCP server endpoint (HTTP+SSE), e.g. http://localhost:8931/sse
        #[arg(long)]
        endpoint: Option<String>,
        /// agent (use tools) or ask (model only)
        #[arg(long, default_value = "agent")]
        mode: GenerationMode,
        /// Replace the default system instruction
        #[arg(long)]
        system: Option<String>,
        /// Conversation id used for progress and stored answers
        #[arg(long, default_value = "cli")]
        chat: String,
        /// Do not store the answer under ~/.mcpdrive/conversations
        #[arg(long)]
        no_store: bool,
        /// User message
        #[arg(short, long)]
        message: String,
    },
    /// List the tools an MCP server offers
    Tools {
        #[arg(long)]
        endpoint: String,
    },
    /// Check whether an MCP server is reachable
    Health {
        #[arg(long)]
        endpoint: String,
    },
    /// Print the effective configuration
    Config,
    /// Show version information
    Version,
}

/// Entry point for the CLI — called from main().
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Load config early so logging respects it; fall back to defaults if the
    // file is unreadable and let the command report the error.
    let logging_cfg = config::load(cli.config.as_deref())
        .map(|c| c.logging)
        .unwrap_or_default();
    if let Err(e) = mcpdrive::utils::logging::init_logging(&logging_cfg) {
        eprintln!("Warning: could not open log file: {}", e);
    }

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Run {
            endpoint,
            mode,
            system,
            chat,
            no_store,
            message,
        }) => {
            let options = run::RunOptions {
                endpoint,
                mode,
                system,
                chat,
                store: !no_store,
                message,
            };
            run::cmd_run(cli.config.as_deref(), options).await?;
        }
        Some(Commands::Tools { endpoint }) => {
            tools::cmd_tools(cli.config.as_deref(), &endpoint).await?;
        }
        Some(Commands::Health { endpoint }) => {
            tools::cmd_health(cli.config.as_deref(), &endpoint).await?;
        }
        Some(Commands::Config) => {
            config::cmd_config(cli.config.as_deref())?;
        }
        Some(Commands::Version) => {
            println!("mcpdrive {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
