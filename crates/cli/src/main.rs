//! AgentRelay CLI: the main entry point.
//!
//! Commands:
//! - `chat`    Interactive or single-message chat
//! - `serve`   Start the HTTP gateway
//! - `config`  Print the default configuration, its path, or validate it

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "agentrelay",
    about = "AgentRelay: a reasoning-loop runtime for tool-using assistants",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Continue an existing session
        #[arg(long)]
        session: Option<String>,

        /// Stream typed chunks while the turn runs
        #[arg(long)]
        stream: bool,
    },

    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Configuration helpers (prints the default TOML when no action is given)
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the default configuration as TOML
    Default,
    /// Print the effective configuration (API key redacted)
    Show,
    /// Print the config file path
    Path,
    /// Load and validate the config file
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            session,
            stream,
        } => commands::chat::run(message, session, stream).await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Default) {
            ConfigAction::Default => commands::config_cmd::print_default()?,
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Validate => commands::config_cmd::validate()?,
        },
    }

    Ok(())
}
