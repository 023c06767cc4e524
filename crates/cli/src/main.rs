//! Marginalia CLI: the main entry point.
//!
//! Commands:
//! - `chat`   : Interactive chat or single-message mode
//! - `tools`  : Print the schemas of the built-in tools
//! - `config` : Show the effective configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "marginalia",
    about = "Marginalia — a tool-calling chat agent for OpenAI-compatible endpoints",
    version,
    author
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

        /// Wait for each complete response instead of streaming tokens
        #[arg(long)]
        no_stream: bool,

        /// Override the maximum number of model round-trips per message
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Print the tool schemas sent to the model
    Tools,

    /// Show the effective configuration
    Config {
        /// Print a default config file instead
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for the conversation
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            no_stream,
            max_iterations,
        } => {
            commands::chat::run(commands::chat::ChatOptions {
                message,
                stream: !no_stream,
                max_iterations,
            })
            .await?
        }
        Commands::Tools => commands::tools::run()?,
        Commands::Config { default } => commands::config_cmd::run(default)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_flags() {
        let cli = Cli::parse_from([
            "marginalia",
            "chat",
            "-m",
            "2+2?",
            "--no-stream",
            "--max-iterations",
            "3",
        ]);
        match cli.command {
            Commands::Chat {
                message,
                no_stream,
                max_iterations,
            } => {
                assert_eq!(message.as_deref(), Some("2+2?"));
                assert!(no_stream);
                assert_eq!(max_iterations, Some(3));
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::parse_from(["marginalia", "tools", "--verbose"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Tools));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
