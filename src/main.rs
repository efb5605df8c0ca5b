mod cli;
mod kb_client;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use eyre::Result;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

use crate::cli::chat::ChatContext;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Input to send to the chat
    #[arg(short, long)]
    input: Option<String>,

    /// Base URL of the chat backend (defaults to KB_CHAT_URL or localhost)
    #[arg(short, long)]
    server: Option<String>,

    /// Start with strict answering mode enabled
    #[arg(long)]
    strict: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a chat session
    Chat {
        /// Input to send to the chat
        #[arg(short, long)]
        input: Option<String>,

        /// Base URL of the chat backend
        #[arg(short, long)]
        server: Option<String>,

        /// Start with strict answering mode enabled
        #[arg(long)]
        strict: bool,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();

    let (input, server, strict, verbose) = match cli.command {
        Some(Commands::Chat {
            input,
            server,
            strict,
            verbose,
        }) => (
            input.or(cli.input),
            server.or(cli.server),
            strict || cli.strict,
            verbose || cli.verbose,
        ),
        None => (cli.input, cli.server, cli.strict, cli.verbose),
    };

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let server = server
        .or_else(|| std::env::var("KB_CHAT_URL").ok())
        .unwrap_or_else(|| DEFAULT_SERVER.to_string());
    let server = Url::parse(&server)?;

    info!("Starting KB Chat CLI against {server}");

    let interactive = input.is_none();
    let mut chat_context = ChatContext::new(server, input, interactive, strict);
    chat_context.run().await
}
