use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kgrelay::http::HttpRelayServer;
use kgrelay::model::{GeminiClient, RetryPolicy};
use kgrelay::storage::ScratchStore;
use kgrelay::{parse_graph_state, prompt, Config, GraphRelay, TaskKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "kgrelay")]
#[command(about = "Relay knowledge-graph prompts to a hosted generative model", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve {
        /// Override server.port from config.toml
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Enhance a graph stored in a JSON file and print the result
    Update {
        /// Path to the graph JSON file
        graph: PathBuf,
    },
    /// Print the prompt that would be sent for a graph, without calling the model
    Prompt {
        /// Task kind: pdf, image or enhancement
        kind: String,
        /// Path to the graph JSON file
        graph: PathBuf,
    },
}

/// Build the relay from configuration.
fn build_relay(config: &Config) -> Result<GraphRelay> {
    let api_key = config.api_key()?;
    let client = GeminiClient::new(
        api_key,
        config.model.model.clone(),
        config.model.base_url.clone(),
    )?;

    Ok(GraphRelay::new(
        Arc::new(client),
        RetryPolicy::from_config(&config.relay),
        ScratchStore::new(config.uploads_dir()),
    ))
}

fn read_graph_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read graph file: {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger from environment variable or default to info level
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => run_http_server(port).await?,
        Command::Update { graph } => run_update(graph).await?,
        Command::Prompt { kind, graph } => print_prompt(&kind, graph)?,
    }

    Ok(())
}

/// Run the HTTP server
async fn run_http_server(port: Option<u16>) -> Result<()> {
    log::info!("Starting kgrelay v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    log::info!("Model: {} ({})", config.model.model, config.model.provider);
    log::info!("Uploads directory: {}", config.uploads_dir().display());
    log::info!(
        "Model call policy: timeout {}s, {} retries",
        config.relay.timeout_secs,
        config.relay.max_retries
    );

    let relay = Arc::new(build_relay(&config)?);
    let port = port.unwrap_or(config.server.port);

    let server = HttpRelayServer::new(relay, config);
    server.run(port).await?;

    Ok(())
}

/// One-shot enhancement from the command line
async fn run_update(graph_path: PathBuf) -> Result<()> {
    let config = Config::load()?;
    let relay = build_relay(&config)?;

    let graph_json = read_graph_file(&graph_path)?;
    let updated = relay.update_graph(&graph_json).await?;

    println!("{}", serde_json::to_string_pretty(&updated)?);
    Ok(())
}

/// Print a prompt without touching the model
fn print_prompt(kind: &str, graph_path: PathBuf) -> Result<()> {
    let kind: TaskKind = kind.parse()?;
    let graph = parse_graph_state(&read_graph_file(&graph_path)?)?;

    println!("{}", prompt::build_prompt(kind, &graph));
    Ok(())
}
