//! layout-agent - headless host for the main beam layout assistant
//!
//! Stands in for the CAD add-in: stages selection summaries, streams the
//! model answer to the terminal and writes parsed main beams as JSON lines.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use layout_agent_core::agent::{AgentObserver, LayoutAgent, RunOutcome};
use layout_agent_core::ai::client::{ChatBackend, DifyClient};
use layout_agent_core::paths;
use layout_agent_core::settings::EnvSettings;

mod host;
mod session;

use host::{JsonLinesSink, TerminalObserver};

/// Layout Agent - model-assisted main beam layout
#[derive(Parser)]
#[command(name = "layout-agent")]
#[command(about = "Stage selections, stream model answers, draw main beams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print UI state changes to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Fallback settings file (defaults to ~/.layout-agent/config/dify.settings.json)
    #[arg(long, global = true)]
    settings_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved Dify settings
    Settings,

    /// Send a query and print the answer
    Ask {
        /// Use a single blocking request instead of streaming
        #[arg(long)]
        blocking: bool,

        /// Read the query from a file
        #[arg(short, long, conflicts_with = "query")]
        file: Option<PathBuf>,

        /// Query text (read from stdin when absent)
        query: Vec<String>,
    },

    /// Run a selection summary end to end and draw the result
    Run {
        /// Selection summary JSON
        selection: PathBuf,

        /// Write JSON lines here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Drive the state machine interactively from stdin
    Session,
}

fn init_logging() {
    let log_dir = paths::logs_dir();
    std::fs::create_dir_all(&log_dir).ok();

    let Ok(log_file) = std::fs::File::create(log_dir.join("layout-agent.log")) else {
        return;
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();
}

/// Cancel `token` on the first Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, cancelling");
            token.cancel();
        }
    });
}

fn read_query(file: Option<PathBuf>, words: Vec<String>) -> Result<String> {
    if let Some(path) = file {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()));
    }
    if !words.is_empty() {
        return Ok(words.join(" "));
    }
    let mut query = String::new();
    std::io::stdin().read_to_string(&mut query)?;
    Ok(query)
}

async fn ask(
    client: DifyClient,
    settings_file: &Path,
    blocking: bool,
    query: String,
) -> Result<()> {
    if blocking {
        println!("{}", client.call_blocking(&query).await);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let observer = TerminalObserver::default();
    let mut on_delta = |delta: &str| observer.on_delta(delta);
    let reply = client.stream_chat(&query, &mut on_delta, &cancel).await;
    println!();

    match reply {
        Ok(reply) if reply.is_empty() => {
            println!("{}", reply.text());
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(e) if e.is_cancelled() => {
            eprintln!("canceled.");
            Ok(())
        }
        Err(e) if e.is_configuration() => {
            bail!("{}\nSettings file: {}", e, settings_file.display())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run(agent: Arc<LayoutAgent>, selection: PathBuf, out: Option<PathBuf>) -> Result<()> {
    let summary = session::load_selection(&selection)?;
    agent.select_summary(&summary)?;

    let handle = agent.confirm()?;
    let cancel_agent = Arc::clone(&agent);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_agent.cancel();
        }
    });
    let outcome = handle.await?;
    ctrl_c.abort();
    println!();

    match outcome {
        RunOutcome::Parsed { .. } => {
            agent.draw(&JsonLinesSink::new(out))?;
            Ok(())
        }
        RunOutcome::Cancelled => Ok(()),
        other => bail!("run finished without drawable main beams: {:?}", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let provider = match cli.settings_file {
        Some(path) => EnvSettings::with_file(path),
        None => EnvSettings::new(),
    };
    let settings_file = provider.file().to_path_buf();
    let client = DifyClient::new(Arc::new(provider));
    let observer = Arc::new(TerminalObserver {
        verbose: cli.verbose,
    });

    match cli.command {
        Commands::Settings => {
            let settings = client.settings();
            println!("endpoint: {}", settings.chat_messages_url());
            println!("user:     {}", settings.user);
            if settings.has_api_key() {
                println!("api key:  {}", settings.masked_key());
            } else {
                println!("api key:  (not set, export DIFY_API_KEY or edit the file below)");
            }
            println!("file:     {}", settings_file.display());
        }
        Commands::Ask {
            blocking,
            file,
            query,
        } => {
            let query = read_query(file, query)?;
            ask(client, &settings_file, blocking, query).await?;
        }
        Commands::Run { selection, out } => {
            let agent = LayoutAgent::new(Arc::new(client), observer);
            run(agent, selection, out).await?;
        }
        Commands::Session => {
            let agent = LayoutAgent::new(Arc::new(client), observer);
            session::run_session(agent).await?;
        }
    }

    Ok(())
}
