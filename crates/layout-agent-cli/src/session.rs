//! Interactive line protocol driving the state machine from stdin

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use layout_agent_core::agent::{LayoutAgent, RunOutcome};
use layout_agent_core::selection::SelectionSummary;

use crate::host::{describe_ui_state, JsonLinesSink};

const HELP: &str = "\
commands:
  select <file.json>  stage a selection summary
  confirm             call the model for the staged selection
  cancel              discard the selection or stop the run
  draw [path]         write the last parsed beams as JSON lines
  state               show the run state and enabled actions
  help                show this text
  quit                cancel any run and exit";

enum Command {
    Select(PathBuf),
    Confirm,
    Cancel,
    Draw(Option<PathBuf>),
    State,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Ok(None);
    };
    let arg = parts.next().map(PathBuf::from);

    let command = match word.to_ascii_lowercase().as_str() {
        "select" => Command::Select(arg.ok_or("usage: select <file.json>")?),
        "confirm" => Command::Confirm,
        "cancel" => Command::Cancel,
        "draw" => Command::Draw(arg),
        "state" => Command::State,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command: {} (try help)", other)),
    };
    Ok(Some(command))
}

/// Read a selection summary, filling the level from the view name if absent
pub fn load_selection(path: &Path) -> Result<SelectionSummary> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut summary: SelectionSummary = serde_json::from_str(&text)
        .with_context(|| format!("Invalid selection summary in {}", path.display()))?;
    if summary.height_label.is_empty() {
        summary.apply_level_from_view_name()?;
    }
    Ok(summary)
}

pub async fn run_session(agent: Arc<LayoutAgent>) -> Result<()> {
    eprintln!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut run: Option<JoinHandle<RunOutcome>> = None;

    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        match command {
            Command::Select(path) => match load_selection(&path) {
                // Refusals are reported through the status callback
                Ok(summary) => {
                    let _ = agent.select_summary(&summary);
                }
                Err(e) => eprintln!("{:#}", e),
            },
            Command::Confirm => {
                if let Ok(handle) = agent.confirm() {
                    run = Some(handle);
                }
            }
            Command::Cancel => agent.cancel(),
            Command::Draw(path) => {
                let _ = agent.draw(&JsonLinesSink::new(path));
            }
            Command::State => eprintln!("{}", describe_ui_state(&agent.ui_state())),
            Command::Help => eprintln!("{}", HELP),
            Command::Quit => break,
        }
    }

    if agent.has_active_run() {
        agent.cancel();
    }
    if let Some(handle) = run {
        let outcome = handle.await?;
        tracing::info!("Session ended, last run: {:?}", outcome);
    }
    Ok(())
}
