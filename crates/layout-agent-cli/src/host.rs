//! Terminal stand-ins for the host UI and drawing transaction

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use layout_agent_core::agent::{AgentObserver, DrawSink, UiState};
use layout_agent_core::payload::{Point2D, Segment};

/// Shortest segment worth drawing, in millimetres
const MIN_SEGMENT_LENGTH: f64 = 1e-6;

/// Status to stderr, streamed output to stdout
#[derive(Debug, Default)]
pub struct TerminalObserver {
    /// Also print derived UI state changes
    pub verbose: bool,
}

impl AgentObserver for TerminalObserver {
    fn on_status(&self, text: &str) {
        eprintln!("[status] {}", text);
    }

    fn on_delta(&self, delta: &str) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(delta.as_bytes());
        let _ = stdout.flush();
    }

    fn on_ui_state(&self, state: UiState) {
        if self.verbose {
            eprintln!("[state] {}", describe_ui_state(&state));
        }
    }
}

pub fn describe_ui_state(ui: &UiState) -> String {
    let flag = |on: bool, name: &'static str| if on { name } else { "-" };
    format!(
        "{:?} [{} {} {} {}]",
        ui.state,
        flag(ui.can_select, "select"),
        flag(ui.can_confirm, "confirm"),
        flag(ui.can_cancel, "cancel"),
        flag(ui.can_draw, "draw"),
    )
}

#[derive(Serialize)]
struct LineRecord<'a> {
    start: &'a Point2D,
    end: &'a Point2D,
    layout_z: f64,
}

/// Writes one JSON line per drawn segment to a file or stdout
#[derive(Debug, Default)]
pub struct JsonLinesSink {
    path: Option<PathBuf>,
}

impl JsonLinesSink {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    fn write_lines(
        &self,
        out: &mut dyn Write,
        segments: &[Segment],
        layout_z: f64,
    ) -> Result<usize> {
        let mut drawn = 0;
        for segment in segments {
            if segment.length() < MIN_SEGMENT_LENGTH {
                tracing::debug!("Skipping degenerate segment {:?}", segment);
                continue;
            }
            let record = LineRecord {
                start: &segment.start,
                end: &segment.end,
                layout_z,
            };
            serde_json::to_writer(&mut *out, &record)?;
            out.write_all(b"\n")?;
            drawn += 1;
        }
        out.flush()?;
        Ok(drawn)
    }
}

impl DrawSink for JsonLinesSink {
    fn draw_segments(&self, segments: &[Segment], layout_z: f64) -> Result<usize> {
        match &self.path {
            Some(path) => {
                let file = File::create(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                self.write_lines(&mut BufWriter::new(file), segments, layout_z)
            }
            None => self.write_lines(&mut io::stdout().lock(), segments, layout_z),
        }
    }
}
