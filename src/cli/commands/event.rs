//! `cycleflow event apply`: feed inbound events through the dispatcher.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tokio::io::AsyncReadExt;

use crate::cli::app::App;
use crate::cli::output::{output, CommandOutput};
use crate::services::{parse_events, TransitionReport};

#[derive(Args, Debug)]
pub struct EventArgs {
    #[command(subcommand)]
    pub command: EventCommands,
}

#[derive(Subcommand, Debug)]
pub enum EventCommands {
    /// Apply a JSON event, a JSON array, or newline-delimited JSON
    Apply {
        /// Input file; '-' or omitted reads stdin
        file: Option<PathBuf>,

        /// Stop at the first failing event
        #[arg(long)]
        fail_fast: bool,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct EventResult {
    pub index: usize,
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<TransitionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct EventApplyOutput {
    pub applied: usize,
    pub failed: usize,
    pub results: Vec<EventResult>,
}

impl CommandOutput for EventApplyOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("{} event(s) applied, {} failed", self.applied, self.failed)];
        for r in &self.results {
            match (&r.report, &r.error) {
                (Some(report), _) => lines.push(format!(
                    "  #{:<3} {:<26} {} ({} change(s))",
                    r.index + 1,
                    r.event,
                    report.outcome.as_str(),
                    report.changes.len()
                )),
                (None, Some(error)) => lines.push(format!("  #{:<3} {:<26} error: {}", r.index + 1, r.event, error)),
                (None, None) => {}
            }
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

async fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) if path != Path::new("-") => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut input = String::new();
            tokio::io::stdin()
                .read_to_string(&mut input)
                .await
                .context("Failed to read events from stdin")?;
            Ok(input)
        }
    }
}

pub async fn execute(args: EventArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let EventCommands::Apply { file, fail_fast } = args.command;

    let input = read_input(file.as_deref()).await?;
    let events = parse_events(&input).context("Failed to parse events")?;

    let app = App::load(config_path).await?;
    let dispatcher = app.dispatcher();

    let mut out = EventApplyOutput {
        applied: 0,
        failed: 0,
        results: Vec::with_capacity(events.len()),
    };

    for (index, event) in events.into_iter().enumerate() {
        let name = event.name();
        match dispatcher.dispatch(event).await {
            Ok(report) => {
                out.applied += 1;
                out.results.push(EventResult {
                    index,
                    event: name,
                    report: Some(report),
                    error: None,
                });
            }
            Err(e) => {
                tracing::warn!(index, event = name, error = %e, "event rejected");
                out.failed += 1;
                out.results.push(EventResult {
                    index,
                    event: name,
                    report: None,
                    error: Some(e.to_string()),
                });
                if fail_fast {
                    break;
                }
            }
        }
    }

    output(&out, json_mode);
    if out.failed > 0 {
        anyhow::bail!("{} event(s) failed", out.failed);
    }
    Ok(())
}
