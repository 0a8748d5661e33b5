//! SLA CLI commands: one-off sweeps, a watch loop and violation listing.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};

use crate::cli::app::App;
use crate::cli::args::parse_timestamp;
use crate::cli::output::{format_time, output, table, CommandOutput};
use crate::domain::models::{SlaViolation, WorkflowKey};
use crate::domain::ports::ViolationFilter;
use crate::services::SweepReport;

#[derive(Args, Debug)]
pub struct SlaArgs {
    #[command(subcommand)]
    pub command: SlaCommands,
}

#[derive(Subcommand, Debug)]
pub enum SlaCommands {
    /// Run a single sweep and report what changed
    Sweep {
        /// Evaluate as of this time instead of now
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<DateTime<Utc>>,
    },
    /// Sweep on the configured interval until interrupted
    Watch {
        /// Override sla_monitor.sweep_interval_secs
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// List SLA violations, most recent first
    Violations {
        #[arg(long)]
        cycle: Option<i64>,
        #[arg(long, requires = "cycle")]
        report: Option<i64>,
        /// Include resolved violations
        #[arg(long)]
        all: bool,
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[derive(Debug, serde::Serialize)]
#[serde(transparent)]
pub struct SweepOutput(pub SweepReport);

impl CommandOutput for SweepOutput {
    fn to_human(&self) -> String {
        let r = &self.0;
        let mut lines = vec![format!(
            "Checked {} target(s): {} violation(s) opened, {} escalation(s), {} warning(s), {} resolved",
            r.checked, r.violations_opened, r.escalations, r.warnings, r.resolved
        )];
        if r.failures > 0 {
            lines.push(format!("{} evaluation(s) failed and will be retried:", r.failures));
            for e in &r.errors {
                lines.push(format!("  {e}"));
            }
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ViolationListOutput {
    pub violations: Vec<SlaViolation>,
    pub total: usize,
}

impl CommandOutput for ViolationListOutput {
    fn to_human(&self) -> String {
        if self.violations.is_empty() {
            return "No SLA violations found.".to_string();
        }
        let mut t = table(&["CYCLE", "REPORT", "PHASE", "ACTIVITY", "DUE", "LEVEL", "STATUS", "RESOLVED"]);
        for v in &self.violations {
            t.add_row(vec![
                v.cycle_id.to_string(),
                v.report_id.to_string(),
                v.phase.to_string(),
                v.activity_name.clone().unwrap_or_else(|| "-".to_string()),
                format_time(Some(v.due_at)),
                v.escalation_level.to_string(),
                v.status.as_str().to_string(),
                format_time(v.resolved_at),
            ]);
        }
        format!("Found {} violation(s):\n{t}", self.total)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: SlaArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    match args.command {
        SlaCommands::Sweep { at } => {
            let app = App::load(config_path).await?;
            let report = app
                .monitor
                .sweep(at.unwrap_or_else(Utc::now))
                .await
                .context("SLA sweep failed")?;
            output(&SweepOutput(report), json_mode);
        }

        SlaCommands::Watch { interval_secs } => {
            let mut config = App::load_config(config_path)?;
            if !config.sla_monitor.enabled {
                anyhow::bail!("sla_monitor.enabled is false; enable it in config to watch");
            }
            if let Some(secs) = interval_secs {
                config.sla_monitor.sweep_interval_secs = secs.max(1);
            }
            let app = App::open(config).await?;

            let handle = app.monitor.start();
            tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
            app.monitor.stop();
            handle.abort();
            tracing::info!("sla watch interrupted");
        }

        SlaCommands::Violations {
            cycle,
            report,
            all,
            limit,
        } => {
            let app = App::load(config_path).await?;
            let mut violations = app
                .query
                .list_violations(ViolationFilter {
                    workflow: match (cycle, report) {
                        (Some(c), Some(r)) => Some(WorkflowKey::new(c, r)),
                        _ => None,
                    },
                    open_only: !all,
                    limit: if cycle.is_some() && report.is_none() { None } else { limit },
                })
                .await?;
            // A cycle without a report filters client-side.
            if let (Some(c), None) = (cycle, report) {
                violations.retain(|v| v.cycle_id == c);
                if let Some(limit) = limit {
                    violations.truncate(limit);
                }
            }
            let out = ViolationListOutput {
                total: violations.len(),
                violations,
            };
            output(&out, json_mode);
        }
    }
    Ok(())
}
