//! Workflow CLI commands: register, status, overview, list, schedule.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};

use crate::cli::app::App;
use crate::cli::args::{parse_phase, parse_timestamp, ActorArgs, WorkflowTarget};
use crate::cli::commands::activity::TransitionOutput;
use crate::cli::output::{format_time, output, table, truncate, CommandOutput};
use crate::domain::models::{PhaseName, WorkflowKey};
use crate::services::{PhaseStatusView, RegistrationReport, WorkflowOverview};

#[derive(Args, Debug)]
pub struct WorkflowArgs {
    #[command(subcommand)]
    pub command: WorkflowCommands,
}

#[derive(Subcommand, Debug)]
pub enum WorkflowCommands {
    /// Create every phase and activity instance for a cycle/report pair
    Register {
        #[command(flatten)]
        workflow: WorkflowTarget,
        #[command(flatten)]
        actor: ActorArgs,
    },
    /// Show one phase with its activities, progress and open violations
    Status {
        #[command(flatten)]
        workflow: WorkflowTarget,
        #[arg(value_parser = parse_phase)]
        phase: PhaseName,
    },
    /// Show all nine phases of a workflow
    Overview {
        #[command(flatten)]
        workflow: WorkflowTarget,
    },
    /// List registered workflows
    List,
    /// Set planned dates for a phase
    Schedule {
        #[command(flatten)]
        workflow: WorkflowTarget,
        #[arg(value_parser = parse_phase)]
        phase: PhaseName,
        /// Planned start (RFC3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_timestamp)]
        start: Option<DateTime<Utc>>,
        /// Planned end; the phase SLA is measured against it
        #[arg(long, value_parser = parse_timestamp)]
        end: Option<DateTime<Utc>>,
        #[command(flatten)]
        actor: ActorArgs,
    },
}

#[derive(Debug, serde::Serialize)]
#[serde(transparent)]
pub struct RegistrationOutput(pub RegistrationReport);

impl CommandOutput for RegistrationOutput {
    fn to_human(&self) -> String {
        let r = &self.0;
        if !r.created {
            return format!("Workflow {} is already registered.", r.workflow);
        }
        let mut lines = vec![format!(
            "Registered {}: {} phases, {} activities (catalog {})",
            r.workflow, r.phases, r.activities, r.catalog_version
        )];
        for action in &r.auto_actions {
            lines.push(format!("  {} / {} -> {}", action.phase, action.activity, action.status));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
#[serde(transparent)]
pub struct PhaseStatusOutput(pub PhaseStatusView);

impl CommandOutput for PhaseStatusOutput {
    fn to_human(&self) -> String {
        let view = &self.0;
        let mut lines = vec![format!(
            "{} ({}): {} | {}/{} done | started {} | due {}",
            view.phase.phase,
            view.phase.workflow(),
            view.phase.status.as_str(),
            view.progress.done(),
            view.progress.total,
            format_time(view.phase.actual_start),
            format_time(view.phase.planned_end),
        )];

        let mut t = table(&["ACTIVITY", "STATUS", "ROLE", "START?", "BLOCKED BY"]);
        for a in &view.activities {
            t.add_row(vec![
                a.instance.activity_name.clone(),
                a.instance.status.to_string(),
                a.required_role.to_string(),
                if a.instance.can_start { "yes" } else { "no" }.to_string(),
                truncate(&a.blocking_reasons.join("; "), 50),
            ]);
        }
        lines.push(t.to_string());

        for v in &view.open_violations {
            lines.push(format!(
                "SLA breached: {} (due {}, level {})",
                v.activity_name.as_deref().unwrap_or("phase"),
                format_time(Some(v.due_at)),
                v.escalation_level
            ));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
#[serde(transparent)]
pub struct OverviewOutput(pub WorkflowOverview);

impl CommandOutput for OverviewOutput {
    fn to_human(&self) -> String {
        let o = &self.0;
        let mut t = table(&["#", "PHASE", "STATUS", "DONE", "IN PROGRESS", "STARTED", "DUE", "ENDED"]);
        for p in &o.phases {
            t.add_row(vec![
                p.order.to_string(),
                p.phase.to_string(),
                p.status.as_str().to_string(),
                format!("{}/{}", p.progress.done(), p.progress.total),
                p.progress.in_progress.to_string(),
                format_time(p.actual_start),
                format_time(p.planned_end),
                format_time(p.actual_end),
            ]);
        }
        format!("Workflow {} ({} open SLA violation(s))\n{t}", o.workflow, o.open_violations)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct WorkflowListOutput {
    pub workflows: Vec<WorkflowKey>,
    pub total: usize,
}

impl CommandOutput for WorkflowListOutput {
    fn to_human(&self) -> String {
        if self.workflows.is_empty() {
            return "No workflows registered.".to_string();
        }
        let mut t = table(&["CYCLE", "REPORT"]);
        for w in &self.workflows {
            t.add_row(vec![w.cycle_id.to_string(), w.report_id.to_string()]);
        }
        format!("Found {} workflow(s):\n{t}", self.total)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: WorkflowArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let app = App::load(config_path).await?;

    match args.command {
        WorkflowCommands::Register { workflow, actor } => {
            let report = app
                .engine
                .register_workflow(workflow.key(), &actor.actor())
                .await
                .with_context(|| format!("Failed to register {}", workflow.key()))?;
            output(&RegistrationOutput(report), json_mode);
        }

        WorkflowCommands::Status { workflow, phase } => {
            let view = app.query.get_phase_status(workflow.key(), phase).await?;
            output(&PhaseStatusOutput(view), json_mode);
        }

        WorkflowCommands::Overview { workflow } => {
            let overview = app.query.get_workflow_overview(workflow.key()).await?;
            output(&OverviewOutput(overview), json_mode);
        }

        WorkflowCommands::List => {
            let workflows = app.query.list_workflows().await?;
            let out = WorkflowListOutput {
                total: workflows.len(),
                workflows,
            };
            output(&out, json_mode);
        }

        WorkflowCommands::Schedule {
            workflow,
            phase,
            start,
            end,
            actor,
        } => {
            let report = app
                .engine
                .set_phase_schedule(workflow.key(), phase, start, end, &actor.actor())
                .await
                .with_context(|| format!("Failed to schedule {phase}"))?;
            output(&TransitionOutput(report), json_mode);
        }
    }

    Ok(())
}
