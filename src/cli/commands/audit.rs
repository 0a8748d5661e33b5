//! Audit log CLI commands.

use std::path::Path;

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::cli::app::App;
use crate::cli::args::{parse_entity_type, parse_phase, WorkflowTarget};
use crate::cli::output::{format_time, output, table, truncate, CommandOutput};
use crate::domain::models::{ActivityKey, AuditEntityType, AuditFilter, AuditLogEntry, PhaseName, WorkflowKey};
use crate::services::workflow_engine::workflow_entity_id;

#[derive(Args, Debug)]
pub struct AuditArgs {
    #[command(subcommand)]
    pub command: AuditCommands,
}

#[derive(Subcommand, Debug)]
pub enum AuditCommands {
    /// History of one entity, oldest first
    Trail {
        /// workflow, phase, activity or sla_violation
        #[arg(long = "type", value_parser = parse_entity_type)]
        entity_type: AuditEntityType,
        /// Entity id (instance UUID, or cycle/report for workflows)
        id: String,
    },
    /// History of an activity looked up by its natural key
    Activity {
        #[command(flatten)]
        workflow: WorkflowTarget,
        #[arg(value_parser = parse_phase)]
        phase: PhaseName,
        activity: String,
    },
    /// Recent entries across the whole log
    Recent {
        /// Only entries by this actor
        #[arg(long)]
        actor: Option<String>,
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct AuditTrailOutput {
    pub entries: Vec<AuditLogEntry>,
    pub total: usize,
}

fn render_value(value: Option<&serde_json::Value>) -> String {
    match value {
        None => "-".to_string(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => truncate(&other.to_string(), 40),
    }
}

impl CommandOutput for AuditTrailOutput {
    fn to_human(&self) -> String {
        if self.entries.is_empty() {
            return "No audit entries found.".to_string();
        }
        let mut t = table(&["WHEN", "ACTION", "BY", "FROM", "TO", "NOTE"]);
        for e in &self.entries {
            t.add_row(vec![
                format_time(Some(e.performed_at)),
                e.action.as_str().to_string(),
                e.performed_by.clone(),
                render_value(e.old_value.as_ref()),
                render_value(e.new_value.as_ref()),
                truncate(e.note.as_deref().unwrap_or(""), 40),
            ]);
        }
        format!("{} entr{}:\n{t}", self.total, if self.total == 1 { "y" } else { "ies" })
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: AuditArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let app = App::load(config_path).await?;

    let entries = match args.command {
        AuditCommands::Trail { entity_type, id } => {
            // Workflows are keyed by "cycle/report"; accept "cycle report" too.
            let id = if entity_type == AuditEntityType::Workflow {
                parse_workflow_id(&id).unwrap_or(id)
            } else {
                id
            };
            app.query.get_audit_trail(entity_type, &id).await?
        }
        AuditCommands::Activity {
            workflow,
            phase,
            activity,
        } => {
            let key = ActivityKey::new(workflow.cycle_id, workflow.report_id, phase, activity);
            let instance = app
                .query
                .find_activity(&key)
                .await?
                .ok_or_else(|| anyhow::anyhow!("No activity '{}' in {} for {}", key.activity, phase, workflow.key()))?;
            app.query
                .get_audit_trail(AuditEntityType::Activity, &instance.id.to_string())
                .await?
        }
        AuditCommands::Recent { actor, limit } => {
            let mut filter = AuditFilter::new();
            if let Some(actor) = actor {
                filter = filter.with_actor(actor);
            }
            let mut entries = app.query.audit_entries(filter).await?;
            let skip = entries.len().saturating_sub(limit);
            entries.drain(..skip);
            entries
        }
    };

    let out = AuditTrailOutput {
        total: entries.len(),
        entries,
    };
    output(&out, json_mode);
    Ok(())
}

fn parse_workflow_id(id: &str) -> Option<String> {
    let mut parts = id.split(|c: char| c == '/' || c.is_whitespace()).filter(|p| !p.is_empty());
    let cycle: i64 = parts.next()?.parse().ok()?;
    let report: i64 = parts.next()?.parse().ok()?;
    Some(workflow_entity_id(WorkflowKey::new(cycle, report)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_workflow_id_forms() {
        assert_eq!(parse_workflow_id("21/156").as_deref(), Some("21/156"));
        assert_eq!(parse_workflow_id("21 156").as_deref(), Some("21/156"));
        assert_eq!(parse_workflow_id("abc"), None);
    }
}
