//! `cycleflow actionable`: what a role can start or complete now.

use std::path::Path;

use anyhow::Result;
use clap::Args;

use crate::cli::app::App;
use crate::cli::args::parse_role;
use crate::cli::output::{output, table, CommandOutput};
use crate::domain::models::Role;
use crate::services::ActionableActivity;

#[derive(Args, Debug)]
pub struct ActionableArgs {
    /// Role to list work for; admin sees everything
    #[arg(value_parser = parse_role)]
    pub role: Role,

    /// Restrict to one test cycle
    #[arg(long)]
    pub cycle: Option<i64>,

    /// Restrict to one report
    #[arg(long)]
    pub report: Option<i64>,
}

#[derive(Debug, serde::Serialize)]
pub struct ActionableOutput {
    pub role: Role,
    pub activities: Vec<ActionableActivity>,
    pub total: usize,
}

impl CommandOutput for ActionableOutput {
    fn to_human(&self) -> String {
        if self.activities.is_empty() {
            return format!("Nothing actionable for {}.", self.role);
        }
        let mut t = table(&["CYCLE", "REPORT", "PHASE", "ACTIVITY", "ACTION", "ROLE"]);
        for a in &self.activities {
            t.add_row(vec![
                a.activity.cycle_id.to_string(),
                a.activity.report_id.to_string(),
                a.activity.phase.to_string(),
                a.activity.activity_name.clone(),
                a.action.to_string(),
                a.required_role.to_string(),
            ]);
        }
        format!("{} actionable activit{} for {}:\n{t}", self.total, if self.total == 1 { "y" } else { "ies" }, self.role)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: ActionableArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let app = App::load(config_path).await?;
    let activities = app
        .query
        .list_actionable_activities(args.role, args.cycle, args.report)
        .await?;

    let out = ActionableOutput {
        role: args.role,
        total: activities.len(),
        activities,
    };
    output(&out, json_mode);
    Ok(())
}
