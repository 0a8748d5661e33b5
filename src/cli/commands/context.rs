//! Context CLI commands: data sources consulted by skip conditions.

use std::path::Path;

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::adapters::sqlite::DataSourceConfiguration;
use crate::cli::app::App;
use crate::cli::args::WorkflowTarget;
use crate::cli::output::{format_time, output, table, CommandOutput};

#[derive(Args, Debug)]
pub struct ContextArgs {
    #[command(subcommand)]
    pub command: ContextCommands,
}

#[derive(Subcommand, Debug)]
pub enum ContextCommands {
    /// Manage data source configurations
    #[command(subcommand)]
    DataSource(DataSourceCommands),
}

#[derive(Subcommand, Debug)]
pub enum DataSourceCommands {
    /// Add or reactivate a data source for a workflow
    Set {
        #[command(flatten)]
        workflow: WorkflowTarget,
        name: String,
        /// Record the source as inactive
        #[arg(long)]
        inactive: bool,
    },
    /// List data sources for a workflow
    List {
        #[command(flatten)]
        workflow: WorkflowTarget,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct DataSourceListOutput {
    pub data_sources: Vec<DataSourceConfiguration>,
    pub active: usize,
}

impl CommandOutput for DataSourceListOutput {
    fn to_human(&self) -> String {
        if self.data_sources.is_empty() {
            return "No data sources configured.".to_string();
        }
        let mut t = table(&["NAME", "ACTIVE", "UPDATED"]);
        for ds in &self.data_sources {
            t.add_row(vec![
                ds.name.clone(),
                if ds.is_active { "yes" } else { "no" }.to_string(),
                format_time(Some(ds.updated_at)),
            ]);
        }
        format!("{} of {} active:\n{t}", self.active, self.data_sources.len())
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ContextActionOutput {
    pub success: bool,
    pub message: String,
}

impl CommandOutput for ContextActionOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: ContextArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let app = App::load(config_path).await?;

    match args.command {
        ContextCommands::DataSource(DataSourceCommands::Set {
            workflow,
            name,
            inactive,
        }) => {
            app.context.set_data_source(workflow.key(), &name, !inactive).await?;
            let out = ContextActionOutput {
                success: true,
                message: format!(
                    "Data source '{}' is {} for {}. Skip conditions apply to workflows registered from now on.",
                    name.trim(),
                    if inactive { "inactive" } else { "active" },
                    workflow.key()
                ),
            };
            output(&out, json_mode);
        }
        ContextCommands::DataSource(DataSourceCommands::List { workflow }) => {
            let data_sources = app.context.list_data_sources(workflow.key()).await?;
            let out = DataSourceListOutput {
                active: data_sources.iter().filter(|d| d.is_active).count(),
                data_sources,
            };
            output(&out, json_mode);
        }
    }
    Ok(())
}
