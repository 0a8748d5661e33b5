//! Template catalog CLI commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::cli::args::parse_phase;
use crate::cli::output::{output, table, CommandOutput};
use crate::domain::models::{ActivityTemplate, DependencyType, PhaseName, PhaseTemplate};
use crate::infrastructure::config::ConfigLoader;
use crate::services::{DependencyResolver, TemplateCatalog};

#[derive(Args, Debug)]
pub struct CatalogArgs {
    #[command(subcommand)]
    pub command: CatalogCommands,
}

#[derive(Subcommand, Debug)]
pub enum CatalogCommands {
    /// Summarize every phase, or list the activities of one phase
    Show {
        /// Phase to expand
        #[arg(long, value_parser = parse_phase)]
        phase: Option<PhaseName>,
    },
    /// Write the active catalog as YAML
    Export {
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a catalog file without loading it into the project
    Validate {
        /// Catalog YAML file
        path: PathBuf,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct PhaseRow {
    pub order: u32,
    pub phase: String,
    pub activities: usize,
    pub edges: usize,
    pub depth: u32,
    pub sla_hours: Option<i64>,
}

#[derive(Debug, serde::Serialize)]
pub struct CatalogSummaryOutput {
    pub version: String,
    pub phases: Vec<PhaseRow>,
}

impl CommandOutput for CatalogSummaryOutput {
    fn to_human(&self) -> String {
        let mut t = table(&["#", "PHASE", "ACTIVITIES", "EDGES", "DEPTH", "SLA"]);
        for p in &self.phases {
            t.add_row(vec![
                p.order.to_string(),
                p.phase.clone(),
                p.activities.to_string(),
                p.edges.to_string(),
                p.depth.to_string(),
                p.sla_hours.map(|h| format!("{h}h")).unwrap_or_else(|| "-".to_string()),
            ]);
        }
        format!("Catalog {}\n{t}", self.version)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ActivityRow {
    pub order: u32,
    pub name: String,
    pub activity_type: String,
    pub required_role: String,
    pub optional: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_complete_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_when: Option<String>,
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sla_hours: Option<i64>,
}

#[derive(Debug, serde::Serialize)]
pub struct PhaseDetailOutput {
    pub phase: String,
    pub activities: Vec<ActivityRow>,
}

impl CommandOutput for PhaseDetailOutput {
    fn to_human(&self) -> String {
        let mut t = table(&["#", "ACTIVITY", "TYPE", "ROLE", "DEPENDS ON", "TRIGGERS", "SLA"]);
        for a in &self.activities {
            let mut triggers = Vec::new();
            if a.optional {
                triggers.push("optional".to_string());
            }
            if let Some(event) = &a.auto_complete_on {
                triggers.push(format!("on {event}"));
            }
            if let Some(skip) = &a.skip_when {
                triggers.push(format!("skip if {skip}"));
            }
            t.add_row(vec![
                a.order.to_string(),
                a.name.clone(),
                a.activity_type.clone(),
                a.required_role.clone(),
                if a.depends_on.is_empty() { "-".to_string() } else { a.depends_on.join(", ") },
                if triggers.is_empty() { "-".to_string() } else { triggers.join("; ") },
                a.sla_hours.map(|h| format!("{h}h")).unwrap_or_else(|| "-".to_string()),
            ]);
        }
        format!("{}\n{t}", self.phase)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct CatalogActionOutput {
    pub success: bool,
    pub message: String,
}

impl CommandOutput for CatalogActionOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn describe_edge(template: &PhaseTemplate, activity: &ActivityTemplate) -> Vec<String> {
    template
        .edges_for(&activity.name)
        .map(|e| match e.dependency_type {
            DependencyType::Completion => e.depends_on.clone(),
            DependencyType::Approval => format!("{} (approval)", e.depends_on),
            DependencyType::Any => format!("{} (any {})", e.depends_on, e.group_key()),
        })
        .collect()
}

pub fn summarize(catalog: &TemplateCatalog) -> Result<CatalogSummaryOutput> {
    let resolver = DependencyResolver::new();
    let mut phases = Vec::new();
    for template in catalog.phases() {
        phases.push(PhaseRow {
            order: template.order,
            phase: template.name.display_name().to_string(),
            activities: template.activities.len(),
            edges: template.edges.len(),
            depth: resolver.max_depth(template)?,
            sla_hours: catalog.phase_sla(template.name).map(|c| c.sla_hours),
        });
    }
    phases.sort_by_key(|p| p.order);
    Ok(CatalogSummaryOutput {
        version: catalog.version().to_string(),
        phases,
    })
}

pub fn phase_detail(catalog: &TemplateCatalog, phase: PhaseName) -> Result<PhaseDetailOutput> {
    let template = catalog.get_phase_template(phase)?;
    let activities = template
        .ordered_activities()
        .into_iter()
        .map(|a| ActivityRow {
            order: a.order,
            name: a.name.clone(),
            activity_type: a.activity_type.as_str().to_string(),
            required_role: a.required_role.as_str().to_string(),
            optional: a.is_optional,
            auto_complete_on: a.auto_complete_on_event.clone(),
            skip_when: a.skip_condition.as_ref().map(|c| c.describe()),
            depends_on: describe_edge(template, a),
            sla_hours: catalog.activity_sla(phase, a).map(|c| c.sla_hours),
        })
        .collect();
    Ok(PhaseDetailOutput {
        phase: phase.display_name().to_string(),
        activities,
    })
}

fn load_active_catalog(config_path: Option<&Path>) -> Result<TemplateCatalog> {
    let config = match config_path {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    TemplateCatalog::load(config.catalog.path.as_deref()).context("Failed to load template catalog")
}

pub async fn execute(args: CatalogArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    match args.command {
        CatalogCommands::Show { phase } => {
            let catalog = load_active_catalog(config_path)?;
            match phase {
                Some(phase) => output(&phase_detail(&catalog, phase)?, json_mode),
                None => output(&summarize(&catalog)?, json_mode),
            }
        }

        CatalogCommands::Export { output: Some(path) } => {
            let catalog = load_active_catalog(config_path)?;
            tokio::fs::write(&path, catalog.to_yaml()?)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            let out = CatalogActionOutput {
                success: true,
                message: format!("Catalog {} written to {}", catalog.version(), path.display()),
            };
            output(&out, json_mode);
        }

        CatalogCommands::Export { output: None } => {
            let catalog = load_active_catalog(config_path)?;
            if json_mode {
                println!("{}", serde_json::to_string_pretty(&catalog.to_document())?);
            } else {
                print!("{}", catalog.to_yaml()?);
            }
        }

        CatalogCommands::Validate { path } => {
            let catalog = TemplateCatalog::from_file(&path)
                .with_context(|| format!("Catalog {} is invalid", path.display()))?;
            let activities: usize = catalog.phases().map(|p| p.activities.len()).sum();
            let out = CatalogActionOutput {
                success: true,
                message: format!(
                    "Catalog {} is valid: {} phases, {} activities, {} SLA configurations",
                    catalog.version(),
                    catalog.phases().count(),
                    activities,
                    catalog.sla_configurations().len()
                ),
            };
            output(&out, json_mode);
        }
    }
    Ok(())
}
