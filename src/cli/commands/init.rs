//! Implementation of the `cycleflow init` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tokio::fs;

use crate::adapters::sqlite::initialize_database;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, DatabaseConfig};
use crate::infrastructure::config::PROJECT_DIR;
use crate::services::TemplateCatalog;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force reinitialization even if already initialized
    #[arg(long, short)]
    pub force: bool,

    /// Also write the built-in catalog to .cycleflow/catalog.yaml and point the config at it
    #[arg(long)]
    pub export_catalog: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub initialized_path: PathBuf,
    pub files_written: Vec<String>,
    pub database_initialized: bool,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if !self.files_written.is_empty() {
            lines.push("\nWrote:".to_string());
            for file in &self.files_written {
                lines.push(format!("  - {}", file));
            }
        }
        if self.database_initialized {
            lines.push(format!("\nDatabase initialized at {}/cycleflow.db", PROJECT_DIR));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let target_path = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir().context("Failed to get current directory")?.join(&args.path)
    };
    let project_dir = target_path.join(PROJECT_DIR);

    if project_dir.exists() && !args.force {
        let out = InitOutput {
            success: false,
            message: "Project already initialized. Use --force to reinitialize.".to_string(),
            initialized_path: target_path,
            files_written: vec![],
            database_initialized: false,
        };
        output(&out, json_mode);
        return Ok(());
    }

    fs::create_dir_all(project_dir.join("logs"))
        .await
        .with_context(|| format!("Failed to create {}", project_dir.display()))?;

    let mut files_written = Vec::new();
    let mut config = Config::default();

    if args.export_catalog {
        let catalog = TemplateCatalog::builtin()?;
        let catalog_path = project_dir.join("catalog.yaml");
        fs::write(&catalog_path, catalog.to_yaml()?)
            .await
            .with_context(|| format!("Failed to write {}", catalog_path.display()))?;
        config.catalog.path = Some(format!("{}/catalog.yaml", PROJECT_DIR));
        files_written.push(format!("{}/catalog.yaml", PROJECT_DIR));
    }

    // Existing config survives a forced re-init unless it has to change.
    let config_path = project_dir.join("config.yaml");
    if !config_path.exists() || args.export_catalog {
        let yaml = serde_yaml::to_string(&config).context("Failed to serialize default config")?;
        fs::write(&config_path, yaml)
            .await
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        files_written.push(format!("{}/config.yaml", PROJECT_DIR));
    }

    let database = DatabaseConfig {
        path: project_dir.join("cycleflow.db").display().to_string(),
        ..DatabaseConfig::default()
    };
    let pool = initialize_database(&database).await.context("Failed to initialize database")?;
    pool.close().await;

    let out = InitOutput {
        success: true,
        message: if args.force {
            "Project reinitialized successfully.".to_string()
        } else {
            "Project initialized successfully.".to_string()
        },
        initialized_path: target_path,
        files_written,
        database_initialized: true,
    };
    output(&out, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_writes_config_catalog_and_database() {
        let dir = tempfile::tempdir().unwrap();
        let args = InitArgs {
            force: false,
            export_catalog: true,
            path: dir.path().to_path_buf(),
        };
        execute(args, true).await.unwrap();

        let project = dir.path().join(PROJECT_DIR);
        assert!(project.join("cycleflow.db").exists());
        let config: Config =
            serde_yaml::from_str(&std::fs::read_to_string(project.join("config.yaml")).unwrap()).unwrap();
        assert_eq!(config.catalog.path.as_deref(), Some(".cycleflow/catalog.yaml"));

        let catalog = TemplateCatalog::from_file(project.join("catalog.yaml")).unwrap();
        assert_eq!(catalog.phases().count(), 9);
    }
}
