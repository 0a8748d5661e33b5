//! `cycleflow signal`: record a domain event for a phase.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use crate::cli::app::App;
use crate::cli::args::{parse_phase, WorkflowTarget};
use crate::cli::commands::activity::TransitionOutput;
use crate::cli::output::output;
use crate::domain::models::{Actor, PhaseName};

#[derive(Args, Debug)]
pub struct SignalArgs {
    #[command(flatten)]
    pub workflow: WorkflowTarget,

    /// Phase the event belongs to
    #[arg(value_parser = parse_phase)]
    pub phase: PhaseName,

    /// Event name, e.g. tests.executed
    pub event: String,

    /// Who reported the event
    #[arg(long, default_value = "system")]
    pub actor: String,
}

pub async fn execute(args: SignalArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let app = App::load(config_path).await?;
    let report = app
        .engine
        .record_domain_event(args.workflow.key(), args.phase, &args.event, &Actor::new(args.actor, None))
        .await
        .with_context(|| format!("Cannot record '{}' for {}", args.event, args.phase))?;

    output(&TransitionOutput(report), json_mode);
    Ok(())
}
