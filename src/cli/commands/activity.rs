//! Activity transition CLI commands.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::cli::app::App;
use crate::cli::args::{ActivityTarget, ActorArgs};
use crate::cli::output::{output, CommandOutput};
use crate::services::{TransitionOutcome, TransitionReport};

#[derive(Args, Debug)]
pub struct ActivityArgs {
    #[command(subcommand)]
    pub command: ActivityCommands,
}

#[derive(Subcommand, Debug)]
pub enum ActivityCommands {
    /// Start an activity whose prerequisites are satisfied
    Start {
        #[command(flatten)]
        target: ActivityTarget,
        #[command(flatten)]
        actor: ActorArgs,
    },
    /// Complete an in-progress activity
    Complete {
        #[command(flatten)]
        target: ActivityTarget,
        #[command(flatten)]
        actor: ActorArgs,
    },
    /// Send a completed activity back for rework
    Revise {
        #[command(flatten)]
        target: ActivityTarget,
        #[command(flatten)]
        actor: ActorArgs,
        /// Why the work has to be redone
        #[arg(long)]
        reason: String,
    },
    /// Skip an optional activity, or one whose skip condition holds
    Skip {
        #[command(flatten)]
        target: ActivityTarget,
        #[command(flatten)]
        actor: ActorArgs,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Put an in-progress activity on hold
    Block {
        #[command(flatten)]
        target: ActivityTarget,
        #[command(flatten)]
        actor: ActorArgs,
        #[arg(long)]
        reason: String,
    },
}

/// Human and JSON rendering of a `TransitionReport`.
#[derive(Debug, serde::Serialize)]
#[serde(transparent)]
pub struct TransitionOutput(pub TransitionReport);

impl CommandOutput for TransitionOutput {
    fn to_human(&self) -> String {
        let report = &self.0;
        let subject = match &report.activity {
            Some(activity) => format!("{} / {}", report.phase, activity),
            None => report.phase.to_string(),
        };

        let mut lines = vec![match report.outcome {
            TransitionOutcome::Applied => format!("{subject}: applied"),
            TransitionOutcome::AlreadyInState(status) => format!("{subject}: already {status}, nothing to do"),
            TransitionOutcome::NoChange => format!("{subject}: no change"),
        }];

        for change in &report.changes {
            lines.push(format!(
                "  {:<32} {} -> {}{}",
                change.activity,
                change.from,
                change.to,
                if change.automatic { "  (auto)" } else { "" }
            ));
        }
        if report.phase_completed {
            lines.push(format!("Phase {} completed", report.phase));
        } else if report.phase_reopened {
            lines.push(format!("Phase {} reopened", report.phase));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: ActivityArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let app = App::load(config_path).await?;
    let engine = &app.engine;

    let report = match args.command {
        ActivityCommands::Start { target, actor } => engine
            .start_activity(&target.key(), &actor.actor())
            .await
            .with_context(|| format!("Cannot start '{}'", target.activity))?,
        ActivityCommands::Complete { target, actor } => engine
            .complete_activity(&target.key(), &actor.actor())
            .await
            .with_context(|| format!("Cannot complete '{}'", target.activity))?,
        ActivityCommands::Revise { target, actor, reason } => engine
            .request_revision(&target.key(), &actor.actor(), &reason)
            .await
            .with_context(|| format!("Cannot request revision of '{}'", target.activity))?,
        ActivityCommands::Skip { target, actor, reason } => engine
            .skip_activity(&target.key(), &actor.actor(), reason.as_deref())
            .await
            .with_context(|| format!("Cannot skip '{}'", target.activity))?,
        ActivityCommands::Block { target, actor, reason } => engine
            .block_activity(&target.key(), &actor.actor(), &reason)
            .await
            .with_context(|| format!("Cannot block '{}'", target.activity))?,
    };

    output(&TransitionOutput(report), json_mode);
    Ok(())
}
