//! Trigger rule engine for automatic skips and completions.
//!
//! Rules come from the template catalog: an activity's `skip_condition` and
//! its `auto_complete_on_event`. They are evaluated against a phase working
//! copy at registration and after every change in the phase, acting as the
//! system actor, until nothing else fires.

use crate::domain::errors::DomainResult;
use crate::domain::models::{ActivityStatus, ActivityTemplate, Actor, SkipCondition};
use crate::services::dependency_resolver::DependencyResolver;
use crate::services::phase_state::PhaseState;

// ---------------------------------------------------------------------------
// Evaluation context
// ---------------------------------------------------------------------------

/// Facts from outside the phase, fetched once per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerContext {
    pub has_active_data_source: bool,
}

impl TriggerContext {
    pub fn with_active_data_source(mut self, active: bool) -> Self {
        self.has_active_data_source = active;
        self
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Evaluates skip and auto-complete rules for one phase.
#[derive(Debug, Clone, Default)]
pub struct TriggerRuleEngine {
    resolver: DependencyResolver,
}

impl TriggerRuleEngine {
    pub fn new(resolver: DependencyResolver) -> Self {
        Self { resolver }
    }

    /// Whether a skip condition currently holds for `activity`.
    pub fn condition_holds(
        &self,
        condition: &SkipCondition,
        activity: &ActivityTemplate,
        state: &PhaseState<'_>,
        ctx: &TriggerContext,
    ) -> bool {
        match condition {
            SkipCondition::HasActiveDataSource => ctx.has_active_data_source,
            SkipCondition::AllPrerequisitesSkipped => {
                let mut prerequisites = state.template.edges_for(&activity.name).peekable();
                prerequisites.peek().is_some()
                    && prerequisites.all(|edge| {
                        state
                            .find(&edge.depends_on)
                            .is_some_and(|p| p.status == ActivityStatus::Skipped)
                    })
            }
            SkipCondition::PhaseDataFlag { key } => state.phase.flag(key),
        }
    }

    /// Apply rules until a fixpoint. Returns the number of activities acted on.
    ///
    /// Every productive pass moves at least one activity into a terminal
    /// state, so the number of passes is bounded by the activity count.
    pub fn run(&self, state: &mut PhaseState<'_>, ctx: &TriggerContext) -> DomainResult<usize> {
        let system = Actor::system();
        let phase_template = state.template;
        let max_passes = phase_template.activities.len() + 1;
        let mut acted_on = 0;

        for _ in 0..max_passes {
            state.refresh_flags(&self.resolver);
            let mut fired = false;

            for template in phase_template.ordered_activities() {
                let Some(instance) = state.find(&template.name) else {
                    continue;
                };
                let (status, can_start) = (instance.status, instance.can_start);

                if status == ActivityStatus::NotStarted {
                    if let Some(condition) = &template.skip_condition {
                        if self.condition_holds(condition, template, state, ctx) {
                            let note = format!("auto-skipped: {}", condition.describe());
                            state.transition(&template.name, ActivityStatus::Skipped, &system, Some(note), true)?;
                            tracing::info!(
                                cycle_id = state.phase.cycle_id,
                                report_id = state.phase.report_id,
                                phase = %state.phase.phase.as_str(),
                                activity = %template.name,
                                condition = %condition.describe(),
                                "activity auto-skipped"
                            );
                            acted_on += 1;
                            fired = true;
                            continue;
                        }
                    }
                }

                let Some(event) = &template.auto_complete_on_event else {
                    continue;
                };
                if !state.phase.has_received(event) {
                    continue;
                }
                // Work already under way only needs closing; untouched work
                // must be eligible before it is started on the user's behalf.
                match status {
                    ActivityStatus::NotStarted if can_start => {
                        state.transition(
                            &template.name,
                            ActivityStatus::InProgress,
                            &system,
                            Some(format!("auto-started: event '{event}' received")),
                            true,
                        )?;
                    }
                    ActivityStatus::InProgress => {}
                    _ => continue,
                }
                state.transition(
                    &template.name,
                    ActivityStatus::Completed,
                    &system,
                    Some(format!("auto-completed: event '{event}' received")),
                    true,
                )?;
                tracing::info!(
                    cycle_id = state.phase.cycle_id,
                    report_id = state.phase.report_id,
                    phase = %state.phase.phase.as_str(),
                    activity = %template.name,
                    event = %event,
                    "activity auto-completed"
                );
                acted_on += 1;
                fired = true;
            }

            if !fired {
                break;
            }
        }

        state.refresh_flags(&self.resolver);
        Ok(acted_on)
    }
}
