use std::collections::{BTreeMap, HashMap, HashSet};

use cycleflow::domain::models::{
    ActivityStatus, ActivityTemplate, ActivityType, DependencyEdge, DependencyType, PhaseName,
    PhaseTemplate, Role,
};
use cycleflow::services::dependency_resolver::StatusMap;
use cycleflow::services::DependencyResolver;
use proptest::prelude::*;

const STATUSES: [ActivityStatus; 6] = [
    ActivityStatus::NotStarted,
    ActivityStatus::InProgress,
    ActivityStatus::Completed,
    ActivityStatus::RevisionRequested,
    ActivityStatus::Blocked,
    ActivityStatus::Skipped,
];

fn name(i: usize) -> String {
    format!("Activity {i}")
}

/// Acyclic phase: every edge points from a later activity to an earlier one.
fn dag_template(size: usize, links: &[(usize, usize, u8)]) -> PhaseTemplate {
    let activities = (0..size)
        .map(|i| {
            let kind = if i % 3 == 2 { ActivityType::Approval } else { ActivityType::Task };
            ActivityTemplate::new(name(i), kind, i as u32 + 1, Role::Tester)
        })
        .collect();

    let mut edges = Vec::new();
    for &(a, b, kind) in links {
        let (a, b) = (a % size, b % size);
        if a == b {
            continue;
        }
        let (later, earlier) = if a > b { (a, b) } else { (b, a) };
        let edge = match kind % 3 {
            0 => DependencyEdge::completion(name(later), name(earlier)),
            1 if earlier % 3 == 2 => DependencyEdge::approval(name(later), name(earlier)),
            1 => DependencyEdge::completion(name(later), name(earlier)),
            _ => DependencyEdge::any_of(name(later), name(earlier), "alt"),
        };
        if !edges.contains(&edge) {
            edges.push(edge);
        }
    }

    PhaseTemplate {
        name: PhaseName::Scoping,
        order: PhaseName::Scoping.order(),
        activities,
        edges,
    }
}

fn statuses(size: usize, picks: &[usize]) -> StatusMap {
    (0..size)
        .map(|i| (name(i), STATUSES[picks[i % picks.len()] % STATUSES.len()]))
        .collect()
}

/// Settled set computed straight from the definition: skipped, or completed
/// with every edge of its own satisfied by settled prerequisites.
fn reference_settled(template: &PhaseTemplate, statuses: &StatusMap) -> HashSet<String> {
    fn settled(
        name: &str,
        template: &PhaseTemplate,
        statuses: &StatusMap,
        memo: &mut HashMap<String, bool>,
    ) -> bool {
        if let Some(known) = memo.get(name) {
            return *known;
        }
        let value = match statuses.get(name) {
            Some(ActivityStatus::Skipped) => true,
            Some(ActivityStatus::Completed) => edges_met(name, template, statuses, memo),
            _ => false,
        };
        memo.insert(name.to_string(), value);
        value
    }

    fn edges_met(
        name: &str,
        template: &PhaseTemplate,
        statuses: &StatusMap,
        memo: &mut HashMap<String, bool>,
    ) -> bool {
        let mut groups: BTreeMap<Option<String>, bool> = BTreeMap::new();
        for edge in template.edges.iter().filter(|e| e.activity == name) {
            let ok = settled(&edge.depends_on, template, statuses, memo);
            if edge.dependency_type == DependencyType::Any {
                *groups.entry(edge.group.clone()).or_insert(false) |= ok;
            } else if !ok {
                return false;
            }
        }
        groups.values().all(|met| *met)
    }

    let mut memo = HashMap::new();
    template
        .activities
        .iter()
        .filter(|a| settled(&a.name, template, statuses, &mut memo))
        .map(|a| a.name.clone())
        .collect()
}

/// Whether every edge of `activity` is satisfied, per the reference set.
fn reference_can_start(template: &PhaseTemplate, settled: &HashSet<String>, activity: &str) -> bool {
    let mut groups: BTreeMap<Option<String>, bool> = BTreeMap::new();
    let mut hard_ok = true;
    for edge in template.edges.iter().filter(|e| e.activity == activity) {
        let ok = settled.contains(&edge.depends_on);
        if edge.dependency_type == DependencyType::Any {
            *groups.entry(edge.group.clone()).or_insert(false) |= ok;
        } else {
            hard_ok &= ok;
        }
    }
    hard_ok && groups.values().all(|met| *met)
}

fn graph() -> impl Strategy<Value = (usize, Vec<(usize, usize, u8)>, Vec<usize>)> {
    (2usize..12).prop_flat_map(|size| {
        (
            Just(size),
            prop::collection::vec((0..size, 0..size, any::<u8>()), 0..size * 2),
            prop::collection::vec(0usize..STATUSES.len(), size),
        )
    })
}

proptest! {
    /// Forward-only edges never form a cycle, and the topological order
    /// places every prerequisite before its dependent.
    #[test]
    fn prop_forward_edges_are_acyclic((size, links, _) in graph()) {
        let resolver = DependencyResolver::new();
        let template = dag_template(size, &links);

        prop_assert!(resolver.detect_cycle(&template).is_none());
        let order = resolver.topological_order(&template).unwrap();
        prop_assert_eq!(order.len(), size);
        for edge in &template.edges {
            let before = order.iter().position(|n| *n == edge.depends_on).unwrap();
            let after = order.iter().position(|n| *n == edge.activity).unwrap();
            prop_assert!(before < after, "{} must precede {}", edge.depends_on, edge.activity);
        }
    }

    /// Only completed or skipped activities are ever settled.
    #[test]
    fn prop_settled_implies_terminal((size, links, picks) in graph()) {
        let resolver = DependencyResolver::new();
        let template = dag_template(size, &links);
        let statuses = statuses(size, &picks);

        for settled in resolver.settled(&template, &statuses) {
            prop_assert!(statuses[&settled].is_terminal());
        }
    }

    /// The resolver's settled set matches the definition computed
    /// independently.
    #[test]
    fn prop_settled_matches_reference((size, links, picks) in graph()) {
        let resolver = DependencyResolver::new();
        let template = dag_template(size, &links);
        let statuses = statuses(size, &picks);

        let actual: HashSet<String> = resolver.settled(&template, &statuses).into_iter().collect();
        prop_assert_eq!(actual, reference_settled(&template, &statuses));
    }

    /// An activity can start iff every completion and approval prerequisite
    /// is settled and at least one member of each `any` group is settled.
    #[test]
    fn prop_eligibility_respects_every_edge((size, links, picks) in graph()) {
        let resolver = DependencyResolver::new();
        let template = dag_template(size, &links);
        let statuses = statuses(size, &picks);
        let settled = reference_settled(&template, &statuses);

        for (activity, eligibility) in resolver.evaluate_phase(&template, &statuses) {
            prop_assert_eq!(
                eligibility.can_start,
                reference_can_start(&template, &settled, &activity),
                "{}", activity
            );
            prop_assert_eq!(eligibility.can_start, eligibility.reasons.is_empty());
        }
    }

    /// Once every activity is completed, every activity is settled and
    /// eligible; reverting any one of them unsettles all its dependents.
    #[test]
    fn prop_revision_unsettles_transitive_dependents(
        (size, links, _) in graph(),
        revised in any::<prop::sample::Index>(),
    ) {
        let resolver = DependencyResolver::new();
        let template = dag_template(size, &links);
        let mut statuses: StatusMap = (0..size).map(|i| (name(i), ActivityStatus::Completed)).collect();
        prop_assert_eq!(resolver.settled(&template, &statuses).len(), size);

        let target = name(revised.index(size));
        statuses.insert(target.clone(), ActivityStatus::RevisionRequested);
        let settled = resolver.settled(&template, &statuses);

        prop_assert!(!settled.contains(&target));
        // Hard edges propagate staleness; `any` groups may still be met by another member.
        for dependent in resolver.dependents(&template, &target) {
            let hard = template
                .edges_for(dependent)
                .any(|e| e.depends_on == target && e.dependency_type != DependencyType::Any);
            if hard {
                prop_assert!(!settled.contains(dependent));
            }
        }
    }
}
