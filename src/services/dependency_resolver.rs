use std::collections::{BTreeMap, HashMap, HashSet};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ActivityInstance, ActivityStatus, DependencyEdge, DependencyType, PhaseTemplate,
};

/// Status of every activity in a phase, keyed by activity name.
pub type StatusMap = HashMap<String, ActivityStatus>;

/// Result of evaluating an activity's incoming edges.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Eligibility {
    pub can_start: bool,
    /// Why `can_start` is false. Empty when it is true.
    pub reasons: Vec<String>,
}

impl Eligibility {
    fn eligible() -> Self {
        Self {
            can_start: true,
            reasons: Vec::new(),
        }
    }

    fn blocked(reasons: Vec<String>) -> Self {
        Self {
            can_start: false,
            reasons,
        }
    }
}

/// Resolves activity dependencies within one phase template.
///
/// A prerequisite satisfies an edge when it is *settled*: SKIPPED, or
/// COMPLETED with its own edges satisfied by settled prerequisites. A
/// completed activity downstream of a revision is therefore stale until the
/// revised work is completed again.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver;

// Standalone helper for cycle detection (no self needed)
fn detect_cycle_util<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(node) {
        for &neighbor in neighbors {
            if !visited.contains(neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(neighbor) {
                if let Some(cycle_start) = path.iter().position(|&n| n == neighbor) {
                    path.drain(0..cycle_start);
                    path.push(neighbor);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

/// Prerequisite adjacency (activity -> depends_on) over the template's activities.
fn prerequisite_graph(template: &PhaseTemplate) -> HashMap<&str, Vec<&str>> {
    let mut graph: HashMap<&str, Vec<&str>> = template
        .ordered_activities()
        .into_iter()
        .map(|a| (a.name.as_str(), Vec::new()))
        .collect();
    for edge in &template.edges {
        graph
            .entry(edge.activity.as_str())
            .or_default()
            .push(edge.depends_on.as_str());
    }
    graph
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Detect a dependency cycle. Returns the cycle path, first node repeated
    /// at the end.
    pub fn detect_cycle(&self, template: &PhaseTemplate) -> Option<Vec<String>> {
        let graph = prerequisite_graph(template);

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        // Walk in template order so the reported cycle is deterministic.
        for activity in template.ordered_activities() {
            let node = activity.name.as_str();
            if !visited.contains(node)
                && detect_cycle_util(node, &graph, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(path.into_iter().map(str::to_string).collect());
            }
        }

        None
    }

    /// Activity names with prerequisites before dependents. Ties keep the
    /// template order.
    pub fn topological_order(&self, template: &PhaseTemplate) -> DomainResult<Vec<String>> {
        if let Some(cycle) = self.detect_cycle(template) {
            return Err(DomainError::DependencyCycle(cycle));
        }

        let ordered = template.ordered_activities();
        let position: HashMap<&str, usize> = ordered
            .iter()
            .enumerate()
            .map(|(i, a)| (a.name.as_str(), i))
            .collect();

        let mut in_degree: HashMap<&str, usize> = ordered.iter().map(|a| (a.name.as_str(), 0)).collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &template.edges {
            dependents
                .entry(edge.depends_on.as_str())
                .or_default()
                .push(edge.activity.as_str());
            *in_degree.entry(edge.activity.as_str()).or_insert(0) += 1;
        }

        // Kahn's algorithm; the ready set is keyed by template position.
        let mut ready: BTreeMap<usize, &str> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .filter_map(|(&name, _)| position.get(name).map(|&p| (p, name)))
            .collect();

        let mut sorted = Vec::with_capacity(ordered.len());
        while let Some((_, node)) = ready.pop_first() {
            sorted.push(node.to_string());
            if let Some(next) = dependents.get(node) {
                for &dependent in next {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            if let Some(&p) = position.get(dependent) {
                                ready.insert(p, dependent);
                            }
                        }
                    }
                }
            }
        }

        if sorted.len() != ordered.len() {
            return Err(DomainError::InvalidTemplate(format!(
                "phase {}: edges reference unknown activities",
                template.name.as_str()
            )));
        }

        Ok(sorted)
    }

    /// Activities with an edge pointing at `activity`, each listed once in
    /// edge order.
    pub fn dependents<'a>(&self, template: &'a PhaseTemplate, activity: &str) -> Vec<&'a str> {
        let mut seen: HashSet<&str> = HashSet::new();
        template
            .edges
            .iter()
            .filter(|e| e.depends_on == activity)
            .map(|e| e.activity.as_str())
            .filter(|name| seen.insert(*name))
            .collect()
    }

    /// Every activity reachable downstream of `activity`.
    pub fn transitive_dependents(&self, template: &PhaseTemplate, activity: &str) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = self.dependents(template, activity);
        let mut out = Vec::new();
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                out.push(node.to_string());
                stack.extend(self.dependents(template, node));
            }
        }
        out
    }

    /// Longest prerequisite chain below `activity`. Roots have depth 0.
    pub fn calculate_depth(&self, template: &PhaseTemplate, activity: &str) -> DomainResult<u32> {
        let graph = prerequisite_graph(template);
        let mut visited = HashSet::new();
        calculate_depth_recursive(activity, &graph, &mut visited)
    }

    /// Depth of the deepest activity in the phase.
    pub fn max_depth(&self, template: &PhaseTemplate) -> DomainResult<u32> {
        let mut max = 0;
        for activity in &template.activities {
            max = max.max(self.calculate_depth(template, &activity.name)?);
        }
        Ok(max)
    }

    /// Names of settled activities for a status snapshot.
    pub fn settled(&self, template: &PhaseTemplate, statuses: &StatusMap) -> HashSet<String> {
        let mut settled: HashSet<String> = statuses
            .iter()
            .filter(|(_, s)| **s == ActivityStatus::Skipped)
            .map(|(name, _)| name.clone())
            .collect();

        // Least fixpoint; members of a cycle never settle.
        loop {
            let newly: Vec<String> = statuses
                .iter()
                .filter(|(name, s)| **s == ActivityStatus::Completed && !settled.contains(*name))
                .filter(|(name, _)| edges_satisfied(template, name, &settled))
                .map(|(name, _)| name.clone())
                .collect();
            if newly.is_empty() {
                break;
            }
            settled.extend(newly);
        }

        settled
    }

    /// Evaluate `activity`'s incoming edges against a status snapshot.
    pub fn can_start(&self, template: &PhaseTemplate, activity: &str, statuses: &StatusMap) -> Eligibility {
        let settled = self.settled(template, statuses);
        eligibility(template, activity, statuses, &settled)
    }

    /// Evaluate every activity of the phase at once.
    pub fn evaluate_phase(
        &self,
        template: &PhaseTemplate,
        statuses: &StatusMap,
    ) -> HashMap<String, Eligibility> {
        let settled = self.settled(template, statuses);
        template
            .activities
            .iter()
            .map(|a| (a.name.clone(), eligibility(template, &a.name, statuses, &settled)))
            .collect()
    }

    /// Build a status map from instances of one phase.
    pub fn status_map(activities: &[ActivityInstance]) -> StatusMap {
        activities
            .iter()
            .map(|a| (a.activity_name.clone(), a.status))
            .collect()
    }
}

/// Every edge of `activity` is satisfied by the settled set.
fn edges_satisfied(template: &PhaseTemplate, activity: &str, settled: &HashSet<String>) -> bool {
    let mut groups: HashMap<&str, bool> = HashMap::new();
    for edge in template.edges_for(activity) {
        let ok = settled.contains(&edge.depends_on);
        match edge.dependency_type {
            DependencyType::Completion | DependencyType::Approval => {
                if !ok {
                    return false;
                }
            }
            DependencyType::Any => {
                *groups.entry(edge.group_key()).or_insert(false) |= ok;
            }
        }
    }
    groups.values().all(|&ok| ok)
}

fn describe_unsettled(edge: &DependencyEdge, statuses: &StatusMap) -> String {
    match statuses.get(&edge.depends_on) {
        None => format!("prerequisite '{}' has no instance", edge.depends_on),
        Some(ActivityStatus::Completed) => format!(
            "'{}' must be completed again after an upstream revision",
            edge.depends_on
        ),
        Some(status) => match edge.dependency_type {
            DependencyType::Approval => {
                format!("awaiting approval '{}' (currently {})", edge.depends_on, status)
            }
            _ => format!("waiting on '{}' (currently {})", edge.depends_on, status),
        },
    }
}

fn eligibility(
    template: &PhaseTemplate,
    activity: &str,
    statuses: &StatusMap,
    settled: &HashSet<String>,
) -> Eligibility {
    let mut reasons = Vec::new();
    let mut groups: BTreeMap<&str, (bool, Vec<&str>)> = BTreeMap::new();

    for edge in template.edges_for(activity) {
        let ok = settled.contains(&edge.depends_on);
        match edge.dependency_type {
            DependencyType::Completion | DependencyType::Approval => {
                if !ok {
                    reasons.push(describe_unsettled(edge, statuses));
                }
            }
            DependencyType::Any => {
                let entry = groups.entry(edge.group_key()).or_insert((false, Vec::new()));
                entry.0 |= ok;
                entry.1.push(edge.depends_on.as_str());
            }
        }
    }

    for (_, (ok, members)) in groups {
        if !ok {
            reasons.push(format!("none of [{}] is done", members.join(", ")));
        }
    }

    if reasons.is_empty() {
        Eligibility::eligible()
    } else {
        Eligibility::blocked(reasons)
    }
}

// Standalone helper for depth calculation
fn calculate_depth_recursive<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
) -> DomainResult<u32> {
    if visited.contains(node) {
        return Err(DomainError::DependencyCycle(vec![node.to_string()]));
    }

    visited.insert(node);

    let max_depth = match graph.get(node) {
        Some(deps) if !deps.is_empty() => {
            let mut depths = Vec::with_capacity(deps.len());
            for &dep in deps {
                depths.push(calculate_depth_recursive(dep, graph, visited)?);
            }
            depths.into_iter().max().unwrap_or(0) + 1
        }
        _ => 0,
    };

    visited.remove(node);
    Ok(max_depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ActivityTemplate, ActivityType, PhaseName, Role};

    fn chain() -> PhaseTemplate {
        let names = ["Start", "Define Scope", "Tester Review", "Report Owner Approval", "Complete"];
        let types = [
            ActivityType::Start,
            ActivityType::Task,
            ActivityType::Review,
            ActivityType::Approval,
            ActivityType::Complete,
        ];
        PhaseTemplate {
            name: PhaseName::Scoping,
            order: 3,
            activities: names
                .iter()
                .zip(types)
                .enumerate()
                .map(|(i, (n, t))| ActivityTemplate::new(*n, t, i as u32 + 1, Role::Tester))
                .collect(),
            edges: names
                .windows(2)
                .map(|w| DependencyEdge::completion(w[1], w[0]))
                .collect(),
        }
    }

    fn statuses(pairs: &[(&str, ActivityStatus)]) -> StatusMap {
        pairs.iter().map(|(n, s)| ((*n).to_string(), *s)).collect()
    }

    fn all_not_started(template: &PhaseTemplate) -> StatusMap {
        template
            .activities
            .iter()
            .map(|a| (a.name.clone(), ActivityStatus::NotStarted))
            .collect()
    }

    #[test]
    fn test_completion_chain() {
        let resolver = DependencyResolver::new();
        let template = chain();
        let mut map = all_not_started(&template);
        map.insert("Start".to_string(), ActivityStatus::Completed);

        let result = resolver.evaluate_phase(&template, &map);
        assert!(result["Start"].can_start);
        assert!(result["Define Scope"].can_start);
        assert!(!result["Tester Review"].can_start);
        assert!(!result["Complete"].can_start);
        assert_eq!(result["Tester Review"].reasons.len(), 1);
    }

    #[test]
    fn test_skipped_prerequisite_satisfies() {
        let resolver = DependencyResolver::new();
        let template = chain();
        let mut map = all_not_started(&template);
        map.insert("Define Scope".to_string(), ActivityStatus::Skipped);
        assert!(resolver.can_start(&template, "Tester Review", &map).can_start);
    }

    #[test]
    fn test_revision_invalidates_downstream() {
        let resolver = DependencyResolver::new();
        let template = chain();
        let map = statuses(&[
            ("Start", ActivityStatus::Completed),
            ("Define Scope", ActivityStatus::RevisionRequested),
            ("Tester Review", ActivityStatus::Completed),
            ("Report Owner Approval", ActivityStatus::NotStarted),
            ("Complete", ActivityStatus::NotStarted),
        ]);

        let result = resolver.evaluate_phase(&template, &map);
        assert!(result["Define Scope"].can_start);
        assert!(!result["Tester Review"].can_start);
        let approval = &result["Report Owner Approval"];
        assert!(!approval.can_start);
        assert!(approval.reasons[0].contains("completed again"));
    }

    #[test]
    fn test_any_groups_are_or_within_and_across() {
        let resolver = DependencyResolver::new();
        let mut template = chain();
        template.edges = vec![
            DependencyEdge::any_of("Complete", "Define Scope", "evidence"),
            DependencyEdge::any_of("Complete", "Tester Review", "evidence"),
            DependencyEdge::any_of("Complete", "Start", "kickoff"),
        ];

        let mut map = all_not_started(&template);
        map.insert("Tester Review".to_string(), ActivityStatus::Completed);
        let result = resolver.can_start(&template, "Complete", &map);
        assert!(!result.can_start);
        assert_eq!(result.reasons, vec!["none of [Start] is done".to_string()]);

        map.insert("Start".to_string(), ActivityStatus::Completed);
        assert!(resolver.can_start(&template, "Complete", &map).can_start);
    }

    #[test]
    fn test_detect_cycle() {
        let resolver = DependencyResolver::new();
        let mut template = chain();
        assert!(resolver.detect_cycle(&template).is_none());

        template.edges.push(DependencyEdge::completion("Start", "Tester Review"));
        let cycle = resolver.detect_cycle(&template).unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.contains(&"Define Scope".to_string()));
        assert!(matches!(
            resolver.topological_order(&template),
            Err(DomainError::DependencyCycle(_))
        ));
    }

    #[test]
    fn test_topological_order_and_depth() {
        let resolver = DependencyResolver::new();
        let template = chain();
        assert_eq!(
            resolver.topological_order(&template).unwrap(),
            vec!["Start", "Define Scope", "Tester Review", "Report Owner Approval", "Complete"]
        );
        assert_eq!(resolver.calculate_depth(&template, "Start").unwrap(), 0);
        assert_eq!(resolver.calculate_depth(&template, "Complete").unwrap(), 4);
        assert_eq!(resolver.max_depth(&template).unwrap(), 4);
    }

    #[test]
    fn test_dependents() {
        let resolver = DependencyResolver::new();
        let template = chain();
        assert_eq!(resolver.dependents(&template, "Start"), vec!["Define Scope"]);
        let mut downstream = resolver.transitive_dependents(&template, "Define Scope");
        downstream.sort();
        assert_eq!(downstream, vec!["Complete", "Report Owner Approval", "Tester Review"]);
    }

    #[test]
    fn test_dependents_listed_once_across_interleaved_edges() {
        let resolver = DependencyResolver::new();
        let mut template = chain();
        template.edges = vec![
            DependencyEdge::any_of("Tester Review", "Start", "input"),
            DependencyEdge::completion("Define Scope", "Start"),
            DependencyEdge::any_of("Tester Review", "Start", "fallback"),
        ];
        assert_eq!(resolver.dependents(&template, "Start"), vec!["Tester Review", "Define Scope"]);
    }
}
