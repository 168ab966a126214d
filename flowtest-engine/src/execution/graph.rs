// Dependency Graph Resolver
// Builds the suite DAG, computes run order and tracks per-node execution state

use crate::model::{Dependency, DependencyResult, Suite};

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use tracing::{trace, warn};

/// Error type for graph operations
#[derive(Debug, Clone)]
pub struct GraphError {
    pub message: String,
    pub kind: GraphErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// Node participates in a circular dependency
    CyclicDependency,
    /// Node requires another node that participates in a cycle
    BlockedByCycle,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph error: {}", self.message)
    }
}

impl std::error::Error for GraphError {}

impl GraphError {
    pub fn cyclic(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::CyclicDependency,
        }
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::BlockedByCycle,
        }
    }
}

/// Lifecycle of one node within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Executing,
    Resolved,
    Failed,
}

/// Ordering decision for a set of suites
///
/// Indices refer to the suite slice the graph was built from.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    pub order: Vec<usize>,
    /// Entries that cannot run because of a dependency cycle
    pub blocked: Vec<(usize, GraphError)>,
}

/// Dependency DAG over suite node ids
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Node id of every suite entry, in discovery order
    entries: Vec<String>,
    /// Unique node ids in first-seen order
    nodes: Vec<String>,
    /// Entry indices per node id
    node_entries: HashMap<String, Vec<usize>>,
    /// Kept (known, non-self) edges per node id
    edges: HashMap<String, Vec<Dependency>>,
    states: HashMap<String, NodeState>,
    results: HashMap<String, DependencyResult>,
}

impl DependencyGraph {
    /// Build the graph from suites in discovery order
    ///
    /// Edges to unknown node ids and self edges are dropped with a warning.
    pub fn build(suites: &[Suite]) -> Self {
        let mut entries = Vec::with_capacity(suites.len());
        let mut nodes = Vec::new();
        let mut node_entries: HashMap<String, Vec<usize>> = HashMap::new();

        for (index, suite) in suites.iter().enumerate() {
            entries.push(suite.node_id.clone());
            let slots = node_entries.entry(suite.node_id.clone()).or_default();
            if slots.is_empty() {
                nodes.push(suite.node_id.clone());
            }
            slots.push(index);
        }

        let mut edges: HashMap<String, Vec<Dependency>> = HashMap::new();
        for suite in suites {
            let kept = edges.entry(suite.node_id.clone()).or_default();
            for dependency in &suite.depends {
                if dependency.node_id == suite.node_id {
                    warn!(node_id = %suite.node_id, "ignoring self dependency");
                    continue;
                }
                if !node_entries.contains_key(&dependency.node_id) {
                    warn!(
                        node_id = %suite.node_id,
                        dependency = %dependency.node_id,
                        "ignoring dependency on unknown suite"
                    );
                    continue;
                }
                if !kept.iter().any(|d| d.node_id == dependency.node_id) {
                    kept.push(dependency.clone());
                }
            }
        }

        let states = nodes
            .iter()
            .map(|id| (id.clone(), NodeState::Pending))
            .collect();

        Self {
            entries,
            nodes,
            node_entries,
            edges,
            states,
            results: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.node_entries.contains_key(node_id)
    }

    /// Kept dependency edges of a node
    pub fn dependencies(&self, node_id: &str) -> &[Dependency] {
        self.edges.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn required_dependencies<'a>(&'a self, node_id: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.dependencies(node_id)
            .iter()
            .filter(|d| d.required)
            .map(|d| d.node_id.as_str())
    }

    /// First suite index registered for a node id
    pub fn entry_index(&self, node_id: &str) -> Option<usize> {
        self.node_entries.get(node_id).and_then(|e| e.first().copied())
    }

    // =========================================================================
    // Ordering
    // =========================================================================

    /// Compute a run order where every entry follows its required dependencies
    ///
    /// Kahn's algorithm picking the earliest discovered ready node, so
    /// independent suites keep their discovery order. Duplicate entries of a
    /// node directly follow its first entry. Nodes left over are on, or
    /// behind, a cycle and are reported as blocked.
    pub fn resolve_order(&self) -> ExecutionPlan {
        let position: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut in_degree: Vec<usize> = vec![0; self.nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (i, node_id) in self.nodes.iter().enumerate() {
            for dep in self.required_dependencies(node_id) {
                if let Some(&d) = position.get(dep) {
                    in_degree[i] += 1;
                    dependents[d].push(i);
                }
            }
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut placed = Vec::with_capacity(self.nodes.len());
        while let Some(next) = ready.pop_first() {
            placed.push(next);
            for &dependent in &dependents[next] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        let mut plan = ExecutionPlan::default();
        for node in &placed {
            plan.order.extend(self.entries_of(&self.nodes[*node]));
        }

        if placed.len() < self.nodes.len() {
            let placed: HashSet<usize> = placed.into_iter().collect();
            let remaining: HashSet<&str> = (0..self.nodes.len())
                .filter(|i| !placed.contains(i))
                .map(|i| self.nodes[i].as_str())
                .collect();

            for node_id in self.nodes.iter().filter(|n| remaining.contains(n.as_str())) {
                let error = self.cycle_error(node_id, &remaining);
                warn!(node_id = %node_id, error = %error.message, "suite blocked by dependency cycle");
                for entry in self.entries_of(node_id) {
                    plan.blocked.push((entry, error.clone()));
                }
            }
        }

        plan
    }

    fn entries_of(&self, node_id: &str) -> Vec<usize> {
        self.node_entries.get(node_id).cloned().unwrap_or_default()
    }

    fn cycle_error(&self, node_id: &str, remaining: &HashSet<&str>) -> GraphError {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        match self.dfs_cycle(node_id, remaining, &mut visited, &mut path) {
            Some(cycle) if cycle.first().map(String::as_str) == Some(node_id) => {
                GraphError::cyclic(format!("circular dependency: {}", cycle.join(" -> ")))
            }
            Some(cycle) => {
                let members: BTreeSet<&str> = cycle.iter().map(String::as_str).collect();
                let entry = self
                    .required_dependencies(node_id)
                    .find(|d| remaining.contains(d))
                    .unwrap_or(node_id);
                if members.contains(node_id) {
                    GraphError::cyclic(format!("circular dependency: {}", cycle.join(" -> ")))
                } else {
                    GraphError::blocked(format!(
                        "dependency '{}' is blocked by circular dependency: {}",
                        entry,
                        cycle.join(" -> ")
                    ))
                }
            }
            None => GraphError::blocked(format!(
                "'{}' could not be ordered because of a circular dependency",
                node_id
            )),
        }
    }

    /// Depth-first search over required edges among unresolved nodes.
    /// Returns the cycle as a closed path (`a -> b -> a`).
    fn dfs_cycle(
        &self,
        node_id: &str,
        remaining: &HashSet<&str>,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if let Some(start) = path.iter().position(|p| p == node_id) {
            let mut cycle = path[start..].to_vec();
            cycle.push(node_id.to_string());
            return Some(cycle);
        }
        if !visited.insert(node_id.to_string()) {
            return None;
        }

        path.push(node_id.to_string());
        for dep in self.required_dependencies(node_id) {
            if !remaining.contains(dep) {
                continue;
            }
            if let Some(cycle) = self.dfs_cycle(dep, remaining, visited, path) {
                return Some(cycle);
            }
        }
        path.pop();
        None
    }

    /// Split an order into batches that can run concurrently
    ///
    /// A batch never holds more than `max` entries, two entries of the same
    /// node, or an entry together with one of its required dependencies.
    pub fn parallel_batches(&self, order: &[usize], max: usize) -> Vec<Vec<usize>> {
        let max = max.max(1);
        let mut batches: Vec<Vec<usize>> = Vec::new();
        let mut current: Vec<usize> = Vec::new();
        let mut current_ids: HashSet<&str> = HashSet::new();

        for &index in order {
            let Some(node_id) = self.entries.get(index) else {
                continue;
            };
            let conflicts = current_ids.contains(node_id.as_str())
                || self
                    .required_dependencies(node_id)
                    .any(|dep| current_ids.contains(dep));

            if current.len() >= max || conflicts {
                batches.push(std::mem::take(&mut current));
                current_ids.clear();
            }
            current.push(index);
            current_ids.insert(node_id.as_str());
        }

        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    // =========================================================================
    // Node lifecycle
    // =========================================================================

    pub fn state(&self, node_id: &str) -> Option<NodeState> {
        self.states.get(node_id).copied()
    }

    pub fn mark_executing(&mut self, node_id: &str) {
        trace!(node_id, "node executing");
        self.states.insert(node_id.to_string(), NodeState::Executing);
    }

    /// Record a successful outcome; it becomes the cached result for dependents
    pub fn mark_resolved(&mut self, node_id: &str, result: DependencyResult) {
        trace!(node_id, "node resolved");
        self.states.insert(node_id.to_string(), NodeState::Resolved);
        self.results.insert(node_id.to_string(), result);
    }

    pub fn mark_failed(&mut self, node_id: &str, result: DependencyResult) {
        trace!(node_id, "node failed");
        self.states.insert(node_id.to_string(), NodeState::Failed);
        self.results.insert(node_id.to_string(), result);
    }

    /// Cached outcome of a resolved node
    pub fn get_cached_result(&self, node_id: &str) -> Option<&DependencyResult> {
        match self.state(node_id) {
            Some(NodeState::Resolved) => self.results.get(node_id),
            _ => None,
        }
    }

    /// Last recorded outcome, resolved or failed
    pub fn result(&self, node_id: &str) -> Option<&DependencyResult> {
        self.results.get(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::VariableMap;

    fn suite(id: &str, deps: &[&str]) -> Suite {
        deps.iter().fold(Suite::new(id, id.to_uppercase()), |s, d| {
            s.with_dependency(Dependency::new(*d))
        })
    }

    fn ids(suites: &[Suite], order: &[usize]) -> Vec<String> {
        order.iter().map(|&i| suites[i].node_id.clone()).collect()
    }

    fn result(id: &str, success: bool) -> DependencyResult {
        DependencyResult {
            node_id: id.into(),
            suite_name: id.to_uppercase(),
            success,
            duration_ms: 5,
            exports: VariableMap::new(),
        }
    }

    #[test]
    fn test_resolve_order_respects_dependencies() {
        let suites = vec![suite("profile", &["auth"]), suite("auth", &[])];
        let graph = DependencyGraph::build(&suites);
        let plan = graph.resolve_order();
        assert_eq!(ids(&suites, &plan.order), vec!["auth", "profile"]);
        assert!(plan.blocked.is_empty());
    }

    #[test]
    fn test_independent_suites_keep_discovery_order() {
        let suites = vec![
            suite("c", &[]),
            suite("a", &["d"]),
            suite("b", &[]),
            suite("d", &[]),
        ];
        let graph = DependencyGraph::build(&suites);
        let order = ids(&suites, &graph.resolve_order().order);
        assert_eq!(order, vec!["c", "b", "d", "a"]);
    }

    #[test]
    fn test_every_suite_follows_required_dependencies() {
        let suites = vec![
            suite("e", &["d", "b"]),
            suite("d", &["c"]),
            suite("c", &["a"]),
            suite("b", &["a"]),
            suite("a", &[]),
        ];
        let graph = DependencyGraph::build(&suites);
        let order = ids(&suites, &graph.resolve_order().order);
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
        for s in &suites {
            for dep in &s.depends {
                assert!(pos(&dep.node_id) < pos(&s.node_id));
            }
        }
    }

    #[test]
    fn test_optional_dependencies_do_not_constrain_order() {
        let suites = vec![
            suite("report", &[]).with_dependency(Dependency::new("seed").optional()),
            suite("seed", &[]),
        ];
        let graph = DependencyGraph::build(&suites);
        assert_eq!(ids(&suites, &graph.resolve_order().order), vec!["report", "seed"]);
    }

    #[test]
    fn test_unknown_and_self_edges_dropped() {
        let suites = vec![suite("a", &["a", "ghost"]), suite("b", &["a"])];
        let graph = DependencyGraph::build(&suites);
        assert!(graph.dependencies("a").is_empty());
        assert_eq!(graph.dependencies("b").len(), 1);
        assert_eq!(ids(&suites, &graph.resolve_order().order), vec!["a", "b"]);
    }

    #[test]
    fn test_cycle_blocks_only_affected_nodes() {
        let suites = vec![
            suite("a", &["b"]),
            suite("b", &["a"]),
            suite("c", &["a"]),
            suite("d", &[]),
        ];
        let graph = DependencyGraph::build(&suites);
        let plan = graph.resolve_order();

        assert_eq!(ids(&suites, &plan.order), vec!["d"]);
        assert_eq!(plan.blocked.len(), 3);

        let (index, error) = &plan.blocked[0];
        assert_eq!(suites[*index].node_id, "a");
        assert_eq!(error.kind, GraphErrorKind::CyclicDependency);
        assert!(error.message.contains("a -> b -> a"));

        let (index, error) = &plan.blocked[2];
        assert_eq!(suites[*index].node_id, "c");
        assert_eq!(error.kind, GraphErrorKind::BlockedByCycle);
        assert!(error.message.contains("a -> b -> a"));
    }

    #[test]
    fn test_duplicate_entries_follow_first() {
        let suites = vec![suite("a", &[]), suite("b", &["a"]), suite("a", &[])];
        let graph = DependencyGraph::build(&suites);
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.resolve_order().order, vec![0, 2, 1]);
    }

    #[test]
    fn test_parallel_batches() {
        let suites = vec![
            suite("a", &[]),
            suite("b", &[]),
            suite("c", &["a"]),
            suite("d", &[]),
            suite("e", &[]),
        ];
        let graph = DependencyGraph::build(&suites);
        let order = graph.resolve_order().order;
        assert_eq!(order, vec![0, 1, 2, 3, 4]);

        let batches = graph.parallel_batches(&order, 2);
        assert_eq!(batches, vec![vec![0, 1], vec![2, 3], vec![4]]);

        let batches = graph.parallel_batches(&[0, 2, 1], 4);
        assert_eq!(batches, vec![vec![0], vec![2, 1]]);
    }

    #[test]
    fn test_node_lifecycle_and_cache() {
        let suites = vec![suite("auth", &[]), suite("smoke", &[])];
        let mut graph = DependencyGraph::build(&suites);
        assert_eq!(graph.state("auth"), Some(NodeState::Pending));
        assert!(graph.get_cached_result("auth").is_none());

        graph.mark_executing("auth");
        assert_eq!(graph.state("auth"), Some(NodeState::Executing));
        graph.mark_resolved("auth", result("auth", true));
        assert!(graph.get_cached_result("auth").unwrap().success);

        graph.mark_executing("smoke");
        graph.mark_failed("smoke", result("smoke", false));
        assert_eq!(graph.state("smoke"), Some(NodeState::Failed));
        assert!(graph.get_cached_result("smoke").is_none());
        assert!(!graph.result("smoke").unwrap().success);
    }
}
