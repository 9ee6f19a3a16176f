//! Graph resolution: dependency maps, cycle detection, deterministic
//! topological ordering, and authoring-time connection validation.

use crate::registry::StrategyRegistry;
use gencore::{GraphError, NodeId, StrategyPorts, WorkflowDefinition, WorkflowEdge, WorkflowNode};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Direct upstream dependencies per node. Pure function; edges referencing
/// unknown nodes are ignored (structural validation reports those).
pub fn build_dependency_map(
    nodes: &[WorkflowNode],
    edges: &[WorkflowEdge],
) -> HashMap<NodeId, HashSet<NodeId>> {
    let known: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let mut deps: HashMap<NodeId, HashSet<NodeId>> = nodes
        .iter()
        .map(|n| (n.id.clone(), HashSet::new()))
        .collect();

    for edge in edges {
        if !known.contains(edge.source.as_str()) {
            continue;
        }
        if let Some(set) = deps.get_mut(&edge.target) {
            set.insert(edge.source.clone());
        }
    }
    deps
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Three-color DFS cycle detection.
///
/// Returns an empty sequence for acyclic graphs; otherwise the returned
/// nodes form a cycle (the path from the first revisited node back to
/// itself), usable as a diagnostic witness.
pub fn detect_cycles(nodes: &[WorkflowNode], edges: &[WorkflowEdge]) -> Vec<NodeId> {
    let adjacency = adjacency_in_declaration_order(nodes, edges);
    let mut colors: HashMap<&str, Color> =
        nodes.iter().map(|n| (n.id.as_str(), Color::White)).collect();
    let mut path = Vec::new();

    for node in nodes {
        if colors[node.id.as_str()] == Color::White {
            if let Some(cycle) = visit(node.id.as_str(), &adjacency, &mut colors, &mut path) {
                return cycle;
            }
        }
    }
    Vec::new()
}

fn visit<'a>(
    node: &'a str,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    colors: &mut HashMap<&'a str, Color>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<NodeId>> {
    colors.insert(node, Color::Gray);
    path.push(node);

    if let Some(next) = adjacency.get(node) {
        for &succ in next {
            match colors.get(succ).copied().unwrap_or(Color::Black) {
                Color::Gray => {
                    // `succ` is on the current path; the slice from its
                    // first occurrence to here is the cycle witness.
                    let start = path.iter().position(|&n| n == succ).unwrap_or(0);
                    return Some(path[start..].iter().map(|n| n.to_string()).collect());
                }
                Color::White => {
                    if let Some(cycle) = visit(succ, adjacency, colors, path) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }
    }

    path.pop();
    colors.insert(node, Color::Black);
    None
}

fn adjacency_in_declaration_order<'a>(
    nodes: &'a [WorkflowNode],
    edges: &'a [WorkflowEdge],
) -> HashMap<&'a str, Vec<&'a str>> {
    let known: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> =
        nodes.iter().map(|n| (n.id.as_str(), Vec::new())).collect();
    for edge in edges {
        if known.contains(edge.source.as_str()) && known.contains(edge.target.as_str()) {
            if let Some(list) = adjacency.get_mut(edge.source.as_str()) {
                list.push(edge.target.as_str());
            }
        }
    }
    adjacency
}

/// Deterministic topological order.
///
/// Kahn's algorithm; among nodes whose dependencies are satisfied, ties are
/// broken by original declaration order, so identical input always yields
/// identical output.
pub fn topological_sort(
    nodes: &[WorkflowNode],
    edges: &[WorkflowEdge],
) -> Result<Vec<NodeId>, GraphError> {
    let cycle = detect_cycles(nodes, edges);
    if !cycle.is_empty() {
        return Err(GraphError::CycleDetected(cycle));
    }

    let position: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();
    let adjacency = adjacency_in_declaration_order(nodes, edges);

    let mut indegree: HashMap<&str, usize> = nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    for targets in adjacency.values() {
        for &t in targets {
            if let Some(d) = indegree.get_mut(t) {
                *d += 1;
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = indegree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| Reverse(position[id]))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(pos)) = ready.pop() {
        let id = nodes[pos].id.as_str();
        order.push(id.to_string());
        if let Some(targets) = adjacency.get(id) {
            for &t in targets {
                if let Some(d) = indegree.get_mut(t) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(Reverse(position[t]));
                    }
                }
            }
        }
    }

    Ok(order)
}

/// Validated, ordered view of a workflow graph, consumed by the coordinator.
#[derive(Debug, Clone)]
pub struct ResolvedGraph {
    pub order: Vec<NodeId>,
    pub dependencies: HashMap<NodeId, HashSet<NodeId>>,
    graph: DiGraph<NodeId, ()>,
    indices: HashMap<NodeId, NodeIndex>,
}

impl ResolvedGraph {
    /// Every node reachable downstream of `node` (excluding `node` itself).
    /// Used for the skip cascade when a job fails.
    pub fn transitive_dependents(&self, node: &str) -> HashSet<NodeId> {
        let mut result = HashSet::new();
        let Some(&start) = self.indices.get(node) else {
            return result;
        };
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(ix) = dfs.next(&self.graph) {
            if ix != start {
                if let Some(id) = self.graph.node_weight(ix) {
                    result.insert(id.clone());
                }
            }
        }
        result
    }

    /// Nodes with no outgoing edges.
    pub fn sinks(&self) -> Vec<NodeId> {
        self.order
            .iter()
            .filter(|id| {
                self.indices.get(id.as_str()).is_some_and(|&ix| {
                    self.graph
                        .neighbors_directed(ix, petgraph::Direction::Outgoing)
                        .next()
                        .is_none()
                })
            })
            .cloned()
            .collect()
    }

    pub fn dependencies_of(&self, node: &str) -> Option<&HashSet<NodeId>> {
        self.dependencies.get(node)
    }
}

/// Full creation-time validation: structural edges, unique node ids, known
/// node types, acyclicity. On success returns the resolved graph; any error
/// aborts execution creation before a single job is allocated.
pub fn validate(
    def: &WorkflowDefinition,
    registry: &StrategyRegistry,
) -> Result<ResolvedGraph, GraphError> {
    def.validate_structure()?;

    let mut seen = HashSet::new();
    for node in &def.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(GraphError::Validation(format!(
                "duplicate node id '{}'",
                node.id
            )));
        }
        registry.get(&node.node_type)?;
    }

    let order = topological_sort(&def.nodes, &def.edges)?;
    let dependencies = build_dependency_map(&def.nodes, &def.edges);

    let mut graph = DiGraph::new();
    let mut indices = HashMap::new();
    for node in &def.nodes {
        let ix = graph.add_node(node.id.clone());
        indices.insert(node.id.clone(), ix);
    }
    for edge in &def.edges {
        if let (Some(&from), Some(&to)) = (indices.get(&edge.source), indices.get(&edge.target)) {
            graph.add_edge(from, to, ());
        }
    }

    Ok(ResolvedGraph {
        order,
        dependencies,
        graph,
        indices,
    })
}

/// Authoring-time check that an output handle can feed an input handle.
/// Not invoked during execution; execution trusts an already-validated
/// graph.
pub fn is_valid_connection(
    source: &StrategyPorts,
    source_handle: Option<&str>,
    target: &StrategyPorts,
    target_handle: Option<&str>,
) -> bool {
    let out = match source_handle {
        Some(h) => source.outputs.iter().find(|p| p.name == h),
        None => source.outputs.first(),
    };
    let inp = match target_handle {
        Some(h) => target.inputs.iter().find(|p| p.name == h),
        None => target.inputs.first(),
    };
    match (out, inp) {
        (Some(o), Some(i)) => o.kind.accepts(i.kind),
        _ => false,
    }
}

/// All (output handle, input handle) pairs that would form a valid
/// connection between two node types.
pub fn compatible_handles(source: &StrategyPorts, target: &StrategyPorts) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for out in &source.outputs {
        for inp in &target.inputs {
            if out.kind.accepts(inp.kind) {
                pairs.push((out.name.clone(), inp.name.clone()));
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use gencore::{PortDef, PortKind};

    fn node(id: &str) -> WorkflowNode {
        WorkflowNode::new(id, "input")
    }

    fn edge(source: &str, target: &str) -> WorkflowEdge {
        WorkflowEdge {
            source: source.to_string(),
            target: target.to_string(),
            source_handle: None,
            target_handle: None,
        }
    }

    #[test]
    fn dependency_map_collects_direct_upstreams() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let edges = vec![edge("a", "c"), edge("b", "c")];

        let deps = build_dependency_map(&nodes, &edges);
        assert!(deps["a"].is_empty());
        assert_eq!(deps["c"].len(), 2);
        assert!(deps["c"].contains("a"));
        assert!(deps["c"].contains("b"));
    }

    #[test]
    fn topological_sort_respects_edges() {
        let nodes = vec![node("c"), node("a"), node("b")];
        let edges = vec![edge("a", "b"), edge("b", "c")];

        let order = topological_sort(&nodes, &edges).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn topological_sort_breaks_ties_by_declaration_order() {
        // a, b, c are all roots feeding d; they must come out in
        // declaration order regardless of hash iteration order.
        let nodes = vec![node("b"), node("a"), node("c"), node("d")];
        let edges = vec![edge("b", "d"), edge("a", "d"), edge("c", "d")];

        for _ in 0..10 {
            let order = topological_sort(&nodes, &edges).unwrap();
            assert_eq!(order, vec!["b", "a", "c", "d"]);
        }
    }

    #[test]
    fn sort_places_every_source_before_its_target() {
        let nodes = vec![node("e"), node("d"), node("c"), node("b"), node("a")];
        let edges = vec![
            edge("a", "b"),
            edge("a", "c"),
            edge("b", "d"),
            edge("c", "d"),
            edge("d", "e"),
        ];

        let order = topological_sort(&nodes, &edges).unwrap();
        let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
        for e in &edges {
            assert!(pos(&e.source) < pos(&e.target), "{} -> {}", e.source, e.target);
        }
    }

    #[test]
    fn detect_cycles_returns_witness() {
        let nodes = vec![node("a"), node("b")];
        let edges = vec![edge("a", "b"), edge("b", "a")];

        let cycle = detect_cycles(&nodes, &edges);
        assert_eq!(cycle.len(), 2);
        assert!(cycle.contains(&"a".to_string()));
        assert!(cycle.contains(&"b".to_string()));
    }

    #[test]
    fn detect_cycles_witness_is_the_loop_not_the_approach_path() {
        // entry -> a -> b -> c -> a : witness must be [a, b, c].
        let nodes = vec![node("entry"), node("a"), node("b"), node("c")];
        let edges = vec![
            edge("entry", "a"),
            edge("a", "b"),
            edge("b", "c"),
            edge("c", "a"),
        ];

        let cycle = detect_cycles(&nodes, &edges);
        assert_eq!(cycle, vec!["a", "b", "c"]);
    }

    #[test]
    fn acyclic_graph_has_no_cycle() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let edges = vec![edge("a", "b"), edge("a", "c")];
        assert!(detect_cycles(&nodes, &edges).is_empty());
    }

    #[test]
    fn sort_fails_with_cycle_detected() {
        let nodes = vec![node("a"), node("b")];
        let edges = vec![edge("a", "b"), edge("b", "a")];

        match topological_sort(&nodes, &edges) {
            Err(GraphError::CycleDetected(cycle)) => assert_eq!(cycle.len(), 2),
            other => panic!("expected CycleDetected, got {:?}", other),
        }
    }

    #[test]
    fn connection_compatibility_by_port_kind() {
        let image_out = StrategyPorts {
            inputs: vec![],
            outputs: vec![PortDef::new("image", PortKind::Image, true)],
        };
        let video_in = StrategyPorts {
            inputs: vec![
                PortDef::new("image", PortKind::Image, true),
                PortDef::new("prompt", PortKind::Text, false),
            ],
            outputs: vec![],
        };

        assert!(is_valid_connection(
            &image_out,
            Some("image"),
            &video_in,
            Some("image")
        ));
        assert!(!is_valid_connection(
            &image_out,
            Some("image"),
            &video_in,
            Some("prompt")
        ));

        let pairs = compatible_handles(&image_out, &video_in);
        assert_eq!(pairs, vec![("image".to_string(), "image".to_string())]);
    }
}
