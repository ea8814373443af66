//! Graph validation.
//!
//! Parsing accepts any name graph. Before a run is launched the graph must
//! be a DAG over node names: every dependency resolves to a declared node
//! and there are no cycles. Names must also survive the `name=alias` wait
//! step encoding, so they may not contain `=`.

use crate::{ConfigError, ConfigResult};
use flowlink_core::workflow::WorkflowSpec;
use std::collections::{HashMap, HashSet, VecDeque};

/// Validate the graph, returning node names in a topological order.
pub fn validate(spec: &WorkflowSpec) -> ConfigResult<Vec<String>> {
    if let Some(node) = spec.nodes.iter().find(|n| n.name.contains('=')) {
        return Err(ConfigError::InvalidValue {
            field: "name".to_string(),
            message: format!("'=' is not allowed in node name '{}'", node.name),
        });
    }

    let names: HashSet<&str> = spec.nodes.iter().map(|n| n.name.as_str()).collect();

    for node in &spec.nodes {
        for dep in &node.dependencies {
            if !names.contains(dep.name.as_str()) {
                return Err(ConfigError::InvalidReference(format!(
                    "node '{}' depends on unknown node '{}'",
                    node.name, dep.name
                )));
            }
        }
    }

    // Kahn's algorithm over dependency -> dependent edges.
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in &spec.nodes {
        in_degree.insert(node.name.as_str(), node.dependencies.len());
        for dep in &node.dependencies {
            dependents
                .entry(dep.name.as_str())
                .or_default()
                .push(node.name.as_str());
        }
    }

    let mut ready: VecDeque<&str> = spec
        .nodes
        .iter()
        .map(|n| n.name.as_str())
        .filter(|name| in_degree[name] == 0)
        .collect();
    let mut order = Vec::with_capacity(spec.nodes.len());

    while let Some(name) = ready.pop_front() {
        order.push(name.to_string());
        for &dependent in dependents.get(name).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(dependent);
                }
            }
        }
    }

    if order.len() == spec.nodes.len() {
        return Ok(order);
    }

    Err(ConfigError::CycleDetected(find_cycle(spec, &in_degree)))
}

/// Walk dependencies among the nodes Kahn could not release until one repeats.
///
/// Every unreleased node still has an unreleased dependency, so the walk
/// always finds a cycle.
fn find_cycle(spec: &WorkflowSpec, in_degree: &HashMap<&str, usize>) -> Vec<String> {
    let blocked = |name: &str| in_degree.get(name).copied().unwrap_or(0) > 0;

    let Some(start) = spec.nodes.iter().find(|n| blocked(&n.name)) else {
        return Vec::new();
    };

    let mut path: Vec<&str> = Vec::new();
    let mut current = start.name.as_str();
    loop {
        if let Some(pos) = path.iter().position(|n| *n == current) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|n| n.to_string()).collect();
            cycle.push(current.to_string());
            return cycle;
        }
        path.push(current);

        let next = spec
            .node(current)
            .and_then(|node| node.dependencies.iter().find(|d| blocked(&d.name)));
        match next {
            Some(dep) => current = dep.name.as_str(),
            None => return path.iter().map(|n| n.to_string()).collect(),
        }
    }
}
