//! Dependency graph checks

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

/// Job name to the names it depends on
pub type DependencyGraph<'a> = BTreeMap<&'a str, &'a BTreeSet<String>>;

/// Find a dependency cycle. Returns the path with the repeated node at both ends.
///
/// Edges to names outside the graph are ignored.
pub fn find_cycle(graph: &DependencyGraph<'_>) -> Option<Vec<String>> {
    debug!(job_count = graph.len(), "find_cycle: called");
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut cycle_path = Vec::new();

    for &name in graph.keys() {
        if !visited.contains(name) && has_cycle_dfs(name, graph, &mut visited, &mut rec_stack, &mut cycle_path) {
            debug!(?cycle_path, "find_cycle: cycle detected");
            let start = cycle_path.last().cloned().unwrap_or_default();
            let from = cycle_path.iter().position(|n| *n == start).unwrap_or(0);
            return Some(cycle_path.split_off(from));
        }
    }
    None
}

fn has_cycle_dfs<'a>(
    node: &'a str,
    graph: &DependencyGraph<'a>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    cycle_path: &mut Vec<String>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    cycle_path.push(node.to_string());

    if let Some(deps) = graph.get(node) {
        for dep in deps.iter() {
            let dep = dep.as_str();
            if !visited.contains(dep) {
                if let Some((key, _)) = graph.get_key_value(dep)
                    && has_cycle_dfs(key, graph, visited, rec_stack, cycle_path)
                {
                    return true;
                }
            } else if rec_stack.contains(dep) {
                debug!(%node, %dep, "has_cycle_dfs: back edge found");
                cycle_path.push(dep.to_string());
                return true;
            }
        }
    }

    rec_stack.remove(node);
    cycle_path.pop();
    false
}

/// Order names so every job comes after the jobs it depends on.
///
/// Ties resolve alphabetically. Fails with the cycle path if there is one.
pub fn topological_order(graph: &DependencyGraph<'_>) -> Result<Vec<String>, Vec<String>> {
    debug!(job_count = graph.len(), "topological_order: called");
    if let Some(cycle) = find_cycle(graph) {
        return Err(cycle);
    }

    let mut visited = HashSet::new();
    let mut result = Vec::with_capacity(graph.len());
    for &name in graph.keys() {
        topo_dfs(name, graph, &mut visited, &mut result);
    }
    Ok(result)
}

fn topo_dfs<'a>(node: &'a str, graph: &DependencyGraph<'a>, visited: &mut HashSet<&'a str>, result: &mut Vec<String>) {
    if !visited.insert(node) {
        return;
    }
    if let Some(deps) = graph.get(node) {
        for dep in deps.iter() {
            if let Some((key, _)) = graph.get_key_value(dep.as_str()) {
                topo_dfs(key, graph, visited, result);
            }
        }
    }
    result.push(node.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_cycle() {
        let a = deps(&[]);
        let b = deps(&["a"]);
        let c = deps(&["a", "b"]);
        let graph: DependencyGraph = BTreeMap::from([("a", &a), ("b", &b), ("c", &c)]);
        assert!(find_cycle(&graph).is_none());
        assert_eq!(topological_order(&graph).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_order_puts_dependencies_first() {
        let fetch = deps(&[]);
        let post = deps(&["score"]);
        let score = deps(&["fetch"]);
        let graph: DependencyGraph = BTreeMap::from([("post", &post), ("score", &score), ("fetch", &fetch)]);
        assert_eq!(topological_order(&graph).unwrap(), vec!["fetch", "score", "post"]);
    }

    #[test]
    fn test_cycle_path() {
        let a = deps(&["c"]);
        let b = deps(&["a"]);
        let c = deps(&["b"]);
        let graph: DependencyGraph = BTreeMap::from([("a", &a), ("b", &b), ("c", &c)]);
        let cycle = find_cycle(&graph).unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        assert!(topological_order(&graph).is_err());
    }

    #[test]
    fn test_self_dependency() {
        let a = deps(&["a"]);
        let graph: DependencyGraph = BTreeMap::from([("a", &a)]);
        assert_eq!(find_cycle(&graph).unwrap(), vec!["a", "a"]);
    }

    #[test]
    fn test_unknown_edges_ignored() {
        let a = deps(&["ghost"]);
        let graph: DependencyGraph = BTreeMap::from([("a", &a)]);
        assert!(find_cycle(&graph).is_none());
        assert_eq!(topological_order(&graph).unwrap(), vec!["a"]);
    }
}
