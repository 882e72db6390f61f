use indexmap::{IndexMap, IndexSet};
use std::hash::Hash;

/// Expand every node into the flat list of names it transitively needs,
/// in discovery order, with the node itself last.
///
/// The graph must be acyclic (see [`super::find_cycle`]). A node reachable
/// through several paths is listed once.
pub fn resolve<N>(graph: &IndexMap<N, Vec<N>>) -> IndexMap<N, Vec<N>>
where
    N: Clone + Eq + Hash,
{
    graph
        .keys()
        .map(|node| (node.clone(), resolve_one(graph, node)))
        .collect()
}

/// Transitive requirements of a single node.
pub fn resolve_one<N>(graph: &IndexMap<N, Vec<N>>, node: &N) -> Vec<N>
where
    N: Clone + Eq + Hash,
{
    let mut seen: IndexSet<&N> = IndexSet::new();
    seen.insert(node);

    let mut stack: Vec<&N> = graph
        .get(node)
        .map(|deps| deps.iter().rev().collect())
        .unwrap_or_default();

    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        if let Some(deps) = graph.get(current) {
            stack.extend(deps.iter().rev().filter(|d| !seen.contains(d)));
        }
    }

    let mut out: Vec<N> = seen.into_iter().skip(1).cloned().collect();
    out.push(node.clone());
    out
}
