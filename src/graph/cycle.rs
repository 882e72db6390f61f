use indexmap::{IndexMap, IndexSet};
use std::hash::Hash;

/// Deduplicate every dependency list and add an empty entry for each node
/// that is referenced but has no key. Idempotent.
pub fn normalize<N>(graph: &IndexMap<N, Vec<N>>) -> IndexMap<N, Vec<N>>
where
    N: Clone + Eq + Hash,
{
    let mut out: IndexMap<N, Vec<N>> = graph
        .iter()
        .map(|(node, deps)| {
            let unique: IndexSet<&N> = deps.iter().collect();
            (node.clone(), unique.into_iter().cloned().collect())
        })
        .collect();

    let missing: Vec<N> = out
        .values()
        .flatten()
        .filter(|dep| !graph.contains_key(*dep))
        .cloned()
        .collect();
    for dep in missing {
        out.entry(dep).or_default();
    }
    out
}

/// Find a cycle, if any. The path starts and ends with the same node.
///
/// Nodes are visited in insertion order and dependencies in declaration
/// order, so the same graph always yields the same path.
pub fn find_cycle<N>(graph: &IndexMap<N, Vec<N>>) -> Option<Vec<N>>
where
    N: Clone + Eq + Hash,
{
    find_cycle_normalized(&normalize(graph))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

/// [`find_cycle`] for a graph that already went through [`normalize`].
pub fn find_cycle_normalized<N>(graph: &IndexMap<N, Vec<N>>) -> Option<Vec<N>>
where
    N: Clone + Eq + Hash,
{
    let mut marks = vec![Mark::Unvisited; graph.len()];
    // (node index, next dependency to look at)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..graph.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::OnPath;
        stack.push((root, 0));

        while let Some(top) = stack.last_mut() {
            let node = top.0;
            let deps = &graph[node];
            if top.1 == deps.len() {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            }
            let next_dep = &deps[top.1];
            top.1 += 1;
            let Some(dep) = graph.get_index_of(next_dep) else {
                continue;
            };

            match marks[dep] {
                Mark::Unvisited => {
                    marks[dep] = Mark::OnPath;
                    stack.push((dep, 0));
                }
                Mark::OnPath => {
                    let start = stack.iter().position(|&(n, _)| n == dep)?;
                    let mut path: Vec<N> = stack[start..]
                        .iter()
                        .map(|&(n, _)| graph.get_index(n).map(|(k, _)| k.clone()))
                        .collect::<Option<_>>()?;
                    path.push(path[0].clone());
                    return Some(path);
                }
                Mark::Done => {}
            }
        }
    }
    None
}
