// SPDX-License-Identifier: MIT

//! Deterministic topological ordering of a job graph
//!
//! Kahn's algorithm over a priority queue. A node's priority is the index of
//! the first top-level item that transitively requires it, so the caller's
//! declared order wins whenever the edges leave a choice. Ties go to the
//! node discovered first.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::types::JobGraph;
use crate::error::GraphError;
use crate::pipeline::step::StepKey;

/// Order every node so each runs after all of its predecessors
pub fn resolve_order(graph: &JobGraph) -> Result<Vec<StepKey>, GraphError> {
    let n = graph.len();
    let predecessors: Vec<Vec<usize>> = graph
        .nodes
        .iter()
        .map(|node| {
            node.entry
                .predecessors()
                .into_iter()
                .filter_map(|key| graph.arena_index(key))
                .collect()
        })
        .collect();

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];
    for (i, preds) in predecessors.iter().enumerate() {
        in_degree[i] = preds.len();
        for &p in preds {
            successors[p].push(i);
        }
    }

    let priority = priorities(graph);
    let mut ready: BinaryHeap<Reverse<(usize, usize)>> = (0..n)
        .filter(|&i| in_degree[i] == 0)
        .map(|i| Reverse((priority[i], i)))
        .collect();

    let mut order = Vec::with_capacity(n);
    let mut resolved = vec![false; n];
    while let Some(Reverse((_, i))) = ready.pop() {
        order.push(i);
        resolved[i] = true;
        for &next in &successors[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse((priority[next], next)));
            }
        }
    }

    if order.len() < n {
        let path = find_cycle(graph, &predecessors, &resolved);
        log::debug!(
            "Resolution stopped with {} unresolved steps",
            n - order.len()
        );
        return Err(GraphError::Cycle { path });
    }

    let keys = order.into_iter().map(|i| graph.nodes[i].step.key());
    Ok(keys.collect())
}

/// Lowest top-level index requiring each node, `usize::MAX` if none does
fn priorities(graph: &JobGraph) -> Vec<usize> {
    let mut priority = vec![usize::MAX; graph.len()];
    for (rank, root) in graph.roots.iter().enumerate() {
        let mut stack: Vec<usize> = root.iter().filter_map(|&k| graph.arena_index(k)).collect();
        while let Some(i) = stack.pop() {
            if priority[i] <= rank {
                continue;
            }
            priority[i] = rank;
            let dependencies = &graph.nodes[i].entry.dependencies;
            stack.extend(dependencies.iter().filter_map(|&k| graph.arena_index(k)));
        }
    }
    priority
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    OnStack,
    Done,
}

/// One concrete cycle among the unresolved nodes, as labels
fn find_cycle(graph: &JobGraph, predecessors: &[Vec<usize>], resolved: &[bool]) -> Vec<String> {
    let label = |i: usize| graph.nodes[i].step.label();
    let mut state = vec![Visit::New; graph.len()];

    for start in 0..graph.len() {
        if resolved[start] || state[start] != Visit::New {
            continue;
        }
        state[start] = Visit::OnStack;
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let Some(&pred) = predecessors[node].get(frame.1) else {
                state[node] = Visit::Done;
                stack.pop();
                continue;
            };
            frame.1 += 1;
            if resolved[pred] {
                continue;
            }
            match state[pred] {
                Visit::New => {
                    state[pred] = Visit::OnStack;
                    stack.push((pred, 0));
                }
                Visit::OnStack => {
                    let from = stack.iter().position(|&(n, _)| n == pred).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[from..].iter().map(|&(n, _)| label(n)).collect();
                    path.push(label(pred));
                    return path;
                }
                Visit::Done => {}
            }
        }
    }

    // Unreachable for a graph Kahn could not finish; report what is left
    (0..graph.len()).filter(|&i| !resolved[i]).map(label).collect()
}
