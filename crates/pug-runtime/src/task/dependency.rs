//! Dependency ordering for task batches.

use crate::PugError;
use pug_types::Id;
use std::collections::{HashMap, HashSet, VecDeque};

/// A batch ordered so that every node follows the nodes it waits on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DependencyOrder {
    pub order: Vec<Id>,
    /// For each node, the batch members it waits on.
    pub waits_on: HashMap<Id, Vec<Id>>,
}

/// Sorts `nodes` topologically using `deps` (node → nodes it depends on).
///
/// Edges to nodes outside the batch are ignored. With `inverse`, every
/// edge is reversed so dependents run first, as a destroy requires.
/// Ties keep the input order.
///
/// # Errors
///
/// Returns [`PugError::Parse`] if the restricted graph has a cycle.
pub(crate) fn order(
    nodes: &[Id],
    deps: &HashMap<Id, Vec<Id>>,
    inverse: bool,
) -> Result<DependencyOrder, PugError> {
    let members: HashSet<Id> = nodes.iter().copied().collect();
    let mut waits_on: HashMap<Id, Vec<Id>> = nodes.iter().map(|&n| (n, Vec::new())).collect();

    for &node in nodes {
        for &dep in deps.get(&node).map(Vec::as_slice).unwrap_or_default() {
            if dep == node || !members.contains(&dep) {
                continue;
            }
            let (waiter, target) = if inverse { (dep, node) } else { (node, dep) };
            let list = waits_on.entry(waiter).or_default();
            if !list.contains(&target) {
                list.push(target);
            }
        }
    }

    let mut remaining: HashMap<Id, usize> =
        waits_on.iter().map(|(&n, w)| (n, w.len())).collect();
    let mut dependents: HashMap<Id, Vec<Id>> = HashMap::new();
    for (&waiter, targets) in &waits_on {
        for &t in targets {
            dependents.entry(t).or_default().push(waiter);
        }
    }
    let position: HashMap<Id, usize> = nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();

    let mut ready: VecDeque<Id> = nodes
        .iter()
        .copied()
        .filter(|n| remaining.get(n) == Some(&0))
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(node) = ready.pop_front() {
        order.push(node);
        let mut released = Vec::new();
        for &d in dependents.get(&node).map(Vec::as_slice).unwrap_or_default() {
            if let Some(count) = remaining.get_mut(&d) {
                *count -= 1;
                if *count == 0 {
                    released.push(d);
                }
            }
        }
        released.sort_by_key(|n| position.get(n).copied().unwrap_or(usize::MAX));
        ready.extend(released);
    }

    if order.len() != nodes.len() {
        return Err(PugError::parse(
            "dependency graph",
            "cycle between modules in batch",
        ));
    }
    Ok(DependencyOrder { order, waits_on })
}
