#![forbid(unsafe_code)]

//! Pure dependency-graph helpers. Edges are `(dependent, prerequisite)`
//! pairs: the dependent cannot start until the prerequisite is done.

use std::collections::{HashMap, HashSet};

/// True when adding `dependent -> prerequisite` would close a cycle over
/// the existing edge set. The walk follows prerequisite chains outward
/// from `prerequisite`; reaching `dependent` means the new edge closes a
/// loop. Self-edges are cycles by definition.
pub fn creates_cycle(existing: &[(String, String)], dependent: &str, prerequisite: &str) -> bool {
    if dependent == prerequisite {
        return true;
    }
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for (dep, pre) in existing {
        adjacency.entry(dep.as_str()).or_default().push(pre.as_str());
    }
    let mut seen: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = vec![prerequisite];
    while let Some(current) = stack.pop() {
        if current == dependent {
            return true;
        }
        if !seen.insert(current) {
            continue;
        }
        if let Some(next) = adjacency.get(current) {
            stack.extend(next.iter().copied());
        }
    }
    false
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderError {
    UnknownNode { name: String },
    Cycle { remaining: Vec<String> },
}

impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderError::UnknownNode { name } => {
                write!(f, "edge references unknown node {name:?}")
            }
            OrderError::Cycle { remaining } => {
                write!(f, "dependency cycle among {}", remaining.join(", "))
            }
        }
    }
}

impl std::error::Error for OrderError {}

/// Kahn layering: level 0 holds nodes with no prerequisites, level k holds
/// nodes whose prerequisites all sit in earlier levels. Node order inside
/// a level follows the input order, so the result is deterministic.
pub fn execution_order(
    nodes: &[String],
    edges: &[(String, String)],
) -> Result<Vec<Vec<String>>, OrderError> {
    let known: HashSet<&str> = nodes.iter().map(|n| n.as_str()).collect();
    for (dep, pre) in edges {
        if !known.contains(dep.as_str()) {
            return Err(OrderError::UnknownNode { name: dep.clone() });
        }
        if !known.contains(pre.as_str()) {
            return Err(OrderError::UnknownNode { name: pre.clone() });
        }
    }

    let mut prerequisites: HashMap<&str, HashSet<&str>> = HashMap::new();
    for (dep, pre) in edges {
        prerequisites
            .entry(dep.as_str())
            .or_default()
            .insert(pre.as_str());
    }

    let mut placed: HashSet<&str> = HashSet::new();
    let mut pending: Vec<&str> = nodes.iter().map(|n| n.as_str()).collect();
    let mut levels: Vec<Vec<String>> = Vec::new();

    while !pending.is_empty() {
        let ready: Vec<&str> = pending
            .iter()
            .copied()
            .filter(|node| {
                prerequisites
                    .get(node)
                    .map(|pres| pres.iter().all(|p| placed.contains(p)))
                    .unwrap_or(true)
            })
            .collect();
        if ready.is_empty() {
            return Err(OrderError::Cycle {
                remaining: pending.iter().map(|n| n.to_string()).collect(),
            });
        }
        for node in &ready {
            placed.insert(node);
        }
        pending.retain(|node| !placed.contains(node));
        levels.push(ready.iter().map(|n| n.to_string()).collect());
    }

    Ok(levels)
}
