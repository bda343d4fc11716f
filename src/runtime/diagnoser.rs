/// Error-chain diagnoser
///
/// Objects that fail because another in-flight object must finish first carry the
/// blocking ids in their error message. The diagnoser reads one snapshot of the
/// store, builds the "blocked on" graph with petgraph and walks every blocked object
/// toward its root cause, reporting cycles instead of looping on them.
///
/// Each blocked object yields exactly one chain: the walk always follows the lowest
/// blocking id, and the blockers it passed over are listed next to the chain.
///
/// The message wire format is shared with operational tooling, so encoding and
/// extraction both live here and nowhere else.

use crate::workflow::{
    storage::ObjectStorage,
    types::{ObjectStatus, WorkflowObject},
};
use anyhow::Result;
use petgraph::graphmap::DiGraphMap;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// Render a blocking-dependency error message
pub fn format_blocking(reason: &str, ids: &[i64]) -> String {
    let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    format!("{}; blocked by object id(s): {}", reason, ids.join(", "))
}

/// Extract the ids of the objects a message says it is blocked by
pub fn blocking_ids(message: &str) -> Vec<i64> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(pattern) = PATTERN.get_or_init(|| {
        Regex::new(r"(?i)blocked by object id(?:\(s\)|s)?:?\s*(\d+(?:\s*,\s*\d+)*)").ok()
    }) else {
        return Vec::new();
    };

    let mut ids = Vec::new();
    for captures in pattern.captures_iter(message) {
        for part in captures[1].split(',') {
            if let Ok(id) = part.trim().parse::<i64>() {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
    }
    ids
}

/// Where a blocking chain ends
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RootCause {
    /// An object that blocks others without being blocked itself
    Object {
        id: i64,
        status: ObjectStatus,
        message: Option<String>,
    },
    /// A referenced object that no longer exists
    Missing { id: i64 },
    /// The walk came back to an object already on the chain
    CircularDependency { cycle: Vec<i64> },
}

/// One blocking chain, from a blocked object to its root cause
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainReport {
    pub start: i64,
    pub chain: Vec<i64>,
    pub root: RootCause,
    /// Blockers met along the chain that the walk did not follow
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub other_blockers: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct ErrorChainDiagnoser {
    storage: ObjectStorage,
}

impl ErrorChainDiagnoser {
    pub fn new(storage: ObjectStorage) -> Self {
        Self { storage }
    }

    /// Diagnose a point-in-time snapshot of the store
    pub async fn diagnose(&self) -> Result<Vec<ChainReport>> {
        let snapshot = self.storage.snapshot().await?;
        let reports = diagnose_snapshot(&snapshot);
        tracing::info!(
            "🩺 Diagnosed {} objects: {} blocking chains",
            snapshot.len(),
            reports.len()
        );
        Ok(reports)
    }
}

/// Build chains for every blocked ERROR object in the snapshot
pub fn diagnose_snapshot(objects: &[WorkflowObject]) -> Vec<ChainReport> {
    let by_id: HashMap<i64, &WorkflowObject> =
        objects.iter().map(|object| (object.id, object)).collect();

    let mut graph = DiGraphMap::<i64, ()>::new();
    let mut blocked = Vec::new();

    for object in objects {
        if object.status != ObjectStatus::Error {
            continue;
        }
        let message = object.extra_data.error_message.as_deref().unwrap_or_default();
        let ids = blocking_ids(message);
        if ids.is_empty() {
            continue;
        }
        graph.add_node(object.id);
        for id in ids {
            graph.add_edge(object.id, id, ());
        }
        blocked.push(object.id);
    }

    blocked
        .into_iter()
        .map(|start| follow(&graph, &by_id, start))
        .collect()
}

fn follow(
    graph: &DiGraphMap<i64, ()>,
    by_id: &HashMap<i64, &WorkflowObject>,
    start: i64,
) -> ChainReport {
    let mut chain = vec![start];
    let mut on_chain = HashSet::from([start]);
    let mut passed_over = Vec::new();
    let mut current = start;

    let root = loop {
        let mut next_ids: Vec<i64> = graph.neighbors(current).collect();
        next_ids.sort_unstable();

        let Some((&next, rest)) = next_ids.split_first() else {
            break match by_id.get(&current) {
                Some(object) => RootCause::Object {
                    id: current,
                    status: object.status,
                    message: object.extra_data.error_message.clone(),
                },
                None => RootCause::Missing { id: current },
            };
        };
        for id in rest {
            if !passed_over.contains(id) {
                passed_over.push(*id);
            }
        }

        if on_chain.contains(&next) {
            let from = chain.iter().position(|id| *id == next).unwrap_or(0);
            let mut cycle = chain[from..].to_vec();
            cycle.push(next);
            chain.push(next);
            tracing::warn!("🔁 Circular dependency between objects {:?}", cycle);
            break RootCause::CircularDependency { cycle };
        }

        chain.push(next);
        on_chain.insert(next);
        current = next;
    };

    passed_over.retain(|id| !on_chain.contains(id));
    ChainReport {
        start,
        chain,
        root,
        other_blockers: passed_over,
    }
}
