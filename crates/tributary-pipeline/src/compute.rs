//! Compute-environment resolution and per-node assignments.
//!
//! The resolver fetches the candidate environments for a node's plugin and
//! caches them per node id, so repeated resolution passes over the same
//! pipeline never duplicate calls. User selections live in [`Assignments`]
//! and are merged key-wise; a later-arriving resolution for other nodes can
//! never clobber an existing selection.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use tributary_types::{ComputeResource, PipingId, PluginId, Result};

use tributary_api::FeedApi;

// ---------------------------------------------------------------------------
// ComputeAssignment
// ---------------------------------------------------------------------------

/// Candidate environments for one node plus the user's choice, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeAssignment {
    pub candidates: Vec<ComputeResource>,
    pub selected: Option<String>,
}

impl ComputeAssignment {
    pub fn from_candidates(candidates: Vec<ComputeResource>) -> Self {
        Self {
            candidates,
            selected: None,
        }
    }

    /// The effective choice: the explicit selection, or the first candidate
    /// in backend order.
    pub fn selection(&self) -> Option<&str> {
        self.selected
            .as_deref()
            .or_else(|| self.candidates.first().map(|c| c.name.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Assignments
// ---------------------------------------------------------------------------

/// Per-node compute assignments, merged key-by-key across partial updates.
#[derive(Debug, Clone, Default)]
pub struct Assignments {
    by_node: HashMap<PipingId, ComputeAssignment>,
}

impl Assignments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: PipingId, assignment: ComputeAssignment) {
        self.by_node.insert(node, assignment);
    }

    pub fn get(&self, node: PipingId) -> Option<&ComputeAssignment> {
        self.by_node.get(&node)
    }

    /// The effective environment name for a node, when one is known.
    pub fn selection_for(&self, node: PipingId) -> Option<&str> {
        self.by_node.get(&node).and_then(ComputeAssignment::selection)
    }

    /// Record a user override. Returns `false` when the node is unknown or
    /// the name is not among its candidates.
    pub fn select(&mut self, node: PipingId, name: &str) -> bool {
        match self.by_node.get_mut(&node) {
            Some(assignment) if assignment.candidates.iter().any(|c| c.name == name) => {
                assignment.selected = Some(name.to_string());
                true
            }
            _ => false,
        }
    }

    /// Key-wise merge: unknown nodes are inserted; for known nodes the
    /// candidate list is refreshed but an existing selection is kept.
    pub fn merge(&mut self, incoming: Assignments) {
        for (node, assignment) in incoming.by_node {
            match self.by_node.get_mut(&node) {
                Some(existing) => {
                    existing.candidates = assignment.candidates;
                    if existing.selected.is_none() {
                        existing.selected = assignment.selected;
                    }
                }
                None => {
                    self.by_node.insert(node, assignment);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ComputeResolver
// ---------------------------------------------------------------------------

/// Resolves and caches compute candidates per node id.
///
/// Lookups for distinct nodes have no inter-dependency and run
/// concurrently in [`resolve_many`](Self::resolve_many). Completions are
/// epoch-tagged: after [`invalidate`](Self::invalidate), results of calls
/// issued under the old epoch are returned to their caller but never
/// applied to the shared cache.
pub struct ComputeResolver {
    api: Arc<dyn FeedApi>,
    cache: RwLock<HashMap<PipingId, ComputeAssignment>>,
    epoch: AtomicU64,
}

impl ComputeResolver {
    pub fn new(api: Arc<dyn FeedApi>) -> Self {
        Self {
            api,
            cache: RwLock::new(HashMap::new()),
            epoch: AtomicU64::new(0),
        }
    }

    /// Drop the cache and mark every in-flight lookup stale.
    pub async fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.cache.write().await.clear();
    }

    /// Candidates for one node, from cache when already resolved.
    pub async fn resolve(&self, node: PipingId, plugin: PluginId) -> Result<ComputeAssignment> {
        if let Some(hit) = self.cache.read().await.get(&node) {
            return Ok(hit.clone());
        }

        let epoch = self.epoch.load(Ordering::Acquire);
        let candidates = self.api.compute_resources(plugin).await?;
        let assignment = ComputeAssignment::from_candidates(candidates);

        if self.epoch.load(Ordering::Acquire) == epoch {
            self.cache
                .write()
                .await
                .insert(node, assignment.clone());
        } else {
            tracing::debug!(node, "dropping stale compute resolution");
        }
        Ok(assignment)
    }

    /// Resolve a batch of nodes concurrently, deduplicated by node id.
    pub async fn resolve_many(&self, nodes: &[(PipingId, PluginId)]) -> Result<Assignments> {
        let mut seen = HashSet::new();
        let unique: Vec<(PipingId, PluginId)> = nodes
            .iter()
            .copied()
            .filter(|(node, _)| seen.insert(*node))
            .collect();

        let results = futures::future::join_all(
            unique
                .iter()
                .map(|&(node, plugin)| self.resolve(node, plugin)),
        )
        .await;

        let mut assignments = Assignments::new();
        for (&(node, _), result) in unique.iter().zip(results) {
            assignments.insert(node, result?);
        }
        Ok(assignments)
    }
}
