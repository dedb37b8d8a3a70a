//! Execution-plan compilation: dependency ordering and definition lint.
//!
//! The sequencer consumes an [`ExecutionPlan`] and treats its order as a
//! guarantee. [`ExecutionPlan::compile`] is the caller-side producer that
//! establishes the guarantee from an unordered definition; [`check`] runs
//! the same structural rules in advisory form for tooling.

use std::collections::{HashMap, HashSet, VecDeque};

use tributary_types::{Error, ParameterValue, PipingId, PipingRecord, Result};

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub piping: Option<PipingId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

// ---------------------------------------------------------------------------
// LintRule trait and rules
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, pipings: &[PipingRecord]) -> Vec<Diagnostic>;
}

struct DuplicatePipingRule;
impl LintRule for DuplicatePipingRule {
    fn name(&self) -> &str {
        "duplicate_piping"
    }
    fn apply(&self, pipings: &[PipingRecord]) -> Vec<Diagnostic> {
        let mut seen = HashSet::new();
        let mut diags = Vec::new();
        for piping in pipings {
            if !seen.insert(piping.id) {
                diags.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message: format!("piping {} defined more than once", piping.id),
                    piping: Some(piping.id),
                });
            }
        }
        diags
    }
}

struct UnknownPreviousRule;
impl LintRule for UnknownPreviousRule {
    fn name(&self) -> &str {
        "unknown_previous"
    }
    fn apply(&self, pipings: &[PipingRecord]) -> Vec<Diagnostic> {
        let known: HashSet<PipingId> = pipings.iter().map(|p| p.id).collect();
        pipings
            .iter()
            .filter_map(|piping| match piping.previous {
                Some(prev) if !known.contains(&prev) => Some(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message: format!(
                        "piping {} depends on undefined piping {}",
                        piping.id, prev
                    ),
                    piping: Some(piping.id),
                }),
                _ => None,
            })
            .collect()
    }
}

struct CycleRule;
impl LintRule for CycleRule {
    fn name(&self) -> &str {
        "dependency_cycle"
    }
    fn apply(&self, pipings: &[PipingRecord]) -> Vec<Diagnostic> {
        match unreachable_from_roots(pipings) {
            0 => vec![],
            remaining => vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!(
                    "{remaining} piping(s) form a dependency cycle or hang off one"
                ),
                piping: None,
            }],
        }
    }
}

struct AttachmentRule;
impl LintRule for AttachmentRule {
    fn name(&self) -> &str {
        "attachment"
    }
    fn apply(&self, pipings: &[PipingRecord]) -> Vec<Diagnostic> {
        if pipings.is_empty() {
            return vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: "pipeline definition has no pipings".into(),
                piping: None,
            }];
        }
        let roots = pipings.iter().filter(|p| p.previous.is_none()).count();
        match roots {
            0 => vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: "no piping attaches to the target instance (every previous is set)"
                    .into(),
                piping: None,
            }],
            1 => vec![],
            n => vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!(
                    "{n} pipings attach directly to the target instance"
                ),
                piping: None,
            }],
        }
    }
}

fn rules() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(DuplicatePipingRule),
        Box::new(UnknownPreviousRule),
        Box::new(CycleRule),
        Box::new(AttachmentRule),
    ]
}

/// Run every lint rule and collect the diagnostics.
pub fn check(pipings: &[PipingRecord]) -> Vec<Diagnostic> {
    rules().iter().flat_map(|r| r.apply(pipings)).collect()
}

/// Count of pipings a breadth-first walk from the roots never reaches.
fn unreachable_from_roots(pipings: &[PipingRecord]) -> usize {
    pipings.len() - bfs_order(pipings).len()
}

/// Breadth-first order from the roots: dependencies always precede
/// dependents, and siblings keep their definition order.
fn bfs_order(pipings: &[PipingRecord]) -> Vec<usize> {
    let mut dependents: HashMap<PipingId, Vec<usize>> = HashMap::new();
    let mut queue: VecDeque<usize> = VecDeque::new();
    for (pos, piping) in pipings.iter().enumerate() {
        match piping.previous {
            Some(prev) if prev != piping.id => dependents.entry(prev).or_default().push(pos),
            Some(_) => {} // self-reference, unreachable by construction
            None => queue.push_back(pos),
        }
    }

    let mut order = Vec::with_capacity(pipings.len());
    while let Some(pos) = queue.pop_front() {
        order.push(pos);
        if let Some(children) = dependents.get(&pipings[pos].id) {
            queue.extend(children.iter().copied());
        }
    }
    order
}

// ---------------------------------------------------------------------------
// ExecutionPlan
// ---------------------------------------------------------------------------

/// A pipeline definition in guaranteed dependency order, plus the default
/// parameters of each piping. Transient: owned by the sequencer run that
/// consumes it.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pipings: Vec<PipingRecord>,
    defaults: HashMap<PipingId, Vec<ParameterValue>>,
}

impl ExecutionPlan {
    /// Validate an unordered definition and put it in dependency order.
    pub fn compile(
        pipings: Vec<PipingRecord>,
        defaults: HashMap<PipingId, Vec<ParameterValue>>,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for piping in &pipings {
            if !seen.insert(piping.id) {
                return Err(Error::DuplicatePiping { piping: piping.id });
            }
        }
        for piping in &pipings {
            if let Some(prev) = piping.previous {
                if prev != piping.id && !seen.contains(&prev) {
                    return Err(Error::UnknownPrevious {
                        piping: piping.id,
                        previous: prev,
                    });
                }
            }
        }

        let order = bfs_order(&pipings);
        if order.len() != pipings.len() {
            return Err(Error::PipelineCycle {
                remaining: pipings.len() - order.len(),
            });
        }

        let ordered = order.into_iter().map(|pos| pipings[pos].clone()).collect();
        Ok(Self {
            pipings: ordered,
            defaults,
        })
    }

    /// Wrap a definition whose order the caller already guarantees.
    pub fn from_ordered(
        pipings: Vec<PipingRecord>,
        defaults: HashMap<PipingId, Vec<ParameterValue>>,
    ) -> Self {
        Self { pipings, defaults }
    }

    pub fn pipings(&self) -> &[PipingRecord] {
        &self.pipings
    }

    pub fn defaults_for(&self, piping: PipingId) -> &[ParameterValue] {
        self.defaults
            .get(&piping)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.pipings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipings.is_empty()
    }
}
