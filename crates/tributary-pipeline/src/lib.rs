//! Pipeline plan compilation, compute-environment resolution, and
//! dependency-ordered sequencing against the backend.
//!
//! The flow: [`ExecutionPlan::compile`] orders and validates a pipeline
//! definition, [`ComputeResolver`] gathers per-node environment candidates,
//! and [`Sequencer::run`] creates the instances one by one, remapping
//! pipeline-local ids to created ids and isolating per-node failures.

pub mod compute;
pub mod plan;
pub mod sequencer;

pub use compute::{Assignments, ComputeAssignment, ComputeResolver};
pub use plan::{check, Diagnostic, ExecutionPlan, LintRule, Severity};
pub use sequencer::{SequenceError, SequenceOutcome, Sequencer};
