//! Pure, synchronous reconstruction of feed structures from flat records.
//!
//! Three builders, none of which touch the network:
//! - [`PathTreeBuilder`] — flat file paths → nested directory tree
//! - [`build_forest`] — flat (id, previous_id) records → instance forest
//! - [`resolve_cross_links`] — fan-in parameters → extra dependency edges
//!
//! Each invocation owns its own state; builders are reentrant and results
//! are rebuilt wholesale on every fetch.

pub mod cross_links;
pub mod instance_graph;
pub mod path_tree;

pub use cross_links::{resolve_cross_links, CrossEdge, CrossLinks};
pub use instance_graph::{build_forest, forest_size, InstanceNode};
pub use path_tree::{PathTreeBuilder, PathTreeNode};
