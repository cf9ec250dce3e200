//! Build graph targets.
//!
//! Every buildable or deployable unit is a target identified by a `TargetId`.
//! Targets declare their dependencies by id; `topological_sort` validates the
//! resulting graph and orders it so dependencies come before dependents.

mod graph;
mod sort;
mod types;

pub use graph::TargetGraph;
pub use sort::{dedupe_target_ids, topological_sort};
pub use types::*;
