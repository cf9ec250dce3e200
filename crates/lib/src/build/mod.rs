//! Build bookkeeping and scheduling.
//!
//! - [`reason`] - why a build runs
//! - [`trigger`] - when a manifest builds on its own
//! - [`status`] - build records, history and per-target status
//! - [`control`] - choosing the next manifest to build
//! - [`queue`] - ordering the targets of one manifest build

pub mod control;
pub mod queue;
mod reason;
mod status;
mod trigger;

pub use control::{Hold, HoldSet, next_target_to_build};
pub use queue::{TargetBuilder, TargetQueue};
pub use reason::BuildReason;
pub use status::{BuildHistory, BuildRecord, BuildResult, BuildType, SpanId, TargetBuildStatus};
pub use trigger::TriggerMode;
