//! The engine: state, the actions that change it, and the loop that builds.
//!
//! State changes only through [`reduce`]; everything else reads snapshots.

pub mod actions;
mod logstore;
pub mod reducers;
mod runner;
mod state;
mod store;

pub use actions::{
  Action, BuildCompletedAction, BuildStartedAction, ConfigsReloadStartedAction, ConfigsReloadedAction,
};
pub use logstore::{Checkpoint, LogLevel, LogSegment, LogStore};
pub use reducers::reduce;
pub use runner::{Runner, RunnerConfig, RunSummary};
pub use state::{ConfigSourceState, EngineState, ManifestState, ManifestTarget};
pub use store::EngineStore;
