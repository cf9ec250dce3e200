//! devloop-lib: Core types and logic for devloop
//!
//! This crate provides the build-orchestration core of the dev loop:
//! - `target`: the typed build graph and its topological ordering
//! - `manifest`: manifests composed of image targets and one deploy target
//! - `build`: build records, build reasons, trigger modes and scheduling
//! - `reconcile`: keeps generated API objects in sync with the loaded config
//! - `engine`: the shared engine state and the reducers that fold events into it
//! - `exec`: local process execution with process-group cancellation
//! - `insights`: rolling statistics over completed builds

pub mod build;
pub mod consts;
pub mod engine;
pub mod exec;
pub mod insights;
pub mod load;
pub mod manifest;
pub mod object;
pub mod platform;
pub mod reconcile;
pub mod target;
