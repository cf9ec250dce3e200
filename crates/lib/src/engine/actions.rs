//! Events folded into engine state by the reducers.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use super::logstore::{Checkpoint, LogLevel};
use crate::build::{BuildReason, BuildResult, BuildType, SpanId};
use crate::load::ConfigLoadResult;
use crate::manifest::ManifestName;
use crate::target::TargetId;

/// A configuration source started evaluating.
#[derive(Debug, Clone)]
pub struct ConfigsReloadStartedAction {
  pub source: ManifestName,
  pub start_time: DateTime<Utc>,
  pub reason: BuildReason,
  pub edits: Vec<PathBuf>,
  pub span_id: SpanId,
}

/// A configuration source finished evaluating, successfully or not.
#[derive(Debug, Clone)]
pub struct ConfigsReloadedAction {
  pub source: ManifestName,
  pub result: ConfigLoadResult,
  pub finish_time: DateTime<Utc>,
  /// Log position when the evaluation started; new secrets are scrubbed from here on.
  pub checkpoint_at_exec_start: Checkpoint,
}

#[derive(Debug, Clone)]
pub struct BuildStartedAction {
  pub manifest: ManifestName,
  pub start_time: DateTime<Utc>,
  pub reason: BuildReason,
  pub edits: Vec<PathBuf>,
  pub span_id: SpanId,
  pub build_types: Vec<BuildType>,
}

#[derive(Debug, Clone)]
pub struct BuildCompletedAction {
  pub manifest: ManifestName,
  pub span_id: SpanId,
  pub finish_time: DateTime<Utc>,
  pub results: BTreeMap<TargetId, BuildResult>,
  pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Action {
  ConfigsReloadStarted(ConfigsReloadStartedAction),
  ConfigsReloaded(Box<ConfigsReloadedAction>),
  BuildStarted(BuildStartedAction),
  BuildCompleted(BuildCompletedAction),
  /// A file a target depends on changed.
  FileChanged {
    manifest: ManifestName,
    target: TargetId,
    path: PathBuf,
    at: DateTime<Utc>,
  },
  /// A file read by a configuration source changed.
  ConfigFileChanged {
    source: ManifestName,
    path: PathBuf,
    at: DateTime<Utc>,
  },
  ManifestTriggered(ManifestName),
  RuntimeCrashed(ManifestName),
  ManifestDisableChanged {
    manifest: ManifestName,
    disabled: bool,
  },
  Log {
    span_id: SpanId,
    level: LogLevel,
    text: String,
  },
}
