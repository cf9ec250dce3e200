//! Build records and per-target build status.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::reason::BuildReason;
use crate::consts::BUILD_HISTORY_LIMIT;
use crate::target::TargetId;

/// Correlates a build with the log lines it produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SpanId(pub String);

impl SpanId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl fmt::Display for SpanId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildType {
  Image,
  LiveUpdate,
  K8s,
  DockerCompose,
  Local,
}

/// One build attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BuildRecord {
  pub start_time: DateTime<Utc>,
  /// `None` while the build is running.
  pub finish_time: Option<DateTime<Utc>>,
  pub reason: BuildReason,
  pub error: Option<String>,
  pub warning_count: usize,
  pub build_types: Vec<BuildType>,
  pub span_id: SpanId,
  /// Files whose changes triggered the build.
  pub edits: Vec<PathBuf>,
}

impl BuildRecord {
  pub fn started(start_time: DateTime<Utc>, reason: BuildReason, span_id: SpanId) -> Self {
    Self {
      start_time,
      reason,
      span_id,
      ..Default::default()
    }
  }

  pub fn is_in_progress(&self) -> bool {
    self.finish_time.is_none()
  }

  pub fn is_success(&self) -> bool {
    self.finish_time.is_some() && self.error.is_none()
  }

  pub fn duration(&self) -> chrono::Duration {
    match self.finish_time {
      Some(finish) => finish - self.start_time,
      None => chrono::Duration::zero(),
    }
  }
}

/// Finished builds of one manifest or config source, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct BuildHistory(Vec<BuildRecord>);

impl BuildHistory {
  /// Adds a finished build, evicting the oldest beyond the history limit.
  pub fn push(&mut self, record: BuildRecord) {
    self.0.insert(0, record);
    self.0.truncate(BUILD_HISTORY_LIMIT);
  }

  pub fn last(&self) -> Option<&BuildRecord> {
    self.0.first()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &BuildRecord> {
    self.0.iter()
  }
}

impl From<Vec<BuildRecord>> for BuildHistory {
  fn from(mut records: Vec<BuildRecord>) -> Self {
    records.truncate(BUILD_HISTORY_LIMIT);
    Self(records)
  }
}

/// The outcome of building one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
  pub target_id: TargetId,
  pub build_type: BuildType,
  #[serde(default)]
  pub cache_hit: bool,
  #[serde(default)]
  pub image_size: u64,
}

impl BuildResult {
  pub fn new(target_id: TargetId, build_type: BuildType) -> Self {
    Self {
      target_id,
      build_type,
      cache_hit: false,
      image_size: 0,
    }
  }
}

/// What is known about one target between builds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetBuildStatus {
  pub last_result: Option<BuildResult>,
  /// Changed files, keyed by path, with the time each change was first seen.
  pub pending_file_changes: BTreeMap<PathBuf, DateTime<Utc>>,
  /// Dependencies rebuilt since this target last built.
  pub pending_dependency_changes: BTreeMap<TargetId, DateTime<Utc>>,
}

impl TargetBuildStatus {
  pub fn has_pending_changes(&self) -> bool {
    !self.pending_file_changes.is_empty() || !self.pending_dependency_changes.is_empty()
  }

  pub fn earliest_pending_change(&self) -> Option<DateTime<Utc>> {
    self
      .pending_file_changes
      .values()
      .chain(self.pending_dependency_changes.values())
      .min()
      .copied()
  }

  pub fn record_file_change(&mut self, path: PathBuf, at: DateTime<Utc>) {
    self.pending_file_changes.entry(path).or_insert(at);
  }

  /// Drops changes seen before `start`; they are covered by a build that started after them.
  pub fn consume_changes_before(&mut self, start: DateTime<Utc>) {
    self.pending_file_changes.retain(|_, seen| *seen >= start);
    self.pending_dependency_changes.retain(|_, seen| *seen >= start);
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;

  use super::*;
  use crate::target::TargetType;

  fn record(secs: i64) -> BuildRecord {
    let start = DateTime::<Utc>::from_timestamp(secs, 0).unwrap();
    BuildRecord {
      start_time: start,
      finish_time: Some(start + Duration::seconds(1)),
      ..Default::default()
    }
  }

  #[test]
  fn history_is_bounded_and_newest_first() {
    let mut history = BuildHistory::default();
    for secs in 1..=5 {
      history.push(record(secs));
    }
    assert_eq!(history.len(), BUILD_HISTORY_LIMIT);
    assert_eq!(history.last().unwrap().start_time.timestamp(), 5);
  }

  #[test]
  fn record_state() {
    let mut r = BuildRecord::started(Utc::now(), BuildReason::INIT, SpanId::new("build:1"));
    assert!(r.is_in_progress());
    assert!(!r.is_success());
    assert_eq!(r.duration(), Duration::zero());

    r.finish_time = Some(r.start_time + Duration::milliseconds(1500));
    assert!(r.is_success());
    assert_eq!(r.duration().num_milliseconds(), 1500);

    r.error = Some("boom".to_string());
    assert!(!r.is_success());
  }

  #[test]
  fn consume_changes_before() {
    let t0 = Utc::now();
    let mut status = TargetBuildStatus::default();
    status.record_file_change(PathBuf::from("a.go"), t0);
    status.record_file_change(PathBuf::from("b.go"), t0 + Duration::seconds(10));
    status
      .pending_dependency_changes
      .insert(TargetId::new(TargetType::Image, "base"), t0 + Duration::seconds(1));

    assert_eq!(status.earliest_pending_change(), Some(t0));

    status.consume_changes_before(t0 + Duration::seconds(5));
    assert_eq!(status.pending_file_changes.len(), 1);
    assert!(status.pending_file_changes.contains_key(&PathBuf::from("b.go")));
    assert!(status.pending_dependency_changes.is_empty());
    assert!(status.has_pending_changes());
  }

  #[test]
  fn file_change_keeps_first_seen_time() {
    let t0 = Utc::now();
    let mut status = TargetBuildStatus::default();
    status.record_file_change(PathBuf::from("a.go"), t0);
    status.record_file_change(PathBuf::from("a.go"), t0 + Duration::seconds(3));
    assert_eq!(status.pending_file_changes[&PathBuf::from("a.go")], t0);
  }
}
