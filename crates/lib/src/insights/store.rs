//! Persistent storage for build metrics.
//!
//! # Storage Layout
//!
//! ```text
//! {data_dir}/insights/
//! └── build_metrics.json   # {"version": 1, "metrics": [...]}
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::stats;
use super::types::{BuildInsights, BuildMetric, ResourceStats};
use crate::consts::{
  INSIGHTS_FLUSH_INTERVAL, INSIGHTS_MAX_AGE, INSIGHTS_MAX_RECENT_BUILDS, INSIGHTS_MAX_SLOWEST_BUILDS,
  INSIGHTS_MOST_FAILED, INSIGHTS_VERSION,
};
use crate::manifest::ManifestName;
use crate::platform::paths::{PathError, insights_file};

#[derive(Debug, Error)]
pub enum InsightsError {
  #[error("failed to read metrics file: {0}")]
  Read(#[source] io::Error),

  #[error("failed to parse metrics file: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to write metrics file: {0}")]
  Write(#[source] io::Error),

  #[error("failed to serialize metrics: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("failed to create insights directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("no metrics found for resource: {0}")]
  NoMetrics(ManifestName),

  #[error(transparent)]
  Path(#[from] PathError),
}

/// Where build metrics are kept and queried.
pub trait InsightsStore: Send + Sync {
  fn record_build(&self, metric: BuildMetric) -> Result<(), InsightsError>;

  /// A report over builds started at or after `since`.
  fn insights(&self, since: DateTime<Utc>) -> Result<BuildInsights, InsightsError>;

  /// # Errors
  ///
  /// Returns [`InsightsError::NoMetrics`] if the resource never built.
  fn resource_stats(&self, name: &ManifestName) -> Result<ResourceStats, InsightsError>;

  /// The `limit` newest builds.
  fn recent_builds(&self, limit: usize) -> Result<Vec<BuildMetric>, InsightsError>;

  /// Builds of one resource started at or after `since`, newest first.
  fn build_history(&self, name: &ManifestName, since: DateTime<Utc>) -> Result<Vec<BuildMetric>, InsightsError>;

  /// Drops builds started before `cutoff`, returning how many were dropped.
  fn clear_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, InsightsError>;

  /// Persists anything not yet written.
  fn close(&self) -> Result<(), InsightsError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct MetricsFile {
  version: u32,
  #[serde(default)]
  metrics: Vec<BuildMetric>,
}

#[derive(Debug)]
struct Inner {
  metrics: Vec<BuildMetric>,
  dirty: bool,
  last_flush: Instant,
}

/// Metrics kept in memory and written to a single JSON file.
///
/// Writes are atomic (temp file, then rename) and only happen when something
/// changed.
#[derive(Debug)]
pub struct FileStore {
  path: PathBuf,
  session_id: String,
  start_time: DateTime<Utc>,
  inner: RwLock<Inner>,
}

impl FileStore {
  /// Opens the store at `path`, loading existing metrics.
  ///
  /// A missing file is an empty store. Metrics older than thirty days are
  /// dropped.
  ///
  /// # Errors
  ///
  /// Returns an error if the file exists but cannot be read or parsed.
  pub fn open(path: impl Into<PathBuf>) -> Result<Self, InsightsError> {
    let path = path.into();
    let metrics = load(&path)?;
    debug!(path = %path.display(), count = metrics.len(), "loaded build metrics");
    Ok(Self {
      path,
      session_id: uuid::Uuid::new_v4().to_string(),
      start_time: Utc::now(),
      inner: RwLock::new(Inner {
        metrics,
        dirty: false,
        last_flush: Instant::now(),
      }),
    })
  }

  /// Opens the store in the user's data directory.
  pub fn open_default() -> Result<Self, InsightsError> {
    Self::open(insights_file()?)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn session_id(&self) -> &str {
    &self.session_id
  }

  /// Writes the metrics if anything changed since the last write.
  pub fn flush(&self) -> Result<(), InsightsError> {
    let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    self.flush_locked(&mut inner)
  }

  fn flush_locked(&self, inner: &mut Inner) -> Result<(), InsightsError> {
    if !inner.dirty {
      return Ok(());
    }

    if let Some(parent) = self.path.parent() {
      fs::create_dir_all(parent).map_err(InsightsError::CreateDir)?;
    }

    let file = MetricsFile {
      version: INSIGHTS_VERSION,
      metrics: inner.metrics.clone(),
    };
    let content = serde_json::to_string_pretty(&file).map_err(InsightsError::Serialize)?;

    let mut temp_path = self.path.clone().into_os_string();
    temp_path.push(".tmp");
    fs::write(&temp_path, &content).map_err(InsightsError::Write)?;
    fs::rename(&temp_path, &self.path).map_err(InsightsError::Write)?;

    inner.dirty = false;
    inner.last_flush = Instant::now();
    debug!(path = %self.path.display(), count = inner.metrics.len(), "flushed build metrics");
    Ok(())
  }

  fn read<R>(&self, f: impl FnOnce(&[BuildMetric]) -> R) -> R {
    let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
    f(&inner.metrics)
  }
}

fn load(path: &Path) -> Result<Vec<BuildMetric>, InsightsError> {
  let content = match fs::read_to_string(path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
    Err(e) => return Err(InsightsError::Read(e)),
  };
  let file: MetricsFile = serde_json::from_str(&content).map_err(InsightsError::Parse)?;

  let max_age = chrono::Duration::from_std(INSIGHTS_MAX_AGE).unwrap_or_else(|_| chrono::Duration::days(30));
  let cutoff = Utc::now() - max_age;
  let total = file.metrics.len();
  let metrics: Vec<BuildMetric> = file.metrics.into_iter().filter(|m| m.start_time >= cutoff).collect();
  if metrics.len() < total {
    debug!(pruned = total - metrics.len(), "dropped expired build metrics");
  }
  Ok(metrics)
}

impl InsightsStore for FileStore {
  fn record_build(&self, mut metric: BuildMetric) -> Result<(), InsightsError> {
    if metric.build_id.is_empty() {
      metric.build_id = uuid::Uuid::new_v4().to_string();
    }

    let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    inner.metrics.push(metric);
    inner.dirty = true;

    if inner.last_flush.elapsed() > INSIGHTS_FLUSH_INTERVAL {
      self.flush_locked(&mut inner)?;
    }
    Ok(())
  }

  fn insights(&self, since: DateTime<Utc>) -> Result<BuildInsights, InsightsError> {
    Ok(self.read(|metrics| {
      let window: Vec<&BuildMetric> = metrics.iter().filter(|m| m.start_time >= since).collect();
      let resources = stats::all_resource_stats(&window);
      BuildInsights {
        version: INSIGHTS_VERSION,
        generated_at: Utc::now(),
        session: stats::session_stats(&self.session_id, self.start_time, &window),
        recent_builds: stats::recent_builds(&window, INSIGHTS_MAX_RECENT_BUILDS),
        slowest_builds: stats::slowest_builds(&window, INSIGHTS_MAX_SLOWEST_BUILDS),
        most_failed_resources: stats::most_failed(&resources, INSIGHTS_MOST_FAILED),
        recommendations: stats::recommendations(&resources),
        resources,
      }
    }))
  }

  fn resource_stats(&self, name: &ManifestName) -> Result<ResourceStats, InsightsError> {
    self.read(|metrics| {
      let matching: Vec<&BuildMetric> = metrics.iter().filter(|m| &m.manifest_name == name).collect();
      if matching.is_empty() {
        return Err(InsightsError::NoMetrics(name.clone()));
      }
      Ok(stats::resource_stats(name, &matching))
    })
  }

  fn recent_builds(&self, limit: usize) -> Result<Vec<BuildMetric>, InsightsError> {
    Ok(self.read(|metrics| {
      let all: Vec<&BuildMetric> = metrics.iter().collect();
      stats::recent_builds(&all, limit)
    }))
  }

  fn build_history(&self, name: &ManifestName, since: DateTime<Utc>) -> Result<Vec<BuildMetric>, InsightsError> {
    Ok(self.read(|metrics| {
      let matching: Vec<&BuildMetric> = metrics
        .iter()
        .filter(|m| &m.manifest_name == name && m.start_time >= since)
        .collect();
      stats::recent_builds(&matching, matching.len())
    }))
  }

  fn clear_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, InsightsError> {
    let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    let before = inner.metrics.len();
    inner.metrics.retain(|m| m.start_time >= cutoff);
    let removed = before - inner.metrics.len();
    if removed > 0 {
      inner.dirty = true;
      info!(removed, cutoff = %cutoff, "cleared old build metrics");
    }
    Ok(removed)
  }

  fn close(&self) -> Result<(), InsightsError> {
    self.flush()
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;
  use tempfile::TempDir;

  use super::*;

  fn metric(name: &str, start: DateTime<Utc>, duration_ms: i64, success: bool) -> BuildMetric {
    BuildMetric {
      build_id: String::new(),
      manifest_name: ManifestName::from(name),
      build_types: Vec::new(),
      start_time: start,
      finish_time: start + Duration::milliseconds(duration_ms),
      duration_ms,
      success,
      error_message: None,
      warning_count: 0,
      reason: Default::default(),
      cache_hit: false,
      image_size: 0,
      live_update: false,
      files_changed: 0,
    }
  }

  fn open(dir: &TempDir) -> FileStore {
    FileStore::open(dir.path().join("insights").join("build_metrics.json")).unwrap()
  }

  #[test]
  fn missing_file_is_an_empty_store() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    assert!(store.recent_builds(10).unwrap().is_empty());
    store.close().unwrap();
    assert!(!store.path().exists());
  }

  #[test]
  fn record_assigns_build_id() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.record_build(metric("api", Utc::now(), 100, true)).unwrap();
    let builds = store.recent_builds(10).unwrap();
    assert_eq!(builds.len(), 1);
    assert!(uuid::Uuid::parse_str(&builds[0].build_id).is_ok());
  }

  #[test]
  fn close_persists_and_reopen_loads() {
    let dir = TempDir::new().unwrap();
    let now = Utc::now();
    {
      let store = open(&dir);
      store.record_build(metric("api", now, 100, true)).unwrap();
      store.record_build(metric("web", now, 200, false)).unwrap();
      store.close().unwrap();
    }

    let store = open(&dir);
    assert_eq!(store.recent_builds(10).unwrap().len(), 2);
    let content = fs::read_to_string(store.path()).unwrap();
    assert!(content.contains("\"version\": 1"));
    assert!(!store.path().with_extension("json.tmp").exists());
  }

  #[test]
  fn expired_metrics_are_pruned_on_load() {
    let dir = TempDir::new().unwrap();
    let now = Utc::now();
    {
      let store = open(&dir);
      store.record_build(metric("api", now - Duration::days(40), 100, true)).unwrap();
      store.record_build(metric("api", now - Duration::days(1), 100, true)).unwrap();
      store.close().unwrap();
    }
    assert_eq!(open(&dir).recent_builds(10).unwrap().len(), 1);
  }

  #[test]
  fn corrupt_file_fails_to_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("build_metrics.json");
    fs::write(&path, "not json").unwrap();
    assert!(matches!(FileStore::open(&path), Err(InsightsError::Parse(_))));
  }

  #[test]
  fn insights_filter_by_start_time() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let now = Utc::now();
    store.record_build(metric("api", now - Duration::hours(2), 100, true)).unwrap();
    store.record_build(metric("api", now, 300, false)).unwrap();
    store.record_build(metric("web", now, 50, true)).unwrap();

    let report = store.insights(now - Duration::hours(1)).unwrap();
    assert_eq!(report.session.total_builds, 2);
    assert_eq!(report.session.session_id, store.session_id());
    assert_eq!(report.resources.len(), 2);
    assert_eq!(report.slowest_builds[0].duration_ms, 300);
    assert_eq!(report.most_failed_resources.len(), 1);
    assert_eq!(report.most_failed_resources[0].manifest_name, ManifestName::from("api"));

    let all = store.insights(now - Duration::hours(3)).unwrap();
    assert_eq!(all.resources[0].manifest_name, ManifestName::from("api"));
    assert_eq!(all.resources[0].total_builds, 2);
  }

  #[test]
  fn resource_stats_requires_metrics() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.record_build(metric("api", Utc::now(), 100, true)).unwrap();

    assert_eq!(store.resource_stats(&"api".into()).unwrap().total_builds, 1);
    let err = store.resource_stats(&"web".into()).unwrap_err();
    assert_eq!(err.to_string(), "no metrics found for resource: web");
  }

  #[test]
  fn build_history_is_newest_first() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let now = Utc::now();
    for i in 0..3 {
      store.record_build(metric("api", now + Duration::seconds(i), 100 + i, true)).unwrap();
    }
    store.record_build(metric("web", now, 1, true)).unwrap();

    let history = store.build_history(&"api".into(), now + Duration::seconds(1)).unwrap();
    let durations: Vec<i64> = history.iter().map(|m| m.duration_ms).collect();
    assert_eq!(durations, vec![102, 101]);
  }

  #[test]
  fn clear_older_than_removes_and_marks_dirty() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let now = Utc::now();
    store.record_build(metric("api", now - Duration::days(3), 100, true)).unwrap();
    store.record_build(metric("api", now, 100, true)).unwrap();
    store.close().unwrap();

    assert_eq!(store.clear_older_than(now - Duration::days(1)).unwrap(), 1);
    assert_eq!(store.clear_older_than(now - Duration::days(1)).unwrap(), 0);
    store.close().unwrap();
    assert_eq!(open(&dir).recent_builds(10).unwrap().len(), 1);
  }
}
