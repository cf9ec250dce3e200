//! The engine's shared state: every manifest, every config source, and the
//! settings the main config source declared.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use super::logstore::{Checkpoint, LogStore};
use crate::build::{BuildHistory, BuildReason, BuildRecord, TargetBuildStatus};
use crate::load::{
  AnalyticsOpt, DockerPruneSettings, FeatureFlags, SecretSet, TelemetrySettings, UpdateSettings, VersionSettings,
  WatchSettings,
};
use crate::manifest::{Manifest, ManifestName};
use crate::target::TargetId;

/// Build bookkeeping for one manifest.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ManifestState {
  pub name: ManifestName,
  pub build_statuses: BTreeMap<TargetId, TargetBuildStatus>,
  pub build_history: BuildHistory,
  pub current_build: Option<BuildRecord>,
  /// Set when a reload changed the manifest in a way that needs a rebuild.
  pub pending_manifest_change: Option<DateTime<Utc>>,
  pub config_files_that_caused_change: Vec<PathBuf>,
  pub needs_rebuild_from_crash: bool,
  pub disabled: bool,
}

impl ManifestState {
  pub fn new(manifest: &Manifest) -> Self {
    let mut state = Self {
      name: manifest.name.clone(),
      ..Default::default()
    };
    state.reset_build_statuses(manifest);
    state
  }

  /// Forgets every cached build result, keeping one empty status per target.
  pub fn reset_build_statuses(&mut self, manifest: &Manifest) {
    self.build_statuses = manifest
      .target_ids()
      .into_iter()
      .map(|id| (id, TargetBuildStatus::default()))
      .collect();
  }

  pub fn build_status(&self, id: &TargetId) -> Option<&TargetBuildStatus> {
    self.build_statuses.get(id)
  }

  pub fn build_status_mut(&mut self, id: &TargetId) -> &mut TargetBuildStatus {
    self.build_statuses.entry(id.clone()).or_default()
  }

  pub fn is_building(&self) -> bool {
    self.current_build.is_some()
  }

  pub fn last_build(&self) -> Option<&BuildRecord> {
    self.build_history.last()
  }

  pub fn started_first_build(&self) -> bool {
    self.current_build.is_some() || !self.build_history.is_empty()
  }

  /// Dependants may start once this manifest has built successfully.
  pub fn is_ready(&self) -> bool {
    self.last_build().is_some_and(BuildRecord::is_success)
  }

  pub fn has_pending_changes(&self) -> bool {
    self.pending_manifest_change.is_some() || self.build_statuses.values().any(TargetBuildStatus::has_pending_changes)
  }

  pub fn has_pending_file_changes(&self) -> bool {
    self.build_statuses.values().any(|s| !s.pending_file_changes.is_empty())
  }

  pub fn earliest_pending_change(&self) -> Option<DateTime<Utc>> {
    self
      .build_statuses
      .values()
      .filter_map(TargetBuildStatus::earliest_pending_change)
      .chain(self.pending_manifest_change)
      .min()
  }

  /// Why the next build of this manifest would run.
  pub fn next_build_reason(&self) -> BuildReason {
    let mut reason = BuildReason::NONE;
    if self.has_pending_file_changes() {
      reason |= BuildReason::CHANGED_FILES;
    }
    if self.build_statuses.values().any(|s| !s.pending_dependency_changes.is_empty()) {
      reason |= BuildReason::CHANGED_DEPS;
    }
    if self.pending_manifest_change.is_some() {
      reason |= BuildReason::CONFIG;
    }
    if self.needs_rebuild_from_crash {
      reason |= BuildReason::CRASH;
    }
    if !self.started_first_build() {
      reason |= BuildReason::INIT;
    }
    reason
  }

  pub fn add_completed_build(&mut self, record: BuildRecord) {
    self.build_history.push(record);
    self.current_build = None;
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestTarget {
  pub manifest: Manifest,
  pub state: ManifestState,
}

impl ManifestTarget {
  pub fn new(manifest: Manifest) -> Self {
    let state = ManifestState::new(&manifest);
    Self { manifest, state }
  }

  pub fn name(&self) -> &ManifestName {
    &self.manifest.name
  }
}

/// Build bookkeeping for one configuration source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigSourceState {
  pub name: ManifestName,
  pub current_build: Option<BuildRecord>,
  pub build_history: BuildHistory,
  pub pending_config_file_changes: BTreeMap<PathBuf, DateTime<Utc>>,
  pub config_files: Vec<PathBuf>,
  /// Log position when the current evaluation started.
  pub checkpoint_at_exec_start: Checkpoint,
}

impl ConfigSourceState {
  pub fn new(name: ManifestName) -> Self {
    Self {
      name,
      ..Default::default()
    }
  }

  pub fn is_building(&self) -> bool {
    self.current_build.is_some()
  }

  pub fn has_pending_changes(&self) -> bool {
    !self.pending_config_file_changes.is_empty()
  }

  pub fn last_build(&self) -> Option<&BuildRecord> {
    self.build_history.last()
  }

  pub fn record_file_change(&mut self, path: PathBuf, at: DateTime<Utc>) {
    self.pending_config_file_changes.entry(path).or_insert(at);
  }

  pub fn consume_changes_before(&mut self, start: DateTime<Utc>) {
    self.pending_config_file_changes.retain(|_, seen| *seen >= start);
  }

  pub fn add_completed_build(&mut self, record: BuildRecord) {
    self.build_history.push(record);
    self.current_build = None;
  }
}

/// Global engine state. Mutated only by reducers, always behind the engine lock.
#[derive(Debug, Clone)]
pub struct EngineState {
  manifest_targets: HashMap<ManifestName, ManifestTarget>,
  manifest_definition_order: Vec<ManifestName>,
  pub config_sources: BTreeMap<ManifestName, ConfigSourceState>,
  pub features: FeatureFlags,
  pub secrets: SecretSet,
  pub team_id: String,
  pub telemetry_settings: TelemetrySettings,
  pub update_settings: UpdateSettings,
  pub docker_prune_settings: DockerPruneSettings,
  pub watch_settings: WatchSettings,
  pub version_settings: VersionSettings,
  pub analytics_opt: AnalyticsOpt,
  /// Manifests waiting on a manual trigger, in trigger order.
  pub trigger_queue: Vec<ManifestName>,
  pub log_store: LogStore,
}

impl Default for EngineState {
  fn default() -> Self {
    Self::new()
  }
}

impl EngineState {
  /// A fresh state that knows about the main config source only.
  pub fn new() -> Self {
    let main = ManifestName::main_config();
    Self {
      manifest_targets: HashMap::new(),
      manifest_definition_order: Vec::new(),
      config_sources: BTreeMap::from([(main.clone(), ConfigSourceState::new(main))]),
      features: FeatureFlags::new(),
      secrets: SecretSet::new(),
      team_id: String::new(),
      telemetry_settings: TelemetrySettings::default(),
      update_settings: UpdateSettings::default(),
      docker_prune_settings: DockerPruneSettings::default(),
      watch_settings: WatchSettings::default(),
      version_settings: VersionSettings::default(),
      analytics_opt: AnalyticsOpt::default(),
      trigger_queue: Vec::new(),
      log_store: LogStore::new(),
    }
  }

  pub fn manifest_target(&self, name: &ManifestName) -> Option<&ManifestTarget> {
    self.manifest_targets.get(name)
  }

  pub fn manifest_target_mut(&mut self, name: &ManifestName) -> Option<&mut ManifestTarget> {
    self.manifest_targets.get_mut(name)
  }

  pub fn manifest(&self, name: &ManifestName) -> Option<&Manifest> {
    self.manifest_targets.get(name).map(|mt| &mt.manifest)
  }

  /// Inserts or replaces a manifest. A new name goes to the end of the
  /// definition order; a known name keeps its position.
  pub fn upsert_manifest_target(&mut self, target: ManifestTarget) {
    let name = target.manifest.name.clone();
    if !self.manifest_targets.contains_key(&name) {
      self.manifest_definition_order.push(name.clone());
    }
    self.manifest_targets.insert(name, target);
  }

  pub fn remove_manifest_target(&mut self, name: &ManifestName) -> Option<ManifestTarget> {
    self.manifest_definition_order.retain(|n| n != name);
    self.trigger_queue.retain(|n| n != name);
    self.manifest_targets.remove(name)
  }

  /// Manifest names in definition order.
  pub fn manifest_names(&self) -> &[ManifestName] {
    &self.manifest_definition_order
  }

  /// Manifest targets in definition order.
  pub fn targets(&self) -> Vec<&ManifestTarget> {
    self
      .manifest_definition_order
      .iter()
      .filter_map(|name| self.manifest_targets.get(name))
      .collect()
  }

  pub fn manifests(&self) -> Vec<&Manifest> {
    self.targets().into_iter().map(|mt| &mt.manifest).collect()
  }

  /// Names of the manifests declared by `source`, in definition order.
  pub fn manifest_names_from_source(&self, source: &ManifestName) -> Vec<ManifestName> {
    self
      .targets()
      .into_iter()
      .filter(|mt| &mt.manifest.source_config == source)
      .map(|mt| mt.manifest.name.clone())
      .collect()
  }

  pub fn config_source(&self, name: &ManifestName) -> Option<&ConfigSourceState> {
    self.config_sources.get(name)
  }

  pub fn config_source_mut(&mut self, name: &ManifestName) -> &mut ConfigSourceState {
    self
      .config_sources
      .entry(name.clone())
      .or_insert_with(|| ConfigSourceState::new(name.clone()))
  }

  pub fn is_config_reloading(&self) -> bool {
    self.config_sources.values().any(|s| s.is_building() || s.has_pending_changes())
  }

  /// Queues a manual build. A manifest is queued at most once.
  pub fn append_to_trigger_queue(&mut self, name: ManifestName) {
    if !self.trigger_queue.contains(&name) {
      self.trigger_queue.push(name);
    }
  }

  pub fn remove_from_trigger_queue(&mut self, name: &ManifestName) {
    self.trigger_queue.retain(|n| n != name);
  }

  pub fn current_build_count(&self) -> usize {
    self.manifest_targets.values().filter(|mt| mt.state.is_building()).count()
  }

  pub fn update_checkpoint(&self) -> Checkpoint {
    self.log_store.checkpoint()
  }
}
