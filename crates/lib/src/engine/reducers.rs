//! Reducers: pure folds of actions into engine state.
//!
//! Reducers run under the engine write lock and never perform I/O beyond
//! logging.

use std::collections::HashSet;

use tracing::{debug, error, info, warn};

use super::actions::{
  Action, BuildCompletedAction, BuildStartedAction, ConfigsReloadStartedAction, ConfigsReloadedAction,
};
use super::logstore::LogLevel;
use super::state::{EngineState, ManifestTarget};
use crate::build::BuildRecord;
use crate::load::SecretSet;
use crate::manifest::{Manifest, changes_invalidate_build};

pub fn reduce(state: &mut EngineState, action: Action) {
  match action {
    Action::ConfigsReloadStarted(a) => handle_configs_reload_started(state, a),
    Action::ConfigsReloaded(a) => handle_configs_reloaded(state, *a),
    Action::BuildStarted(a) => handle_build_started(state, a),
    Action::BuildCompleted(a) => handle_build_completed(state, a),
    Action::FileChanged {
      manifest,
      target,
      path,
      at,
    } => {
      if let Some(mt) = state.manifest_target_mut(&manifest) {
        mt.state.build_status_mut(&target).record_file_change(path, at);
      }
    }
    Action::ConfigFileChanged { source, path, at } => {
      state.config_source_mut(&source).record_file_change(path, at);
    }
    Action::ManifestTriggered(name) => {
      if state.manifest_target(&name).is_some() {
        state.append_to_trigger_queue(name);
      }
    }
    Action::RuntimeCrashed(name) => {
      if let Some(mt) = state.manifest_target_mut(&name) {
        mt.state.needs_rebuild_from_crash = true;
      }
    }
    Action::ManifestDisableChanged { manifest, disabled } => {
      if let Some(mt) = state.manifest_target_mut(&manifest) {
        mt.state.disabled = disabled;
      }
      if disabled {
        state.remove_from_trigger_queue(&manifest);
      }
    }
    Action::Log { span_id, level, text } => state.log_store.append(&span_id, level, text),
  }
}

pub fn handle_configs_reload_started(state: &mut EngineState, action: ConfigsReloadStartedAction) {
  let checkpoint = state.log_store.checkpoint();
  let source = state.config_source_mut(&action.source);
  if source.is_building() {
    warn!(source = %action.source, "config reload started while another reload is running");
  }

  source.current_build = Some(BuildRecord {
    edits: action.edits,
    ..BuildRecord::started(action.start_time, action.reason, action.span_id)
  });
  source.checkpoint_at_exec_start = checkpoint;

  state.remove_from_trigger_queue(&action.source);
}

/// Folds the result of evaluating one configuration source into the state.
///
/// Manifests declared by the source are upserted, manifests it no longer
/// declares are removed, and a manifest already owned by a different source
/// is left alone. On evaluation failure nothing but the build record,
/// secrets and (for the main source) enabled feature flags change.
pub fn handle_configs_reloaded(state: &mut EngineState, action: ConfigsReloadedAction) {
  let ConfigsReloadedAction {
    source,
    result,
    finish_time,
    checkpoint_at_exec_start,
  } = action;
  let is_main = source.is_main_config();

  let span_id = state
    .config_source(&source)
    .and_then(|s| s.current_build.as_ref())
    .map(|b| b.span_id.clone())
    .unwrap_or_default();
  let warning_count = state.log_store.warnings(&span_id).len();

  let record = {
    let source_state = state.config_source_mut(&source);
    let mut record = source_state.current_build.take().unwrap_or_else(|| BuildRecord {
      start_time: finish_time,
      ..Default::default()
    });
    record.finish_time = Some(finish_time);
    record.error = result.error.clone();
    record.warning_count = warning_count;

    source_state.consume_changes_before(record.start_time);
    source_state.config_files = result.config_files.clone();
    source_state.add_completed_build(record.clone());
    record
  };

  let new_secrets: SecretSet = result
    .secrets
    .iter()
    .filter(|(value, _)| !state.secrets.contains_key(*value))
    .map(|(value, secret)| (value.clone(), secret.clone()))
    .collect();
  state.secrets.extend(new_secrets.clone());
  state
    .log_store
    .scrub_secrets_starting_at(&new_secrets, checkpoint_at_exec_start);

  if is_main && (!result.team_id.is_empty() || result.error.is_none()) {
    state.team_id = result.team_id.clone();
  }

  if let Some(err) = &result.error {
    warn!(source = %source, error = %err, "config load failed, keeping previous resources");
    if is_main {
      if state.features.is_empty() {
        state.features = result.features;
      } else {
        for (flag, enabled) in result.features {
          if enabled {
            state.features.insert(flag, true);
          }
        }
      }
    }
    return;
  }

  let mut declared = HashSet::new();
  for manifest in result.manifests {
    let manifest = manifest.with_source_config(source.clone());
    let name = manifest.name.clone();

    if let Some(existing) = state.manifest_target(&name)
      && existing.manifest.source_config != source
    {
      let msg = format!(
        "Resource defined in two configs: {}, {}",
        source, existing.manifest.source_config
      );
      error!(manifest = %name, "{}", msg);
      state.log_store.append(&record.span_id, LogLevel::Error, format!("{}\n", msg));
      continue;
    }

    declared.insert(name.clone());
    let target = match state.manifest_target(&name) {
      Some(old) if old.manifest.deploy_type() == manifest.deploy_type() => {
        replace_manifest(old, manifest, finish_time, &record)
      }
      Some(_) => {
        debug!(manifest = %name, "manifest changed kind, starting fresh");
        ManifestTarget::new(manifest)
      }
      None => ManifestTarget::new(manifest),
    };
    state.upsert_manifest_target(target);
  }

  for name in state.manifest_names_from_source(&source) {
    if !declared.contains(&name) {
      info!(manifest = %name, source = %source, "removing resource no longer declared");
      state.remove_manifest_target(&name);
    }
  }

  if is_main {
    state.features = result.features;
    state.telemetry_settings = result.telemetry_settings;
    state.update_settings = result.update_settings;
    state.docker_prune_settings = result.docker_prune_settings;
    state.watch_settings = result.watch_settings;
    state.version_settings = result.version_settings;
    state.analytics_opt = result.analytics_opt;
  }
}

fn replace_manifest(
  old: &ManifestTarget,
  manifest: Manifest,
  finish_time: chrono::DateTime<chrono::Utc>,
  record: &BuildRecord,
) -> ManifestTarget {
  let mut target = old.clone();
  if changes_invalidate_build(&old.manifest, &manifest) {
    debug!(manifest = %manifest.name, "config change invalidates cached builds");
    target.state.reset_build_statuses(&manifest);
    target.state.pending_manifest_change = Some(finish_time);
    target.state.config_files_that_caused_change = record.edits.clone();
  }
  target.manifest = manifest;
  target
}

pub fn handle_build_started(state: &mut EngineState, action: BuildStartedAction) {
  let Some(mt) = state.manifest_target_mut(&action.manifest) else {
    warn!(manifest = %action.manifest, "build started for unknown manifest");
    return;
  };

  if mt.state.is_building() {
    warn!(manifest = %action.manifest, "build started while a previous build is running");
  }

  mt.state.current_build = Some(BuildRecord {
    edits: action.edits,
    build_types: action.build_types,
    ..BuildRecord::started(action.start_time, action.reason, action.span_id)
  });
  mt.state.needs_rebuild_from_crash = false;

  state.remove_from_trigger_queue(&action.manifest);
}

pub fn handle_build_completed(state: &mut EngineState, action: BuildCompletedAction) {
  let warning_count = state.log_store.warnings(&action.span_id).len();
  let Some(mt) = state.manifest_target_mut(&action.manifest) else {
    warn!(manifest = %action.manifest, "build completed for unknown manifest");
    return;
  };

  let mut record = mt.state.current_build.take().unwrap_or_else(|| BuildRecord {
    start_time: action.finish_time,
    span_id: action.span_id.clone(),
    ..Default::default()
  });
  record.finish_time = Some(action.finish_time);
  record.error = action.error;
  record.warning_count = warning_count;

  for status in mt.state.build_statuses.values_mut() {
    status.consume_changes_before(record.start_time);
  }
  if mt
    .state
    .pending_manifest_change
    .is_some_and(|changed| changed <= record.start_time)
  {
    mt.state.pending_manifest_change = None;
    mt.state.config_files_that_caused_change.clear();
  }

  for (id, result) in action.results {
    mt.state.build_status_mut(&id).last_result = Some(result);
  }

  match &record.error {
    Some(err) => warn!(manifest = %action.manifest, error = %err, "build failed"),
    None => info!(
      manifest = %action.manifest,
      duration_ms = record.duration().num_milliseconds(),
      "build completed"
    ),
  }
  mt.state.add_completed_build(record);
}
