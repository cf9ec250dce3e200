//! Turns finished builds in the engine state into stored metrics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, warn};

use super::store::{InsightsError, InsightsStore};
use super::types::BuildMetric;
use crate::build::{BuildRecord, BuildType};
use crate::engine::{EngineState, EngineStore, ManifestTarget};
use crate::exec::CancelSignal;
use crate::manifest::ManifestName;

/// Records each finished build exactly once.
#[derive(Debug)]
pub struct Collector<S> {
  store: Arc<S>,
  last_recorded: Mutex<HashMap<ManifestName, DateTime<Utc>>>,
}

impl<S: InsightsStore + 'static> Collector<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self {
      store,
      last_recorded: Mutex::new(HashMap::new()),
    }
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  /// Records the newest finished build of every manifest not seen before.
  ///
  /// Store errors are logged, not returned. Returns how many builds were
  /// recorded.
  pub fn on_change(&self, state: &EngineState) -> usize {
    let mut last_recorded = self.last_recorded.lock().unwrap_or_else(PoisonError::into_inner);
    let mut recorded = 0;

    for mt in state.targets() {
      let Some(record) = mt.state.build_history.last() else {
        continue;
      };
      let Some(finish) = record.finish_time else {
        continue;
      };
      let name = mt.name();
      if last_recorded.get(name) == Some(&finish) {
        continue;
      }
      last_recorded.insert(name.clone(), finish);

      let metric = build_record_to_metric(mt, record, finish);
      debug!(resource = %name, success = metric.success, duration_ms = metric.duration_ms, "recording build");
      match self.store.record_build(metric) {
        Ok(()) => recorded += 1,
        Err(e) => warn!(resource = %name, error = %e, "failed to record build metric"),
      }
    }
    recorded
  }

  /// Follows the engine store until `stop` fires, recording builds after
  /// every state change.
  pub fn watch(self: Arc<Self>, engine: EngineStore, mut stop: CancelSignal) -> JoinHandle<()> {
    let mut changes = engine.subscribe();
    tokio::spawn(
      async move {
        loop {
          tokio::select! {
            changed = changes.changed() => {
              if changed.is_err() {
                break;
              }
              engine.read(|state| self.on_change(state));
            }
            () = stop.cancelled() => break,
          }
        }
        engine.read(|state| self.on_change(state));
      }
      .in_current_span(),
    )
  }

  /// # Errors
  ///
  /// Returns an error if the store cannot persist its metrics.
  pub fn close(&self) -> Result<(), InsightsError> {
    self.store.close()
  }
}

fn build_record_to_metric(mt: &ManifestTarget, record: &BuildRecord, finish: DateTime<Utc>) -> BuildMetric {
  let results = mt.state.build_statuses.values().filter_map(|s| s.last_result.as_ref());
  let (cache_hit, image_size) = results.fold((false, 0u64), |(hit, size), r| {
    (hit || r.cache_hit, size + r.image_size)
  });

  BuildMetric {
    build_id: String::new(),
    manifest_name: mt.name().clone(),
    build_types: record.build_types.clone(),
    start_time: record.start_time,
    finish_time: finish,
    duration_ms: (finish - record.start_time).num_milliseconds(),
    success: record.error.is_none(),
    error_message: record.error.clone(),
    warning_count: record.warning_count,
    reason: record.reason,
    cache_hit,
    image_size,
    live_update: record.build_types.contains(&BuildType::LiveUpdate),
    files_changed: record.edits.len(),
  }
}
