//! Shared, lock-guarded engine state.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use tokio::sync::watch;

use super::actions::{Action, ConfigsReloadStartedAction, ConfigsReloadedAction};
use super::reducers::reduce;
use super::state::EngineState;
use crate::build::{BuildReason, SpanId};
use crate::load::ConfigLoadResult;
use crate::manifest::ManifestName;

/// Engine state shared between the runner and its subscribers.
///
/// Mutations go through [`EngineStore::dispatch`] or [`EngineStore::update`]
/// under the write lock; each bumps a change counter subscribers can wait on.
#[derive(Debug, Clone)]
pub struct EngineStore {
  state: Arc<RwLock<EngineState>>,
  changes: Arc<watch::Sender<u64>>,
}

impl Default for EngineStore {
  fn default() -> Self {
    Self::new(EngineState::new())
  }
}

impl EngineStore {
  pub fn new(state: EngineState) -> Self {
    let (changes, _) = watch::channel(0);
    Self {
      state: Arc::new(RwLock::new(state)),
      changes: Arc::new(changes),
    }
  }

  /// A copy of the current state.
  pub fn snapshot(&self) -> EngineState {
    self.read(EngineState::clone)
  }

  pub fn read<R>(&self, f: impl FnOnce(&EngineState) -> R) -> R {
    let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
    f(&state)
  }

  pub fn update<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
    let result = {
      let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
      f(&mut state)
    };
    self.changes.send_modify(|n| *n += 1);
    result
  }

  pub fn dispatch(&self, action: Action) {
    self.update(|state| reduce(state, action));
  }

  /// Folds a first evaluation of `source` into the state, then disables
  /// every loaded manifest the result does not enable.
  pub fn load_config(&self, source: ManifestName, result: ConfigLoadResult) {
    let disabled: Vec<ManifestName> = result
      .manifests
      .iter()
      .map(|m| m.name.clone())
      .filter(|name| !result.is_enabled(name))
      .collect();

    let checkpoint = self.read(|state| state.log_store.checkpoint());
    self.dispatch(Action::ConfigsReloadStarted(ConfigsReloadStartedAction {
      source: source.clone(),
      start_time: Utc::now(),
      reason: BuildReason::INIT,
      edits: Vec::new(),
      span_id: SpanId::new(format!("config:{}", source)),
    }));
    self.dispatch(Action::ConfigsReloaded(Box::new(ConfigsReloadedAction {
      source,
      result,
      finish_time: Utc::now(),
      checkpoint_at_exec_start: checkpoint,
    })));
    for manifest in disabled {
      self.dispatch(Action::ManifestDisableChanged {
        manifest,
        disabled: true,
      });
    }
  }

  /// Receives the change counter after every mutation.
  pub fn subscribe(&self) -> watch::Receiver<u64> {
    self.changes.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn dispatch_notifies_subscribers() {
    let store = EngineStore::default();
    let mut changes = store.subscribe();

    store.dispatch(Action::ManifestTriggered(ManifestName::from("missing")));
    changes.changed().await.unwrap();
    assert_eq!(*changes.borrow_and_update(), 1);

    let count = store.update(|state| {
      state.team_id = "team".to_string();
      state.manifest_names().len()
    });
    assert_eq!(count, 0);
    assert_eq!(store.snapshot().team_id, "team");
    assert_eq!(*changes.borrow(), 2);
  }

  #[test]
  fn load_config_disables_manifests_not_enabled() {
    use crate::manifest::{Cmd, DeployTarget, LocalTarget, Manifest};

    let local = |name: &str| {
      Manifest::new(name).with_deploy_target(DeployTarget::Local(LocalTarget::new(Cmd::shell("true"))))
    };
    let store = EngineStore::default();
    store.load_config(
      ManifestName::main_config(),
      ConfigLoadResult {
        manifests: vec![local("lint"), local("test")],
        enabled_manifests: vec![ManifestName::from("lint")],
        ..Default::default()
      },
    );

    let state = store.snapshot();
    assert_eq!(state.manifest_names(), &[ManifestName::from("lint"), ManifestName::from("test")]);
    assert!(!state.is_config_reloading());
    let disabled = |name: &str| state.manifest_target(&ManifestName::from(name)).unwrap().state.disabled;
    assert!(!disabled("lint"));
    assert!(disabled("test"));
  }

  #[test]
  fn clones_share_state() {
    let store = EngineStore::default();
    let other = store.clone();
    other.update(|state| state.team_id = "shared".to_string());
    assert_eq!(store.read(|state| state.team_id.clone()), "shared");
  }
}
