//! Picks the next manifest to build from an engine state snapshot.
//!
//! Every manifest that is not chosen and cannot be built right now gets a
//! [`Hold`] explaining why, so callers can surface it.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};

use crate::engine::{EngineState, ManifestTarget};
use crate::manifest::ManifestName;
use crate::target::{TargetId, TargetSpec, TargetType};

/// Why a manifest is not eligible to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hold {
  /// A config source is reloading; its result may change every manifest.
  ConfigReload,
  /// A local target that cannot run alongside others is building, or would be.
  IsUnparallelizableTarget,
  /// The manifest, or a target it shares with another manifest, is building.
  BuildingComponent,
  /// Resource dependencies have not built successfully yet.
  WaitingForDep { deps: Vec<ManifestName> },
  Disabled,
}

impl fmt::Display for Hold {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Hold::ConfigReload => write!(f, "waiting for config reload"),
      Hold::IsUnparallelizableTarget => write!(f, "waiting for unparallelizable target"),
      Hold::BuildingComponent => write!(f, "waiting for a shared target to finish building"),
      Hold::WaitingForDep { deps } => {
        let names: Vec<&str> = deps.iter().map(ManifestName::as_str).collect();
        write!(f, "waiting for dependencies: {}", names.join(", "))
      }
      Hold::Disabled => write!(f, "disabled"),
    }
  }
}

/// Holds keyed by manifest. The first hold recorded for a manifest wins.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HoldSet(BTreeMap<ManifestName, Hold>);

impl HoldSet {
  pub fn add(&mut self, name: &ManifestName, hold: Hold) {
    self.0.entry(name.clone()).or_insert(hold);
  }

  fn fill(&mut self, targets: &[&ManifestTarget], hold: Hold) {
    for mt in targets {
      self.add(mt.name(), hold.clone());
    }
  }

  pub fn get(&self, name: &ManifestName) -> Option<&Hold> {
    self.0.get(name)
  }

  pub fn contains(&self, name: &ManifestName) -> bool {
    self.0.contains_key(name)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&ManifestName, &Hold)> {
    self.0.iter()
  }
}

/// Chooses the manifest to build next, if any.
///
/// Priority, after holds are applied: manifests that never built and build
/// on startup (local resources first), then crash rebuilds, then the manual
/// trigger queue, then the auto-on-change manifest with the earliest
/// pending change.
pub fn next_target_to_build(state: &EngineState) -> (Option<ManifestName>, HoldSet) {
  let mut holds = HoldSet::default();
  let targets = state.targets();

  if state.is_config_reloading() {
    holds.fill(&targets, Hold::ConfigReload);
    return (None, holds);
  }

  if targets.iter().any(|mt| mt.state.is_building() && is_unparallelizable(mt)) {
    holds.fill(&targets, Hold::IsUnparallelizableTarget);
    return (None, holds);
  }

  for mt in &targets {
    if mt.state.disabled {
      holds.add(mt.name(), Hold::Disabled);
    }
  }

  if targets.iter().any(|mt| mt.state.is_building()) {
    for mt in targets.iter().filter(|mt| is_unparallelizable(mt)) {
      holds.add(mt.name(), Hold::IsUnparallelizableTarget);
    }
  }

  hold_targets_with_building_components(&targets, &mut holds);
  hold_targets_waiting_on_dependencies(state, &targets, &mut holds);

  let eligible: Vec<&ManifestTarget> = targets.into_iter().filter(|mt| !holds.contains(mt.name())).collect();

  let unbuilt: Vec<&ManifestTarget> = eligible
    .iter()
    .copied()
    .filter(|mt| !mt.state.started_first_build() && mt.manifest.trigger_mode.auto_initial())
    .collect();
  if let Some(mt) = next_unbuilt_target(&unbuilt) {
    return (Some(mt.name().clone()), holds);
  }

  if let Some(mt) = eligible.iter().find(|mt| mt.state.needs_rebuild_from_crash) {
    return (Some(mt.name().clone()), holds);
  }

  let eligible_names: HashSet<&ManifestName> = eligible.iter().map(|mt| mt.name()).collect();
  if let Some(name) = state.trigger_queue.iter().find(|name| eligible_names.contains(name)) {
    return (Some(name.clone()), holds);
  }

  let next = earliest_pending_auto_trigger_target(&eligible).map(|mt| mt.name().clone());
  (next, holds)
}

fn is_unparallelizable(mt: &ManifestTarget) -> bool {
  mt.manifest.local_target().is_some_and(|local| !local.allow_parallel)
}

/// Local resources go first since cluster resources may pull in what they
/// write, then deploy-only k8s resources, then definition order.
fn next_unbuilt_target<'a>(unbuilt: &[&'a ManifestTarget]) -> Option<&'a ManifestTarget> {
  unbuilt
    .iter()
    .find(|mt| mt.manifest.is_local())
    .or_else(|| {
      unbuilt
        .iter()
        .find(|mt| mt.manifest.is_k8s() && mt.manifest.image_targets.is_empty())
    })
    .or_else(|| unbuilt.first())
    .copied()
}

/// An image target whose last result is still valid can be shared by two
/// manifests building at once.
fn reusable_image(mt: &ManifestTarget, id: &TargetId) -> bool {
  id.target_type == TargetType::Image
    && mt
      .state
      .build_status(id)
      .is_some_and(|s| s.last_result.is_some() && !s.has_pending_changes())
}

fn hold_targets_with_building_components(targets: &[&ManifestTarget], holds: &mut HoldSet) {
  let mut building = HashSet::new();
  for mt in targets.iter().filter(|mt| mt.state.is_building()) {
    building.insert(mt.manifest.name.target_id());
    for spec in mt.manifest.target_specs() {
      let id = spec.id();
      if !reusable_image(mt, &id) {
        building.insert(id);
      }
    }
  }

  for mt in targets {
    let shares_building = building.contains(&mt.manifest.name.target_id())
      || mt.manifest.target_specs().iter().any(|spec| {
        let id = spec.id();
        !reusable_image(mt, &id) && building.contains(&id)
      });
    if shares_building {
      holds.add(mt.name(), Hold::BuildingComponent);
    }
  }
}

/// Dependencies only gate the first build of a manifest.
fn hold_targets_waiting_on_dependencies(state: &EngineState, targets: &[&ManifestTarget], holds: &mut HoldSet) {
  for mt in targets {
    if mt.state.started_first_build() {
      continue;
    }
    let waiting: Vec<ManifestName> = mt
      .manifest
      .resource_dependencies
      .iter()
      .filter(|dep| !state.manifest_target(dep).is_some_and(|d| d.state.is_ready()))
      .cloned()
      .collect();
    if !waiting.is_empty() {
      holds.add(mt.name(), Hold::WaitingForDep { deps: waiting });
    }
  }
}

/// Manual manifests are skipped; they build through the trigger queue.
/// Ties go to the first manifest in definition order.
fn earliest_pending_auto_trigger_target<'a>(targets: &[&'a ManifestTarget]) -> Option<&'a ManifestTarget> {
  let mut choice: Option<(&ManifestTarget, DateTime<Utc>)> = None;
  for mt in targets {
    if !mt.manifest.trigger_mode.auto_on_change() {
      continue;
    }
    let Some(changed) = mt.state.earliest_pending_change() else {
      continue;
    };
    if choice.is_none_or(|(_, earliest)| changed < earliest) {
      choice = Some((mt, changed));
    }
  }
  choice.map(|(mt, _)| mt)
}
