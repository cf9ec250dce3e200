//! Walks the targets of one manifest in dependency order, rebuilding the
//! dirty ones and reusing the previous result of the clean ones.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::future::Future;

use tracing::debug;

use super::reason::BuildReason;
use super::status::{BuildResult, TargetBuildStatus};
use crate::manifest::Target;
use crate::target::{TargetError, TargetGraph, TargetId, TargetSpec};

/// Builds one target given the results of its dependencies.
pub trait TargetBuilder {
  type Error;

  fn build(
    &self,
    target: &Target,
    dep_results: Vec<BuildResult>,
  ) -> impl Future<Output = Result<BuildResult, Self::Error>> + Send;
}

#[derive(Debug)]
pub struct TargetQueue {
  graph: TargetGraph,
  targets: HashMap<TargetId, Target>,
  results: BTreeMap<TargetId, BuildResult>,
  /// Targets with no previous result, with pending changes, or forced by the
  /// build reason.
  needs_own_build: HashSet<TargetId>,
  /// Targets depending, transitively, on something that rebuilds.
  deps_need_build: HashSet<TargetId>,
}

impl TargetQueue {
  /// Plans a build of `targets` started for `reason`.
  ///
  /// A manual trigger, or a crash combined with other reasons, rebuilds every
  /// target. A crash-only rebuild redeploys and reuses the results of clean
  /// images.
  ///
  /// # Errors
  ///
  /// Returns an error if the targets contain a cycle or a dangling dependency.
  pub fn new(
    targets: &[Target],
    statuses: &BTreeMap<TargetId, TargetBuildStatus>,
    reason: BuildReason,
  ) -> Result<Self, TargetError> {
    let graph = TargetGraph::new(targets)?;
    let targets: HashMap<TargetId, Target> = targets.iter().map(|t| (t.id(), t.clone())).collect();

    let force_all = reason.has(BuildReason::TRIGGER) || (reason.has(BuildReason::CRASH) && !reason.is_crash_only());
    let force_deploy = reason.is_crash_only();

    let needs_own_build: HashSet<TargetId> = graph
      .ids()
      .iter()
      .filter(|id| {
        let forced = force_all || (force_deploy && matches!(targets.get(*id), Some(Target::Deploy(_))));
        forced
          || statuses
            .get(*id)
            .is_none_or(|s| s.last_result.is_none() || s.has_pending_changes())
      })
      .cloned()
      .collect();

    let mut deps_need_build = HashSet::new();
    let mut pending: VecDeque<TargetId> = needs_own_build.iter().cloned().collect();
    while let Some(id) = pending.pop_front() {
      for dependent in graph.reverse_deps_of(&id) {
        if !needs_own_build.contains(&dependent) && deps_need_build.insert(dependent.clone()) {
          pending.push_back(dependent);
        }
      }
    }

    let mut queue = Self {
      graph,
      targets,
      results: BTreeMap::new(),
      needs_own_build,
      deps_need_build,
    };
    for id in queue.graph.ids() {
      if !queue.is_building(id)
        && let Some(result) = statuses.get(id).and_then(|s| s.last_result.clone())
      {
        queue.results.insert(id.clone(), result);
      }
    }
    Ok(queue)
  }

  pub fn is_building(&self, id: &TargetId) -> bool {
    self.needs_own_build.contains(id) || self.deps_need_build.contains(id)
  }

  pub fn count_builds(&self) -> usize {
    self.graph.ids().iter().filter(|id| self.is_building(id)).count()
  }

  /// Builds every dirty target wave by wave, stopping at the first failure.
  ///
  /// # Errors
  ///
  /// Returns the first error reported by `builder`.
  pub async fn run_builds<B>(&mut self, builder: &B) -> Result<(), B::Error>
  where
    B: TargetBuilder + Sync,
  {
    for (wave, ids) in self.graph.build_waves().into_iter().enumerate() {
      for id in ids {
        if !self.is_building(&id) {
          debug!(target = %id, "reusing previous result");
          continue;
        }
        let Some(target) = self.targets.get(&id) else {
          continue;
        };
        let dep_results = self
          .graph
          .deps_of(&id)
          .iter()
          .filter_map(|dep| self.results.get(dep).cloned())
          .collect();
        debug!(target = %id, wave, "building target");
        let result = builder.build(target, dep_results).await?;
        self.results.insert(id, result);
      }
    }
    Ok(())
  }

  /// Results produced by this queue's builds.
  pub fn new_results(&self) -> BTreeMap<TargetId, BuildResult> {
    self
      .results
      .iter()
      .filter(|(id, _)| self.is_building(id))
      .map(|(id, r)| (id.clone(), r.clone()))
      .collect()
  }

  /// Results carried over from earlier builds.
  pub fn reused_results(&self) -> BTreeMap<TargetId, BuildResult> {
    self
      .results
      .iter()
      .filter(|(id, _)| !self.is_building(id))
      .map(|(id, r)| (id.clone(), r.clone()))
      .collect()
  }

  pub fn all_results(&self) -> &BTreeMap<TargetId, BuildResult> {
    &self.results
  }
}
