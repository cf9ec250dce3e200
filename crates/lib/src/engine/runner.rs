//! Drives builds of the resources in engine state.
//!
//! The runner repeatedly asks build control for the next manifest to build,
//! runs up to `parallelism` builds at once, folds their start and completion
//! into the [`EngineStore`], and starts serve commands of local resources
//! once their update command succeeds.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::actions::{Action, BuildCompletedAction, BuildStartedAction};
use super::logstore::LogLevel;
use super::store::EngineStore;
use crate::build::{BuildReason, BuildResult, BuildType, Hold, SpanId, TargetBuildStatus, TargetQueue, next_target_to_build};
use crate::consts::{DEFAULT_MAX_PARALLEL_UPDATES, SERVE_GRACE_PERIOD};
use crate::exec::{CancelSignal, Canceller, Execer, LocalBuilder, ServeProcess};
use crate::manifest::{Cmd, DeployTarget, Manifest, ManifestName, Target};
use crate::target::TargetId;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
  /// Upper bound on concurrent builds. The engine's `max_parallel_updates`
  /// setting also applies.
  pub parallelism: usize,
  /// Start serve commands after successful builds.
  pub serve: bool,
  pub serve_grace_period: Duration,
}

impl Default for RunnerConfig {
  fn default() -> Self {
    Self {
      parallelism: DEFAULT_MAX_PARALLEL_UPDATES,
      serve: true,
      serve_grace_period: SERVE_GRACE_PERIOD,
    }
  }
}

/// What happened during one [`Runner::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
  pub succeeded: Vec<ManifestName>,
  pub failed: Vec<(ManifestName, String)>,
  /// Manifests still held when the run went idle.
  pub held: Vec<(ManifestName, Hold)>,
  /// Manifests that never started a build.
  pub unbuilt: Vec<ManifestName>,
  /// Serve commands that exited on their own, with their exit codes.
  pub serve_exits: Vec<(ManifestName, i32)>,
  pub cancelled: bool,
}

impl RunSummary {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && !self.cancelled
  }
}

#[derive(Debug)]
struct BuildOutcome {
  manifest: ManifestName,
  span_id: SpanId,
  results: BTreeMap<TargetId, BuildResult>,
  error: Option<String>,
  serve_cmd: Option<Cmd>,
}

#[derive(Debug)]
struct ServeExit {
  manifest: ManifestName,
  exit: Result<i32, String>,
  stopped: bool,
}

/// Everything a build task needs, captured under the read lock.
struct BuildPlan {
  manifest: Manifest,
  statuses: BTreeMap<TargetId, TargetBuildStatus>,
  started: BuildStartedAction,
}

pub struct Runner<E> {
  store: EngineStore,
  execer: Arc<E>,
  config: RunnerConfig,
  canceller: Canceller,
}

impl<E: Execer + 'static> Runner<E> {
  pub fn new(store: EngineStore, execer: E, config: RunnerConfig) -> Self {
    Self {
      store,
      execer: Arc::new(execer),
      config,
      canceller: Canceller::new(),
    }
  }

  pub fn store(&self) -> &EngineStore {
    &self.store
  }

  pub fn execer(&self) -> &E {
    &self.execer
  }

  /// Cancelling kills running builds and stops serve commands.
  pub fn canceller(&self) -> Canceller {
    self.canceller.clone()
  }

  fn parallelism(&self) -> usize {
    let max_parallel = self.store.read(|state| state.update_settings.max_parallel_updates);
    self.config.parallelism.min(max_parallel).max(1)
  }

  /// Builds until nothing is left to build and every serve command has
  /// exited, or until cancelled.
  pub async fn run(&self) -> RunSummary {
    let mut builds: JoinSet<BuildOutcome> = JoinSet::new();
    let mut serves: JoinSet<ServeExit> = JoinSet::new();
    let mut serving: HashMap<ManifestName, Canceller> = HashMap::new();
    let mut summary = RunSummary::default();
    let mut cancel = self.canceller.signal();
    let mut build_count = 0u64;

    loop {
      let cancelled = cancel.is_cancelled();
      if !cancelled {
        while builds.len() < self.parallelism() {
          let (next, _) = self.store.read(next_target_to_build);
          let Some(name) = next else {
            break;
          };
          build_count += 1;
          if !self.start_build(&mut builds, &name, build_count) {
            break;
          }
        }
      }

      if builds.is_empty() && serves.is_empty() {
        break;
      }

      tokio::select! {
        Some(joined) = builds.join_next(), if !builds.is_empty() => match joined {
          Ok(outcome) => {
            if let Some((name, cmd)) = self.finish_build(outcome, &mut summary) {
              self.start_serve(&mut serves, &mut serving, name, cmd);
            }
          }
          Err(e) => error!(error = %e, "build task failed"),
        },
        Some(joined) = serves.join_next(), if !serves.is_empty() => match joined {
          Ok(exit) => handle_serve_exit(exit, &mut serving, &mut summary),
          Err(e) => error!(error = %e, "serve task failed"),
        },
        () = cancel.cancelled(), if !cancelled => {
          info!(builds = builds.len(), serves = serving.len(), "cancelling");
          summary.cancelled = true;
          for stop in serving.values() {
            stop.cancel();
          }
        }
        else => break,
      }
    }

    self.store.read(|state| {
      let (_, holds) = next_target_to_build(state);
      summary.held = holds.iter().map(|(name, hold)| (name.clone(), hold.clone())).collect();
      summary.unbuilt = state
        .targets()
        .into_iter()
        .filter(|mt| !mt.state.started_first_build())
        .map(|mt| mt.name().clone())
        .collect();
    });
    summary
  }

  fn plan_build(&self, name: &ManifestName, build_count: u64) -> Option<BuildPlan> {
    self.store.read(|state| {
      let mt = state.manifest_target(name)?;
      let edits: Vec<PathBuf> = mt
        .state
        .build_statuses
        .values()
        .flat_map(|s| s.pending_file_changes.keys().cloned())
        .collect();
      let mut reason = mt.state.next_build_reason();
      if state.trigger_queue.contains(name) {
        reason |= BuildReason::TRIGGER;
      }
      Some(BuildPlan {
        manifest: mt.manifest.clone(),
        statuses: mt.state.build_statuses.clone(),
        started: BuildStartedAction {
          manifest: name.clone(),
          start_time: Utc::now(),
          reason,
          edits,
          span_id: SpanId::new(format!("build:{}:{}", name, build_count)),
          build_types: build_types(&mt.manifest),
        },
      })
    })
  }

  fn start_build(&self, builds: &mut JoinSet<BuildOutcome>, name: &ManifestName, build_count: u64) -> bool {
    let Some(plan) = self.plan_build(name, build_count) else {
      warn!(manifest = %name, "next build names an unknown manifest");
      return false;
    };
    let BuildPlan {
      manifest,
      statuses,
      started,
    } = plan;

    info!(manifest = %name, reason = %started.reason, "starting build");
    let span_id = started.span_id.clone();
    let reason = started.reason;
    self.store.dispatch(Action::Log {
      span_id: span_id.clone(),
      level: LogLevel::Info,
      text: format!("Building {} ({})\n", name, started.reason),
    });
    self.store.dispatch(Action::BuildStarted(started));

    let builder = LocalBuilder::new(self.execer.clone(), self.canceller.signal());
    let span = info_span!("build", manifest = %name);
    builds.spawn(
      async move {
        let serve_cmd = manifest
          .local_target()
          .filter(|local| !local.serve_cmd.is_empty())
          .map(|local| {
            let mut cmd = local.serve_cmd.clone();
            if cmd.dir.as_os_str().is_empty() {
              cmd.dir = local.workdir.clone();
            }
            cmd
          });

        let (results, error) = match TargetQueue::new(&manifest.target_specs(), &statuses, reason) {
          Ok(mut queue) => {
            let built = queue.run_builds(&builder).await;
            let results = queue.all_results().clone();
            (results, built.err().map(|e| e.to_string()))
          }
          Err(e) => (BTreeMap::new(), Some(e.to_string())),
        };

        BuildOutcome {
          manifest: manifest.name,
          span_id,
          results,
          error,
          serve_cmd,
        }
      }
      .instrument(span),
    );
    true
  }

  /// Folds a finished build into state, returning the serve command to start.
  fn finish_build(&self, outcome: BuildOutcome, summary: &mut RunSummary) -> Option<(ManifestName, Cmd)> {
    let BuildOutcome {
      manifest,
      span_id,
      results,
      error,
      serve_cmd,
    } = outcome;

    if let Some(err) = &error {
      self.store.dispatch(Action::Log {
        span_id: span_id.clone(),
        level: LogLevel::Error,
        text: format!("{}\n", err),
      });
    }
    self.store.dispatch(Action::BuildCompleted(BuildCompletedAction {
      manifest: manifest.clone(),
      span_id,
      finish_time: Utc::now(),
      results,
      error: error.clone(),
    }));

    match error {
      Some(err) => {
        summary.failed.push((manifest, err));
        None
      }
      None => {
        summary.succeeded.push(manifest.clone());
        let cmd = serve_cmd.filter(|_| self.config.serve && !self.canceller.is_cancelled())?;
        Some((manifest, cmd))
      }
    }
  }

  fn start_serve(
    &self,
    serves: &mut JoinSet<ServeExit>,
    serving: &mut HashMap<ManifestName, Canceller>,
    name: ManifestName,
    cmd: Cmd,
  ) {
    if let Some(previous) = serving.remove(&name) {
      debug!(manifest = %name, "restarting serve command");
      previous.cancel();
    }
    let stop = Canceller::new();
    serving.insert(name.clone(), stop.clone());

    let grace = self.config.serve_grace_period;
    let span = info_span!("serve", manifest = %name);
    serves.spawn(supervise(name, cmd, stop.signal(), grace).instrument(span));
  }
}

async fn supervise(manifest: ManifestName, cmd: Cmd, mut stop: CancelSignal, grace: Duration) -> ServeExit {
  let mut process = match ServeProcess::start(manifest.as_str(), &cmd) {
    Ok(process) => process,
    Err(e) => {
      return ServeExit {
        manifest,
        exit: Err(e.to_string()),
        stopped: false,
      };
    }
  };

  tokio::select! {
    exit = process.wait() => ServeExit {
      manifest,
      exit: exit.map_err(|e| e.to_string()),
      stopped: false,
    },
    () = stop.cancelled() => ServeExit {
      manifest,
      exit: process.stop(grace).await.map_err(|e| e.to_string()),
      stopped: true,
    },
  }
}

fn handle_serve_exit(exit: ServeExit, serving: &mut HashMap<ManifestName, Canceller>, summary: &mut RunSummary) {
  let ServeExit {
    manifest,
    exit,
    stopped,
  } = exit;
  if stopped {
    debug!(manifest = %manifest, "serve command stopped");
    return;
  }
  serving.remove(&manifest);
  match exit {
    Ok(code) => {
      info!(manifest = %manifest, exit_code = code, "serve command exited");
      summary.serve_exits.push((manifest, code));
    }
    Err(e) => {
      warn!(manifest = %manifest, error = %e, "serve command failed");
      summary.serve_exits.push((manifest, -1));
    }
  }
}

fn build_types(manifest: &Manifest) -> Vec<BuildType> {
  manifest
    .target_specs()
    .iter()
    .filter_map(|target| match target {
      Target::Image(_) => Some(BuildType::Image),
      Target::Deploy(DeployTarget::Local(_)) => Some(BuildType::Local),
      Target::Deploy(DeployTarget::K8s(_)) => Some(BuildType::K8s),
      Target::Deploy(DeployTarget::DockerCompose(_)) => Some(BuildType::DockerCompose),
      Target::Deploy(DeployTarget::None) => None,
    })
    .collect()
}
