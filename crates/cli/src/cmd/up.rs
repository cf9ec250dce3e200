//! Implementation of the `devloop up` command.
//!
//! Folds the configuration into engine state, reconciles its generated
//! objects, then builds every resource the build-control rules allow. Serve
//! commands keep running until they exit or Ctrl-C stops them. Finished
//! builds are recorded in build insights.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use devloop_lib::engine::{EngineStore, RunSummary, Runner, RunnerConfig};
use devloop_lib::exec::{Canceller, ProcessExecer};
use devloop_lib::insights::{Collector, FileStore};
use devloop_lib::manifest::ManifestName;
use devloop_lib::object::MemoryObjectStore;
use devloop_lib::reconcile::{ConfigParent, update_owned_objects};

use crate::output::{print_failure, print_info, print_success, print_warning};

pub struct UpArgs {
  pub config: PathBuf,
  pub parallelism: Option<usize>,
  pub serve: bool,
}

pub fn cmd_up(args: UpArgs) -> Result<()> {
  let result = super::load_config(&args.config)?;
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let summary = rt.block_on(run(args, result))?;

  print_summary(&summary);
  if summary.cancelled {
    bail!("Interrupted");
  }
  if !summary.is_success() {
    bail!("{} resource(s) failed to build", summary.failed.len());
  }
  Ok(())
}

async fn run(args: UpArgs, result: devloop_lib::load::ConfigLoadResult) -> Result<RunSummary> {
  let source = ManifestName::main_config();
  let parent = ConfigParent::new(source.clone(), &args.config);
  let objects = MemoryObjectStore::new();
  let reconciled = update_owned_objects(&objects, &parent, Some(&result), true)
    .await
    .context("Failed to reconcile generated objects")?;
  debug!(created = reconciled.created.len(), "generated objects");

  let engine = EngineStore::default();
  engine.load_config(source, result);

  let mut config = RunnerConfig {
    serve: args.serve,
    ..Default::default()
  };
  if let Some(parallelism) = args.parallelism {
    config.parallelism = parallelism;
  }
  let runner = Runner::new(engine.clone(), ProcessExecer::new(), config);

  let canceller = runner.canceller();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("interrupt received, cancelling");
      canceller.cancel();
    }
  });

  let collector = match FileStore::open_default() {
    Ok(store) => Some(Arc::new(Collector::new(Arc::new(store)))),
    Err(e) => {
      print_warning(&format!("Build insights disabled: {}", e));
      None
    }
  };
  let stop_collector = Canceller::new();
  let watcher = collector
    .clone()
    .map(|c| c.watch(engine.clone(), stop_collector.signal()));

  let summary = runner.run().await;

  stop_collector.cancel();
  if let Some(watcher) = watcher
    && let Err(e) = watcher.await
  {
    warn!(error = %e, "insights collector stopped unexpectedly");
  }
  if let Some(collector) = collector
    && let Err(e) = collector.close()
  {
    print_warning(&format!("Failed to save build insights: {}", e));
  }

  Ok(summary)
}

fn print_summary(summary: &RunSummary) {
  println!();
  for name in &summary.succeeded {
    print_success(&format!("{} built", name));
  }
  for (name, error) in &summary.failed {
    print_failure(&format!("{}: {}", name, error));
  }
  for (name, code) in &summary.serve_exits {
    print_warning(&format!("{} serve command exited with status {}", name, code));
  }
  for (name, hold) in &summary.held {
    print_info(&format!("{}: {}", name, hold));
  }
  for name in &summary.unbuilt {
    if !summary.held.iter().any(|(held, _)| held == name) {
      print_info(&format!("{}: not built", name));
    }
  }
}
