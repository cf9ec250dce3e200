//! Recording builds driven by the runner into build insights.

use std::sync::Arc;

use chrono::{Duration, Utc};
use devloop_lib::exec::{Canceller, FakeExecer};
use devloop_lib::insights::{Collector, FileStore, InsightsStore, StreakType};
use devloop_lib::manifest::ManifestName;
use tempfile::TempDir;

use super::common::{engine_for, local, runner, write_config};

#[tokio::test]
async fn runner_builds_are_recorded_and_persisted() {
  let dir = TempDir::new().unwrap();
  let path = write_config(
    &dir,
    serde_json::json!({ "manifests": [local("lint", &["make", "lint"]), local("test", &["make", "test"])] }),
  );
  let execer = FakeExecer::new();
  execer.register_command("make test", 1, "", "1 test failed");
  let engine = engine_for(&path);
  let runner = runner(engine.clone(), execer);

  let metrics_path = dir.path().join("data").join("insights.json");
  let collector = Collector::new(Arc::new(FileStore::open(&metrics_path).unwrap()));
  runner.run().await;
  assert_eq!(engine.read(|state| collector.on_change(state)), 2);
  assert_eq!(engine.read(|state| collector.on_change(state)), 0);
  collector.close().unwrap();

  let reopened = FileStore::open(&metrics_path).unwrap();
  let since = Utc::now() - Duration::hours(1);
  let insights = reopened.insights(since).unwrap();
  assert_eq!(insights.session.total_builds, 2);
  assert_eq!(insights.session.successful_builds, 1);
  assert_eq!(insights.session.failed_builds, 1);
  assert_eq!(insights.most_failed_resources[0].manifest_name, ManifestName::from("test"));

  let failed = reopened.build_history(&ManifestName::from("test"), since).unwrap();
  assert_eq!(failed.len(), 1);
  assert!(!failed[0].success);
  assert!(failed[0].error_message.is_some());
  assert!(!failed[0].build_id.is_empty());
}

#[tokio::test]
async fn watcher_records_builds_until_stopped() {
  let dir = TempDir::new().unwrap();
  let path = write_config(&dir, serde_json::json!({ "manifests": [local("lint", &["make", "lint"])] }));
  let engine = engine_for(&path);
  let runner = runner(engine.clone(), FakeExecer::new());

  let store = Arc::new(FileStore::open(dir.path().join("insights.json")).unwrap());
  let collector = Arc::new(Collector::new(store.clone()));
  let stop = Canceller::new();
  let watcher = collector.clone().watch(engine, stop.signal());

  assert!(runner.run().await.is_success());
  stop.cancel();
  watcher.await.unwrap();

  let stats = store.resource_stats(&ManifestName::from("lint")).unwrap();
  assert_eq!(stats.total_builds, 1);
  assert_eq!(stats.success_rate, 100.0);

  let insights = store.insights(Utc::now() - Duration::hours(1)).unwrap();
  assert_eq!(insights.session.current_streak, 1);
  assert_eq!(insights.session.streak_type, Some(StreakType::Success));
}
