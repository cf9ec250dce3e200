//! Loading a config file into the engine and driving builds from it.

use chrono::Utc;
use devloop_lib::build::BuildReason;
use devloop_lib::engine::Action;
use devloop_lib::exec::FakeExecer;
use devloop_lib::manifest::ManifestName;
use tempfile::TempDir;

use super::common::{engine_for, local, runner, write_config};

#[tokio::test]
async fn builds_resources_from_a_config_file_in_dependency_order() {
  let dir = TempDir::new().unwrap();
  let mut test = local("test", &["make", "test"]);
  test["resource_dependencies"] = serde_json::json!(["lint"]);
  let path = write_config(
    &dir,
    serde_json::json!({ "manifests": [test, local("lint", &["make", "lint"])] }),
  );

  let store = engine_for(&path);
  let runner = runner(store.clone(), FakeExecer::new());
  let summary = runner.run().await;

  assert!(summary.is_success(), "{:?}", summary);
  let cmds: Vec<String> = runner.execer().calls().iter().map(|c| c.cmd.to_string()).collect();
  assert_eq!(cmds, vec!["make lint", "make test"]);

  let base = dunce::canonicalize(dir.path()).unwrap();
  assert!(runner.execer().calls().iter().all(|c| c.cmd.dir == base));

  let state = store.snapshot();
  for name in ["lint", "test"] {
    let ms = &state.manifest_target(&ManifestName::from(name)).unwrap().state;
    assert!(ms.is_ready());
    assert_eq!(ms.last_build().unwrap().reason, BuildReason::INIT);
  }
}

#[tokio::test]
async fn file_change_rebuilds_only_the_changed_resource() {
  let dir = TempDir::new().unwrap();
  let path = write_config(
    &dir,
    serde_json::json!({ "manifests": [local("lint", &["make", "lint"]), local("test", &["make", "test"])] }),
  );
  let store = engine_for(&path);
  let runner = runner(store.clone(), FakeExecer::new());
  assert!(runner.run().await.is_success());

  let lint = ManifestName::from("lint");
  let target = store.read(|state| state.manifest(&lint).unwrap().target_ids().pop().unwrap());
  let changed = dir.path().join("src.rs");
  store.dispatch(Action::FileChanged {
    manifest: lint.clone(),
    target,
    path: changed.clone(),
    at: Utc::now(),
  });

  let summary = runner.run().await;
  assert_eq!(summary.succeeded, vec![lint.clone()]);
  assert_eq!(runner.execer().calls().len(), 3);

  let state = store.snapshot();
  let ms = &state.manifest_target(&lint).unwrap().state;
  assert_eq!(ms.build_history.len(), 2);
  let last = ms.last_build().unwrap();
  assert_eq!(last.reason, BuildReason::CHANGED_FILES);
  assert_eq!(last.edits, vec![changed]);
  assert!(!ms.has_pending_changes());
}

#[tokio::test]
async fn manual_trigger_reruns_an_up_to_date_resource() {
  let dir = TempDir::new().unwrap();
  let path = write_config(&dir, serde_json::json!({ "manifests": [local("lint", &["make", "lint"])] }));
  let store = engine_for(&path);
  let runner = runner(store.clone(), FakeExecer::new());
  assert!(runner.run().await.is_success());

  let lint = ManifestName::from("lint");
  store.dispatch(Action::ManifestTriggered(lint.clone()));
  let summary = runner.run().await;

  assert_eq!(summary.succeeded, vec![lint.clone()]);
  assert_eq!(runner.execer().calls().len(), 2);
  let state = store.snapshot();
  assert_eq!(state.manifest_target(&lint).unwrap().state.last_build().unwrap().reason, BuildReason::TRIGGER);
  assert!(state.trigger_queue.is_empty());
}

#[tokio::test]
async fn crash_rebuild_reruns_the_update_command() {
  let dir = TempDir::new().unwrap();
  let path = write_config(&dir, serde_json::json!({ "manifests": [local("lint", &["make", "lint"])] }));
  let store = engine_for(&path);
  let runner = runner(store.clone(), FakeExecer::new());
  assert!(runner.run().await.is_success());

  let lint = ManifestName::from("lint");
  store.dispatch(Action::RuntimeCrashed(lint.clone()));
  let summary = runner.run().await;

  assert_eq!(summary.succeeded, vec![lint.clone()]);
  assert_eq!(runner.execer().calls().len(), 2);
  let state = store.snapshot();
  let ms = &state.manifest_target(&lint).unwrap().state;
  assert!(ms.last_build().unwrap().reason.is_crash_only());
  assert!(!ms.needs_rebuild_from_crash);
}

#[tokio::test]
async fn disabled_resources_do_not_build() {
  let dir = TempDir::new().unwrap();
  let path = write_config(
    &dir,
    serde_json::json!({
      "manifests": [local("lint", &["make", "lint"]), local("docs", &["make", "docs"])],
      "disabled": ["docs"]
    }),
  );
  let store = engine_for(&path);
  let runner = runner(store.clone(), FakeExecer::new());

  let summary = runner.run().await;
  assert_eq!(summary.succeeded, vec![ManifestName::from("lint")]);
  assert_eq!(summary.unbuilt, vec![ManifestName::from("docs")]);
  assert_eq!(runner.execer().calls().len(), 1);
}

#[tokio::test]
async fn failed_dependency_holds_dependents() {
  let dir = TempDir::new().unwrap();
  let mut test = local("test", &["make", "test"]);
  test["resource_dependencies"] = serde_json::json!(["lint"]);
  let path = write_config(
    &dir,
    serde_json::json!({ "manifests": [local("lint", &["make", "lint"]), test] }),
  );
  let execer = FakeExecer::new();
  execer.register_command("make lint", 2, "", "lint errors");
  let store = engine_for(&path);
  let runner = runner(store, execer);

  let summary = runner.run().await;
  assert_eq!(summary.failed.len(), 1);
  assert_eq!(summary.failed[0].0, ManifestName::from("lint"));
  assert_eq!(summary.unbuilt, vec![ManifestName::from("test")]);
  assert_eq!(summary.held.len(), 1);
  assert_eq!(summary.held[0].1.to_string(), "waiting for dependencies: lint");
}
