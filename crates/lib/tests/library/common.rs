//! Shared helpers for library integration tests.

use std::path::{Path, PathBuf};

use devloop_lib::engine::{EngineStore, Runner, RunnerConfig};
use devloop_lib::exec::FakeExecer;
use devloop_lib::load::{ConfigLoadResult, ConfigLoader, JsonConfigLoader};
use devloop_lib::manifest::ManifestName;
use tempfile::TempDir;

pub fn local(name: &str, argv: &[&str]) -> serde_json::Value {
  serde_json::json!({
    "name": name,
    "deploy_target": {"type": "local", "update_cmd": {"argv": argv}}
  })
}

pub fn write_config(dir: &TempDir, config: serde_json::Value) -> PathBuf {
  let path = dir.path().join("devloop.json");
  std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
  path
}

pub fn load(path: &Path) -> ConfigLoadResult {
  let result = JsonConfigLoader.load(path);
  assert!(result.error.is_none(), "{:?}", result.error);
  result
}

pub fn engine_for(path: &Path) -> EngineStore {
  let store = EngineStore::default();
  store.load_config(ManifestName::main_config(), load(path));
  store
}

pub fn runner(store: EngineStore, execer: FakeExecer) -> Runner<FakeExecer> {
  Runner::new(
    store,
    execer,
    RunnerConfig {
      parallelism: 2,
      serve: false,
      ..Default::default()
    },
  )
}
