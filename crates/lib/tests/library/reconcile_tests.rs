//! Reconciling generated objects across config reloads.

use devloop_lib::load::{ConfigLoader, JsonConfigLoader};
use devloop_lib::manifest::ManifestName;
use devloop_lib::object::{MemoryObjectStore, ObjectKind, ObjectStore};
use devloop_lib::reconcile::{ConfigParent, ObjectRef, delete_owned_objects, update_owned_objects};
use tempfile::TempDir;

use super::common::{load, local, write_config};

fn names(refs: &[ObjectRef]) -> Vec<String> {
  refs.iter().map(ToString::to_string).collect()
}

#[tokio::test]
async fn removed_resources_lose_their_objects() {
  let dir = TempDir::new().unwrap();
  let path = write_config(
    &dir,
    serde_json::json!({ "manifests": [local("lint", &["make", "lint"]), local("test", &["make", "test"])] }),
  );
  let parent = ConfigParent::new(ManifestName::main_config(), &path);
  let store = MemoryObjectStore::new();

  let first = update_owned_objects(&store, &parent, Some(&load(&path)), true)
    .await
    .unwrap();
  assert!(names(&first.created).contains(&"cmds/test:update".to_string()));
  assert!(store.get(ObjectKind::ConfigMap, "test-disable").is_ok());

  write_config(&dir, serde_json::json!({ "manifests": [local("lint", &["make", "lint"])] }));
  let second = update_owned_objects(&store, &parent, Some(&load(&path)), true)
    .await
    .unwrap();
  assert!(second.created.is_empty());
  let deleted = names(&second.deleted);
  assert!(deleted.contains(&"cmds/test:update".to_string()));
  assert!(deleted.contains(&"configmaps/test-disable".to_string()));
  assert!(deleted.iter().all(|d| !d.contains("lint")));
  assert!(store.get(ObjectKind::Cmd, "lint:update").is_ok());
}

#[tokio::test]
async fn broken_config_keeps_existing_objects() {
  let dir = TempDir::new().unwrap();
  let path = write_config(&dir, serde_json::json!({ "manifests": [local("lint", &["make", "lint"])] }));
  let parent = ConfigParent::new(ManifestName::main_config(), &path);
  let store = MemoryObjectStore::new();
  update_owned_objects(&store, &parent, Some(&load(&path)), true)
    .await
    .unwrap();
  let before = store.len();

  std::fs::write(&path, "{ broken").unwrap();
  let result = JsonConfigLoader.load(&path);
  assert!(result.is_error());
  let summary = update_owned_objects(&store, &parent, Some(&result), true)
    .await
    .unwrap();

  assert!(summary.deleted.is_empty());
  assert_eq!(store.len(), before);
}

#[tokio::test]
async fn deleting_a_source_removes_everything_it_owns() {
  let dir = TempDir::new().unwrap();
  let path = write_config(&dir, serde_json::json!({ "manifests": [local("lint", &["make", "lint"])] }));
  let parent = ConfigParent::new(ManifestName::main_config(), &path);
  let store = MemoryObjectStore::new();
  let created = update_owned_objects(&store, &parent, Some(&load(&path)), true)
    .await
    .unwrap()
    .created
    .len();

  let summary = delete_owned_objects(&store, &ManifestName::main_config()).await.unwrap();
  assert_eq!(summary.deleted.len(), created);
  assert!(store.is_empty());
}
