//! Keeps the objects a config source owns in sync with its latest
//! evaluation.
//!
//! Each pass stamps ownership on the desired objects, diffs them against
//! what the store holds for the same owner, and creates, updates, or
//! deletes the difference. Objects are only garbage collected when the
//! evaluation succeeded, so a broken config never tears down what the last
//! good one created.

mod generate;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use generate::{desired_objects, disable_config_map_name};

use crate::consts::{ANNOTATION_MANIFEST, CACHE_RETRY_DELAY, CACHE_RETRY_LIMIT};
use crate::load::ConfigLoadResult;
use crate::manifest::ManifestName;
use crate::object::{ApiObject, ObjectKind, ObjectSet, ObjectSpec, ObjectStore, OwnerRef, StoreError};

/// The config source that owns the generated objects.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigParent {
  pub name: ManifestName,
  pub path: PathBuf,
  /// Default labels for every owned object.
  pub labels: BTreeMap<String, String>,
}

impl ConfigParent {
  pub fn new(name: ManifestName, path: impl Into<PathBuf>) -> Self {
    Self {
      name,
      path: path.into(),
      labels: BTreeMap::new(),
    }
  }

  pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
    self.labels = labels;
    self
  }

  pub fn owner_ref(&self) -> OwnerRef {
    OwnerRef::config(self.name.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
  Create,
  Update,
  Delete,
}

impl fmt::Display for Verb {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Verb::Create => write!(f, "create"),
      Verb::Update => write!(f, "update"),
      Verb::Delete => write!(f, "delete"),
    }
  }
}

/// One failed store call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{verb} {kind}/{name}: {source}")]
pub struct ObjectError {
  pub verb: Verb,
  pub kind: ObjectKind,
  pub name: String,
  #[source]
  pub source: StoreError,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
  #[error("listing owned {kind}: {source}")]
  List {
    kind: ObjectKind,
    #[source]
    source: StoreError,
  },

  /// Every failed call of a pass; the other objects were still processed.
  #[error("{}", join_errors(.0))]
  Aggregate(Vec<ObjectError>),
}

fn join_errors(errors: &[ObjectError]) -> String {
  match errors {
    [single] => single.to_string(),
    many => {
      let msgs: Vec<String> = many.iter().map(ToString::to_string).collect();
      format!("[{}]", msgs.join(", "))
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectRef {
  pub kind: ObjectKind,
  pub name: String,
}

impl ObjectRef {
  fn of(obj: &ApiObject) -> Self {
    Self {
      kind: obj.kind(),
      name: obj.meta.name.clone(),
    }
  }
}

impl fmt::Display for ObjectRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.kind, self.name)
  }
}

/// What one reconciliation pass changed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ReconcileSummary {
  pub created: Vec<ObjectRef>,
  pub updated: Vec<ObjectRef>,
  pub deleted: Vec<ObjectRef>,
  pub unchanged: usize,
}

impl ReconcileSummary {
  pub fn is_noop(&self) -> bool {
    self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
  }
}

/// Brings the objects owned by `parent` in line with `result`.
///
/// `result` is `None` when the source has not been evaluated. Unless
/// `change_enabled_resources` is set, existing disable ConfigMaps are kept
/// as they are so toggles made since the last pass survive.
///
/// # Errors
///
/// Returns [`ReconcileError::List`] if the owned objects cannot be listed,
/// even after waiting for the store to warm up, and
/// [`ReconcileError::Aggregate`] with every failed create, update, or delete.
pub async fn update_owned_objects<S>(
  store: &S,
  parent: &ConfigParent,
  result: Option<&ConfigLoadResult>,
  change_enabled_resources: bool,
) -> Result<ReconcileSummary, ReconcileError>
where
  S: ObjectStore + ?Sized,
{
  let owner = parent.owner_ref();
  let mut desired = desired_objects(parent, result);
  for obj in desired.iter_mut() {
    stamp_ownership(obj, parent, &owner);
  }

  let existing = existing_objects(store, &owner).await?;

  if !change_enabled_resources && let Some(old_maps) = existing.set_for_kind(ObjectKind::ConfigMap) {
    for source in generate::disable_sources(result).values() {
      if let Some(cm) = &source.config_map
        && let Some(old) = old_maps.get(&cm.name)
      {
        desired.add(old.clone());
      }
    }
  }

  let mut summary = ReconcileSummary::default();
  update_new_objects(store, &desired, &existing, &mut summary)?;

  if result.is_none_or(|r| !r.is_error()) {
    remove_orphaned_objects(store, &desired, &existing, &mut summary)?;
  } else {
    debug!(source = %parent.name, "config evaluation failed, keeping existing objects");
  }

  info!(
    source = %parent.name,
    created = summary.created.len(),
    updated = summary.updated.len(),
    deleted = summary.deleted.len(),
    "reconciled owned objects"
  );
  Ok(summary)
}

/// Deletes every object owned by a config source that no longer exists.
///
/// # Errors
///
/// Same as [`update_owned_objects`].
pub async fn delete_owned_objects<S>(store: &S, source: &ManifestName) -> Result<ReconcileSummary, ReconcileError>
where
  S: ObjectStore + ?Sized,
{
  let existing = existing_objects(store, &OwnerRef::config(source.as_str())).await?;
  let mut summary = ReconcileSummary::default();
  remove_orphaned_objects(store, &ObjectSet::new(), &existing, &mut summary)?;
  info!(source = %source, deleted = summary.deleted.len(), "removed objects of deleted source");
  Ok(summary)
}

/// Sets the owner, fills in the parent's labels without overriding the
/// object's own, and defaults the manifest annotation to the parent.
fn stamp_ownership(obj: &mut ApiObject, parent: &ConfigParent, owner: &OwnerRef) {
  obj.meta.owner = Some(owner.clone());
  for (key, value) in &parent.labels {
    obj.meta.labels.entry(key.clone()).or_insert_with(|| value.clone());
  }
  if obj.annotation(ANNOTATION_MANIFEST).is_none_or(str::is_empty) {
    obj
      .meta
      .annotations
      .insert(ANNOTATION_MANIFEST.to_string(), parent.name.to_string());
  }
}

/// Lists owned objects, retrying while the store reports it is not ready.
async fn existing_objects<S>(store: &S, owner: &OwnerRef) -> Result<ObjectSet, ReconcileError>
where
  S: ObjectStore + ?Sized,
{
  let mut retries = 0;
  loop {
    match list_owned_objects(store, owner) {
      Err(ReconcileError::List {
        source: StoreError::NotReady,
        ..
      }) if retries < CACHE_RETRY_LIMIT => {
        retries += 1;
        debug!(attempt = retries, "object store not ready, retrying");
        tokio::time::sleep(CACHE_RETRY_DELAY).await;
      }
      other => return other,
    }
  }
}

fn list_owned_objects<S>(store: &S, owner: &OwnerRef) -> Result<ObjectSet, ReconcileError>
where
  S: ObjectStore + ?Sized,
{
  let mut set = ObjectSet::new();
  for kind in ObjectKind::ALL {
    let objects = store
      .list_owned(kind, owner)
      .map_err(|source| ReconcileError::List { kind, source })?;
    for obj in objects {
      set.add(obj);
    }
  }
  Ok(set)
}

fn needs_update(old: &ApiObject, new: &ApiObject) -> bool {
  old.spec != new.spec || old.meta.labels != new.meta.labels || old.meta.annotations != new.meta.annotations
}

/// Keys already in an existing ConfigMap survive an update that omits them.
fn merge_config_map_data(new: &mut ApiObject, old: &ApiObject) {
  if let (ObjectSpec::ConfigMap(data), ObjectSpec::ConfigMap(old_data)) = (&mut new.spec, &old.spec) {
    for (key, value) in old_data {
      data.entry(key.clone()).or_insert_with(|| value.clone());
    }
  }
}

fn update_new_objects<S>(
  store: &S,
  desired: &ObjectSet,
  existing: &ObjectSet,
  summary: &mut ReconcileSummary,
) -> Result<(), ReconcileError>
where
  S: ObjectStore + ?Sized,
{
  let mut errors = Vec::new();
  for obj in desired.iter() {
    let kind = obj.kind();
    let Some(old) = existing.get(kind, obj.name()) else {
      match store.create(obj.clone()) {
        Ok(_) => summary.created.push(ObjectRef::of(obj)),
        Err(source) => errors.push(object_error(Verb::Create, obj, source)),
      }
      continue;
    };

    let mut next = obj.clone();
    merge_config_map_data(&mut next, old);
    if !needs_update(old, &next) {
      summary.unchanged += 1;
      continue;
    }
    next.meta.resource_version = old.meta.resource_version;
    match store.update(next) {
      Ok(_) => summary.updated.push(ObjectRef::of(obj)),
      Err(source) => errors.push(object_error(Verb::Update, obj, source)),
    }
  }

  if errors.is_empty() {
    Ok(())
  } else {
    warn!(failed = errors.len(), "some owned objects could not be written");
    Err(ReconcileError::Aggregate(errors))
  }
}

fn remove_orphaned_objects<S>(
  store: &S,
  desired: &ObjectSet,
  existing: &ObjectSet,
  summary: &mut ReconcileSummary,
) -> Result<(), ReconcileError>
where
  S: ObjectStore + ?Sized,
{
  let mut errors = Vec::new();
  for obj in existing.iter() {
    if desired.contains(obj.kind(), obj.name()) {
      continue;
    }
    match store.delete(obj.kind(), obj.name()) {
      Ok(()) => summary.deleted.push(ObjectRef::of(obj)),
      Err(source) => errors.push(object_error(Verb::Delete, obj, source)),
    }
  }

  if errors.is_empty() {
    Ok(())
  } else {
    Err(ReconcileError::Aggregate(errors))
  }
}

fn object_error(verb: Verb, obj: &ApiObject, source: StoreError) -> ObjectError {
  ObjectError {
    verb,
    kind: obj.kind(),
    name: obj.meta.name.clone(),
    source,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::consts::DISABLE_KEY;
  use crate::manifest::{Cmd, DeployTarget, K8sTarget, LocalTarget, Manifest};
  use crate::object::MemoryObjectStore;

  fn parent() -> ConfigParent {
    ConfigParent::new(ManifestName::main_config(), "/src/devloop.json")
  }

  fn fe() -> Manifest {
    Manifest::new("fe").with_deploy_target(DeployTarget::K8s(K8sTarget::new("kind: Pod")))
  }

  fn loaded(manifests: Vec<Manifest>) -> ConfigLoadResult {
    ConfigLoadResult {
      enabled_manifests: manifests.iter().map(|m| m.name.clone()).collect(),
      manifests,
      ..Default::default()
    }
  }

  fn disabled_flag(store: &MemoryObjectStore, name: &str) -> Option<String> {
    let cm = store.get(ObjectKind::ConfigMap, name).ok()?;
    cm.config_map_data()?.get(DISABLE_KEY).cloned()
  }

  #[tokio::test]
  async fn second_pass_is_a_noop() {
    let store = MemoryObjectStore::new();
    let result = loaded(vec![fe()]);

    let first = update_owned_objects(&store, &parent(), Some(&result), false).await.unwrap();
    assert!(!first.created.is_empty());
    assert_eq!(store.calls().creates, first.created.len());

    store.reset_calls();
    let second = update_owned_objects(&store, &parent(), Some(&result), false).await.unwrap();
    assert!(second.is_noop());
    assert_eq!(store.calls().total(), 0);
    assert_eq!(second.unchanged, first.created.len());
  }

  #[tokio::test]
  async fn no_garbage_collection_on_error() {
    let store = MemoryObjectStore::new();
    update_owned_objects(&store, &parent(), Some(&loaded(vec![fe()])), false)
      .await
      .unwrap();
    assert!(store.get(ObjectKind::KubernetesApply, "fe").is_ok());

    let failed = ConfigLoadResult::failed(Vec::new(), "syntax error");
    let summary = update_owned_objects(&store, &parent(), Some(&failed), false).await.unwrap();
    assert!(summary.deleted.is_empty());
    assert!(store.get(ObjectKind::KubernetesApply, "fe").is_ok());

    let summary = update_owned_objects(&store, &parent(), Some(&loaded(vec![])), false)
      .await
      .unwrap();
    assert!(store.get(ObjectKind::KubernetesApply, "fe").is_err());
    assert!(summary.deleted.contains(&ObjectRef {
      kind: ObjectKind::KubernetesApply,
      name: "fe".to_string()
    }));
  }

  #[tokio::test]
  async fn disable_toggles_survive_reloads() {
    let store = MemoryObjectStore::new();
    let result = loaded(vec![fe()]);
    update_owned_objects(&store, &parent(), Some(&result), false).await.unwrap();
    assert_eq!(disabled_flag(&store, "fe-disable").as_deref(), Some("false"));

    let mut cm = store.get(ObjectKind::ConfigMap, "fe-disable").unwrap();
    cm.spec = ObjectSpec::ConfigMap(BTreeMap::from([(DISABLE_KEY.to_string(), "true".to_string())]));
    store.update(cm).unwrap();

    update_owned_objects(&store, &parent(), Some(&result), false).await.unwrap();
    assert_eq!(disabled_flag(&store, "fe-disable").as_deref(), Some("true"));
  }

  #[tokio::test]
  async fn config_map_updates_keep_unknown_keys() {
    let store = MemoryObjectStore::new();
    let result = loaded(vec![fe()]);
    update_owned_objects(&store, &parent(), Some(&result), true).await.unwrap();

    let mut cm = store.get(ObjectKind::ConfigMap, "fe-disable").unwrap();
    cm.spec = ObjectSpec::ConfigMap(BTreeMap::from([
      (DISABLE_KEY.to_string(), "true".to_string()),
      ("note".to_string(), "set by hand".to_string()),
    ]));
    store.update(cm).unwrap();

    update_owned_objects(&store, &parent(), Some(&result), true).await.unwrap();
    let cm = store.get(ObjectKind::ConfigMap, "fe-disable").unwrap();
    let data = cm.config_map_data().unwrap();
    assert_eq!(data.get(DISABLE_KEY).map(String::as_str), Some("false"));
    assert_eq!(data.get("note").map(String::as_str), Some("set by hand"));
  }

  #[tokio::test]
  async fn ownership_labels_and_annotations_are_stamped() {
    let store = MemoryObjectStore::new();
    let labels = BTreeMap::from([
      ("team".to_string(), "platform".to_string()),
      ("tier".to_string(), "default".to_string()),
    ]);
    let parent = parent().with_labels(labels);
    let lint = Manifest::new("lint")
      .with_deploy_target(DeployTarget::Local(LocalTarget::new(Cmd::shell("make lint"))))
      .with_labels(BTreeMap::from([("tier".to_string(), "tools".to_string())]));
    update_owned_objects(&store, &parent, Some(&loaded(vec![lint])), false)
      .await
      .unwrap();

    for obj in store.objects() {
      assert_eq!(obj.meta.owner, Some(parent.owner_ref()), "{}", obj.name());
      assert_eq!(obj.meta.labels.get("team").map(String::as_str), Some("platform"));
      assert!(obj.annotation(ANNOTATION_MANIFEST).is_some());
    }

    let ui = store.get(ObjectKind::UIResource, "lint").unwrap();
    assert_eq!(ui.meta.labels.get("tier").map(String::as_str), Some("tools"));
    let session = store.get(ObjectKind::Session, crate::consts::SESSION_NAME).unwrap();
    assert_eq!(session.annotation(ANNOTATION_MANIFEST), Some("(Tiltfile)"));
  }

  #[tokio::test]
  async fn waits_for_store_warmup() {
    let store = MemoryObjectStore::with_warmup(2);
    let summary = update_owned_objects(&store, &parent(), Some(&loaded(vec![fe()])), false)
      .await
      .unwrap();
    assert!(!summary.created.is_empty());
  }

  #[tokio::test]
  async fn gives_up_when_store_never_starts() {
    let store = MemoryObjectStore::not_ready();
    let err = update_owned_objects(&store, &parent(), None, false).await.unwrap_err();
    assert!(matches!(
      err,
      ReconcileError::List {
        source: StoreError::NotReady,
        ..
      }
    ));
  }

  #[tokio::test]
  async fn failures_are_aggregated() {
    let store = MemoryObjectStore::new();
    let mut squatter = ApiObject::new("fe-disable", ObjectSpec::ConfigMap(BTreeMap::new()));
    squatter.meta.owner = Some(OwnerRef::config("someone-else"));
    store.create(squatter).unwrap();

    let err = update_owned_objects(&store, &parent(), Some(&loaded(vec![fe()])), false)
      .await
      .unwrap_err();
    let ReconcileError::Aggregate(errors) = &err else {
      panic!("expected aggregate error, got {err}");
    };
    assert_eq!(errors.len(), 1);
    assert_eq!(
      err.to_string(),
      "create configmaps/fe-disable: configmaps \"fe-disable\" already exists"
    );
    assert!(store.get(ObjectKind::KubernetesApply, "fe").is_ok());
  }

  #[tokio::test]
  async fn sources_do_not_collect_each_other() {
    let store = MemoryObjectStore::new();
    let extra = ConfigParent::new(ManifestName::from("extra"), "/src/extra.json");
    let web = Manifest::new("web").with_deploy_target(DeployTarget::K8s(K8sTarget::new("kind: Pod")));

    update_owned_objects(&store, &parent(), Some(&loaded(vec![fe()])), false)
      .await
      .unwrap();
    update_owned_objects(&store, &extra, Some(&loaded(vec![web])), false)
      .await
      .unwrap();
    update_owned_objects(&store, &parent(), Some(&loaded(vec![fe()])), false)
      .await
      .unwrap();
    assert!(store.get(ObjectKind::KubernetesApply, "web").is_ok());

    let summary = delete_owned_objects(&store, &ManifestName::from("extra")).await.unwrap();
    assert!(!summary.deleted.is_empty());
    assert!(store.get(ObjectKind::KubernetesApply, "web").is_err());
    assert!(store.get(ObjectKind::KubernetesApply, "fe").is_ok());
  }

  #[test]
  fn aggregate_display_lists_every_error() {
    let err = ReconcileError::Aggregate(vec![
      ObjectError {
        verb: Verb::Update,
        kind: ObjectKind::Cmd,
        name: "a".to_string(),
        source: StoreError::NotReady,
      },
      ObjectError {
        verb: Verb::Delete,
        kind: ObjectKind::FileWatch,
        name: "b".to_string(),
        source: StoreError::NotReady,
      },
    ]);
    assert_eq!(
      err.to_string(),
      "[update cmds/a: object store cache not started, delete filewatches/b: object store cache not started]"
    );
  }
}
