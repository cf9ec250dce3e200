//! Generated API objects: the records a config source owns and keeps in
//! sync with its latest evaluation.

mod set;
mod spec;
mod store;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use set::{ObjectSet, TypedObjectSet};
pub use spec::*;
pub use store::{MemoryObjectStore, ObjectStore, StoreCalls, StoreError};

/// The closed set of generated object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
  ConfigMap,
  Cmd,
  DockerComposeService,
  FileWatch,
  ImageMap,
  KubernetesApply,
  LiveUpdate,
  Session,
  ToggleButton,
  UIButton,
  UIResource,
}

impl ObjectKind {
  /// Every kind a config source may own.
  pub const ALL: [ObjectKind; 11] = [
    ObjectKind::ConfigMap,
    ObjectKind::Cmd,
    ObjectKind::DockerComposeService,
    ObjectKind::FileWatch,
    ObjectKind::ImageMap,
    ObjectKind::KubernetesApply,
    ObjectKind::LiveUpdate,
    ObjectKind::Session,
    ObjectKind::ToggleButton,
    ObjectKind::UIButton,
    ObjectKind::UIResource,
  ];

  /// Plural resource name, as used in error messages.
  pub fn resource(self) -> &'static str {
    match self {
      ObjectKind::ConfigMap => "configmaps",
      ObjectKind::Cmd => "cmds",
      ObjectKind::DockerComposeService => "dockercomposeservices",
      ObjectKind::FileWatch => "filewatches",
      ObjectKind::ImageMap => "imagemaps",
      ObjectKind::KubernetesApply => "kubernetesapplys",
      ObjectKind::LiveUpdate => "liveupdates",
      ObjectKind::Session => "sessions",
      ObjectKind::ToggleButton => "togglebuttons",
      ObjectKind::UIButton => "uibuttons",
      ObjectKind::UIResource => "uiresources",
    }
  }
}

impl fmt::Display for ObjectKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.resource())
  }
}

/// The config source that owns an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct OwnerRef {
  pub kind: String,
  pub name: String,
}

impl OwnerRef {
  pub const CONFIG_KIND: &'static str = "Config";

  pub fn config(name: impl Into<String>) -> Self {
    Self {
      kind: Self::CONFIG_KIND.to_string(),
      name: name.into(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ObjectMeta {
  pub name: String,
  pub labels: BTreeMap<String, String>,
  pub annotations: BTreeMap<String, String>,
  pub owner: Option<OwnerRef>,
  /// Assigned by the store; zero on objects that were never stored.
  pub resource_version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiObject {
  pub meta: ObjectMeta,
  pub spec: ObjectSpec,
}

impl ApiObject {
  pub fn new(name: impl Into<String>, spec: ObjectSpec) -> Self {
    Self {
      meta: ObjectMeta {
        name: name.into(),
        ..Default::default()
      },
      spec,
    }
  }

  pub fn with_annotation(mut self, key: &str, value: impl Into<String>) -> Self {
    self.meta.annotations.insert(key.to_string(), value.into());
    self
  }

  pub fn with_labels(mut self, labels: &BTreeMap<String, String>) -> Self {
    self.meta.labels.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    self
  }

  pub fn name(&self) -> &str {
    &self.meta.name
  }

  pub fn kind(&self) -> ObjectKind {
    match &self.spec {
      ObjectSpec::FileWatch(_) => ObjectKind::FileWatch,
      ObjectSpec::ImageMap(_) => ObjectKind::ImageMap,
      ObjectSpec::KubernetesApply(_) => ObjectKind::KubernetesApply,
      ObjectSpec::DockerComposeService(_) => ObjectKind::DockerComposeService,
      ObjectSpec::Cmd(_) => ObjectKind::Cmd,
      ObjectSpec::LiveUpdate(_) => ObjectKind::LiveUpdate,
      ObjectSpec::ConfigMap(_) => ObjectKind::ConfigMap,
      ObjectSpec::ToggleButton(_) => ObjectKind::ToggleButton,
      ObjectSpec::UIResource(_) => ObjectKind::UIResource,
      ObjectSpec::UIButton(_) => ObjectKind::UIButton,
      ObjectSpec::Session(_) => ObjectKind::Session,
    }
  }

  pub fn annotation(&self, key: &str) -> Option<&str> {
    self.meta.annotations.get(key).map(String::as_str)
  }

  pub fn config_map_data(&self) -> Option<&BTreeMap<String, String>> {
    match &self.spec {
      ObjectSpec::ConfigMap(data) => Some(data),
      _ => None,
    }
  }

  pub fn disable_source(&self) -> Option<&DisableSource> {
    match &self.spec {
      ObjectSpec::FileWatch(s) => s.disable_source.as_ref(),
      ObjectSpec::KubernetesApply(s) => s.disable_source.as_ref(),
      ObjectSpec::DockerComposeService(s) => s.disable_source.as_ref(),
      ObjectSpec::Cmd(s) => s.disable_source.as_ref(),
      _ => None,
    }
  }

  pub fn is_owned_by(&self, owner: &OwnerRef) -> bool {
    self.meta.owner.as_ref() == Some(owner)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kind_follows_spec() {
    let cm = ApiObject::new("fe-disable", ObjectSpec::ConfigMap(BTreeMap::new()));
    assert_eq!(cm.kind(), ObjectKind::ConfigMap);
    assert_eq!(cm.kind().to_string(), "configmaps");
    assert!(cm.config_map_data().is_some());
    assert!(cm.disable_source().is_none());
  }

  #[test]
  fn serializes_kind_and_spec() {
    let obj = ApiObject::new("fe", ObjectSpec::ImageMap(ImageMapSpec { selector: "fe".into() }))
      .with_annotation("devloop.dev/resource", "fe");
    let json = serde_json::to_value(&obj).unwrap();
    assert_eq!(json["spec"]["ImageMap"]["selector"], "fe");
    assert_eq!(json["meta"]["annotations"]["devloop.dev/resource"], "fe");

    let back: ApiObject = serde_json::from_value(json).unwrap();
    assert_eq!(back, obj);
  }
}
