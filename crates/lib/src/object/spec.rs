//! Specs of the generated object kinds.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::manifest::{ComposeProject, LiveUpdateSpec};

/// Points at the ConfigMap key holding a disabled flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct ConfigMapDisableSource {
  pub name: String,
  pub key: String,
}

/// Where an object reads whether it is disabled from.
///
/// An object derived from several manifests is disabled only when every
/// listed ConfigMap says so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DisableSource {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub config_map: Option<ConfigMapDisableSource>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub every_config_map: Vec<ConfigMapDisableSource>,
}

impl DisableSource {
  pub fn config_map(name: impl Into<String>, key: impl Into<String>) -> Self {
    Self {
      config_map: Some(ConfigMapDisableSource {
        name: name.into(),
        key: key.into(),
      }),
      every_config_map: Vec::new(),
    }
  }

  /// Every ConfigMap this source refers to, in order, without duplicates.
  pub fn config_maps(&self) -> Vec<ConfigMapDisableSource> {
    let mut maps = Vec::new();
    for cm in self.config_map.iter().chain(&self.every_config_map) {
      if !maps.contains(cm) {
        maps.push(cm.clone());
      }
    }
    maps
  }
}

/// Combines the disable sources of two manifests sharing one object.
pub fn merge_disable_source(existing: Option<&DisableSource>, to_merge: Option<&DisableSource>) -> Option<DisableSource> {
  match (existing, to_merge) {
    (existing, None) => existing.cloned(),
    (None, Some(to_merge)) => Some(to_merge.clone()),
    (Some(existing), Some(to_merge)) if existing == to_merge => Some(existing.clone()),
    (Some(existing), Some(to_merge)) => {
      let mut maps = existing.config_maps();
      for cm in to_merge.config_maps() {
        if !maps.contains(&cm) {
          maps.push(cm);
        }
      }
      Some(DisableSource {
        config_map: None,
        every_config_map: maps,
      })
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileWatchSpec {
  pub watched_paths: Vec<PathBuf>,
  pub ignores: Vec<String>,
  pub disable_source: Option<DisableSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ImageMapSpec {
  /// Image reference the built image replaces.
  pub selector: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KubernetesApplySpec {
  pub yaml: String,
  pub image_maps: Vec<String>,
  pub disable_source: Option<DisableSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DockerComposeServiceSpec {
  pub service: String,
  pub project: ComposeProject,
  pub image_maps: Vec<String>,
  pub disable_source: Option<DisableSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CmdSpec {
  pub args: Vec<String>,
  pub dir: PathBuf,
  pub env: Vec<String>,
  pub disable_source: Option<DisableSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ToggleButtonSpec {
  /// The resource the button is shown on.
  pub component_id: String,
  pub on_text: String,
  pub off_text: String,
  pub off_requires_confirmation: bool,
  pub state_source: ConfigMapDisableSource,
  pub on_value: String,
  pub off_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UIResourceSpec {
  pub disable_sources: Vec<DisableSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UIButtonSpec {
  pub component_id: String,
  pub text: String,
  pub icon_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SessionSpec {
  pub config_path: PathBuf,
  pub exit_condition: String,
}

/// The kind-specific part of a generated object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectSpec {
  FileWatch(FileWatchSpec),
  ImageMap(ImageMapSpec),
  KubernetesApply(KubernetesApplySpec),
  DockerComposeService(DockerComposeServiceSpec),
  Cmd(CmdSpec),
  LiveUpdate(LiveUpdateSpec),
  /// ConfigMaps carry data rather than a spec.
  ConfigMap(BTreeMap<String, String>),
  ToggleButton(ToggleButtonSpec),
  UIResource(UIResourceSpec),
  UIButton(UIButtonSpec),
  Session(SessionSpec),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn merging_distinct_sources_lists_both() {
    let fe1 = DisableSource::config_map("fe1-disable", "isDisabled");
    let fe2 = DisableSource::config_map("fe2-disable", "isDisabled");

    let merged = merge_disable_source(Some(&fe1), Some(&fe2)).unwrap();
    assert_eq!(merged.config_map, None);
    assert_eq!(
      merged.every_config_map,
      vec![
        ConfigMapDisableSource {
          name: "fe1-disable".to_string(),
          key: "isDisabled".to_string()
        },
        ConfigMapDisableSource {
          name: "fe2-disable".to_string(),
          key: "isDisabled".to_string()
        },
      ]
    );

    let again = merge_disable_source(Some(&merged), Some(&fe1)).unwrap();
    assert_eq!(again, merged);
  }

  #[test]
  fn merging_same_or_missing_source() {
    let fe = DisableSource::config_map("fe-disable", "isDisabled");
    assert_eq!(merge_disable_source(Some(&fe), Some(&fe)), Some(fe.clone()));
    assert_eq!(merge_disable_source(Some(&fe), None), Some(fe.clone()));
    assert_eq!(merge_disable_source(None, Some(&fe)), Some(fe));
    assert_eq!(merge_disable_source(None, None), None);
  }
}
