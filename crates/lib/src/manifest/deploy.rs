//! Deploy targets: the closed set of ways a manifest can be deployed.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::cmd::Cmd;
use crate::target::{TargetId, TargetSpec, TargetType, ValidationError, dedupe_target_ids};

/// A link shown next to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Link {
  pub url: String,
  pub name: String,
}

/// Kubernetes objects applied to a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct K8sTarget {
  pub name: String,
  pub yaml: String,
  /// Image refs the yaml is rewritten with.
  pub image_maps: Vec<String>,
  pub links: Vec<Link>,
  dependency_ids: Vec<TargetId>,
}

impl K8sTarget {
  pub fn new(yaml: impl Into<String>) -> Self {
    Self {
      yaml: yaml.into(),
      ..Default::default()
    }
  }

  pub fn with_dependency_ids(mut self, ids: &[TargetId]) -> Self {
    self.dependency_ids = dedupe_target_ids(ids);
    self
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ComposeProject {
  pub name: String,
  pub config_paths: Vec<PathBuf>,
  pub project_path: PathBuf,
}

/// A Docker Compose service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DockerComposeTarget {
  pub name: String,
  pub service: String,
  /// Not part of build invalidation.
  pub project: ComposeProject,
  pub service_yaml: String,
  pub links: Vec<Link>,
  dependency_ids: Vec<TargetId>,
}

impl DockerComposeTarget {
  pub fn new(service: impl Into<String>) -> Self {
    Self {
      service: service.into(),
      ..Default::default()
    }
  }

  pub fn with_dependency_ids(mut self, ids: &[TargetId]) -> Self {
    self.dependency_ids = dedupe_target_ids(ids);
    self
  }
}

/// A command run on the developer's machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LocalTarget {
  pub name: String,
  /// Run to completion on every build.
  pub update_cmd: Cmd,
  /// Long-running process started after a successful build.
  pub serve_cmd: Cmd,
  pub workdir: PathBuf,
  /// Not part of build invalidation.
  pub deps: Vec<PathBuf>,
  pub allow_parallel: bool,
  pub links: Vec<Link>,
}

impl LocalTarget {
  pub fn new(update_cmd: Cmd) -> Self {
    Self {
      update_cmd,
      ..Default::default()
    }
  }

  pub fn with_serve_cmd(mut self, serve_cmd: Cmd) -> Self {
    self.serve_cmd = serve_cmd;
    self
  }

  pub fn with_deps(mut self, deps: Vec<PathBuf>) -> Self {
    self.deps = deps;
    self
  }

  pub fn with_allow_parallel(mut self, allow_parallel: bool) -> Self {
    self.allow_parallel = allow_parallel;
    self
  }
}

/// How a manifest is deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeployTarget {
  #[default]
  None,
  K8s(K8sTarget),
  DockerCompose(DockerComposeTarget),
  Local(LocalTarget),
}

impl DeployTarget {
  pub fn is_none(&self) -> bool {
    matches!(self, DeployTarget::None)
  }

  pub fn target_type(&self) -> Option<TargetType> {
    match self {
      DeployTarget::None => None,
      DeployTarget::K8s(_) => Some(TargetType::K8s),
      DeployTarget::DockerCompose(_) => Some(TargetType::DockerCompose),
      DeployTarget::Local(_) => Some(TargetType::Local),
    }
  }

  pub fn name(&self) -> &str {
    match self {
      DeployTarget::None => "",
      DeployTarget::K8s(t) => &t.name,
      DeployTarget::DockerCompose(t) => &t.name,
      DeployTarget::Local(t) => &t.name,
    }
  }

  pub(crate) fn with_name(self, name: &str) -> Self {
    match self {
      DeployTarget::None => DeployTarget::None,
      DeployTarget::K8s(t) => DeployTarget::K8s(K8sTarget { name: name.to_string(), ..t }),
      DeployTarget::DockerCompose(t) => DeployTarget::DockerCompose(DockerComposeTarget {
        name: name.to_string(),
        ..t
      }),
      DeployTarget::Local(t) => DeployTarget::Local(LocalTarget { name: name.to_string(), ..t }),
    }
  }

  pub fn as_k8s(&self) -> Option<&K8sTarget> {
    match self {
      DeployTarget::K8s(t) => Some(t),
      _ => None,
    }
  }

  pub fn as_docker_compose(&self) -> Option<&DockerComposeTarget> {
    match self {
      DeployTarget::DockerCompose(t) => Some(t),
      _ => None,
    }
  }

  pub fn as_local(&self) -> Option<&LocalTarget> {
    match self {
      DeployTarget::Local(t) => Some(t),
      _ => None,
    }
  }

  pub fn links(&self) -> &[Link] {
    match self {
      DeployTarget::None => &[],
      DeployTarget::K8s(t) => &t.links,
      DeployTarget::DockerCompose(t) => &t.links,
      DeployTarget::Local(t) => &t.links,
    }
  }

  pub fn local_paths(&self) -> Vec<PathBuf> {
    match self {
      DeployTarget::Local(t) => t.deps.clone(),
      DeployTarget::DockerCompose(t) => t.project.config_paths.clone(),
      DeployTarget::None | DeployTarget::K8s(_) => Vec::new(),
    }
  }

  /// A copy with the fields that never force a rebuild cleared.
  pub(crate) fn build_relevant(&self) -> Self {
    match self {
      DeployTarget::None => DeployTarget::None,
      DeployTarget::K8s(t) => DeployTarget::K8s(K8sTarget {
        links: Vec::new(),
        ..t.clone()
      }),
      DeployTarget::DockerCompose(t) => DeployTarget::DockerCompose(DockerComposeTarget {
        links: Vec::new(),
        project: ComposeProject::default(),
        ..t.clone()
      }),
      DeployTarget::Local(t) => DeployTarget::Local(LocalTarget {
        links: Vec::new(),
        deps: Vec::new(),
        ..t.clone()
      }),
    }
  }
}

impl TargetSpec for DeployTarget {
  fn id(&self) -> TargetId {
    match self.target_type() {
      Some(target_type) => TargetId::new(target_type, self.name()),
      None => TargetId::default(),
    }
  }

  fn validate(&self) -> Result<(), ValidationError> {
    if let Some(target_type) = self.target_type()
      && self.name().is_empty()
    {
      return Err(ValidationError::MissingTargetName { target_type });
    }

    match self {
      DeployTarget::None => Ok(()),
      DeployTarget::K8s(t) if t.yaml.trim().is_empty() => Err(ValidationError::MissingYaml { target: t.name.clone() }),
      DeployTarget::DockerCompose(t) if t.service.is_empty() => Err(ValidationError::MissingComposeService {
        target: t.name.clone(),
      }),
      DeployTarget::Local(t) if t.update_cmd.is_empty() && t.serve_cmd.is_empty() => {
        Err(ValidationError::MissingLocalCommand { target: t.name.clone() })
      }
      _ => Ok(()),
    }
  }

  fn dependency_ids(&self) -> Vec<TargetId> {
    match self {
      DeployTarget::None | DeployTarget::Local(_) => Vec::new(),
      DeployTarget::K8s(t) => t.dependency_ids.clone(),
      DeployTarget::DockerCompose(t) => t.dependency_ids.clone(),
    }
  }
}
