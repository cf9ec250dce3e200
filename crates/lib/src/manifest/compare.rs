//! Field-group comparison of manifests.
//!
//! Manifest equality is decomposed into named groups so a reload can tell a
//! cosmetic change (name, trigger mode, labels, links) apart from one that
//! changes what gets built or deployed.

use super::deploy::DeployTarget;
use super::image::ImageTarget;
use super::types::Manifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldGroup {
  /// Name, trigger mode, source config and labels.
  Primitives,
  ImageTargets,
  K8sTarget,
  DockerComposeTarget,
  LocalTarget,
  ResourceDependencies,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareMode {
  /// Every field counts.
  Full,
  /// Only fields that affect what is built or deployed count.
  Build,
}

/// Lists the field groups that differ between `old` and `new`.
pub fn changed_field_groups(old: &Manifest, new: &Manifest, mode: CompareMode) -> Vec<FieldGroup> {
  let mut changed = Vec::new();

  if mode == CompareMode::Full
    && (old.name != new.name
      || old.trigger_mode != new.trigger_mode
      || old.source_config != new.source_config
      || old.labels != new.labels)
  {
    changed.push(FieldGroup::Primitives);
  }

  let (old_images, new_images) = (images_for(old, mode), images_for(new, mode));
  if old_images != new_images {
    changed.push(FieldGroup::ImageTargets);
  }

  let (old_deploy, new_deploy) = (deploy_for(old, mode), deploy_for(new, mode));
  if old_deploy.as_k8s() != new_deploy.as_k8s() {
    changed.push(FieldGroup::K8sTarget);
  }
  if old_deploy.as_docker_compose() != new_deploy.as_docker_compose() {
    changed.push(FieldGroup::DockerComposeTarget);
  }
  if old_deploy.as_local() != new_deploy.as_local() {
    changed.push(FieldGroup::LocalTarget);
  }

  if old.resource_dependencies != new.resource_dependencies {
    changed.push(FieldGroup::ResourceDependencies);
  }

  changed
}

/// Whether replacing `old` with `new` invalidates build results cached for `old`.
pub fn changes_invalidate_build(old: &Manifest, new: &Manifest) -> bool {
  !changed_field_groups(old, new, CompareMode::Build).is_empty()
}

impl Manifest {
  /// Field-by-field equality over every group.
  pub fn equal(&self, other: &Manifest) -> bool {
    changed_field_groups(self, other, CompareMode::Full).is_empty()
  }
}

fn images_for(manifest: &Manifest, mode: CompareMode) -> Vec<ImageTarget> {
  match mode {
    CompareMode::Full => manifest.image_targets.clone(),
    CompareMode::Build => manifest.image_targets.iter().map(ImageTarget::build_relevant).collect(),
  }
}

fn deploy_for(manifest: &Manifest, mode: CompareMode) -> DeployTarget {
  match mode {
    CompareMode::Full => manifest.deploy_target.clone(),
    // The deploy target carries the manifest name, which is a primitive.
    CompareMode::Build => manifest.deploy_target.build_relevant().with_name(""),
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;
  use std::path::PathBuf;

  use super::*;
  use crate::build::TriggerMode;
  use crate::manifest::{
    Cmd, ComposeProject, CustomBuild, DockerBuild, DockerComposeTarget, K8sTarget, Link, LocalTarget, ManifestName,
  };

  fn docker_manifest(build_args: &[(&str, &str)]) -> Manifest {
    let build = DockerBuild {
      dockerfile: "Dockerfile".to_string(),
      build_path: PathBuf::from("."),
      build_args: build_args.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
      ..Default::default()
    };
    Manifest::new("fe")
      .with_image_target(ImageTarget::new("gcr.io/fe").with_docker_build(build))
      .with_deploy_target(DeployTarget::K8s(K8sTarget::new("kind: Deployment")))
  }

  #[test]
  fn name_change_is_not_build_relevant() {
    let old = docker_manifest(&[]);
    let mut new = old.clone();
    new.name = ManifestName::from("other");
    new = new.with_deploy_target(old.deploy_target.clone());

    assert!(!old.equal(&new));
    assert!(!changes_invalidate_build(&old, &new));
  }

  #[test]
  fn trigger_mode_change_is_not_build_relevant() {
    let old = docker_manifest(&[]);
    let new = old.clone().with_trigger_mode(TriggerMode::Manual);

    assert!(!old.equal(&new));
    assert!(!changes_invalidate_build(&old, &new));
    assert_eq!(changed_field_groups(&old, &new, CompareMode::Full), vec![FieldGroup::Primitives]);
  }

  #[test]
  fn build_args_change_invalidates() {
    let old = docker_manifest(&[("VERSION", "1")]);
    let new = docker_manifest(&[("VERSION", "2")]);

    assert!(!old.equal(&new));
    assert!(changes_invalidate_build(&old, &new));
    assert_eq!(
      changed_field_groups(&old, &new, CompareMode::Build),
      vec![FieldGroup::ImageTargets]
    );
  }

  #[test]
  fn identical_manifests() {
    let old = docker_manifest(&[("VERSION", "1")]);
    assert!(old.equal(&old.clone()));
    assert!(!changes_invalidate_build(&old, &old.clone()));
  }

  #[test]
  fn empty_and_missing_collections_are_equal() {
    let json_old = serde_json::json!({"name": "fe", "labels": {}});
    let json_new = serde_json::json!({"name": "fe"});
    let old: Manifest = serde_json::from_value(json_old).unwrap();
    let new: Manifest = serde_json::from_value(json_new).unwrap();
    assert!(old.equal(&new));
  }

  #[test]
  fn ignored_fields_do_not_invalidate() {
    let custom = |deps: Vec<PathBuf>| {
      Manifest::new("fe").with_image_target(ImageTarget::new("fe").with_custom_build(CustomBuild {
        command: Cmd::shell("make"),
        deps,
        ..Default::default()
      }))
    };
    let old = custom(vec![PathBuf::from("a")]);
    let new = custom(vec![PathBuf::from("b")]);
    assert!(!old.equal(&new));
    assert!(!changes_invalidate_build(&old, &new));

    let mut cached = docker_manifest(&[]);
    if let Some(crate::manifest::BuildDetails::DockerBuild(b)) = cached.image_targets.first_mut().map(|t| &mut t.build_details) {
      b.cache_from = vec!["fe:cache".to_string()];
    }
    assert!(!changes_invalidate_build(&docker_manifest(&[]), &cached));

    let mut labeled = docker_manifest(&[]);
    labeled.labels = BTreeMap::from([("team".to_string(), "web".to_string())]);
    assert!(!changes_invalidate_build(&docker_manifest(&[]), &labeled));
  }

  #[test]
  fn ignored_deploy_fields_do_not_invalidate() {
    let local = |deps: Vec<PathBuf>, links: Vec<Link>| {
      let mut target = LocalTarget::new(Cmd::shell("make")).with_deps(deps);
      target.links = links;
      Manifest::new("lint").with_deploy_target(DeployTarget::Local(target))
    };
    let old = local(vec![PathBuf::from("a")], Vec::new());
    let new = local(
      vec![PathBuf::from("b")],
      vec![Link {
        url: "http://localhost:8000".to_string(),
        name: "app".to_string(),
      }],
    );
    assert!(!changes_invalidate_build(&old, &new));

    let compose = |project: &str| {
      let mut target = DockerComposeTarget::new("db");
      target.project = ComposeProject {
        name: project.to_string(),
        ..Default::default()
      };
      Manifest::new("db").with_deploy_target(DeployTarget::DockerCompose(target))
    };
    assert!(!changes_invalidate_build(&compose("one"), &compose("two")));
    assert!(!compose("one").equal(&compose("two")));
  }

  #[test]
  fn deploy_kind_change_invalidates() {
    let k8s = docker_manifest(&[]);
    let local = k8s
      .clone()
      .with_deploy_target(DeployTarget::Local(LocalTarget::new(Cmd::shell("make"))));
    let groups = changed_field_groups(&k8s, &local, CompareMode::Build);
    assert_eq!(groups, vec![FieldGroup::K8sTarget, FieldGroup::LocalTarget]);
  }

  #[test]
  fn resource_dependency_change_invalidates() {
    let old = docker_manifest(&[]);
    let new = old.clone().with_resource_dependencies(vec![ManifestName::from("db")]);
    assert!(changes_invalidate_build(&old, &new));
  }
}
