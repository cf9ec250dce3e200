//! Computes the objects a config source should own from its load result.

use std::collections::BTreeMap;

use crate::consts::{
  ANNOTATION_MANAGED_BY, ANNOTATION_MANIFEST, ANNOTATION_SPAN_ID, ANNOTATION_UPDATE_MODE, DISABLE_KEY, SESSION_NAME,
};
use crate::load::ConfigLoadResult;
use crate::manifest::{BuildDetails, DeployTarget, Manifest, ManifestName};
use crate::object::{
  ApiObject, CmdSpec, ConfigMapDisableSource, DisableSource, DockerComposeServiceSpec, FileWatchSpec, ImageMapSpec,
  KubernetesApplySpec, ObjectKind, ObjectSet, ObjectSpec, SessionSpec, ToggleButtonSpec, UIButtonSpec,
  UIResourceSpec, merge_disable_source,
};

use super::ConfigParent;

pub(crate) type DisableSourceMap = BTreeMap<ManifestName, DisableSource>;

pub fn disable_config_map_name(manifest: &ManifestName) -> String {
  format!("{}-disable", manifest)
}

pub(crate) fn disable_sources(result: Option<&ConfigLoadResult>) -> DisableSourceMap {
  result
    .map(|r| {
      r.manifests
        .iter()
        .map(|m| {
          let source = DisableSource::config_map(disable_config_map_name(&m.name), DISABLE_KEY);
          (m.name.clone(), source)
        })
        .collect()
    })
    .unwrap_or_default()
}

/// Everything `parent` should own given its latest load result.
///
/// `result` is `None` when the source has not produced a result yet; only
/// the source's own objects are generated then.
pub fn desired_objects(parent: &ConfigParent, result: Option<&ConfigLoadResult>) -> ObjectSet {
  let disable = disable_sources(result);
  let mut set = ObjectSet::new();

  if let Some(result) = result {
    image_maps(result, &mut set);
    live_updates(result, &mut set);
    kubernetes_applies(result, &disable, &mut set);
    docker_compose_services(result, &disable, &mut set);
    disable_config_maps(result, &disable, &mut set);
    cmds(result, &disable, &mut set);
    toggle_buttons(&disable, &mut set);
    cancel_buttons(result, &mut set);
  }

  if parent.name.is_main_config() {
    set.add(ApiObject::new(
      SESSION_NAME,
      ObjectSpec::Session(SessionSpec {
        config_path: parent.path.clone(),
        exit_condition: "manual".to_string(),
      }),
    ));
  }
  ui_resources(parent, result, &disable, &mut set);
  file_watches(parent, result, &disable, &mut set);
  set
}

fn annotated(obj: ApiObject, manifest: &ManifestName, span_id: String) -> ApiObject {
  obj
    .with_annotation(ANNOTATION_MANIFEST, manifest.as_str())
    .with_annotation(ANNOTATION_SPAN_ID, span_id)
}

/// Images shared by several manifests map once, under the first manifest.
fn image_maps(result: &ConfigLoadResult, set: &mut ObjectSet) {
  for m in &result.manifests {
    for image in &m.image_targets {
      let name = image.image_ref.clone();
      if set.contains(ObjectKind::ImageMap, &name) {
        continue;
      }
      let obj = ApiObject::new(
        name.clone(),
        ObjectSpec::ImageMap(ImageMapSpec {
          selector: image.image_ref.clone(),
        }),
      );
      set.add(annotated(obj, &m.name, format!("imagemap:{}", name)));
    }
  }
}

fn live_updates(result: &ConfigLoadResult, set: &mut ObjectSet) {
  for m in &result.manifests {
    let mode = if m.trigger_mode.auto_on_change() { "auto" } else { "manual" };
    for image in m.image_targets.iter().filter(|i| i.has_live_update()) {
      let name = format!("{}:{}", m.name, image.image_ref);
      let obj = ApiObject::new(name.clone(), ObjectSpec::LiveUpdate(image.live_update.clone()))
        .with_annotation(ANNOTATION_MANAGED_BY, "buildcontrol")
        .with_annotation(ANNOTATION_UPDATE_MODE, mode);
      set.add(annotated(obj, &m.name, format!("liveupdate:{}", name)));
    }
  }
}

fn kubernetes_applies(result: &ConfigLoadResult, disable: &DisableSourceMap, set: &mut ObjectSet) {
  for m in &result.manifests {
    let Some(k8s) = m.deploy_target.as_k8s() else {
      continue;
    };
    let obj = ApiObject::new(
      m.name.as_str(),
      ObjectSpec::KubernetesApply(KubernetesApplySpec {
        yaml: k8s.yaml.clone(),
        image_maps: k8s.image_maps.clone(),
        disable_source: disable.get(&m.name).cloned(),
      }),
    )
    .with_annotation(ANNOTATION_MANAGED_BY, "buildcontrol");
    set.add(annotated(obj, &m.name, format!("kubernetesapply:{}", m.name)));
  }
}

fn docker_compose_services(result: &ConfigLoadResult, disable: &DisableSourceMap, set: &mut ObjectSet) {
  for m in &result.manifests {
    let Some(dc) = m.deploy_target.as_docker_compose() else {
      continue;
    };
    let obj = ApiObject::new(
      m.name.as_str(),
      ObjectSpec::DockerComposeService(DockerComposeServiceSpec {
        service: dc.service.clone(),
        project: dc.project.clone(),
        image_maps: m.image_targets.iter().map(|i| i.image_ref.clone()).collect(),
        disable_source: disable.get(&m.name).cloned(),
      }),
    )
    .with_annotation(ANNOTATION_MANAGED_BY, "buildcontrol");
    set.add(annotated(obj, &m.name, format!("dockercompose:{}", m.name)));
  }
}

fn disable_config_maps(result: &ConfigLoadResult, disable: &DisableSourceMap, set: &mut ObjectSet) {
  for (name, source) in disable {
    let Some(cm) = &source.config_map else {
      continue;
    };
    let disabled = !result.is_enabled(name);
    let data = BTreeMap::from([(cm.key.clone(), disabled.to_string())]);
    let obj = ApiObject::new(cm.name.clone(), ObjectSpec::ConfigMap(data)).with_annotation(ANNOTATION_MANIFEST, name.as_str());
    set.add(obj);
  }
}

/// One `Cmd` per local update command and per custom image build.
fn cmds(result: &ConfigLoadResult, disable: &DisableSourceMap, set: &mut ObjectSet) {
  for m in &result.manifests {
    let Some(local) = m.local_target() else {
      continue;
    };
    if local.update_cmd.is_empty() {
      continue;
    }
    let name = format!("{}:update", m.name);
    let dir = if local.update_cmd.dir.as_os_str().is_empty() {
      local.workdir.clone()
    } else {
      local.update_cmd.dir.clone()
    };
    let obj = ApiObject::new(
      name.clone(),
      ObjectSpec::Cmd(CmdSpec {
        args: local.update_cmd.argv.clone(),
        dir,
        env: local.update_cmd.env.clone(),
        disable_source: disable.get(&m.name).cloned(),
      }),
    )
    .with_annotation(ANNOTATION_MANAGED_BY, "local_resource");
    set.add(annotated(obj, &m.name, format!("cmd:{}", name)));
  }

  for m in &result.manifests {
    for image in &m.image_targets {
      let BuildDetails::CustomBuild(custom) = &image.build_details else {
        continue;
      };
      let name = format!("{}:build", image.image_ref);
      let obj = ApiObject::new(
        name.clone(),
        ObjectSpec::Cmd(CmdSpec {
          args: custom.command.argv.clone(),
          dir: custom.command.dir.clone(),
          env: custom.command.env.clone(),
          disable_source: None,
        }),
      )
      .with_annotation(ANNOTATION_MANAGED_BY, "cmd_image");
      set.add(annotated(obj, &m.name, format!("cmdimage:{}", name)));
    }
  }
}

fn toggle_buttons(disable: &DisableSourceMap, set: &mut ObjectSet) {
  for (name, source) in disable {
    let Some(cm) = &source.config_map else {
      continue;
    };
    let obj = ApiObject::new(
      format!("{}-disable", name),
      ObjectSpec::ToggleButton(ToggleButtonSpec {
        component_id: name.to_string(),
        on_text: "Enable Resource".to_string(),
        off_text: "Disable Resource".to_string(),
        off_requires_confirmation: true,
        state_source: ConfigMapDisableSource {
          name: cm.name.clone(),
          key: cm.key.clone(),
        },
        on_value: "true".to_string(),
        off_value: "false".to_string(),
      }),
    )
    .with_annotation(ANNOTATION_MANIFEST, name.as_str());
    set.add(obj);
  }
}

fn cancel_buttons(result: &ConfigLoadResult, set: &mut ObjectSet) {
  for m in &result.manifests {
    let obj = ApiObject::new(
      format!("{}-cancel", m.name),
      ObjectSpec::UIButton(UIButtonSpec {
        component_id: m.name.to_string(),
        text: "Cancel Update".to_string(),
        icon_name: "cancel".to_string(),
      }),
    )
    .with_annotation(ANNOTATION_MANIFEST, m.name.as_str());
    set.add(obj);
  }
}

fn ui_resources(
  parent: &ConfigParent,
  result: Option<&ConfigLoadResult>,
  disable: &DisableSourceMap,
  set: &mut ObjectSet,
) {
  for m in result.map(|r| r.manifests.as_slice()).unwrap_or_default() {
    let obj = ApiObject::new(
      m.name.as_str(),
      ObjectSpec::UIResource(UIResourceSpec {
        disable_sources: disable.get(&m.name).cloned().into_iter().collect(),
      }),
    )
    .with_labels(&m.labels)
    .with_annotation(ANNOTATION_MANIFEST, m.name.as_str());
    set.add(obj);
  }

  let obj = ApiObject::new(parent.name.as_str(), ObjectSpec::UIResource(UIResourceSpec::default()))
    .with_labels(&parent.labels)
    .with_annotation(ANNOTATION_MANIFEST, parent.name.as_str());
  set.add(obj);
}

/// Adds a watch, merging disable sources when another manifest already
/// watches the same target.
fn add_file_watch(set: &mut ObjectSet, name: String, manifest: &Manifest, spec: FileWatchSpec) {
  let watches = set.set_for_kind_mut(ObjectKind::FileWatch);
  if let Some(existing) = watches.get_mut(&name)
    && let ObjectSpec::FileWatch(existing_spec) = &mut existing.spec
  {
    existing_spec.disable_source =
      merge_disable_source(existing_spec.disable_source.as_ref(), spec.disable_source.as_ref());
    return;
  }
  let obj = ApiObject::new(name.clone(), ObjectSpec::FileWatch(spec));
  watches.insert(name.clone(), annotated(obj, &manifest.name, format!("filewatch:{}", name)));
}

fn file_watches(
  parent: &ConfigParent,
  result: Option<&ConfigLoadResult>,
  disable: &DisableSourceMap,
  set: &mut ObjectSet,
) {
  let ignores = result.map(|r| r.watch_settings.ignores.clone()).unwrap_or_default();

  for m in result.map(|r| r.manifests.as_slice()).unwrap_or_default() {
    let disable_source = disable.get(&m.name).cloned();
    for image in &m.image_targets {
      let paths = image.local_paths();
      if paths.is_empty() {
        continue;
      }
      let spec = FileWatchSpec {
        watched_paths: paths,
        ignores: ignores.clone(),
        disable_source: disable_source.clone(),
      };
      add_file_watch(set, format!("image:{}", image.image_ref), m, spec);
    }

    let deploy_paths = match &m.deploy_target {
      DeployTarget::Local(local) => local.deps.clone(),
      DeployTarget::DockerCompose(dc) => dc.project.config_paths.clone(),
      DeployTarget::K8s(_) | DeployTarget::None => Vec::new(),
    };
    if let Some(target_type) = m.deploy_type()
      && !deploy_paths.is_empty()
    {
      let spec = FileWatchSpec {
        watched_paths: deploy_paths,
        ignores: ignores.clone(),
        disable_source,
      };
      add_file_watch(set, format!("{}:{}", target_type, m.name), m, spec);
    }
  }

  let config_paths = match result {
    Some(r) if !r.config_files.is_empty() => r.config_files.clone(),
    _ => vec![parent.path.clone()],
  };
  let name = format!("configs:{}", parent.name);
  let obj = ApiObject::new(
    name.clone(),
    ObjectSpec::FileWatch(FileWatchSpec {
      watched_paths: config_paths,
      ignores,
      disable_source: None,
    }),
  );
  set.add(annotated(obj, &parent.name, format!("filewatch:{}", name)));
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use super::*;
  use crate::build::TriggerMode;
  use crate::manifest::{Cmd, CustomBuild, DockerBuild, ImageTarget, K8sTarget, LiveUpdateSpec, LiveUpdateSync, LocalTarget};

  fn parent() -> ConfigParent {
    ConfigParent::new(ManifestName::main_config(), "/src/devloop.json")
  }

  fn loaded(manifests: Vec<Manifest>) -> ConfigLoadResult {
    ConfigLoadResult {
      enabled_manifests: manifests.iter().map(|m| m.name.clone()).collect(),
      manifests,
      config_files: vec![PathBuf::from("/src/devloop.json")],
      ..Default::default()
    }
  }

  fn docker_image(image_ref: &str) -> ImageTarget {
    ImageTarget::new(image_ref).with_docker_build(DockerBuild {
      build_path: PathBuf::from("/src/fe"),
      ..Default::default()
    })
  }

  fn k8s(name: &str, image: ImageTarget) -> Manifest {
    Manifest::new(name)
      .with_image_target(image)
      .with_deploy_target(DeployTarget::K8s(K8sTarget::new("kind: Pod")))
  }

  #[test]
  fn generates_per_manifest_objects() {
    let local = Manifest::new("lint")
      .with_deploy_target(DeployTarget::Local(
        LocalTarget::new(Cmd::shell("make lint")).with_deps(vec![PathBuf::from("/src/lint")]),
      ))
      .with_labels(BTreeMap::from([("team".to_string(), "web".to_string())]));
    let result = loaded(vec![k8s("fe", docker_image("fe-image")), local]);

    let set = desired_objects(&parent(), Some(&result));

    assert!(set.contains(ObjectKind::ConfigMap, "fe-disable"));
    assert!(set.contains(ObjectKind::ToggleButton, "lint-disable"));
    assert!(set.contains(ObjectKind::UIButton, "fe-cancel"));
    assert!(set.contains(ObjectKind::KubernetesApply, "fe"));
    assert!(set.contains(ObjectKind::ImageMap, "fe-image"));
    assert!(set.contains(ObjectKind::FileWatch, "image:fe-image"));
    assert!(set.contains(ObjectKind::FileWatch, "local:lint"));
    assert!(set.contains(ObjectKind::FileWatch, "configs:(Tiltfile)"));
    assert!(set.contains(ObjectKind::Session, SESSION_NAME));
    assert!(set.contains(ObjectKind::UIResource, "(Tiltfile)"));

    let cmd = set.get(ObjectKind::Cmd, "lint:update").unwrap();
    assert_eq!(cmd.annotation(ANNOTATION_MANAGED_BY), Some("local_resource"));
    assert_eq!(cmd.annotation(ANNOTATION_MANIFEST), Some("lint"));
    assert_eq!(
      cmd.disable_source(),
      Some(&DisableSource::config_map("lint-disable", DISABLE_KEY))
    );

    let ui = set.get(ObjectKind::UIResource, "lint").unwrap();
    assert_eq!(ui.meta.labels.get("team").map(String::as_str), Some("web"));

    let cm = set.get(ObjectKind::ConfigMap, "fe-disable").unwrap();
    assert_eq!(cm.config_map_data().unwrap().get(DISABLE_KEY).map(String::as_str), Some("false"));
  }

  #[test]
  fn disabled_manifests_get_true_config_maps() {
    let mut result = loaded(vec![k8s("fe", docker_image("fe-image"))]);
    result.enabled_manifests.clear();

    let set = desired_objects(&parent(), Some(&result));
    let cm = set.get(ObjectKind::ConfigMap, "fe-disable").unwrap();
    assert_eq!(cm.config_map_data().unwrap().get(DISABLE_KEY).map(String::as_str), Some("true"));
  }

  #[test]
  fn shared_images_map_once_and_merge_disable_sources() {
    let result = loaded(vec![k8s("fe1", docker_image("fe")), k8s("fe2", docker_image("fe"))]);
    let set = desired_objects(&parent(), Some(&result));

    assert_eq!(set.set_for_kind(ObjectKind::ImageMap).unwrap().len(), 1);
    let image_map = set.get(ObjectKind::ImageMap, "fe").unwrap();
    assert_eq!(image_map.annotation(ANNOTATION_MANIFEST), Some("fe1"));

    let watch = set.get(ObjectKind::FileWatch, "image:fe").unwrap();
    let names: Vec<String> = watch.disable_source().unwrap().config_maps().into_iter().map(|c| c.name).collect();
    assert_eq!(names, vec!["fe1-disable", "fe2-disable"]);
  }

  #[test]
  fn live_update_mode_follows_trigger_mode() {
    let image = docker_image("fe").with_live_update(LiveUpdateSpec {
      syncs: vec![LiveUpdateSync {
        local_path: PathBuf::from("/src/fe"),
        container_path: "/app".to_string(),
      }],
      ..Default::default()
    });
    let result = loaded(vec![
      k8s("auto", image.clone()),
      k8s("manual", image).with_trigger_mode(TriggerMode::Manual),
    ]);
    let set = desired_objects(&parent(), Some(&result));

    let auto = set.get(ObjectKind::LiveUpdate, "auto:fe").unwrap();
    assert_eq!(auto.annotation(ANNOTATION_UPDATE_MODE), Some("auto"));
    let manual = set.get(ObjectKind::LiveUpdate, "manual:fe").unwrap();
    assert_eq!(manual.annotation(ANNOTATION_UPDATE_MODE), Some("manual"));
  }

  #[test]
  fn custom_builds_get_cmds() {
    let image = ImageTarget::new("gen").with_custom_build(CustomBuild {
      command: Cmd::shell("./build.sh"),
      deps: vec![PathBuf::from("/src/gen")],
      ..Default::default()
    });
    let set = desired_objects(&parent(), Some(&loaded(vec![k8s("gen", image)])));

    let cmd = set.get(ObjectKind::Cmd, "gen:build").unwrap();
    assert_eq!(cmd.annotation(ANNOTATION_MANAGED_BY), Some("cmd_image"));
    assert!(cmd.disable_source().is_none());
    assert!(set.contains(ObjectKind::FileWatch, "image:gen"));
  }

  #[test]
  fn secondary_sources_skip_session() {
    let parent = ConfigParent::new(ManifestName::from("extra"), "/src/extra.json");
    let set = desired_objects(&parent, None);

    assert!(set.set_for_kind(ObjectKind::Session).is_none());
    assert!(set.contains(ObjectKind::UIResource, "extra"));
    let watch = set.get(ObjectKind::FileWatch, "configs:extra").unwrap();
    let ObjectSpec::FileWatch(spec) = &watch.spec else {
      panic!("expected a file watch");
    };
    assert_eq!(spec.watched_paths, vec![PathBuf::from("/src/extra.json")]);
  }
}
