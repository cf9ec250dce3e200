//! Implementation of the `devloop validate` command.
//!
//! Loads a configuration file and reports each resource it declares. Loading
//! already validates every manifest, each manifest's target graph, and the
//! resource dependency graph, so a load error is a validation failure.

use std::path::Path;

use anyhow::Result;

use devloop_lib::manifest::Manifest;

use crate::output::{print_error, print_info, print_success, print_warning};

pub fn cmd_validate(config: &Path) -> Result<()> {
  let result = match super::load_config(config) {
    Ok(result) => result,
    Err(e) => {
      print_error(&e.to_string());
      return Err(e);
    }
  };

  for manifest in &result.manifests {
    let line = describe(manifest);
    if result.is_enabled(&manifest.name) {
      print_success(&line);
    } else {
      print_info(&format!("{} [disabled]", line));
    }
  }
  for warning in &result.warnings {
    print_warning(warning);
  }

  println!();
  println!("Configuration valid: {} resource(s)", result.manifests.len());
  Ok(())
}

fn describe(manifest: &Manifest) -> String {
  let kind = manifest
    .deploy_type()
    .map(|t| t.to_string())
    .unwrap_or_else(|| "images only".to_string());
  let targets = manifest.target_ids().len();
  let mut line = format!("{} ({}, {} target(s)", manifest.name, kind, targets);
  if !manifest.resource_dependencies.is_empty() {
    let deps: Vec<&str> = manifest.resource_dependencies.iter().map(|d| d.as_str()).collect();
    line.push_str(&format!(", after {}", deps.join(", ")));
  }
  line.push(')');
  line
}
