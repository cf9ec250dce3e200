//! Implementation of the `devloop plan` command.
//!
//! Reconciles the configuration's generated objects against an empty object
//! store and prints what would be created.

use std::path::Path;

use anyhow::{Context, Result};

use devloop_lib::manifest::ManifestName;
use devloop_lib::object::MemoryObjectStore;
use devloop_lib::reconcile::{ConfigParent, update_owned_objects};

use crate::output::{print_info, print_json, symbols};

pub fn cmd_plan(config: &Path, json: bool) -> Result<()> {
  let result = super::load_config(config)?;
  let parent = ConfigParent::new(ManifestName::main_config(), config);
  let store = MemoryObjectStore::new();

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let summary = rt
    .block_on(update_owned_objects(&store, &parent, Some(&result), true))
    .context("Failed to reconcile generated objects")?;

  if json {
    return print_json(&summary);
  }

  if summary.is_noop() {
    print_info("No objects would be created");
    return Ok(());
  }

  for obj in &summary.created {
    println!("  {} {}", symbols::ADD, obj);
  }
  println!();
  println!("Resources: {}", result.manifests.len());
  println!("Objects to create: {}", summary.created.len());
  Ok(())
}
