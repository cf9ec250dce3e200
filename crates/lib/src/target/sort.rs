//! Topological ordering of build targets.

use std::collections::{HashMap, HashSet};

use super::types::{TargetError, TargetId, TargetSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
  Searching,
  Done,
}

struct Sorter<'a, T> {
  by_id: HashMap<TargetId, &'a T>,
  marks: HashMap<TargetId, Mark>,
  sorted: Vec<T>,
}

impl<T: TargetSpec + Clone> Sorter<'_, T> {
  fn visit(&mut self, target: &T) -> Result<(), TargetError> {
    let id = target.id();
    match self.marks.get(&id) {
      Some(Mark::Done) => return Ok(()),
      Some(Mark::Searching) => return Err(TargetError::Cycle(id)),
      None => {}
    }

    self.marks.insert(id.clone(), Mark::Searching);

    for dep_id in target.dependency_ids() {
      let Some(&dep) = self.by_id.get(&dep_id) else {
        return Err(TargetError::MissingDependency(dep_id));
      };
      self.visit(dep)?;
    }

    self.marks.insert(id, Mark::Done);
    self.sorted.push(target.clone());
    Ok(())
  }
}

/// Orders targets so every target comes after its dependencies.
///
/// Uses a depth-first search with three-color marking. Targets without an
/// ordering constraint between them keep their input order.
///
/// # Errors
///
/// Returns `TargetError::Cycle` naming the target that was reached while still
/// being searched, or `TargetError::MissingDependency` naming a dependency id
/// that is not among `targets`.
pub fn topological_sort<T: TargetSpec + Clone>(targets: &[T]) -> Result<Vec<T>, TargetError> {
  let mut sorter = Sorter {
    by_id: targets.iter().map(|t| (t.id(), t)).collect(),
    marks: HashMap::with_capacity(targets.len()),
    sorted: Vec::with_capacity(targets.len()),
  };

  for target in targets {
    sorter.visit(target)?;
  }

  Ok(sorter.sorted)
}

/// Removes duplicate ids, keeping the first occurrence of each.
pub fn dedupe_target_ids(ids: &[TargetId]) -> Vec<TargetId> {
  let mut seen = HashSet::with_capacity(ids.len());
  ids.iter().filter(|id| seen.insert((*id).clone())).cloned().collect()
}
