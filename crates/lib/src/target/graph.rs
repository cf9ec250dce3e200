//! Indexed dependency graph over sorted targets.
//!
//! `TargetGraph` answers dependency queries and groups targets into waves
//! that can be built in parallel because all of their dependencies sit in
//! earlier waves.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use super::sort::topological_sort;
use super::types::{TargetError, TargetId, TargetSpec};

#[derive(Debug)]
pub struct TargetGraph {
  /// Edges point from a dependency to its dependent.
  graph: DiGraph<TargetId, ()>,
  nodes: HashMap<TargetId, NodeIndex>,
  /// Ids in topological order.
  order: Vec<TargetId>,
}

impl TargetGraph {
  /// Builds the graph after ordering and validating `targets`.
  ///
  /// # Errors
  ///
  /// Returns the same errors as `topological_sort`.
  pub fn new<T: TargetSpec + Clone>(targets: &[T]) -> Result<Self, TargetError> {
    let sorted = topological_sort(targets)?;

    let mut graph = DiGraph::with_capacity(sorted.len(), sorted.len());
    let mut nodes = HashMap::with_capacity(sorted.len());
    let mut order = Vec::with_capacity(sorted.len());

    for target in &sorted {
      let id = target.id();
      nodes.insert(id.clone(), graph.add_node(id.clone()));
      order.push(id);
    }

    for target in &sorted {
      let dependent = nodes[&target.id()];
      for dep_id in target.dependency_ids() {
        if let Some(&dep) = nodes.get(&dep_id)
          && !graph.contains_edge(dep, dependent)
        {
          graph.add_edge(dep, dependent, ());
        }
      }
    }

    Ok(Self { graph, nodes, order })
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  pub fn contains(&self, id: &TargetId) -> bool {
    self.nodes.contains_key(id)
  }

  /// Target ids in topological order.
  pub fn ids(&self) -> &[TargetId] {
    &self.order
  }

  /// Direct dependencies of `id`, in topological order.
  pub fn deps_of(&self, id: &TargetId) -> Vec<TargetId> {
    self.neighbors(id, Direction::Incoming)
  }

  /// Targets that directly depend on `id`, in topological order.
  pub fn reverse_deps_of(&self, id: &TargetId) -> Vec<TargetId> {
    self.neighbors(id, Direction::Outgoing)
  }

  /// Groups targets into waves that can run concurrently.
  ///
  /// Each wave only contains targets whose dependencies all belong to
  /// earlier waves. Within a wave, targets keep topological order.
  pub fn build_waves(&self) -> Vec<Vec<TargetId>> {
    let mut level: HashMap<NodeIndex, usize> = HashMap::with_capacity(self.order.len());
    let mut waves: Vec<Vec<TargetId>> = Vec::new();

    for id in &self.order {
      let idx = self.nodes[id];
      let wave = self
        .graph
        .neighbors_directed(idx, Direction::Incoming)
        .filter_map(|dep| level.get(&dep))
        .map(|l| l + 1)
        .max()
        .unwrap_or(0);
      level.insert(idx, wave);

      if waves.len() <= wave {
        waves.resize_with(wave + 1, Vec::new);
      }
      waves[wave].push(id.clone());
    }

    waves
  }

  fn neighbors(&self, id: &TargetId, direction: Direction) -> Vec<TargetId> {
    let Some(&idx) = self.nodes.get(id) else {
      return Vec::new();
    };
    let adjacent: HashSet<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
    self.in_order(|n| adjacent.contains(&n))
  }

  fn in_order(&self, keep: impl Fn(NodeIndex) -> bool) -> Vec<TargetId> {
    self
      .order
      .iter()
      .filter(|id| keep(self.nodes[*id]))
      .cloned()
      .collect()
  }
}
