use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ApiObject, ObjectKind};

/// Objects of one kind, keyed by name.
pub type TypedObjectSet = BTreeMap<String, ApiObject>;

/// Objects keyed by kind, then name. A (kind, name) pair appears at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ObjectSet(BTreeMap<ObjectKind, TypedObjectSet>);

impl ObjectSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Inserts `obj`, replacing any object of the same kind and name.
  pub fn add(&mut self, obj: ApiObject) {
    self.set_for_kind_mut(obj.kind()).insert(obj.meta.name.clone(), obj);
  }

  /// Adds every object of `set`, which must all be of `kind`.
  pub fn add_set(&mut self, kind: ObjectKind, set: TypedObjectSet) {
    self.set_for_kind_mut(kind).extend(set);
  }

  pub fn set_for_kind(&self, kind: ObjectKind) -> Option<&TypedObjectSet> {
    self.0.get(&kind)
  }

  pub fn set_for_kind_mut(&mut self, kind: ObjectKind) -> &mut TypedObjectSet {
    self.0.entry(kind).or_default()
  }

  pub fn get(&self, kind: ObjectKind, name: &str) -> Option<&ApiObject> {
    self.0.get(&kind).and_then(|set| set.get(name))
  }

  pub fn contains(&self, kind: ObjectKind, name: &str) -> bool {
    self.get(kind, name).is_some()
  }

  pub fn iter(&self) -> impl Iterator<Item = &ApiObject> {
    self.0.values().flat_map(BTreeMap::values)
  }

  pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ApiObject> {
    self.0.values_mut().flat_map(BTreeMap::values_mut)
  }

  pub fn len(&self) -> usize {
    self.0.values().map(BTreeMap::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl FromIterator<ApiObject> for ObjectSet {
  fn from_iter<I: IntoIterator<Item = ApiObject>>(iter: I) -> Self {
    let mut set = ObjectSet::new();
    for obj in iter {
      set.add(obj);
    }
    set
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::object::{ImageMapSpec, ObjectSpec};

  fn image_map(name: &str) -> ApiObject {
    ApiObject::new(
      name,
      ObjectSpec::ImageMap(ImageMapSpec {
        selector: name.to_string(),
      }),
    )
  }

  #[test]
  fn one_object_per_kind_and_name() {
    let mut set: ObjectSet = [image_map("a"), image_map("b")].into_iter().collect();
    set.add(image_map("a"));
    set.add(ApiObject::new("a", ObjectSpec::ConfigMap(Default::default())));

    assert_eq!(set.len(), 3);
    assert!(set.contains(ObjectKind::ConfigMap, "a"));
    assert_eq!(set.set_for_kind(ObjectKind::ImageMap).unwrap().len(), 2);
    assert!(set.get(ObjectKind::Cmd, "a").is_none());
  }

  #[test]
  fn empty_kind_sets_count_as_empty() {
    let mut set = ObjectSet::new();
    set.set_for_kind_mut(ObjectKind::Cmd);
    assert!(set.is_empty());
  }
}
