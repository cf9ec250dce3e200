//! Persistence for generated objects.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use super::{ApiObject, ObjectKind, OwnerRef};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
  /// The store's cache has not started yet; retry shortly.
  #[error("object store cache not started")]
  NotReady,

  #[error("{kind} \"{name}\" not found")]
  NotFound { kind: ObjectKind, name: String },

  #[error("{kind} \"{name}\" already exists")]
  AlreadyExists { kind: ObjectKind, name: String },

  /// Optimistic concurrency failure: the object changed since it was read.
  #[error("conflict on {kind} \"{name}\": expected version {expected}, found {actual}")]
  Conflict {
    kind: ObjectKind,
    name: String,
    expected: u64,
    actual: u64,
  },
}

/// Where generated objects live.
///
/// Implementations must report [`StoreError::NotReady`] distinctly from
/// other failures so callers can wait for the store to warm up.
pub trait ObjectStore: Send + Sync {
  fn get(&self, kind: ObjectKind, name: &str) -> Result<ApiObject, StoreError>;

  /// Objects of `kind` owned by `owner`.
  fn list_owned(&self, kind: ObjectKind, owner: &OwnerRef) -> Result<Vec<ApiObject>, StoreError>;

  /// Stores a new object and returns it with its assigned version.
  fn create(&self, obj: ApiObject) -> Result<ApiObject, StoreError>;

  /// Replaces an object. `obj.meta.resource_version` must match the stored one.
  fn update(&self, obj: ApiObject) -> Result<ApiObject, StoreError>;

  fn delete(&self, kind: ObjectKind, name: &str) -> Result<(), StoreError>;
}

/// Mutating calls made against a [`MemoryObjectStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreCalls {
  pub creates: usize,
  pub updates: usize,
  pub deletes: usize,
}

impl StoreCalls {
  pub fn total(&self) -> usize {
    self.creates + self.updates + self.deletes
  }
}

#[derive(Debug, Default)]
struct Inner {
  objects: BTreeMap<(ObjectKind, String), ApiObject>,
  last_version: u64,
  /// Lists that fail with `NotReady` before the cache counts as started.
  warmup_lists: usize,
  not_ready: bool,
  calls: StoreCalls,
}

/// An in-process object store.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
  inner: Mutex<Inner>,
}

impl MemoryObjectStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// A store that reports `NotReady` until [`MemoryObjectStore::mark_ready`].
  pub fn not_ready() -> Self {
    let store = Self::default();
    store.lock().not_ready = true;
    store
  }

  /// A store whose first `lists` list calls report `NotReady`.
  pub fn with_warmup(lists: usize) -> Self {
    let store = Self::default();
    store.lock().warmup_lists = lists;
    store
  }

  pub fn mark_ready(&self) {
    let mut inner = self.lock();
    inner.not_ready = false;
    inner.warmup_lists = 0;
  }

  pub fn calls(&self) -> StoreCalls {
    self.lock().calls
  }

  pub fn reset_calls(&self) {
    self.lock().calls = StoreCalls::default();
  }

  /// Every stored object, ordered by kind then name.
  pub fn objects(&self) -> Vec<ApiObject> {
    self.lock().objects.values().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.lock().objects.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl Inner {
  fn check_ready(&mut self) -> Result<(), StoreError> {
    if self.not_ready {
      return Err(StoreError::NotReady);
    }
    Ok(())
  }

  fn next_version(&mut self) -> u64 {
    self.last_version += 1;
    self.last_version
  }
}

impl ObjectStore for MemoryObjectStore {
  fn get(&self, kind: ObjectKind, name: &str) -> Result<ApiObject, StoreError> {
    let mut inner = self.lock();
    inner.check_ready()?;
    inner
      .objects
      .get(&(kind, name.to_string()))
      .cloned()
      .ok_or_else(|| StoreError::NotFound {
        kind,
        name: name.to_string(),
      })
  }

  fn list_owned(&self, kind: ObjectKind, owner: &OwnerRef) -> Result<Vec<ApiObject>, StoreError> {
    let mut inner = self.lock();
    inner.check_ready()?;
    if inner.warmup_lists > 0 {
      inner.warmup_lists -= 1;
      return Err(StoreError::NotReady);
    }
    Ok(
      inner
        .objects
        .values()
        .filter(|obj| obj.kind() == kind && obj.is_owned_by(owner))
        .cloned()
        .collect(),
    )
  }

  fn create(&self, mut obj: ApiObject) -> Result<ApiObject, StoreError> {
    let mut inner = self.lock();
    inner.check_ready()?;
    inner.calls.creates += 1;

    let key = (obj.kind(), obj.meta.name.clone());
    if inner.objects.contains_key(&key) {
      return Err(StoreError::AlreadyExists {
        kind: key.0,
        name: key.1,
      });
    }
    obj.meta.resource_version = inner.next_version();
    inner.objects.insert(key, obj.clone());
    Ok(obj)
  }

  fn update(&self, mut obj: ApiObject) -> Result<ApiObject, StoreError> {
    let mut inner = self.lock();
    inner.check_ready()?;
    inner.calls.updates += 1;

    let key = (obj.kind(), obj.meta.name.clone());
    let actual = match inner.objects.get(&key) {
      Some(existing) => existing.meta.resource_version,
      None => {
        return Err(StoreError::NotFound {
          kind: key.0,
          name: key.1,
        });
      }
    };
    if actual != obj.meta.resource_version {
      return Err(StoreError::Conflict {
        kind: key.0,
        name: key.1,
        expected: obj.meta.resource_version,
        actual,
      });
    }
    obj.meta.resource_version = inner.next_version();
    inner.objects.insert(key, obj.clone());
    Ok(obj)
  }

  fn delete(&self, kind: ObjectKind, name: &str) -> Result<(), StoreError> {
    let mut inner = self.lock();
    inner.check_ready()?;
    inner.calls.deletes += 1;

    match inner.objects.remove(&(kind, name.to_string())) {
      Some(_) => Ok(()),
      None => Err(StoreError::NotFound {
        kind,
        name: name.to_string(),
      }),
    }
  }
}
