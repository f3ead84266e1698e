//! In-memory store implementations.
//!
//! HashMaps guarded by `tokio::sync::RwLock`: reads are concurrent, writes
//! serialize per map. Nothing survives a process restart; these back tests,
//! short-lived caches, and tiers layered in front of a durable store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ItemsStore, RequestCacheStore, StoreError, StoreResult};
use crate::bindings::Entity;

/// In-memory id → entity store.
pub struct MemoryItemsStore<T> {
  items: Arc<RwLock<HashMap<String, T>>>,
}

impl<T> MemoryItemsStore<T> {
  pub fn new() -> Self {
    Self {
      items: Arc::new(RwLock::new(HashMap::new())),
    }
  }
}

impl<T> Default for MemoryItemsStore<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Clone for MemoryItemsStore<T> {
  fn clone(&self) -> Self {
    Self {
      items: Arc::clone(&self.items),
    }
  }
}

#[async_trait]
impl<T: Entity> ItemsStore<T> for MemoryItemsStore<T> {
  async fn clear(&self) -> StoreResult<()> {
    self.items.write().await.clear();
    Ok(())
  }

  async fn get(&self, id: &str) -> StoreResult<Option<T>> {
    Ok(self.items.read().await.get(id).cloned())
  }

  async fn get_many(&self, ids: &[String]) -> StoreResult<Vec<T>> {
    let items = self.items.read().await;
    Ok(ids.iter().filter_map(|id| items.get(id).cloned()).collect())
  }

  async fn all(&self) -> StoreResult<Vec<T>> {
    Ok(self.items.read().await.values().cloned().collect())
  }

  async fn put(&self, item: T, overwrite: bool) -> StoreResult<()> {
    let id = item.id().ok_or(StoreError::MissingId)?;
    let mut items = self.items.write().await;
    if overwrite || !items.contains_key(&id) {
      items.insert(id, item);
    }
    Ok(())
  }

  async fn put_many(&self, new_items: Vec<T>, overwrite: bool) -> StoreResult<()> {
    let mut items = self.items.write().await;
    for item in new_items {
      let id = item.id().ok_or(StoreError::MissingId)?;
      if overwrite || !items.contains_key(&id) {
        items.insert(id, item);
      }
    }
    Ok(())
  }

  async fn delete_many(&self, ids: &HashSet<String>) -> StoreResult<()> {
    let mut items = self.items.write().await;
    for id in ids {
      items.remove(id);
    }
    Ok(())
  }
}

/// In-memory request-fingerprint → id-set store.
pub struct MemoryRequestCacheStore {
  unpaginated: Arc<RwLock<HashMap<String, HashSet<String>>>>,
  paginated: Arc<RwLock<HashMap<String, HashMap<String, HashSet<String>>>>>,
}

impl MemoryRequestCacheStore {
  pub fn new() -> Self {
    Self {
      unpaginated: Arc::new(RwLock::new(HashMap::new())),
      paginated: Arc::new(RwLock::new(HashMap::new())),
    }
  }
}

impl Default for MemoryRequestCacheStore {
  fn default() -> Self {
    Self::new()
  }
}

impl Clone for MemoryRequestCacheStore {
  fn clone(&self) -> Self {
    Self {
      unpaginated: Arc::clone(&self.unpaginated),
      paginated: Arc::clone(&self.paginated),
    }
  }
}

#[async_trait]
impl RequestCacheStore for MemoryRequestCacheStore {
  async fn set(&self, key: &str, ids: HashSet<String>) -> StoreResult<()> {
    let mut map = self.unpaginated.write().await;
    if ids.is_empty() {
      map.remove(key);
    } else {
      map.insert(key.to_string(), ids);
    }
    Ok(())
  }

  async fn get(&self, key: &str) -> StoreResult<Option<HashSet<String>>> {
    Ok(self.unpaginated.read().await.get(key).cloned())
  }

  async fn clear(&self, key: &str) -> StoreResult<()> {
    self.unpaginated.write().await.remove(key);
    Ok(())
  }

  async fn keys(&self) -> StoreResult<Vec<String>> {
    Ok(self.unpaginated.read().await.keys().cloned().collect())
  }

  async fn set_paginated(&self, outer: &str, inner: &str, ids: HashSet<String>) -> StoreResult<()> {
    let mut map = self.paginated.write().await;
    if ids.is_empty() {
      if let Some(group) = map.get_mut(outer) {
        group.remove(inner);
        if group.is_empty() {
          map.remove(outer);
        }
      }
    } else {
      map
        .entry(outer.to_string())
        .or_default()
        .insert(inner.to_string(), ids);
    }
    Ok(())
  }

  async fn get_paginated(&self, outer: &str, inner: &str) -> StoreResult<Option<HashSet<String>>> {
    Ok(
      self
        .paginated
        .read()
        .await
        .get(outer)
        .and_then(|group| group.get(inner))
        .cloned(),
    )
  }

  async fn clear_paginated(&self, outer: &str) -> StoreResult<()> {
    self.paginated.write().await.remove(outer);
    Ok(())
  }

  async fn outer_keys(&self) -> StoreResult<Vec<String>> {
    Ok(self.paginated.read().await.keys().cloned().collect())
  }

  async fn inner_keys(&self, outer: &str) -> StoreResult<Vec<String>> {
    Ok(
      self
        .paginated
        .read()
        .await
        .get(outer)
        .map(|group| group.keys().cloned().collect())
        .unwrap_or_default(),
    )
  }

  async fn clear_all(&self) -> StoreResult<()> {
    self.unpaginated.write().await.clear();
    self.paginated.write().await.clear();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::{Deserialize, Serialize};

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Note {
    id: Option<String>,
    msg: String,
  }

  impl Entity for Note {
    fn id(&self) -> Option<String> {
      self.id.clone()
    }
  }

  fn note(id: &str, msg: &str) -> Note {
    Note {
      id: Some(id.to_string()),
      msg: msg.to_string(),
    }
  }

  fn ids(values: &[&str]) -> HashSet<String> {
    values.iter().map(|s| s.to_string()).collect()
  }

  #[tokio::test]
  async fn test_put_respects_overwrite_flag() {
    let store = MemoryItemsStore::new();
    store.put(note("a", "first"), true).await.unwrap();
    store.put(note("a", "second"), false).await.unwrap();
    assert_eq!(store.get("a").await.unwrap().unwrap().msg, "first");

    store.put(note("a", "third"), true).await.unwrap();
    assert_eq!(store.get("a").await.unwrap().unwrap().msg, "third");
  }

  #[tokio::test]
  async fn test_put_without_id_fails() {
    let store = MemoryItemsStore::new();
    let result = store
      .put(
        Note {
          id: None,
          msg: "x".to_string(),
        },
        true,
      )
      .await;
    assert!(matches!(result, Err(StoreError::MissingId)));
  }

  #[tokio::test]
  async fn test_get_many_returns_present_subset() {
    let store = MemoryItemsStore::new();
    store.put(note("a", "A"), true).await.unwrap();
    let found = store
      .get_many(&["a".to_string(), "b".to_string()])
      .await
      .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id.as_deref(), Some("a"));
  }

  #[tokio::test]
  async fn test_delete_many_and_clear() {
    let store = MemoryItemsStore::new();
    store
      .put_many(vec![note("a", "A"), note("b", "B")], true)
      .await
      .unwrap();
    store.delete_many(&ids(&["a"])).await.unwrap();
    assert!(store.get("a").await.unwrap().is_none());
    assert!(store.get("b").await.unwrap().is_some());

    store.clear().await.unwrap();
    assert!(store.all().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_empty_set_is_never_stored() {
    let store = MemoryRequestCacheStore::new();
    store.set("k", ids(&["a"])).await.unwrap();
    store.set("k", HashSet::new()).await.unwrap();
    assert!(store.get("k").await.unwrap().is_none());
    assert!(store.keys().await.unwrap().is_empty());

    store.set_paginated("o", "i", ids(&["a"])).await.unwrap();
    store.set_paginated("o", "i", HashSet::new()).await.unwrap();
    assert!(store.get_paginated("o", "i").await.unwrap().is_none());
    assert!(store.outer_keys().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_clear_paginated_drops_whole_group() {
    let store = MemoryRequestCacheStore::new();
    store.set_paginated("o", "p1", ids(&["a"])).await.unwrap();
    store.set_paginated("o", "p2", ids(&["b"])).await.unwrap();
    assert_eq!(store.inner_keys("o").await.unwrap().len(), 2);

    store.clear_paginated("o").await.unwrap();
    assert!(store.get_paginated("o", "p1").await.unwrap().is_none());
    assert!(store.get_paginated("o", "p2").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_paginated_groups_are_disjoint_from_unpaginated() {
    let store = MemoryRequestCacheStore::new();
    store.set("k", ids(&["a"])).await.unwrap();
    store.set_paginated("k", "p", ids(&["b"])).await.unwrap();

    assert_eq!(store.get("k").await.unwrap().unwrap(), ids(&["a"]));
    assert_eq!(
      store.get_paginated("k", "p").await.unwrap().unwrap(),
      ids(&["b"])
    );

    store.clear_all().await.unwrap();
    assert!(store.get("k").await.unwrap().is_none());
    assert!(store.get_paginated("k", "p").await.unwrap().is_none());
  }
}
