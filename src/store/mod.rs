//! Persistence contracts consumed by the local source.
//!
//! Two disjoint stores back a [`LocalSource`](crate::source::LocalSource):
//! an items store mapping id → entity, and a request-cache store mapping
//! request fingerprints → sets of ids (with a two-level paginated variant
//! grouping every page of one logical request under a shared outer key).
//! Implementations may be purely in-memory or durable; the core programs
//! against the same potentially-suspending interface either way.

mod memory;
mod sqlite;

pub use memory::{MemoryItemsStore, MemoryRequestCacheStore};
pub use sqlite::{SqliteItemsStore, SqliteRequestCacheStore};

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::bindings::Entity;
use crate::outcome::Failure;

/// A failed store operation. Store errors are infrastructure conditions,
/// distinct from the caller-facing [`Failure`] kinds; they cross the source
/// boundary as `Unexpected`.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store backend error: {0}")]
  Backend(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("entity has no id")]
  MissingId,
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for Failure {
  fn from(err: StoreError) -> Self {
    Failure::unexpected(err.to_string())
  }
}

/// id → entity persistence.
#[async_trait]
pub trait ItemsStore<T: Entity>: Send + Sync {
  /// Remove every entity.
  async fn clear(&self) -> StoreResult<()>;

  async fn get(&self, id: &str) -> StoreResult<Option<T>>;

  /// Fetch the subset of `ids` that is present, in no particular order.
  async fn get_many(&self, ids: &[String]) -> StoreResult<Vec<T>>;

  /// Every stored entity. Feeds all-local reads, which bypass request caches.
  async fn all(&self) -> StoreResult<Vec<T>>;

  /// Insert or replace one entity. With `overwrite` false the call is a
  /// no-op when the id is already present. Fails with
  /// [`StoreError::MissingId`] when the entity has no id.
  async fn put(&self, item: T, overwrite: bool) -> StoreResult<()>;

  async fn put_many(&self, items: Vec<T>, overwrite: bool) -> StoreResult<()>;

  async fn delete_many(&self, ids: &HashSet<String>) -> StoreResult<()>;
}

/// Request-fingerprint → id-set persistence, in two disjoint maps.
///
/// The unpaginated map is keyed by a request's cache key. The paginated map
/// is keyed twice: the outer key is the request's pagination-stripped cache
/// key (shared by all pages of one logical query), each inner key is one
/// page's full cache key.
///
/// The empty set is never stored: setting an empty id-set removes the entry,
/// so an absent key always means "never observed", not "observed empty".
#[async_trait]
pub trait RequestCacheStore: Send + Sync {
  async fn set(&self, key: &str, ids: HashSet<String>) -> StoreResult<()>;

  async fn get(&self, key: &str) -> StoreResult<Option<HashSet<String>>>;

  async fn clear(&self, key: &str) -> StoreResult<()>;

  async fn keys(&self) -> StoreResult<Vec<String>>;

  async fn set_paginated(&self, outer: &str, inner: &str, ids: HashSet<String>) -> StoreResult<()>;

  async fn get_paginated(&self, outer: &str, inner: &str) -> StoreResult<Option<HashSet<String>>>;

  /// Remove every page of the group at `outer`.
  async fn clear_paginated(&self, outer: &str) -> StoreResult<()>;

  async fn outer_keys(&self) -> StoreResult<Vec<String>>;

  async fn inner_keys(&self, outer: &str) -> StoreResult<Vec<String>>;

  async fn clear_all(&self) -> StoreResult<()>;
}
