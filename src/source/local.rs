//! The on-device caching engine.
//!
//! A [`LocalSource`] glues an items store to a request-cache store and
//! enforces the request-scoped caching rules:
//!
//! - list reads resolve through the request cache (paginated or not), never
//!   by scanning the items store;
//! - single-item writes never touch the request cache (one item belongs to
//!   many possible queries, so there is no coherent key to file it under);
//! - list writes record the id-set under the request's cache identity, and
//!   an empty list write marks the request as known-empty by clearing it;
//! - deletions sweep the id out of every cache entry, dropping entries that
//!   empty out, so no entry ever holds an empty set.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::debug;

use super::{Source, SourceKind};
use crate::bindings::{Bindings, Entity};
use crate::details::{RequestDetails, RequestType};
use crate::outcome::{
  BulkRead, BulkReadResult, DeleteResult, Failure, ReadResult, WriteListResult, WriteResult,
};
use crate::store::{
  ItemsStore, MemoryItemsStore, MemoryRequestCacheStore, RequestCacheStore, SqliteItemsStore,
  SqliteRequestCacheStore,
};

struct Inner<T, I, C> {
  items: I,
  cache: C,
  bindings: OnceLock<Arc<Bindings<T>>>,
}

/// A local tier over an items store and a request-cache store.
///
/// Cloning shares the underlying stores, so a handle kept by the caller
/// observes everything a source list does through its own clone.
pub struct LocalSource<T: Entity, I: ItemsStore<T>, C: RequestCacheStore> {
  inner: Arc<Inner<T, I, C>>,
}

impl<T: Entity, I: ItemsStore<T>, C: RequestCacheStore> Clone for LocalSource<T, I, C> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Entity> LocalSource<T, MemoryItemsStore<T>, MemoryRequestCacheStore> {
  /// Purely in-memory local source.
  pub fn in_memory() -> Self {
    Self::new(MemoryItemsStore::new(), MemoryRequestCacheStore::new())
  }
}

impl<T: Entity> LocalSource<T, SqliteItemsStore<T>, SqliteRequestCacheStore> {
  /// Durable local source at the given database path, namespaced by the
  /// bindings' list-URL path.
  pub fn sqlite(path: impl Into<std::path::PathBuf>, bindings: &Bindings<T>) -> Self {
    let path = path.into();
    Self::new(
      SqliteItemsStore::at(path.clone(), bindings.namespace()),
      SqliteRequestCacheStore::at(path, bindings.namespace()),
    )
  }
}

impl<T: Entity, I: ItemsStore<T>, C: RequestCacheStore> LocalSource<T, I, C> {
  pub fn new(items: I, cache: C) -> Self {
    Self {
      inner: Arc::new(Inner {
        items,
        cache,
        bindings: OnceLock::new(),
      }),
    }
  }

  /// Bind entity metadata up front instead of waiting for source-list
  /// injection. Needed for id minting on stand-alone use.
  pub fn with_bindings(self, bindings: Arc<Bindings<T>>) -> Self {
    let _ = self.inner.bindings.set(bindings);
    self
  }

  /// Remove `ids` from every cache entry in both maps, dropping entries
  /// that become empty. Key lists are snapshotted before any mutation so a
  /// suspension mid-sweep never observes a half-rewritten entry.
  async fn invalidate_cache_entries(&self, ids: &HashSet<String>) -> Result<(), Failure> {
    let cache = &self.inner.cache;

    let keys = cache.keys().await?;
    for key in keys {
      if let Some(cached) = cache.get(&key).await? {
        let remaining: HashSet<String> = cached.difference(ids).cloned().collect();
        if remaining.len() != cached.len() {
          cache.set(&key, remaining).await?;
        }
      }
    }

    let outer_keys = cache.outer_keys().await?;
    for outer in outer_keys {
      let inner_keys = cache.inner_keys(&outer).await?;
      for inner in inner_keys {
        if let Some(cached) = cache.get_paginated(&outer, &inner).await? {
          let remaining: HashSet<String> = cached.difference(ids).cloned().collect();
          if remaining.len() != cached.len() {
            cache.set_paginated(&outer, &inner, remaining).await?;
          }
        }
      }
    }

    Ok(())
  }
}

#[async_trait]
impl<T: Entity, I: ItemsStore<T>, C: RequestCacheStore> Source<T> for LocalSource<T, I, C> {
  fn kind(&self) -> SourceKind {
    SourceKind::Local
  }

  fn attach_bindings(&self, bindings: Arc<Bindings<T>>) {
    let _ = self.inner.bindings.set(bindings);
  }

  async fn get_by_id(&self, id: &str, details: &RequestDetails) -> ReadResult<T> {
    details.assert_empty("get_by_id");
    Ok(self.inner.items.get(id).await?)
  }

  async fn get_by_ids(&self, ids: &[String], details: &RequestDetails) -> BulkReadResult<T> {
    details.assert_empty("get_by_ids");
    let found = self.inner.items.get_many(ids).await?;
    let found_ids: HashSet<String> = found.iter().filter_map(|item| item.id()).collect();
    let missing_ids = ids
      .iter()
      .filter(|id| !found_ids.contains(*id))
      .cloned()
      .collect();
    Ok(BulkRead {
      items: found,
      missing_ids,
    })
  }

  async fn get_items(&self, details: &RequestDetails) -> BulkReadResult<T> {
    if details.request_type() == RequestType::AllLocal {
      let items = self.inner.items.all().await?;
      return Ok(BulkRead {
        items,
        missing_ids: HashSet::new(),
      });
    }

    let cached_ids = match details.pagination() {
      None => self.inner.cache.get(details.cache_key()).await?,
      Some(_) => {
        self
          .inner
          .cache
          .get_paginated(details.no_pagination_cache_key(), details.cache_key())
          .await?
      }
    };

    let Some(ids) = cached_ids else {
      debug!(key = details.cache_key(), "request cache miss");
      return Ok(BulkRead::empty());
    };
    debug_assert!(!ids.is_empty(), "request cache entries are never empty");

    let ids: Vec<String> = ids.into_iter().collect();
    let items = self.inner.items.get_many(&ids).await?;
    debug!(
      key = details.cache_key(),
      count = items.len(),
      "request cache hit"
    );
    Ok(BulkRead {
      items,
      missing_ids: HashSet::new(),
    })
  }

  async fn set_item(&self, item: T, details: &RequestDetails) -> WriteResult<T> {
    let item = match item.id() {
      Some(_) => item,
      None => {
        let minted = self
          .inner
          .bindings
          .get()
          .and_then(|bindings| bindings.assign_id(item));
        match minted {
          Some(minted) if minted.id().is_some() => minted,
          _ => {
            return Err(Failure::bad_request(
              "cannot store an entity without an id and no id minter is bound",
            ))
          }
        }
      }
    };

    // Single-item writes never touch the request cache.
    self
      .inner
      .items
      .put(item.clone(), details.should_overwrite())
      .await?;
    Ok(item)
  }

  async fn set_items(&self, items: Vec<T>, details: &RequestDetails) -> WriteListResult<T> {
    if items.is_empty() {
      // An empty list is how "known empty" is expressed: the request's
      // cache entry is dropped rather than stored empty.
      self.clear_for_request(details).await?;
      return Ok(items);
    }

    let item_ids: HashSet<String> = items
      .iter()
      .map(|item| {
        item
          .id()
          .expect("set_items requires every item to carry an id")
      })
      .collect();

    match details.pagination() {
      None => self.inner.cache.set(details.cache_key(), item_ids).await?,
      Some(_) => {
        self
          .inner
          .cache
          .set_paginated(
            details.no_pagination_cache_key(),
            details.cache_key(),
            item_ids,
          )
          .await?
      }
    }

    self
      .inner
      .items
      .put_many(items.clone(), details.should_overwrite())
      .await?;
    Ok(items)
  }

  async fn delete(&self, id: &str, details: &RequestDetails) -> DeleteResult {
    if !details.request_type().accepts(SourceKind::Local) {
      return Err(Failure::unexpected(
        "delete on a local source requires a request type that permits local sources",
      ));
    }

    let ids: HashSet<String> = std::iter::once(id.to_string()).collect();
    self.inner.items.delete_many(&ids).await?;
    self.invalidate_cache_entries(&ids).await
  }

  async fn delete_ids(&self, ids: &HashSet<String>) -> DeleteResult {
    if ids.is_empty() {
      return Ok(());
    }
    self.inner.items.delete_many(ids).await?;
    self.invalidate_cache_entries(ids).await
  }

  async fn clear(&self) -> DeleteResult {
    self.inner.items.clear().await?;
    self.inner.cache.clear_all().await?;
    Ok(())
  }

  async fn clear_for_request(&self, details: &RequestDetails) -> DeleteResult {
    match details.pagination() {
      None => self.inner.cache.clear(details.cache_key()).await?,
      // Clearing one page of a logical request drops the whole group: a
      // refreshed page 1 invalidates every other cached page.
      Some(_) => {
        self
          .inner
          .cache
          .clear_paginated(details.no_pagination_cache_key())
          .await?
      }
    }
    Ok(())
  }
}
