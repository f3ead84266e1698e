//! The source-list coordinator.
//!
//! A [`SourceList`] owns an ordered stack of sources and cascades every
//! operation across them: the first source able to answer authoritatively
//! wins, results propagate backward into earlier-visited local sources as a
//! write-through cache, and request types gate which tiers may answer at
//! all. Unmatched sources still ride along in each traversal: a local
//! source bypassed by a refresh is exactly the one that wants the refreshed
//! answer written into it.
//!
//! Failures are fail-fast: the first failing matched source aborts the
//! traversal and nothing is backfilled. A failed backfill, by contrast, is
//! not a failed read; it is logged and the read resolves normally.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::bindings::{Bindings, Entity};
use crate::details::{RequestDetails, RequestType};
use crate::outcome::{
  BulkRead, BulkReadResult, DeleteResult, Failure, ReadResult, WriteListResult, WriteResult,
};
use crate::source::{Source, SourceKind};

/// Ordered coordinator over a stack of sources sharing one set of bindings.
///
/// Each source belongs to exactly one list. Calls are serialized per list:
/// a traversal's backfills land before the next call starts, so two
/// interleaved requests cannot overwrite each other's fresher data.
pub struct SourceList<T: Entity> {
  bindings: Arc<Bindings<T>>,
  sources: Vec<Box<dyn Source<T>>>,
  evict_unfulfilled: bool,
  gate: Mutex<()>,
}

impl<T: Entity> SourceList<T> {
  /// Build a list over `sources`, injecting `bindings` into any source
  /// that does not already carry them.
  pub fn new(bindings: Arc<Bindings<T>>, sources: Vec<Box<dyn Source<T>>>) -> Self {
    for source in &sources {
      source.attach_bindings(Arc::clone(&bindings));
    }
    Self {
      bindings,
      sources,
      evict_unfulfilled: true,
      gate: Mutex::new(()),
    }
  }

  /// Whether a non-local by-id probe that leaves ids unfulfilled evicts
  /// them from every visited local source. Defaults to true: the server's
  /// answer is treated as globally authoritative.
  pub fn evict_unfulfilled(mut self, evict: bool) -> Self {
    self.evict_unfulfilled = evict;
    self
  }

  pub fn bindings(&self) -> &Arc<Bindings<T>> {
    &self.bindings
  }

  /// Read one entity by id, cascading until a source answers.
  pub async fn get_by_id(&self, id: &str, details: &RequestDetails) -> ReadResult<T> {
    details.assert_empty("get_by_id");
    let _gate = self.gate.lock().await;

    let mut empty_sources: Vec<&dyn Source<T>> = Vec::new();
    for source in &self.sources {
      if !details.request_type().accepts(source.kind()) {
        empty_sources.push(source.as_ref());
        continue;
      }
      match source.get_by_id(id, details).await? {
        Some(item) => {
          for previous in &empty_sources {
            if previous.kind() != SourceKind::Local {
              continue;
            }
            if let Err(failure) = previous.set_item(item.clone(), details).await {
              warn!(id, %failure, "backfill write failed");
            }
          }
          return Ok(Some(item));
        }
        None => empty_sources.push(source.as_ref()),
      }
    }
    Ok(None)
  }

  /// Read several entities by id, completing partial hits from later
  /// sources and backfilling everything learned into earlier ones.
  ///
  /// When the request type permits the network and ids remain unfulfilled
  /// after the cascade, those ids are confirmed gone and (unless
  /// [`evict_unfulfilled`](Self::evict_unfulfilled) is off) evicted from
  /// every visited local source.
  pub async fn get_by_ids(&self, ids: &[String], details: &RequestDetails) -> BulkReadResult<T> {
    details.assert_empty("get_by_ids");
    let _gate = self.gate.lock().await;

    let mut missing: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for id in ids {
      if seen.insert(id.clone()) {
        missing.push(id.clone());
      }
    }

    let mut items: Vec<T> = Vec::new();
    let mut visited: Vec<usize> = Vec::new();
    let mut backfill: BTreeMap<usize, Vec<T>> = BTreeMap::new();

    for (index, source) in self.sources.iter().enumerate() {
      if missing.is_empty() {
        break;
      }
      if !details.request_type().accepts(source.kind()) {
        visited.push(index);
        continue;
      }

      let found = source.get_by_ids(&missing, details).await?;
      for previous in &visited {
        backfill
          .entry(*previous)
          .or_default()
          .extend(found.items.iter().cloned());
      }
      let found_ids: HashSet<String> = found.items.iter().filter_map(|item| item.id()).collect();
      missing.retain(|id| !found_ids.contains(id));
      items.extend(found.items);
      visited.push(index);
    }

    let evict = self.evict_unfulfilled
      && details.request_type() != RequestType::Local
      && !missing.is_empty();
    let missing_ids: HashSet<String> = missing.into_iter().collect();

    for (index, pending) in backfill {
      let source = self.sources[index].as_ref();
      if source.kind() != SourceKind::Local {
        continue;
      }
      for item in pending {
        if let Err(failure) = source.set_item(item, details).await {
          warn!(%failure, "backfill write failed");
        }
      }
      if evict {
        // Ids a non-local probe could not produce are confirmed gone.
        if let Err(failure) = source.delete_ids(&missing_ids).await {
          warn!(%failure, "eviction of unfulfilled ids failed");
        }
      }
    }

    Ok(BulkRead { items, missing_ids })
  }

  /// Read a list for the request's filter and pagination, cascading until
  /// a source produces a non-empty answer.
  pub async fn get_items(&self, details: &RequestDetails) -> BulkReadResult<T> {
    let _gate = self.gate.lock().await;

    if details.request_type() == RequestType::AllLocal {
      return self.all_local(details).await;
    }

    let mut empty_sources: Vec<&dyn Source<T>> = Vec::new();
    for source in &self.sources {
      if !details.request_type().accepts(source.kind()) {
        empty_sources.push(source.as_ref());
        continue;
      }

      let result = source.get_items(details).await?;
      if result.items.is_empty() {
        empty_sources.push(source.as_ref());
        continue;
      }

      debug!(count = result.items.len(), "list request satisfied");
      for previous in &empty_sources {
        if previous.kind() != SourceKind::Local {
          continue;
        }
        if let Err(failure) = previous.set_items(result.items.clone(), details).await {
          warn!(%failure, "backfill write failed");
        }
      }
      return Ok(result);
    }

    // Every source came up empty. A non-local probe that found nothing
    // marks the request as known-empty in each bypassed local source.
    if matches!(
      details.request_type(),
      RequestType::Global | RequestType::Refresh
    ) {
      for source in &empty_sources {
        if source.kind() != SourceKind::Local {
          continue;
        }
        if let Err(failure) = source.set_items(Vec::new(), details).await {
          warn!(%failure, "known-empty marking failed");
        }
      }
    }
    Ok(BulkRead::empty())
  }

  /// Union of every local source's items store, ignoring request caches.
  async fn all_local(&self, details: &RequestDetails) -> BulkReadResult<T> {
    let mut merged: Vec<T> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for source in &self.sources {
      if source.kind() != SourceKind::Local {
        continue;
      }
      let result = source.get_items(details).await?;
      for item in result.items {
        if let Some(id) = item.id() {
          if seen.insert(id) {
            merged.push(item);
          }
        }
      }
    }
    Ok(BulkRead {
      items: merged,
      missing_ids: HashSet::new(),
    })
  }

  /// Write one entity through every matched source.
  ///
  /// An entity without an id traverses the stack in reverse so a remote
  /// source assigns the id before local sources persist it; the assigned
  /// id propagates through the rest of the traversal.
  pub async fn set_item(&self, item: T, details: &RequestDetails) -> WriteResult<T> {
    let _gate = self.gate.lock().await;

    let had_id = item.id().is_some();
    let order: Vec<&dyn Source<T>> = if had_id {
      self.sources.iter().map(|s| s.as_ref()).collect()
    } else {
      self.sources.iter().rev().map(|s| s.as_ref()).collect()
    };

    let mut current = item;
    for source in order {
      if !details.request_type().accepts(source.kind()) {
        continue;
      }
      let result = source.set_item(current.clone(), details).await?;
      if !had_id {
        current = result;
        if current.id().is_none() {
          return Err(Failure::server_error("Failed to generate Id"));
        }
      }
    }
    Ok(current)
  }

  /// Write a list through every matched source, recording it under the
  /// request's cache identity.
  ///
  /// # Panics
  ///
  /// Panics unless the request type is `Local`: bulk writes cannot be
  /// pushed to a remote, so remote creations go one-by-one via
  /// [`set_item`](Self::set_item).
  pub async fn set_items(&self, items: Vec<T>, details: &RequestDetails) -> WriteListResult<T> {
    assert!(
      details.request_type() == RequestType::Local,
      "set_items on a source list requires a Local request type"
    );
    let _gate = self.gate.lock().await;

    let mut current = items;
    for source in &self.sources {
      if !details.request_type().accepts(source.kind()) {
        continue;
      }
      current = source.set_items(current, details).await?;
    }
    Ok(current)
  }

  /// Delete through every matched source, fail-fast.
  pub async fn delete(&self, id: &str, details: &RequestDetails) -> DeleteResult {
    let _gate = self.gate.lock().await;

    for source in &self.sources {
      if !details.request_type().accepts(source.kind()) {
        continue;
      }
      source.delete(id, details).await?;
    }
    Ok(())
  }

  /// Wipe every local source's items and request caches.
  pub async fn clear(&self) -> DeleteResult {
    let _gate = self.gate.lock().await;

    for source in &self.sources {
      if source.kind() != SourceKind::Local {
        continue;
      }
      source.clear().await?;
    }
    Ok(())
  }

  /// Drop the request's cache entry (all pages of it, when paginated) from
  /// every local source.
  pub async fn clear_for_request(&self, details: &RequestDetails) -> DeleteResult {
    let _gate = self.gate.lock().await;

    for source in &self.sources {
      if source.kind() != SourceKind::Local {
        continue;
      }
      source.clear_for_request(details).await?;
    }
    Ok(())
  }
}
