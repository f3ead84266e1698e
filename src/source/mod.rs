//! Sources: the tiers a [`SourceList`](crate::list::SourceList) cascades over.
//!
//! Every tier, on-device store or remote backend, exposes the same
//! potentially-suspending operations. The coordinator only distinguishes
//! tiers by [`SourceKind`], which drives request-type gating and decides
//! which sources receive write-through backfills.

mod batch;
mod local;
mod remote;

pub use local::LocalSource;
pub use remote::{RemoteOptions, RestSource};

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::bindings::{Bindings, Entity};
use crate::details::RequestDetails;
use crate::outcome::{BulkReadResult, DeleteResult, ReadResult, WriteListResult, WriteResult};

/// Where a source keeps its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
  /// On-device; answers instantly and is a backfill target.
  Local,
  /// Over the network; authoritative but never backfilled.
  Remote,
}

/// A provider of entities of type `T`.
///
/// By-id operations take request details only for gating and overwrite
/// semantics; they must be passed empty details (no filter, no pagination).
#[async_trait]
pub trait Source<T: Entity>: Send + Sync {
  fn kind(&self) -> SourceKind;

  /// Offered by the owning source list at construction. Sources that
  /// already carry bindings keep them; the default does nothing.
  fn attach_bindings(&self, _bindings: Arc<Bindings<T>>) {}

  async fn get_by_id(&self, id: &str, details: &RequestDetails) -> ReadResult<T>;

  async fn get_by_ids(&self, ids: &[String], details: &RequestDetails) -> BulkReadResult<T>;

  async fn get_items(&self, details: &RequestDetails) -> BulkReadResult<T>;

  async fn set_item(&self, item: T, details: &RequestDetails) -> WriteResult<T>;

  async fn set_items(&self, items: Vec<T>, details: &RequestDetails) -> WriteListResult<T>;

  async fn delete(&self, id: &str, details: &RequestDetails) -> DeleteResult;

  /// Bulk eviction, including the invalidation sweep over request caches.
  /// Only meaningful on local sources.
  async fn delete_ids(&self, ids: &HashSet<String>) -> DeleteResult;

  async fn clear(&self) -> DeleteResult;

  async fn clear_for_request(&self, details: &RequestDetails) -> DeleteResult;
}
