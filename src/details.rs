//! Request descriptors and their cache identity.
//!
//! Every read or write carries a [`RequestDetails`]: which tiers it may
//! touch, an optional filter, optional pagination, and overwrite behavior.
//! From the filter and pagination the details derive two stable SHA-256
//! cache keys: one identifying the exact request (filter + page), one with
//! pagination stripped, grouping every page of the same logical query.
//! Request type and overwrite flag are deliberately excluded from both keys
//! so that local and refresh requests for the same data share cache entries.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::source::SourceKind;

/// Which tiers a request may be satisfied by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
  /// Any source, local or remote.
  Global,
  /// Remote sources only; locals are bypassed (but still backfilled).
  Refresh,
  /// Local sources only; the network is never touched.
  Local,
  /// Local sources only, ignoring request caches: every entity in every
  /// local items store is returned.
  AllLocal,
}

impl RequestType {
  /// Whether a source of the given kind may answer this request.
  pub fn accepts(self, kind: SourceKind) -> bool {
    match self {
      Self::Global => true,
      Self::Refresh => kind == SourceKind::Remote,
      Self::Local | Self::AllLocal => kind == SourceKind::Local,
    }
  }
}

/// A client-side filter on a list request.
///
/// The cache only ever sees `cache_key()`; the wire only ever sees
/// `to_params()`. Two filters with different wire forms but identical cache
/// keys alias in the cache; the server may evaluate logic the client
/// cannot, so the two representations are allowed to diverge.
pub trait Filter: Send + Sync {
  /// Stable string identity of this filter for cache-key derivation.
  fn cache_key(&self) -> String;

  /// Query-parameter form for the remote transport. `None` means the filter
  /// cannot be expressed on the wire; a remote source given such a filter
  /// fails with `Unexpected`.
  fn to_params(&self) -> Option<BTreeMap<String, String>>;
}

/// A filter that is already a set of query parameters.
#[derive(Debug, Clone, Default)]
pub struct ParamFilter {
  params: BTreeMap<String, String>,
}

impl ParamFilter {
  pub fn new(params: BTreeMap<String, String>) -> Self {
    Self { params }
  }

  pub fn single(key: impl Into<String>, value: impl Into<String>) -> Self {
    let mut params = BTreeMap::new();
    params.insert(key.into(), value.into());
    Self { params }
  }
}

impl Filter for ParamFilter {
  fn cache_key(&self) -> String {
    // BTreeMap iteration is ordered, so the joined form is stable.
    self
      .params
      .iter()
      .map(|(k, v)| format!("{}={}", k, v))
      .collect::<Vec<_>>()
      .join("&")
  }

  fn to_params(&self) -> Option<BTreeMap<String, String>> {
    Some(self.params.clone())
  }
}

/// Page selector for list requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
  pub page: u32,
  pub page_size: u32,
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;

impl Pagination {
  pub fn page(page: u32) -> Self {
    Self {
      page,
      page_size: DEFAULT_PAGE_SIZE,
    }
  }

  pub fn with_page_size(mut self, page_size: u32) -> Self {
    self.page_size = page_size;
    self
  }

  fn cache_key(&self) -> String {
    format!("{}-{}", self.page_size, self.page)
  }
}

/// Placeholders hashed in place of an absent filter or pagination, so that
/// "no filter" and "no pagination" have a stable identity of their own.
const NO_FILTER_KEY: &str = "-cache-";
const NO_PAGINATION_KEY: &str = "-page-";

/// Immutable descriptor of a read or write request.
///
/// Cloning is cheap: the filter is shared and the derived keys are memoized.
#[derive(Clone)]
pub struct RequestDetails {
  request_type: RequestType,
  filter: Option<Arc<dyn Filter>>,
  pagination: Option<Pagination>,
  should_overwrite: bool,
  cache_key: OnceLock<String>,
  no_pagination_cache_key: OnceLock<String>,
}

impl RequestDetails {
  /// Descriptor for a read. Overwrite defaults to true: fetched data
  /// replaces what is cached.
  pub fn for_read(request_type: RequestType) -> Self {
    Self {
      request_type,
      filter: None,
      pagination: None,
      should_overwrite: true,
      cache_key: OnceLock::new(),
      no_pagination_cache_key: OnceLock::new(),
    }
  }

  /// Descriptor for a write.
  pub fn for_write(request_type: RequestType, should_overwrite: bool) -> Self {
    Self {
      should_overwrite,
      ..Self::for_read(request_type)
    }
  }

  pub fn with_filter(mut self, filter: impl Filter + 'static) -> Self {
    self.filter = Some(Arc::new(filter));
    self.reset_keys();
    self
  }

  pub fn with_pagination(mut self, pagination: Pagination) -> Self {
    self.pagination = Some(pagination);
    self.reset_keys();
    self
  }

  fn reset_keys(&mut self) {
    self.cache_key = OnceLock::new();
    self.no_pagination_cache_key = OnceLock::new();
  }

  pub fn request_type(&self) -> RequestType {
    self.request_type
  }

  pub fn filter(&self) -> Option<&Arc<dyn Filter>> {
    self.filter.as_ref()
  }

  pub fn pagination(&self) -> Option<Pagination> {
    self.pagination
  }

  pub fn should_overwrite(&self) -> bool {
    self.should_overwrite
  }

  /// True when neither filter nor pagination is set.
  pub fn is_empty(&self) -> bool {
    self.filter.is_none() && self.pagination.is_none()
  }

  /// By-id operations and item-store lookups must never be filtered or
  /// paginated; passing such details is a programmer error, not a runtime
  /// condition.
  ///
  /// # Panics
  ///
  /// Panics when a filter or pagination is present.
  pub fn assert_empty(&self, caller: &str) {
    assert!(
      self.is_empty(),
      "{} does not accept filtered or paginated request details",
      caller
    );
  }

  /// A copy of these details that only consults local sources. Everything
  /// else, including the derived cache keys, is preserved.
  pub fn local_copy(&self) -> Self {
    let mut copy = self.clone();
    copy.request_type = RequestType::Local;
    copy
  }

  fn filter_key(&self) -> String {
    self
      .filter
      .as_ref()
      .map(|f| f.cache_key())
      .unwrap_or_else(|| NO_FILTER_KEY.to_string())
  }

  /// Stable identity of this exact request: filter plus page. Hex SHA-256,
  /// independent of request type and overwrite flag.
  pub fn cache_key(&self) -> &str {
    self.cache_key.get_or_init(|| {
      let page_key = self
        .pagination
        .map(|p| p.cache_key())
        .unwrap_or_else(|| NO_PAGINATION_KEY.to_string());
      digest(&format!("{}-{}", self.filter_key(), page_key))
    })
  }

  /// Identity of the logical query with pagination stripped; every page of
  /// the same filtered request shares this key.
  pub fn no_pagination_cache_key(&self) -> &str {
    self
      .no_pagination_cache_key
      .get_or_init(|| digest(&format!("{}-{}", self.filter_key(), NO_PAGINATION_KEY)))
  }
}

impl PartialEq for RequestDetails {
  fn eq(&self, other: &Self) -> bool {
    self.request_type == other.request_type
      && self.should_overwrite == other.should_overwrite
      && self.pagination == other.pagination
      && self.filter.as_ref().map(|f| f.cache_key()) == other.filter.as_ref().map(|f| f.cache_key())
  }
}

impl std::fmt::Debug for RequestDetails {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RequestDetails")
      .field("request_type", &self.request_type)
      .field("filter", &self.filter.as_ref().map(|f| f.cache_key()))
      .field("pagination", &self.pagination)
      .field("should_overwrite", &self.should_overwrite)
      .finish()
  }
}

/// SHA-256 hex digest for stable, fixed-length cache keys. In-memory hashes
/// are not stable across executions, so a cryptographic digest over the
/// stringified request is used instead.
fn digest(input: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_key_depends_only_on_filter_and_pagination() {
    let a = RequestDetails::for_read(RequestType::Global)
      .with_filter(ParamFilter::single("status", "open"))
      .with_pagination(Pagination::page(1));
    let b = RequestDetails::for_write(RequestType::Refresh, false)
      .with_filter(ParamFilter::single("status", "open"))
      .with_pagination(Pagination::page(1));

    assert_eq!(a.cache_key(), b.cache_key());
    assert_eq!(a.no_pagination_cache_key(), b.no_pagination_cache_key());
  }

  #[test]
  fn test_pages_share_the_outer_key_but_not_the_inner() {
    let page1 = RequestDetails::for_read(RequestType::Global)
      .with_filter(ParamFilter::single("q", "abc"))
      .with_pagination(Pagination::page(1));
    let page2 = RequestDetails::for_read(RequestType::Global)
      .with_filter(ParamFilter::single("q", "abc"))
      .with_pagination(Pagination::page(2));

    assert_eq!(
      page1.no_pagination_cache_key(),
      page2.no_pagination_cache_key()
    );
    assert_ne!(page1.cache_key(), page2.cache_key());
  }

  #[test]
  fn test_different_filters_have_different_keys() {
    let a = RequestDetails::for_read(RequestType::Global)
      .with_filter(ParamFilter::single("q", "abc"));
    let b = RequestDetails::for_read(RequestType::Global)
      .with_filter(ParamFilter::single("q", "xyz"));

    assert_ne!(a.cache_key(), b.cache_key());
    assert_ne!(a.no_pagination_cache_key(), b.no_pagination_cache_key());
  }

  #[test]
  fn test_unfiltered_unpaginated_keys_are_stable() {
    let a = RequestDetails::for_read(RequestType::Global);
    let b = RequestDetails::for_read(RequestType::Local);

    // Without pagination both keys collapse to the same digest.
    assert_eq!(a.cache_key(), a.no_pagination_cache_key());
    assert_eq!(a.cache_key(), b.cache_key());
  }

  #[test]
  fn test_page_size_is_part_of_the_page_key() {
    let small = RequestDetails::for_read(RequestType::Global)
      .with_pagination(Pagination::page(1).with_page_size(10));
    let large = RequestDetails::for_read(RequestType::Global)
      .with_pagination(Pagination::page(1).with_page_size(50));

    assert_ne!(small.cache_key(), large.cache_key());
  }

  #[test]
  fn test_local_copy_preserves_everything_but_request_type() {
    let original = RequestDetails::for_read(RequestType::Refresh)
      .with_filter(ParamFilter::single("q", "abc"))
      .with_pagination(Pagination::page(3));
    let copy = original.local_copy();

    assert_eq!(copy.request_type(), RequestType::Local);
    assert_eq!(copy.cache_key(), original.cache_key());
    assert_eq!(copy.pagination(), original.pagination());
    assert!(copy.should_overwrite());
  }

  #[test]
  fn test_is_empty() {
    assert!(RequestDetails::for_read(RequestType::Global).is_empty());
    assert!(!RequestDetails::for_read(RequestType::Global)
      .with_pagination(Pagination::page(1))
      .is_empty());
  }

  #[test]
  #[should_panic(expected = "get_by_id")]
  fn test_assert_empty_panics_on_pagination() {
    RequestDetails::for_read(RequestType::Global)
      .with_pagination(Pagination::page(1))
      .assert_empty("get_by_id");
  }

  #[test]
  fn test_request_type_gating() {
    assert!(RequestType::Global.accepts(SourceKind::Local));
    assert!(RequestType::Global.accepts(SourceKind::Remote));
    assert!(!RequestType::Refresh.accepts(SourceKind::Local));
    assert!(RequestType::Refresh.accepts(SourceKind::Remote));
    assert!(RequestType::Local.accepts(SourceKind::Local));
    assert!(!RequestType::Local.accepts(SourceKind::Remote));
    assert!(RequestType::AllLocal.accepts(SourceKind::Local));
    assert!(!RequestType::AllLocal.accepts(SourceKind::Remote));
  }
}
