//! The remote tier: a REST backend behind the transport seam.
//!
//! URL construction comes from the entity's [`Bindings`]; filters and
//! pagination serialize into query parameters; by-id reads coalesce through
//! the [`IdBatcher`](super::batch::IdBatcher). Bulk writes and cache
//! operations have no remote meaning and fail loudly rather than pretend.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::batch::{BatchFetch, IdBatcher};
use super::{Source, SourceKind};
use crate::bindings::{Bindings, Entity};
use crate::details::RequestDetails;
use crate::outcome::{
  BulkRead, BulkReadResult, DeleteResult, Failure, ReadResult, WriteListResult, WriteResult,
};
use crate::transport::{check_status, parse_list, HttpTransport, Transport, Verb, WireRequest};

/// Tuning knobs for a remote source. Serde-derived so embedders can carry
/// them in their own configuration files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteOptions {
  /// How long the by-id coalescing window stays open after each arrival.
  pub batch_window_ms: u64,
  /// Send updates as PATCH instead of PUT.
  pub partial_updates: bool,
}

impl Default for RemoteOptions {
  fn default() -> Self {
    Self {
      batch_window_ms: 50,
      partial_updates: false,
    }
  }
}

struct RemoteInner<T: Entity> {
  bindings: Arc<Bindings<T>>,
  transport: Arc<dyn Transport>,
  options: RemoteOptions,
  batcher: tokio::sync::OnceCell<IdBatcher<T>>,
}

/// A remote source speaking REST through a [`Transport`].
pub struct RestSource<T: Entity> {
  inner: Arc<RemoteInner<T>>,
}

impl<T: Entity> Clone for RestSource<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Entity> RestSource<T> {
  pub fn new(bindings: Arc<Bindings<T>>, transport: Arc<dyn Transport>) -> Self {
    Self {
      inner: Arc::new(RemoteInner {
        bindings,
        transport,
        options: RemoteOptions::default(),
        batcher: tokio::sync::OnceCell::new(),
      }),
    }
  }

  /// Remote source over a plain HTTP client.
  pub fn http(bindings: Arc<Bindings<T>>) -> Self {
    Self::new(bindings, Arc::new(HttpTransport::new()))
  }

  pub fn with_options(mut self, options: RemoteOptions) -> Self {
    let inner = Arc::get_mut(&mut self.inner)
      .expect("with_options must be called before the source is shared");
    inner.options = options;
    self
  }

  async fn batcher(&self) -> &IdBatcher<T> {
    self
      .inner
      .batcher
      .get_or_init(|| async {
        let transport = Arc::clone(&self.inner.transport);
        let bindings = Arc::clone(&self.inner.bindings);
        let fetch: BatchFetch<T> = Arc::new(move |ids| {
          let transport = Arc::clone(&transport);
          let bindings = Arc::clone(&bindings);
          Box::pin(async move { fetch_by_ids(&*transport, &bindings, &ids).await })
        });
        IdBatcher::spawn(Duration::from_millis(self.inner.options.batch_window_ms), fetch)
      })
      .await
  }
}

/// One `id__in` list request for the given ids.
async fn fetch_by_ids<T: Entity>(
  transport: &dyn Transport,
  bindings: &Bindings<T>,
  ids: &[String],
) -> Result<Vec<T>, Failure> {
  let request = WireRequest::new(Verb::Get, bindings.list_url().clone())
    .with_params(vec![("id__in".to_string(), ids.join(","))]);
  let response = transport.send(request).await?;
  check_status(&response)?;
  parse_list(response.body)?
    .into_iter()
    .map(decode::<T>)
    .collect()
}

fn decode<T: Entity>(value: Value) -> Result<T, Failure> {
  serde_json::from_value(value)
    .map_err(|e| Failure::server_error(format!("failed to decode entity: {}", e)))
}

fn encode<T: Entity>(item: &T) -> Result<Value, Failure> {
  serde_json::to_value(item)
    .map_err(|e| Failure::unexpected(format!("failed to encode entity: {}", e)))
}

#[async_trait]
impl<T: Entity> Source<T> for RestSource<T> {
  fn kind(&self) -> SourceKind {
    SourceKind::Remote
  }

  async fn get_by_id(&self, id: &str, details: &RequestDetails) -> ReadResult<T> {
    details.assert_empty("get_by_id");
    self.batcher().await.fetch(id).await
  }

  async fn get_by_ids(&self, ids: &[String], details: &RequestDetails) -> BulkReadResult<T> {
    details.assert_empty("get_by_ids");
    let items = fetch_by_ids(&*self.inner.transport, &self.inner.bindings, ids).await?;
    let found_ids: HashSet<String> = items.iter().filter_map(|item| item.id()).collect();
    let missing_ids = ids
      .iter()
      .filter(|id| !found_ids.contains(*id))
      .cloned()
      .collect();
    Ok(BulkRead { items, missing_ids })
  }

  async fn get_items(&self, details: &RequestDetails) -> BulkReadResult<T> {
    let mut params: Vec<(String, String)> = Vec::new();
    if let Some(filter) = details.filter() {
      let Some(filter_params) = filter.to_params() else {
        return Err(Failure::unexpected(
          "filter cannot be serialized for a remote source",
        ));
      };
      params.extend(filter_params);
    }
    if let Some(pagination) = details.pagination() {
      params.push(("page".to_string(), pagination.page.to_string()));
      params.push(("page_size".to_string(), pagination.page_size.to_string()));
    }

    debug!(url = %self.inner.bindings.list_url(), "remote list request");
    let request =
      WireRequest::new(Verb::Get, self.inner.bindings.list_url().clone()).with_params(params);
    let response = self.inner.transport.send(request).await?;
    check_status(&response)?;
    let items = parse_list(response.body)?
      .into_iter()
      .map(decode::<T>)
      .collect::<Result<Vec<T>, Failure>>()?;
    Ok(BulkRead {
      items,
      missing_ids: HashSet::new(),
    })
  }

  async fn set_item(&self, item: T, _details: &RequestDetails) -> WriteResult<T> {
    let body = encode(&item)?;
    let request = match item.id() {
      Some(id) => {
        let verb = if self.inner.options.partial_updates {
          Verb::Patch
        } else {
          Verb::Put
        };
        WireRequest::new(verb, self.inner.bindings.detail_url(&id)).with_body(body)
      }
      None => {
        WireRequest::new(Verb::Post, self.inner.bindings.create_url().clone()).with_body(body)
      }
    };

    let response = self.inner.transport.send(request).await?;
    check_status(&response)?;
    match response.body {
      // The server's rendition wins; it may carry the assigned id.
      Some(value) => decode(value),
      None => Ok(item),
    }
  }

  async fn set_items(&self, _items: Vec<T>, _details: &RequestDetails) -> WriteListResult<T> {
    Err(Failure::unexpected(
      "set_items is not supported on a remote source; create items one by one",
    ))
  }

  async fn delete(&self, id: &str, _details: &RequestDetails) -> DeleteResult {
    let request = WireRequest::new(Verb::Delete, self.inner.bindings.detail_url(id));
    let response = self.inner.transport.send(request).await?;
    check_status(&response)
  }

  async fn delete_ids(&self, _ids: &HashSet<String>) -> DeleteResult {
    Err(Failure::unexpected(
      "delete_ids is not supported on a remote source",
    ))
  }

  async fn clear(&self) -> DeleteResult {
    Err(Failure::unexpected("clear is not supported on a remote source"))
  }

  async fn clear_for_request(&self, _details: &RequestDetails) -> DeleteResult {
    Err(Failure::unexpected(
      "clear_for_request is not supported on a remote source",
    ))
  }
}
