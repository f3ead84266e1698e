//! Coalescing of concurrent by-id fetches.
//!
//! Successive `get_by_id` calls within a short window are merged into one
//! list request (`id__in=<csv>`). A single worker task accumulates pending
//! callers; each new arrival re-arms the flush timer, and on flush every
//! caller is resolved exactly once: with its individual item, `None` when
//! the batch reply omitted the id, or the shared failure when the batch
//! itself failed. A caller that has gone away simply misses its reply;
//! the rest of the batch is unaffected.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::bindings::Entity;
use crate::outcome::Failure;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The request a flush performs: fetch this set of ids in one round-trip.
pub(crate) type BatchFetch<T> =
  Arc<dyn Fn(Vec<String>) -> BoxFuture<Result<Vec<T>, Failure>> + Send + Sync>;

struct Pending<T> {
  id: String,
  reply: oneshot::Sender<Result<Option<T>, Failure>>,
}

/// Handle to the coalescing worker. Cloneable; dropping the last handle
/// shuts the worker down after it flushes what it holds.
pub(crate) struct IdBatcher<T> {
  tx: mpsc::UnboundedSender<Pending<T>>,
}

impl<T> Clone for IdBatcher<T> {
  fn clone(&self) -> Self {
    Self {
      tx: self.tx.clone(),
    }
  }
}

impl<T: Entity> IdBatcher<T> {
  /// Spawn the worker task. Must be called within a tokio runtime.
  pub fn spawn(window: Duration, fetch: BatchFetch<T>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_worker(rx, window, fetch));
    Self { tx }
  }

  /// Queue an id and await its individual resolution.
  pub async fn fetch(&self, id: &str) -> Result<Option<T>, Failure> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Pending {
        id: id.to_string(),
        reply,
      })
      .map_err(|_| Failure::unexpected("batch worker has shut down"))?;
    rx.await
      .map_err(|_| Failure::unexpected("batch worker dropped a pending request"))?
  }
}

async fn run_worker<T: Entity>(
  mut rx: mpsc::UnboundedReceiver<Pending<T>>,
  window: Duration,
  fetch: BatchFetch<T>,
) {
  while let Some(first) = rx.recv().await {
    let mut pending = vec![first];
    let mut deadline = tokio::time::Instant::now() + window;
    let mut closed = false;

    loop {
      tokio::select! {
        entry = rx.recv() => match entry {
          Some(entry) => {
            pending.push(entry);
            // Each arrival within the window re-arms the timer.
            deadline = tokio::time::Instant::now() + window;
          }
          None => {
            closed = true;
            break;
          }
        },
        _ = tokio::time::sleep_until(deadline) => break,
      }
    }

    flush(pending, &fetch).await;
    if closed {
      break;
    }
  }
}

async fn flush<T: Entity>(pending: Vec<Pending<T>>, fetch: &BatchFetch<T>) {
  let mut ids = Vec::new();
  let mut seen = HashSet::new();
  for entry in &pending {
    if seen.insert(entry.id.clone()) {
      ids.push(entry.id.clone());
    }
  }
  debug!(count = ids.len(), callers = pending.len(), "flushing id batch");

  match fetch(ids).await {
    Ok(items) => {
      let by_id: HashMap<String, T> = items
        .into_iter()
        .filter_map(|item| item.id().map(|id| (id, item)))
        .collect();
      for entry in pending {
        let _ = entry.reply.send(Ok(by_id.get(&entry.id).cloned()));
      }
    }
    Err(failure) => {
      for entry in pending {
        let _ = entry.reply.send(Err(failure.clone()));
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::{Deserialize, Serialize};
  use std::sync::Mutex;

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

  fn note(id: &str) -> Note {
    Note {
      id: Some(id.to_string()),
      msg: id.to_uppercase(),
    }
  }

  /// Fetch that records every batch it receives and answers from a fixed
  /// set of notes.
  fn recording_fetch(
    available: Vec<Note>,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
  ) -> BatchFetch<Note> {
    Arc::new(move |ids: Vec<String>| {
      calls.lock().unwrap().push(ids.clone());
      let found: Vec<Note> = available
        .iter()
        .filter(|n| ids.contains(&n.id.clone().unwrap()))
        .cloned()
        .collect();
      Box::pin(async move { Ok(found) })
    })
  }

  #[tokio::test]
  async fn test_concurrent_fetches_coalesce_into_one_request() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let batcher = IdBatcher::spawn(
      Duration::from_millis(30),
      recording_fetch(vec![note("a"), note("b")], calls.clone()),
    );

    let (a, b) = tokio::join!(batcher.fetch("a"), batcher.fetch("b"));
    assert_eq!(a.unwrap().unwrap().msg, "A");
    assert_eq!(b.unwrap().unwrap().msg, "B");

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].len(), 2);
  }

  #[tokio::test]
  async fn test_duplicate_ids_resolve_once_each_and_dedupe_on_the_wire() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let batcher = IdBatcher::spawn(
      Duration::from_millis(30),
      recording_fetch(vec![note("a")], calls.clone()),
    );

    let (first, second) = tokio::join!(batcher.fetch("a"), batcher.fetch("a"));
    assert!(first.unwrap().is_some());
    assert!(second.unwrap().is_some());

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], vec!["a".to_string()]);
  }

  #[tokio::test]
  async fn test_omitted_id_resolves_to_none() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let batcher = IdBatcher::spawn(
      Duration::from_millis(10),
      recording_fetch(vec![note("a")], calls),
    );

    assert!(batcher.fetch("ghost").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_batch_failure_is_broadcast_to_every_caller() {
    let fetch: BatchFetch<Note> = Arc::new(|_ids| {
      Box::pin(async { Err(Failure::server_error("batch exploded")) })
    });
    let batcher = IdBatcher::spawn(Duration::from_millis(20), fetch);

    let (a, b) = tokio::join!(batcher.fetch("a"), batcher.fetch("b"));
    assert_eq!(a.unwrap_err().message, "batch exploded");
    assert_eq!(b.unwrap_err().message, "batch exploded");
  }

  #[tokio::test]
  async fn test_sequential_fetches_outside_the_window_make_separate_requests() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let batcher = IdBatcher::spawn(
      Duration::from_millis(10),
      recording_fetch(vec![note("a"), note("b")], calls.clone()),
    );

    batcher.fetch("a").await.unwrap();
    batcher.fetch("b").await.unwrap();

    assert_eq!(calls.lock().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_abandoned_caller_does_not_stall_the_batch() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let batcher = IdBatcher::spawn(
      Duration::from_millis(20),
      recording_fetch(vec![note("a"), note("b")], calls.clone()),
    );

    let abandoned = tokio::spawn({
      let batcher = batcher.clone();
      async move { batcher.fetch("a").await }
    });
    abandoned.abort();

    // The surviving caller still resolves even though its batch-mate left.
    assert!(batcher.fetch("b").await.unwrap().is_some());
  }
}
