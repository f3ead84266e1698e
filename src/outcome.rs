//! Result and failure types shared by every source operation.
//!
//! All operations resolve to a plain `Result` whose error side is a
//! [`Failure`] carrying one of three [`ErrorKind`]s. Callers pattern-match;
//! nothing here throws or panics.

use std::collections::HashSet;

use thiserror::Error;

/// Classification of a failed source operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// A caller-observable precondition was violated, or the remote answered 4xx.
  BadRequest,
  /// The remote answered 5xx or an unknown status, or broke an internal
  /// contract (e.g. no id assigned on create).
  ServerError,
  /// Programmer error: an operation was invoked on a source that cannot
  /// support it.
  Unexpected,
}

/// A failed source operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct Failure {
  pub kind: ErrorKind,
  pub message: String,
}

impl Failure {
  pub fn bad_request(message: impl Into<String>) -> Self {
    Self {
      kind: ErrorKind::BadRequest,
      message: message.into(),
    }
  }

  pub fn server_error(message: impl Into<String>) -> Self {
    Self {
      kind: ErrorKind::ServerError,
      message: message.into(),
    }
  }

  pub fn unexpected(message: impl Into<String>) -> Self {
    Self {
      kind: ErrorKind::Unexpected,
      message: message.into(),
    }
  }
}

/// Items found by a bulk read, plus the ids no source could account for.
#[derive(Debug, Clone)]
pub struct BulkRead<T> {
  /// Entities found, in source-visit order, deduplicated by id.
  pub items: Vec<T>,
  /// Requested ids that no consulted source returned.
  pub missing_ids: HashSet<String>,
}

impl<T> BulkRead<T> {
  pub fn empty() -> Self {
    Self {
      items: Vec::new(),
      missing_ids: HashSet::new(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl<T> Default for BulkRead<T> {
  fn default() -> Self {
    Self::empty()
  }
}

/// Outcome of a single-item read. `Ok(None)` means "not present here".
pub type ReadResult<T> = Result<Option<T>, Failure>;

/// Outcome of a list or by-ids read.
pub type BulkReadResult<T> = Result<BulkRead<T>, Failure>;

/// Outcome of a single-item write; carries the written item (with any
/// server- or client-assigned id).
pub type WriteResult<T> = Result<T, Failure>;

/// Outcome of a bulk write.
pub type WriteListResult<T> = Result<Vec<T>, Failure>;

/// Outcome of a delete or cache-clearing operation.
pub type DeleteResult = Result<(), Failure>;
