//! SQLite-backed durable store implementations.
//!
//! One database file holds three tables (`items`, `request_cache`,
//! `pagination_request_cache`), each namespaced by the entity's list-URL
//! path, so several entity types can share a file. Request-cache rows are
//! one `(cache_key, item_id)` pair per row; an id-set is the set of rows
//! under a key, which makes the never-store-empty invariant structural.
//!
//! Opening the database is deferred: the connection lives in a
//! `tokio::sync::OnceCell` that every operation awaits, so construction is
//! infallible and an initialization failure surfaces on the first operation
//! instead of being swallowed. Repeated initialization attempts are no-ops
//! once the cell is filled.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tokio::sync::OnceCell;

use super::{ItemsStore, RequestCacheStore, StoreError, StoreResult};
use crate::bindings::Entity;

/// Schema for the persisted containers.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    namespace TEXT NOT NULL,
    item_id TEXT NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (namespace, item_id)
);

CREATE TABLE IF NOT EXISTS request_cache (
    namespace TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    item_id TEXT NOT NULL,
    PRIMARY KEY (namespace, cache_key, item_id)
);

CREATE TABLE IF NOT EXISTS pagination_request_cache (
    namespace TEXT NOT NULL,
    outer_key TEXT NOT NULL,
    inner_key TEXT NOT NULL,
    item_id TEXT NOT NULL,
    PRIMARY KEY (namespace, outer_key, inner_key, item_id)
);

CREATE INDEX IF NOT EXISTS idx_request_cache_key
    ON request_cache(namespace, cache_key);

CREATE INDEX IF NOT EXISTS idx_pagination_request_cache_outer
    ON pagination_request_cache(namespace, outer_key);
"#;

/// Default database location under the platform data directory.
pub fn default_db_path() -> StoreResult<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| StoreError::Backend("could not determine data directory".to_string()))?;
  Ok(data_dir.join("strata").join("cache.db"))
}

fn open_connection(path: &Path) -> StoreResult<Mutex<Connection>> {
  if let Some(parent) = path.parent() {
    if !parent.as_os_str().is_empty() {
      std::fs::create_dir_all(parent)
        .map_err(|e| StoreError::Backend(format!("failed to create store directory: {}", e)))?;
    }
  }

  let conn = Connection::open(path).map_err(|e| {
    StoreError::Backend(format!(
      "failed to open store database at {}: {}",
      path.display(),
      e
    ))
  })?;

  conn
    .execute_batch(SCHEMA)
    .map_err(|e| StoreError::Backend(format!("failed to run store migrations: {}", e)))?;

  Ok(Mutex::new(conn))
}

fn backend(err: rusqlite::Error) -> StoreError {
  StoreError::Backend(err.to_string())
}

macro_rules! lock_conn {
  ($cell:expr) => {
    $cell
      .lock()
      .map_err(|e| StoreError::Backend(format!("lock poisoned: {}", e)))?
  };
}

/// Durable id → entity store.
pub struct SqliteItemsStore<T> {
  path: PathBuf,
  namespace: String,
  conn: OnceCell<Mutex<Connection>>,
  _marker: PhantomData<fn() -> T>,
}

impl<T> SqliteItemsStore<T> {
  /// Store at an explicit database path. The file is opened on first use.
  pub fn at(path: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      namespace: namespace.into(),
      conn: OnceCell::new(),
      _marker: PhantomData,
    }
  }

  /// Store at the default platform location.
  pub fn open_default(namespace: impl Into<String>) -> StoreResult<Self> {
    Ok(Self::at(default_db_path()?, namespace))
  }

  async fn conn(&self) -> StoreResult<&Mutex<Connection>> {
    self
      .conn
      .get_or_try_init(|| async { open_connection(&self.path) })
      .await
  }
}

#[async_trait]
impl<T: Entity> ItemsStore<T> for SqliteItemsStore<T> {
  async fn clear(&self) -> StoreResult<()> {
    let conn = lock_conn!(self.conn().await?);
    conn
      .execute("DELETE FROM items WHERE namespace = ?", [&self.namespace])
      .map_err(backend)?;
    Ok(())
  }

  async fn get(&self, id: &str) -> StoreResult<Option<T>> {
    let conn = lock_conn!(self.conn().await?);
    let mut stmt = conn
      .prepare("SELECT data FROM items WHERE namespace = ? AND item_id = ?")
      .map_err(backend)?;
    let data: Option<Vec<u8>> = stmt
      .query_row(params![self.namespace, id], |row| row.get(0))
      .ok();
    match data {
      Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      None => Ok(None),
    }
  }

  async fn get_many(&self, ids: &[String]) -> StoreResult<Vec<T>> {
    let conn = lock_conn!(self.conn().await?);
    let mut stmt = conn
      .prepare("SELECT data FROM items WHERE namespace = ? AND item_id = ?")
      .map_err(backend)?;

    let mut found = Vec::new();
    for id in ids {
      let data: Option<Vec<u8>> = stmt
        .query_row(params![self.namespace, id], |row| row.get(0))
        .ok();
      if let Some(bytes) = data {
        found.push(serde_json::from_slice(&bytes)?);
      }
    }
    Ok(found)
  }

  async fn all(&self) -> StoreResult<Vec<T>> {
    let conn = lock_conn!(self.conn().await?);
    let mut stmt = conn
      .prepare("SELECT data FROM items WHERE namespace = ?")
      .map_err(backend)?;
    let rows: Vec<Vec<u8>> = stmt
      .query_map([&self.namespace], |row| row.get(0))
      .map_err(backend)?
      .filter_map(|r| r.ok())
      .collect();

    let mut items = Vec::with_capacity(rows.len());
    for bytes in rows {
      items.push(serde_json::from_slice(&bytes)?);
    }
    Ok(items)
  }

  async fn put(&self, item: T, overwrite: bool) -> StoreResult<()> {
    let id = item.id().ok_or(StoreError::MissingId)?;
    let data = serde_json::to_vec(&item)?;
    let conn = lock_conn!(self.conn().await?);
    let sql = if overwrite {
      "INSERT OR REPLACE INTO items (namespace, item_id, data) VALUES (?, ?, ?)"
    } else {
      "INSERT OR IGNORE INTO items (namespace, item_id, data) VALUES (?, ?, ?)"
    };
    conn
      .execute(sql, params![self.namespace, id, data])
      .map_err(backend)?;
    Ok(())
  }

  async fn put_many(&self, items: Vec<T>, overwrite: bool) -> StoreResult<()> {
    let conn = lock_conn!(self.conn().await?);
    conn.execute("BEGIN TRANSACTION", []).map_err(backend)?;
    let sql = if overwrite {
      "INSERT OR REPLACE INTO items (namespace, item_id, data) VALUES (?, ?, ?)"
    } else {
      "INSERT OR IGNORE INTO items (namespace, item_id, data) VALUES (?, ?, ?)"
    };
    for item in items {
      let id = match item.id() {
        Some(id) => id,
        None => {
          conn.execute("ROLLBACK", []).map_err(backend)?;
          return Err(StoreError::MissingId);
        }
      };
      let data = serde_json::to_vec(&item)?;
      conn
        .execute(sql, params![self.namespace, id, data])
        .map_err(backend)?;
    }
    conn.execute("COMMIT", []).map_err(backend)?;
    Ok(())
  }

  async fn delete_many(&self, ids: &HashSet<String>) -> StoreResult<()> {
    let conn = lock_conn!(self.conn().await?);
    let mut stmt = conn
      .prepare("DELETE FROM items WHERE namespace = ? AND item_id = ?")
      .map_err(backend)?;
    for id in ids {
      stmt.execute(params![self.namespace, id]).map_err(backend)?;
    }
    Ok(())
  }
}

/// Durable request-fingerprint → id-set store.
pub struct SqliteRequestCacheStore {
  path: PathBuf,
  namespace: String,
  conn: OnceCell<Mutex<Connection>>,
}

impl SqliteRequestCacheStore {
  pub fn at(path: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      namespace: namespace.into(),
      conn: OnceCell::new(),
    }
  }

  pub fn open_default(namespace: impl Into<String>) -> StoreResult<Self> {
    Ok(Self::at(default_db_path()?, namespace))
  }

  async fn conn(&self) -> StoreResult<&Mutex<Connection>> {
    self
      .conn
      .get_or_try_init(|| async { open_connection(&self.path) })
      .await
  }
}

#[async_trait]
impl RequestCacheStore for SqliteRequestCacheStore {
  async fn set(&self, key: &str, ids: HashSet<String>) -> StoreResult<()> {
    let conn = lock_conn!(self.conn().await?);
    conn.execute("BEGIN TRANSACTION", []).map_err(backend)?;
    conn
      .execute(
        "DELETE FROM request_cache WHERE namespace = ? AND cache_key = ?",
        params![self.namespace, key],
      )
      .map_err(backend)?;
    for id in &ids {
      conn
        .execute(
          "INSERT OR REPLACE INTO request_cache (namespace, cache_key, item_id) VALUES (?, ?, ?)",
          params![self.namespace, key, id],
        )
        .map_err(backend)?;
    }
    conn.execute("COMMIT", []).map_err(backend)?;
    Ok(())
  }

  async fn get(&self, key: &str) -> StoreResult<Option<HashSet<String>>> {
    let conn = lock_conn!(self.conn().await?);
    let mut stmt = conn
      .prepare("SELECT item_id FROM request_cache WHERE namespace = ? AND cache_key = ?")
      .map_err(backend)?;
    let ids: HashSet<String> = stmt
      .query_map(params![self.namespace, key], |row| row.get(0))
      .map_err(backend)?
      .filter_map(|r| r.ok())
      .collect();
    Ok(if ids.is_empty() { None } else { Some(ids) })
  }

  async fn clear(&self, key: &str) -> StoreResult<()> {
    let conn = lock_conn!(self.conn().await?);
    conn
      .execute(
        "DELETE FROM request_cache WHERE namespace = ? AND cache_key = ?",
        params![self.namespace, key],
      )
      .map_err(backend)?;
    Ok(())
  }

  async fn keys(&self) -> StoreResult<Vec<String>> {
    let conn = lock_conn!(self.conn().await?);
    let mut stmt = conn
      .prepare("SELECT DISTINCT cache_key FROM request_cache WHERE namespace = ?")
      .map_err(backend)?;
    let keys = stmt
      .query_map([&self.namespace], |row| row.get(0))
      .map_err(backend)?
      .filter_map(|r| r.ok())
      .collect();
    Ok(keys)
  }

  async fn set_paginated(&self, outer: &str, inner: &str, ids: HashSet<String>) -> StoreResult<()> {
    let conn = lock_conn!(self.conn().await?);
    conn.execute("BEGIN TRANSACTION", []).map_err(backend)?;
    conn
      .execute(
        "DELETE FROM pagination_request_cache
         WHERE namespace = ? AND outer_key = ? AND inner_key = ?",
        params![self.namespace, outer, inner],
      )
      .map_err(backend)?;
    for id in &ids {
      conn
        .execute(
          "INSERT OR REPLACE INTO pagination_request_cache
           (namespace, outer_key, inner_key, item_id) VALUES (?, ?, ?, ?)",
          params![self.namespace, outer, inner, id],
        )
        .map_err(backend)?;
    }
    conn.execute("COMMIT", []).map_err(backend)?;
    Ok(())
  }

  async fn get_paginated(&self, outer: &str, inner: &str) -> StoreResult<Option<HashSet<String>>> {
    let conn = lock_conn!(self.conn().await?);
    let mut stmt = conn
      .prepare(
        "SELECT item_id FROM pagination_request_cache
         WHERE namespace = ? AND outer_key = ? AND inner_key = ?",
      )
      .map_err(backend)?;
    let ids: HashSet<String> = stmt
      .query_map(params![self.namespace, outer, inner], |row| row.get(0))
      .map_err(backend)?
      .filter_map(|r| r.ok())
      .collect();
    Ok(if ids.is_empty() { None } else { Some(ids) })
  }

  async fn clear_paginated(&self, outer: &str) -> StoreResult<()> {
    let conn = lock_conn!(self.conn().await?);
    conn
      .execute(
        "DELETE FROM pagination_request_cache WHERE namespace = ? AND outer_key = ?",
        params![self.namespace, outer],
      )
      .map_err(backend)?;
    Ok(())
  }

  async fn outer_keys(&self) -> StoreResult<Vec<String>> {
    let conn = lock_conn!(self.conn().await?);
    let mut stmt = conn
      .prepare("SELECT DISTINCT outer_key FROM pagination_request_cache WHERE namespace = ?")
      .map_err(backend)?;
    let keys = stmt
      .query_map([&self.namespace], |row| row.get(0))
      .map_err(backend)?
      .filter_map(|r| r.ok())
      .collect();
    Ok(keys)
  }

  async fn inner_keys(&self, outer: &str) -> StoreResult<Vec<String>> {
    let conn = lock_conn!(self.conn().await?);
    let mut stmt = conn
      .prepare(
        "SELECT DISTINCT inner_key FROM pagination_request_cache
         WHERE namespace = ? AND outer_key = ?",
      )
      .map_err(backend)?;
    let keys = stmt
      .query_map(params![self.namespace, outer], |row| row.get(0))
      .map_err(backend)?
      .filter_map(|r| r.ok())
      .collect();
    Ok(keys)
  }

  async fn clear_all(&self) -> StoreResult<()> {
    let conn = lock_conn!(self.conn().await?);
    conn
      .execute(
        "DELETE FROM request_cache WHERE namespace = ?",
        [&self.namespace],
      )
      .map_err(backend)?;
    conn
      .execute(
        "DELETE FROM pagination_request_cache WHERE namespace = ?",
        [&self.namespace],
      )
      .map_err(backend)?;
    Ok(())
  }
}
