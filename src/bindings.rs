//! Per-entity metadata binding an entity type to its REST resource.
//!
//! The core never inspects entities directly. It learns their ids through
//! the [`Entity`] trait and their resource locations through a
//! [`Bindings`] record of URL factories. Serialization rides on serde:
//! the wire object model is `serde_json::Value`.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

/// An entity the data layer can cache and synchronize.
///
/// `id()` returns `None` for locally-constructed entities that have not been
/// persisted yet; every other accessor is total.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Server-assigned (or client-minted) identifier, if any.
  fn id(&self) -> Option<String>;
}

type DetailUrlFn = Arc<dyn Fn(&str) -> Url + Send + Sync>;
type AssignIdFn<T> = Arc<dyn Fn(T) -> T + Send + Sync>;

/// Value record of per-entity URL factories and the optional client-side id
/// minter. Read-only; share it as `Arc<Bindings<T>>`.
pub struct Bindings<T> {
  list_url: Url,
  create_url: Url,
  detail_url: Option<DetailUrlFn>,
  assign_id: Option<AssignIdFn<T>>,
  namespace: String,
}

impl<T: Entity> Bindings<T> {
  /// Bindings for a list-style resource. The detail URL defaults to
  /// `{list_url}{id}/` and the create URL to the list URL itself.
  pub fn new(list_url: Url) -> Self {
    let namespace = namespace_of(&list_url);
    Self {
      create_url: list_url.clone(),
      list_url,
      detail_url: None,
      assign_id: None,
      namespace,
    }
  }

  /// Override the URL that creations are POSTed to.
  pub fn with_create_url(mut self, create_url: Url) -> Self {
    self.create_url = create_url;
    self
  }

  /// Override detail-URL construction for resources whose item URLs do not
  /// hang off the list URL.
  pub fn with_detail_url(mut self, f: impl Fn(&str) -> Url + Send + Sync + 'static) -> Self {
    self.detail_url = Some(Arc::new(f));
    self
  }

  /// Attach a client-side id minter, permitting local sources to persist
  /// new entities without a server round-trip.
  pub fn with_id_minter(mut self, f: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
    self.assign_id = Some(Arc::new(f));
    self
  }

  pub fn list_url(&self) -> &Url {
    &self.list_url
  }

  pub fn create_url(&self) -> &Url {
    &self.create_url
  }

  pub fn detail_url(&self, id: &str) -> Url {
    match &self.detail_url {
      Some(f) => f(id),
      None => {
        let mut url = self.list_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
          segments.pop_if_empty().push(id).push("");
        }
        url
      }
    }
  }

  /// Mint an id for a new entity, if this binding carries a minter.
  pub fn assign_id(&self, item: T) -> Option<T> {
    self.assign_id.as_ref().map(|f| f(item))
  }

  pub fn has_id_minter(&self) -> bool {
    self.assign_id.is_some()
  }

  /// Namespace for persisted containers, derived from the list URL path.
  pub fn namespace(&self) -> &str {
    &self.namespace
  }
}

impl<T> std::fmt::Debug for Bindings<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Bindings")
      .field("list_url", &self.list_url.as_str())
      .field("create_url", &self.create_url.as_str())
      .field("namespace", &self.namespace)
      .field("has_id_minter", &self.assign_id.is_some())
      .finish()
  }
}

fn namespace_of(list_url: &Url) -> String {
  let trimmed = list_url.path().trim_matches('/');
  if trimmed.is_empty() {
    "entities".to_string()
  } else {
    trimmed.replace('/', "_")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;

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

  fn bindings() -> Bindings<Note> {
    Bindings::new(Url::parse("https://api.example.com/v1/notes/").unwrap())
  }

  #[test]
  fn test_detail_url_joins_id_onto_list_url() {
    let url = bindings().detail_url("u");
    assert_eq!(url.as_str(), "https://api.example.com/v1/notes/u/");
  }

  #[test]
  fn test_create_url_defaults_to_list_url() {
    let b = bindings();
    assert_eq!(b.create_url(), b.list_url());
  }

  #[test]
  fn test_namespace_from_list_path() {
    assert_eq!(bindings().namespace(), "v1_notes");
  }

  #[test]
  fn test_detail_url_override() {
    let b = bindings().with_detail_url(|id| {
      Url::parse(&format!("https://other.example.com/n/{}", id)).unwrap()
    });
    assert_eq!(b.detail_url("x").as_str(), "https://other.example.com/n/x");
  }

  #[test]
  fn test_id_minter() {
    let b = bindings().with_id_minter(|mut note: Note| {
      note.id = Some("minted".to_string());
      note
    });
    let note = Note {
      id: None,
      msg: "hello".to_string(),
    };
    assert_eq!(b.assign_id(note).unwrap().id.as_deref(), Some("minted"));
    assert!(!bindings().has_id_minter());
  }
}
