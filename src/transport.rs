//! Thin REST transport seam.
//!
//! Remote sources speak to the network through the [`Transport`] trait:
//! one verb, one URL, query parameters, an optional JSON body in, a status
//! code and an optional JSON body out. [`HttpTransport`] is the reqwest
//! implementation; tests substitute scripted fakes.

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::outcome::Failure;

/// REST verbs the data layer dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

/// A single outbound request.
#[derive(Debug, Clone)]
pub struct WireRequest {
  pub verb: Verb,
  pub url: Url,
  pub params: Vec<(String, String)>,
  pub body: Option<Value>,
}

impl WireRequest {
  pub fn new(verb: Verb, url: Url) -> Self {
    Self {
      verb,
      url,
      params: Vec::new(),
      body: None,
    }
  }

  pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
    self.params = params;
    self
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }
}

/// A response as the data layer sees it: status plus parsed JSON body, if any.
#[derive(Debug, Clone)]
pub struct WireResponse {
  pub status: u16,
  pub body: Option<Value>,
}

/// The network seam. Implementations only move bytes; interpreting the
/// status code and body shape is the caller's concern.
#[async_trait]
pub trait Transport: Send + Sync {
  /// Perform the request. Errors here are connectivity-level (the request
  /// never produced a status code) and surface as `ServerError`.
  async fn send(&self, request: WireRequest) -> Result<WireResponse, Failure>;
}

/// Map a status code onto the failure taxonomy: 2xx is success, 4xx is the
/// caller's fault, 5xx is the server's, anything else is anomalous.
pub fn check_status(response: &WireResponse) -> Result<(), Failure> {
  match response.status {
    200..=299 => Ok(()),
    400..=499 => Err(Failure::bad_request(format!(
      "remote rejected request with status {}",
      response.status
    ))),
    500..=599 => Err(Failure::server_error(format!(
      "remote failed with status {}",
      response.status
    ))),
    other => Err(Failure::server_error(format!(
      "Unexpected status {}",
      other
    ))),
  }
}

/// Extract the entity array from a list response: either
/// `{"results": [...]}` or a bare array.
pub fn parse_list(body: Option<Value>) -> Result<Vec<Value>, Failure> {
  match body {
    Some(Value::Object(mut map)) => match map.remove("results") {
      Some(Value::Array(items)) => Ok(items),
      _ => Err(Failure::server_error(
        "Unexpected list response: object without a results array",
      )),
    },
    Some(Value::Array(items)) => Ok(items),
    _ => Err(Failure::server_error("Unexpected list response shape")),
  }
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new() -> Self {
    Self {
      client: reqwest::Client::new(),
    }
  }

  /// Use a preconfigured client (headers, timeouts, proxies).
  pub fn with_client(client: reqwest::Client) -> Self {
    Self { client }
  }
}

impl Default for HttpTransport {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: WireRequest) -> Result<WireResponse, Failure> {
    let method = match request.verb {
      Verb::Get => reqwest::Method::GET,
      Verb::Post => reqwest::Method::POST,
      Verb::Put => reqwest::Method::PUT,
      Verb::Patch => reqwest::Method::PATCH,
      Verb::Delete => reqwest::Method::DELETE,
    };

    let mut builder = self
      .client
      .request(method, request.url)
      .query(&request.params);
    if let Some(body) = request.body {
      builder = builder.json(&body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| Failure::server_error(format!("transport error: {}", e)))?;

    let status = response.status().as_u16();
    let text = response
      .text()
      .await
      .map_err(|e| Failure::server_error(format!("failed to read response body: {}", e)))?;
    let body = if text.trim().is_empty() {
      None
    } else {
      // Non-JSON bodies (HTML error pages and the like) are carried as
      // nothing rather than failing the transport.
      serde_json::from_str(&text).ok()
    };

    Ok(WireResponse { status, body })
  }
}
