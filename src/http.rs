//! Request/response types seen by the worker and the network seam it calls into.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// HTTP method of an intercepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Delete,
  Patch,
  Options,
}

impl Method {
  /// POST, PUT and DELETE are queued when the network is unreachable.
  pub fn is_mutating(self) -> bool {
    matches!(self, Method::Post | Method::Put | Method::Delete)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
      Method::Patch => "PATCH",
      Method::Options => "OPTIONS",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "HEAD" => Ok(Method::Head),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "DELETE" => Ok(Method::Delete),
      "PATCH" => Ok(Method::Patch),
      "OPTIONS" => Ok(Method::Options),
      other => Err(eyre!("Unsupported HTTP method: {}", other)),
    }
  }
}

/// What the page intends to do with a response (the fetch "destination").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
  #[default]
  Empty,
  Document,
  Style,
  Script,
  Image,
  Font,
}

impl Destination {
  /// Guess the destination of a sub-resource from its file extension.
  pub fn from_path(path: &str) -> Self {
    let ext = path
      .rsplit_once('.')
      .map(|(_, ext)| ext.to_ascii_lowercase())
      .unwrap_or_default();

    match ext.as_str() {
      "css" => Destination::Style,
      "js" | "mjs" => Destination::Script,
      "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "ico" | "avif" => Destination::Image,
      "woff" | "woff2" | "ttf" | "otf" | "eot" => Destination::Font,
      "html" | "htm" => Destination::Document,
      _ => Destination::Empty,
    }
  }
}

impl FromStr for Destination {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_lowercase().as_str() {
      "" | "empty" => Ok(Destination::Empty),
      "document" => Ok(Destination::Document),
      "style" => Ok(Destination::Style),
      "script" => Ok(Destination::Script),
      "image" => Ok(Destination::Image),
      "font" => Ok(Destination::Font),
      other => Err(eyre!("Unknown request destination: {}", other)),
    }
  }
}

/// A request issued by a controlled page
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  /// Header names are stored lowercase
  pub headers: BTreeMap<String, String>,
  pub body: String,
  /// True for top-level page loads
  pub navigate: bool,
  pub destination: Destination,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: BTreeMap::new(),
      body: String::new(),
      navigate: false,
      destination: Destination::Empty,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::Get, url)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn with_body(mut self, body: impl Into<String>) -> Self {
    self.body = body.into();
    self
  }

  pub fn navigation(mut self) -> Self {
    self.navigate = true;
    self.destination = Destination::Document;
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  /// Whether the request targets the same scheme/host/port as `origin`.
  pub fn is_same_origin(&self, origin: &Url) -> bool {
    self.url.origin() == origin.origin()
  }
}

/// A response handed back to a controlled page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  /// Acknowledgement returned for a mutating request deferred to the queue.
  pub fn queued() -> Self {
    Self::new(202, serde_json::json!({ "queued": true }).to_string())
      .with_header("content-type", "application/json")
  }

  /// Last-resort response when neither the network nor the cache can answer.
  pub fn network_error() -> Self {
    Self::new(503, "Network error").with_header("content-type", "text/plain")
  }

  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Network seam used by every component that talks to the backend.
///
/// `Err` means the network could not be reached. HTTP error statuses are
/// returned as `Ok` responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// `Fetcher` backed by reqwest
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  /// Requests that get no response within `timeout` fail like an
  /// unreachable network.
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("qbc-worker/", env!("CARGO_PKG_VERSION")))
      .connect_timeout(timeout)
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", request.url, e))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}
