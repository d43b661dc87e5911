use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;

/// Temporary data directory for daemon tests.
pub struct TempData {
  pub root: tempfile::TempDir,
}

impl Default for TempData {
  fn default() -> Self {
    Self::new()
  }
}

impl TempData {
  pub fn new() -> Self {
    let root = tempfile::tempdir().expect("tempdir");
    Self { root }
  }

  pub fn db_path(&self) -> PathBuf {
    self.root.path().join("relay.db")
  }

  pub fn logs_path(&self) -> PathBuf {
    self.root.path().join("logs.jsonl")
  }
}

/// Poll a condition repeatedly until it returns true or times out.
/// Returns true if condition met, false on timeout.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> bool
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = bool>,
{
  use tokio::time::{Instant, sleep};
  let start = Instant::now();
  loop {
    if check().await {
      return true;
    }
    if start.elapsed() >= timeout {
      return false;
    }
    sleep(interval).await;
  }
}

/// Error half of the standard response envelope.
#[derive(Debug, serde::Deserialize)]
pub struct ErrorBody {
  pub code: String,
  pub message: String,
}

/// The standard `{ok, data, error}` envelope used by every JSON route.
#[derive(Debug, serde::Deserialize)]
pub struct Envelope {
  pub ok: bool,
  pub data: Option<Value>,
  pub error: Option<ErrorBody>,
  pub retry_after_secs: Option<u64>,
}

/// A tiny HTTP JSON client used by integration tests.
pub struct HttpClient {
  addr: SocketAddr,
  client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpClient {
  pub fn new(addr: SocketAddr) -> Self {
    Self {
      addr,
      client: Client::builder(TokioExecutor::new()).build_http(),
    }
  }

  fn uri(&self, path: &str) -> hyper::Uri {
    format!("http://{}{}", self.addr, path)
      .parse()
      .expect("valid uri")
  }

  /// POST a JSON body; returns the status code and parsed envelope.
  pub async fn post(&self, path: &str, body: Value) -> (u16, Envelope) {
    let req = hyper::Request::builder()
      .method(hyper::Method::POST)
      .uri(self.uri(path))
      .header(hyper::header::CONTENT_TYPE, "application/json")
      .body(Full::<Bytes>::from(serde_json::to_vec(&body).unwrap()))
      .unwrap();
    let resp = self.client.request(req).await.expect("request ok");
    let status = resp.status().as_u16();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let envelope = serde_json::from_slice(&bytes).expect("valid envelope json");
    (status, envelope)
  }

  /// GET a JSON route; returns the status code and parsed envelope.
  pub async fn get(&self, path: &str) -> (u16, Envelope) {
    let req = hyper::Request::builder()
      .method(hyper::Method::GET)
      .uri(self.uri(path))
      .body(Full::<Bytes>::from(Bytes::new()))
      .unwrap();
    let resp = self.client.request(req).await.expect("request ok");
    let status = resp.status().as_u16();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let envelope = serde_json::from_slice(&bytes).expect("valid envelope json");
    (status, envelope)
  }

  /// GET a raw response without consuming the body, for streaming
  /// routes.
  pub async fn get_streaming(
    &self,
    path: &str,
  ) -> hyper::Response<hyper::body::Incoming> {
    let req = hyper::Request::builder()
      .method(hyper::Method::GET)
      .uri(self.uri(path))
      .body(Full::<Bytes>::from(Bytes::new()))
      .unwrap();
    self.client.request(req).await.expect("request ok")
  }
}

/// Read the next ndjson line from a streaming body, or None once the
/// stream ends. Buffers across frames since one frame may carry partial
/// lines.
pub struct NdjsonReader {
  body: hyper::body::Incoming,
  buffer: Vec<u8>,
}

impl NdjsonReader {
  pub fn new(body: hyper::body::Incoming) -> Self {
    Self {
      body,
      buffer: Vec::new(),
    }
  }

  pub async fn next_line(&mut self) -> Option<Value> {
    loop {
      if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = self.buffer.drain(..=pos).collect();
        let trimmed = &line[..line.len() - 1];
        if trimmed.is_empty() {
          continue;
        }
        return serde_json::from_slice(trimmed).ok();
      }
      let frame = self.body.frame().await?.ok()?;
      if let Some(data) = frame.data_ref() {
        self.buffer.extend_from_slice(data);
      }
    }
  }
}
