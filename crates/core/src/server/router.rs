use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode, header};
use serde_json::Value;
use tracing::warn;

use super::handlers;
use super::AppState;
use crate::error::ApiError;
use crate::wire::Envelope;

pub(super) type BoxedBody = BoxBody<Bytes, Infallible>;

pub(super) fn full_body(bytes: Bytes) -> BoxedBody {
  Full::new(bytes).boxed()
}

pub(super) fn json_response(status: StatusCode, envelope: &Envelope) -> Response<BoxedBody> {
  let body = serde_json::to_vec(envelope).unwrap_or_else(|_| b"{\"ok\":false}".to_vec());
  let mut builder = Response::builder()
    .status(status)
    .header(header::CONTENT_TYPE, "application/json");
  if let Some(retry) = envelope.retry_after_secs {
    builder = builder.header(header::RETRY_AFTER, retry.to_string());
  }
  builder
    .body(full_body(Bytes::from(body)))
    .expect("build response")
}

pub(super) fn error_response(err: &ApiError) -> Response<BoxedBody> {
  if matches!(err, ApiError::Internal(_)) {
    warn!(event = "internal_error", error = %err);
  }
  let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
  json_response(status, &Envelope::failure(err))
}

fn ok_response(data: Value) -> Response<BoxedBody> {
  json_response(StatusCode::OK, &Envelope::success(data))
}

fn route_not_found() -> Response<BoxedBody> {
  let envelope = Envelope {
    ok: false,
    data: None,
    error: Some(crate::wire::ErrorBody {
      code: "NOT_FOUND".to_string(),
      message: "not found".to_string(),
    }),
    retry_after_secs: None,
  };
  json_response(StatusCode::NOT_FOUND, &envelope)
}

/// Join URL segments back into a ledger path, guarding against traversal.
fn ledger_path(segments: &[&str]) -> Result<String, ApiError> {
  if segments.is_empty() {
    return Err(ApiError::InvalidPath);
  }
  for segment in segments {
    if segment.is_empty() || *segment == "." || *segment == ".." || segment.contains('\\') {
      return Err(ApiError::InvalidPath);
    }
  }
  Ok(format!("/{}", segments.join("/")))
}

fn query_param(req: &Request<Incoming>, name: &str) -> Option<String> {
  let query = req.uri().query()?;
  for pair in query.split('&') {
    let mut parts = pair.splitn(2, '=');
    if parts.next() == Some(name) {
      return Some(parts.next().unwrap_or_default().to_string());
    }
  }
  None
}

async fn read_json(req: Request<Incoming>) -> Result<Value, ApiError> {
  let bytes = req
    .into_body()
    .collect()
    .await
    .map_err(|_| ApiError::InvalidRequest("could not read request body".into()))?
    .to_bytes();
  if bytes.is_empty() {
    return Ok(Value::Null);
  }
  serde_json::from_slice(&bytes)
    .map_err(|e| ApiError::InvalidRequest(format!("invalid json body: {e}")))
}

pub(super) async fn handle(state: Arc<AppState>, req: Request<Incoming>) -> Response<BoxedBody> {
  let method = req.method().clone();
  let path = req.uri().path().to_string();
  let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

  match (&method, segments.as_slice()) {
    (&Method::POST, ["workspaces"]) => {
      json_handler(req, |body| handlers::create_workspace(&state, body)).await
    }
    (&Method::POST, ["workspaces", "claim"]) => {
      json_handler(req, |body| handlers::claim_workspace(&state, body)).await
    }
    (&Method::POST, ["capabilities", "check"]) => {
      json_handler(req, |body| handlers::check_capabilities(&state, body)).await
    }
    (&Method::GET, ["j", job_key]) => {
      let job_key = (*job_key).to_string();
      match handlers::poll_job(&state, &job_key) {
        Ok(data) => ok_response(data),
        Err(err) => error_response(&err),
      }
    }
    (&Method::GET, ["events", key]) => {
      let key = (*key).to_string();
      handlers::subscribe(&state, &key)
    }
    (&Method::POST, ["a", key, "api-keys"]) => {
      let key = (*key).to_string();
      match handlers::create_api_key(&state, &key) {
        Ok(data) => ok_response(data),
        Err(err) => error_response(&err),
      }
    }
    (&Method::POST, ["a", key, "files", rest @ ..]) => {
      let key = (*key).to_string();
      let file_path = match ledger_path(rest) {
        Ok(p) => p,
        Err(err) => return error_response(&err),
      };
      json_handler(req, |body| handlers::append(&state, &key, &file_path, body)).await
    }
    (&Method::GET, ["a", key, "files", rest @ ..]) => {
      let key = (*key).to_string();
      let file_path = match ledger_path(rest) {
        Ok(p) => p,
        Err(err) => return error_response(&err),
      };
      let kind = query_param(&req, "kind");
      let author = query_param(&req, "author");
      match handlers::list_appends(&state, &key, &file_path, kind.as_deref(), author.as_deref()) {
        Ok(data) => ok_response(data),
        Err(err) => error_response(&err),
      }
    }
    (&Method::GET, ["a", key, "folders", rest @ .., "claims"]) => {
      let key = (*key).to_string();
      let folder_path = match ledger_path(rest) {
        Ok(p) => p,
        Err(err) => return error_response(&err),
      };
      let author = query_param(&req, "author");
      match handlers::list_claims(&state, &key, &folder_path, author.as_deref()) {
        Ok(data) => ok_response(data),
        Err(err) => error_response(&err),
      }
    }
    _ => route_not_found(),
  }
}

async fn json_handler<F>(req: Request<Incoming>, f: F) -> Response<BoxedBody>
where
  F: FnOnce(Value) -> Result<Value, ApiError>,
{
  let body = match read_json(req).await {
    Ok(v) => v,
    Err(err) => return error_response(&err),
  };
  match f(body) {
    Ok(data) => ok_response(data),
    Err(err) => error_response(&err),
  }
}
