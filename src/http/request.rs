//! Description of one backend call, independent of how it is executed.

use reqwest::multipart::Form;
use reqwest::Method;
use serde::Serialize;
use std::time::Duration;

use crate::error::{ApiError, ApiResult};

/// Whether a call may go out without a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Access {
  /// Sent with credentials if there are any, without otherwise
  #[default]
  Public,
  /// Fails with `Unauthenticated` before any I/O when signed out
  Authenticated,
}

/// Request body.
#[derive(Debug, Default)]
pub enum Payload {
  #[default]
  Empty,
  Json(serde_json::Value),
  Multipart(Form),
}

/// A single backend call. Built by the gateway, executed by [`super::RequestClient`].
#[derive(Debug)]
pub struct ApiRequest {
  pub(crate) operation: &'static str,
  pub(crate) method: Method,
  pub(crate) segments: Vec<String>,
  pub(crate) query: Vec<(String, String)>,
  pub(crate) payload: Payload,
  pub(crate) timeout: Option<Duration>,
  pub(crate) access: Access,
  /// A 401 refuses the submitted credentials rather than the session
  pub(crate) credential_exchange: bool,
}

impl ApiRequest {
  /// `segments` are raw path segments; they are percent-encoded when the URL is built.
  pub fn new<I, S>(operation: &'static str, method: Method, segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      operation,
      method,
      segments: segments.into_iter().map(Into::into).collect(),
      query: Vec::new(),
      payload: Payload::Empty,
      timeout: None,
      access: Access::Public,
      credential_exchange: false,
    }
  }

  pub fn get<I, S>(operation: &'static str, segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::new(operation, Method::GET, segments)
  }

  pub fn post<I, S>(operation: &'static str, segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::new(operation, Method::POST, segments)
  }

  pub fn put<I, S>(operation: &'static str, segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::new(operation, Method::PUT, segments)
  }

  pub fn delete<I, S>(operation: &'static str, segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::new(operation, Method::DELETE, segments)
  }

  pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.query.push((name.into(), value.into()));
    self
  }

  pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> ApiResult<Self> {
    let value = serde_json::to_value(body)
      .map_err(|e| ApiError::invalid_request(self.operation, format!("unserializable body: {}", e)))?;
    self.payload = Payload::Json(value);
    Ok(self)
  }

  pub fn multipart(mut self, form: Form) -> Self {
    self.payload = Payload::Multipart(form);
    self
  }

  /// Override the client's default timeout for this call only.
  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn authenticated(mut self) -> Self {
    self.access = Access::Authenticated;
    self
  }

  /// Mark a call that trades credentials for a session (login).
  ///
  /// Its 401 is reported as `Rejected` and leaves the current session alone.
  pub fn credential_exchange(mut self) -> Self {
    self.credential_exchange = true;
    self
  }

  pub fn operation(&self) -> &'static str {
    self.operation
  }

  /// Reads may be retried; anything with side effects may not.
  pub fn is_idempotent(&self) -> bool {
    self.method == Method::GET || self.method == Method::HEAD
  }
}
