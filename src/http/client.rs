use reqwest::header::AUTHORIZATION;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::request::{Access, ApiRequest, Payload};
use super::retry::RetryPolicy;
use crate::config::{ApiConfig, CredentialMode};
use crate::error::{ApiError, ApiResult};
use crate::session::SessionStore;

/// Executes backend calls with one uniform policy, whatever the resource.
///
/// - attaches the session's bearer token when there is one
/// - bounds every call with a timeout (longer for mutations)
/// - on 401 clears the session it was sent with (once) and reports `Unauthenticated`
/// - retries reads with exponential backoff on transport failures and 5xx
/// - never retries mutations
#[derive(Clone)]
pub struct RequestClient {
  http: reqwest::Client,
  base_url: Url,
  session: Arc<SessionStore>,
  retry: RetryPolicy,
  timeout: Duration,
  write_timeout: Duration,
  credentials: CredentialMode,
}

/// A failed attempt that may be worth repeating.
struct Transient {
  status: Option<u16>,
  message: String,
}

impl RequestClient {
  pub fn new(config: &ApiConfig, retry: RetryPolicy, session: Arc<SessionStore>) -> ApiResult<Self> {
    let base_url = Url::parse(&config.base_url).map_err(|e| {
      ApiError::invalid_request("configure client", format!("bad base URL {}: {}", config.base_url, e))
    })?;
    if base_url.cannot_be_a_base() {
      return Err(ApiError::invalid_request(
        "configure client",
        format!("base URL {} cannot carry a path", config.base_url),
      ));
    }

    let http = reqwest::Client::builder()
      .cookie_store(config.credentials.keeps_cookies())
      .user_agent(concat!("studenthub/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| ApiError::invalid_request("configure client", e.to_string()))?;

    Ok(Self {
      http,
      base_url,
      session,
      retry,
      timeout: config.timeout(),
      write_timeout: config.write_timeout(),
      credentials: config.credentials,
    })
  }

  pub fn session(&self) -> &Arc<SessionStore> {
    &self.session
  }

  pub fn retry_policy(&self) -> &RetryPolicy {
    &self.retry
  }

  /// Execute and decode a JSON response body.
  pub async fn json<T: DeserializeOwned>(&self, request: ApiRequest) -> ApiResult<T> {
    let operation = request.operation;
    let response = self.execute(request).await?;
    let bytes = response.bytes().await.map_err(|e| ApiError::Transport {
      operation: operation.to_string(),
      attempts: 1,
      status: None,
      message: format!("failed to read response body: {}", e),
    })?;

    serde_json::from_slice(&bytes).map_err(|e| ApiError::decode(operation, e))
  }

  /// Execute and discard the response body.
  pub async fn empty(&self, request: ApiRequest) -> ApiResult<()> {
    self.execute(request).await.map(|_| ())
  }

  /// Execute with the full policy and return the successful response.
  pub async fn execute(&self, request: ApiRequest) -> ApiResult<Response> {
    let idempotent = request.is_idempotent();
    let ApiRequest {
      operation,
      method,
      segments,
      query,
      payload,
      timeout,
      access,
      credential_exchange,
    } = request;

    if access == Access::Authenticated && !self.session.is_authenticated() {
      debug!(operation, "refusing protected call without a session");
      return Err(ApiError::unauthenticated(operation));
    }

    let url = self.url_for(operation, &segments, &query)?;
    let timeout = timeout.unwrap_or(if idempotent {
      self.timeout
    } else {
      self.write_timeout
    });
    let max_attempts = if idempotent {
      self.retry.max_attempts.max(1)
    } else {
      1
    };

    // Only reads loop, and reads carry no body, so the payload is used once.
    let mut payload = Some(payload);
    let mut attempt = 0u32;

    loop {
      attempt += 1;

      let mut builder = self
        .http
        .request(method.clone(), url.clone())
        .timeout(timeout);
      // The token this attempt carries, so a late 401 only ends this session.
      let sent_token = self.session.token();
      if self.credentials.sends_bearer() {
        if let Some(token) = &sent_token {
          builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
      }
      builder = match payload.take().unwrap_or_default() {
        Payload::Empty => builder,
        Payload::Json(body) => builder.json(&body),
        Payload::Multipart(form) => builder.multipart(form),
      };

      debug!(operation, %method, %url, attempt, "sending request");

      let failure = match builder.send().await {
        Ok(response) => {
          let status = response.status();
          if status.is_success() {
            debug!(operation, status = status.as_u16(), attempt, "request succeeded");
            return Ok(response);
          }

          if status == StatusCode::UNAUTHORIZED && !credential_exchange {
            if let Some(token) = &sent_token {
              match self.session.clear_if_current(token) {
                Ok(true) => warn!(operation, "authorization rejected, session cleared"),
                Ok(false) => debug!(operation, "authorization rejected for a replaced token"),
                Err(e) => warn!(operation, error = %e, "session cleared in memory only"),
              }
            }
            return Err(ApiError::Unauthenticated {
              operation: operation.to_string(),
              status: Some(status.as_u16()),
            });
          }

          let message = error_message(response).await;
          if !is_transient(status) {
            return Err(ApiError::Rejected {
              operation: operation.to_string(),
              status: status.as_u16(),
              message,
            });
          }
          Transient {
            status: Some(status.as_u16()),
            message,
          }
        }
        Err(e) if e.is_builder() => {
          return Err(ApiError::invalid_request(operation, e.to_string()));
        }
        Err(e) => Transient {
          status: None,
          message: describe_transport_error(&e),
        },
      };

      if attempt >= max_attempts {
        warn!(operation, attempt, error = %failure.message, "giving up");
        return Err(ApiError::Transport {
          operation: operation.to_string(),
          attempts: attempt,
          status: failure.status,
          message: failure.message,
        });
      }

      let delay = self.retry.delay_for_retry(attempt - 1);
      warn!(
        operation,
        attempt,
        delay_ms = delay.as_millis() as u64,
        error = %failure.message,
        "transient failure, retrying"
      );
      tokio::time::sleep(delay).await;
    }
  }

  fn url_for(&self, operation: &str, segments: &[String], query: &[(String, String)]) -> ApiResult<Url> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| ApiError::invalid_request(operation, "base URL cannot carry a path"))?
      .pop_if_empty()
      .extend(segments);

    if !query.is_empty() {
      url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
  }
}

/// 5xx and request timeouts are worth another try; every other status is final.
fn is_transient(status: StatusCode) -> bool {
  status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT
}

fn describe_transport_error(e: &reqwest::Error) -> String {
  if e.is_timeout() {
    format!("timed out: {}", e)
  } else if e.is_connect() {
    format!("connection failed: {}", e)
  } else {
    e.to_string()
  }
}

/// Best-effort extraction of the server's explanation from an error response.
async fn error_message(response: Response) -> String {
  let status = response.status();
  let body = response.text().await.unwrap_or_default();
  message_from_body(status, &body)
}

fn message_from_body(status: StatusCode, body: &str) -> String {
  if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
    for field in ["message", "error", "detail"] {
      if let Some(text) = value.get(field).and_then(|v| v.as_str()) {
        return text.to_string();
      }
    }
  }

  let body = body.trim();
  if body.is_empty() {
    return status
      .canonical_reason()
      .unwrap_or("unexpected status")
      .to_string();
  }
  body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client(base: &str) -> RequestClient {
    let config = ApiConfig {
      base_url: base.to_string(),
      ..ApiConfig::default()
    };
    RequestClient::new(&config, RetryPolicy::default(), Arc::new(SessionStore::in_memory())).unwrap()
  }

  #[test]
  fn test_segments_are_encoded() {
    let client = client("https://hub.example");
    let url = client
      .url_for(
        "fetch",
        &["posts".into(), "category".into(), "Academic Hub".into(), "0".into()],
        &[],
      )
      .unwrap();
    assert_eq!(url.as_str(), "https://hub.example/posts/category/Academic%20Hub/0");
  }

  #[test]
  fn test_base_path_and_query_preserved() {
    let client = client("https://hub.example/api/");
    let url = client
      .url_for("fetch", &["users".into()], &[("username".into(), "a b&c".into())])
      .unwrap();
    assert_eq!(url.as_str(), "https://hub.example/api/users?username=a+b%26c");
  }

  #[test]
  fn test_bad_base_url_rejected() {
    let config = ApiConfig {
      base_url: "not a url".to_string(),
      ..ApiConfig::default()
    };
    let result = RequestClient::new(&config, RetryPolicy::default(), Arc::new(SessionStore::in_memory()));
    assert!(matches!(result, Err(ApiError::InvalidRequest { .. })));
  }

  #[test]
  fn test_transient_statuses() {
    assert!(is_transient(StatusCode::INTERNAL_SERVER_ERROR));
    assert!(is_transient(StatusCode::GATEWAY_TIMEOUT));
    assert!(is_transient(StatusCode::REQUEST_TIMEOUT));
    assert!(!is_transient(StatusCode::BAD_REQUEST));
    assert!(!is_transient(StatusCode::NOT_FOUND));
  }

  #[test]
  fn test_message_from_body() {
    assert_eq!(
      message_from_body(StatusCode::BAD_REQUEST, r#"{"message":"title required"}"#),
      "title required"
    );
    assert_eq!(
      message_from_body(StatusCode::CONFLICT, r#"{"detail":"username taken"}"#),
      "username taken"
    );
    assert_eq!(message_from_body(StatusCode::NOT_FOUND, ""), "Not Found");
    assert_eq!(message_from_body(StatusCode::BAD_REQUEST, " plain text "), "plain text");
  }
}
