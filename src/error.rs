//! Error taxonomy shared by the request client, the gateway and the query cache.
//!
//! Every variant carries the name of the operation that failed so callers can
//! tell a failed post creation apart from a failed tag attachment without
//! inspecting messages. Errors are `Clone` because one in-flight fetch may be
//! awaited by several cache consumers.

use thiserror::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
  /// Credential missing, rejected or expired. The session has already been cleared.
  #[error("{operation}: not authenticated")]
  Unauthenticated {
    operation: String,
    status: Option<u16>,
  },

  /// Timeout, unreachable host or a 5xx response, after all permitted attempts.
  #[error("{operation}: transport failure after {attempts} attempt(s): {message}")]
  Transport {
    operation: String,
    attempts: u32,
    status: Option<u16>,
    message: String,
  },

  /// The backend refused the request (4xx other than 401).
  #[error("{operation}: rejected with status {status}: {message}")]
  Rejected {
    operation: String,
    status: u16,
    message: String,
  },

  #[error("{operation}: failed to decode response: {message}")]
  Decode { operation: String, message: String },

  #[error("{operation}: invalid request: {message}")]
  InvalidRequest { operation: String, message: String },

  #[error("credential storage: {0}")]
  Storage(String),

  /// A multi-step operation where `completed` went through and `failed` did not.
  /// Nothing is rolled back; `resource_id` names what was left behind.
  #[error("{failed} failed after {completed} succeeded: {source}")]
  PartialFailure {
    completed: String,
    failed: String,
    resource_id: Option<String>,
    source: Box<ApiError>,
  },
}

impl ApiError {
  pub fn unauthenticated(operation: impl Into<String>) -> Self {
    Self::Unauthenticated {
      operation: operation.into(),
      status: None,
    }
  }

  pub fn invalid_request(operation: impl Into<String>, message: impl Into<String>) -> Self {
    Self::InvalidRequest {
      operation: operation.into(),
      message: message.into(),
    }
  }

  pub fn decode(operation: impl Into<String>, message: impl ToString) -> Self {
    Self::Decode {
      operation: operation.into(),
      message: message.to_string(),
    }
  }

  pub fn partial(
    completed: impl Into<String>,
    failed: impl Into<String>,
    resource_id: Option<String>,
    source: ApiError,
  ) -> Self {
    Self::PartialFailure {
      completed: completed.into(),
      failed: failed.into(),
      resource_id,
      source: Box::new(source),
    }
  }

  /// True for authentication failures, including ones nested in a partial failure.
  pub fn is_unauthenticated(&self) -> bool {
    match self {
      Self::Unauthenticated { .. } => true,
      Self::PartialFailure { source, .. } => source.is_unauthenticated(),
      _ => false,
    }
  }

  pub fn is_transport(&self) -> bool {
    matches!(self, Self::Transport { .. })
  }

  pub fn is_partial(&self) -> bool {
    matches!(self, Self::PartialFailure { .. })
  }

  /// HTTP status attached to the failure, if a response was received.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Unauthenticated { status, .. } | Self::Transport { status, .. } => *status,
      Self::Rejected { status, .. } => Some(*status),
      Self::PartialFailure { source, .. } => source.status(),
      _ => None,
    }
  }

  /// Name of the operation that failed. For partial failures this is the failed step.
  pub fn operation(&self) -> &str {
    match self {
      Self::Unauthenticated { operation, .. }
      | Self::Transport { operation, .. }
      | Self::Rejected { operation, .. }
      | Self::Decode { operation, .. }
      | Self::InvalidRequest { operation, .. } => operation,
      Self::Storage(_) => "credential storage",
      Self::PartialFailure { failed, .. } => failed,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partial_failure_keeps_inner_cause() {
    let inner = ApiError::Transport {
      operation: "attach tags".to_string(),
      attempts: 1,
      status: Some(504),
      message: "gateway timeout".to_string(),
    };
    let err = ApiError::partial("create post", "attach tags", Some("p1".to_string()), inner);

    assert!(err.is_partial());
    assert!(!err.is_transport());
    assert_eq!(err.status(), Some(504));
    assert_eq!(err.operation(), "attach tags");
    assert_eq!(
      err.to_string(),
      "attach tags failed after create post succeeded: attach tags: transport failure after 1 attempt(s): gateway timeout"
    );
  }

  #[test]
  fn test_unauthenticated_detected_through_partial() {
    let err = ApiError::partial(
      "upload avatar",
      "create user",
      None,
      ApiError::unauthenticated("create user"),
    );
    assert!(err.is_unauthenticated());
  }
}
