//! Hierarchical cache keys.

use std::fmt;

/// Resource-identity tuple such as `["post", "42", "comments-and-tags"]`.
///
/// Keys form a tree by segment: `["feed", "Academic Hub"]` is the parent of
/// `["feed", "Academic Hub", "0"]` but unrelated to `["feed", "Academic Hub 2"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
  pub fn new<I, S>(segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self(segments.into_iter().map(Into::into).collect())
  }

  pub fn segments(&self) -> &[String] {
    &self.0
  }

  pub fn child(&self, segment: impl Into<String>) -> Self {
    let mut segments = self.0.clone();
    segments.push(segment.into());
    Self(segments)
  }

  /// Segment-wise prefix test. Every key starts with itself.
  pub fn starts_with(&self, prefix: &CacheKey) -> bool {
    self.0.len() >= prefix.0.len() && self.0.iter().zip(&prefix.0).all(|(a, b)| a == b)
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}]", self.0.join(", "))
  }
}

/// Anything that names a cached query.
pub trait QueryKey {
  fn cache_key(&self) -> CacheKey;

  /// Human-readable label for logs.
  fn description(&self) -> String {
    self.cache_key().to_string()
  }
}

impl QueryKey for CacheKey {
  fn cache_key(&self) -> CacheKey {
    self.clone()
  }
}
