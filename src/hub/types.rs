//! Records exchanged with the StudentHub backend.
//!
//! Known fields are typed; everything else the backend sends is kept in
//! `extra` and written back untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{ApiError, ApiResult};

/// Largest avatar accepted for upload.
pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

/// Characters of post content searched by [`FeedPage::filter`].
const SEARCH_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: String,
  pub username: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub avatar_url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub content: String,
  pub author_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub category_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
  pub id: String,
  pub content: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub author_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub post_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
  pub id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
  pub id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Tag {
  pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      created_at: None,
      extra: Map::new(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
  pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
  pub url: String,
}

// ============================================================================
// Inputs
// ============================================================================

#[derive(Clone, Serialize)]
pub struct Credentials {
  pub username: String,
  pub password: String,
}

impl Credentials {
  pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
    Self {
      username: username.into(),
      password: password.into(),
    }
  }
}

impl fmt::Debug for Credentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Credentials")
      .field("username", &self.username)
      .field("password", &"<redacted>")
      .finish()
  }
}

/// Registration payload. The backend hashes `password_hash` itself despite the name.
#[derive(Clone, Serialize)]
pub struct NewUser {
  pub username: String,
  pub email: String,
  pub password_hash: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub avatar_url: Option<String>,
}

impl fmt::Debug for NewUser {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("NewUser")
      .field("username", &self.username)
      .field("email", &self.email)
      .field("password_hash", &"<redacted>")
      .field("avatar_url", &self.avatar_url)
      .finish()
  }
}

/// Partial user update; unset fields are left alone by the backend.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub username: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPost {
  pub title: String,
  pub content: String,
  pub category_id: String,
  pub author_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostUpdate {
  pub title: String,
  pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewComment {
  pub content: String,
  pub author_id: String,
}

/// Image bytes destined for `POST /upload`.
#[derive(Clone)]
pub struct Avatar {
  pub file_name: String,
  pub content_type: String,
  pub bytes: Vec<u8>,
}

impl Avatar {
  pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
    Self {
      file_name: file_name.into(),
      content_type: content_type.into(),
      bytes,
    }
  }

  /// Reject oversized or non-image files before any upload.
  pub fn validate(&self) -> ApiResult<()> {
    if self.bytes.is_empty() {
      return Err(ApiError::invalid_request("upload avatar", "image is empty"));
    }
    if self.bytes.len() > MAX_AVATAR_BYTES {
      return Err(ApiError::invalid_request(
        "upload avatar",
        format!(
          "image is {} bytes, the limit is {} bytes",
          self.bytes.len(),
          MAX_AVATAR_BYTES
        ),
      ));
    }
    if !self.content_type.starts_with("image/") {
      return Err(ApiError::invalid_request(
        "upload avatar",
        format!("{} is not an image type", self.content_type),
      ));
    }
    Ok(())
  }
}

impl fmt::Debug for Avatar {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Avatar")
      .field("file_name", &self.file_name)
      .field("content_type", &self.content_type)
      .field("len", &self.bytes.len())
      .finish()
  }
}

// ============================================================================
// Assembled views
// ============================================================================

/// One page of a category feed with the authors of its posts.
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
  pub posts: Vec<Post>,
  /// Keyed by user id. Authors that failed to load are absent.
  pub authors: HashMap<String, User>,
}

impl FeedPage {
  pub fn author_of(&self, post: &Post) -> Option<&User> {
    self.authors.get(&post.author_id)
  }

  /// Posts whose title or content preview contains `term`, ignoring case.
  /// A blank term matches everything.
  pub fn filter(&self, term: &str) -> Vec<&Post> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
      return self.posts.iter().collect();
    }
    self
      .posts
      .iter()
      .filter(|post| {
        let preview: String = post.content.chars().take(SEARCH_PREVIEW_CHARS).collect();
        post.title.to_lowercase().contains(&term) || preview.to_lowercase().contains(&term)
      })
      .collect()
  }

  pub(crate) fn author_ids(posts: &[Post]) -> Vec<String> {
    let mut seen = HashSet::new();
    posts
      .iter()
      .filter(|p| seen.insert(p.author_id.as_str()))
      .map(|p| p.author_id.clone())
      .collect()
  }
}

/// Tags and comments of a post, fetched together.
#[derive(Debug, Clone, Default)]
pub struct PostActivity {
  pub tags: Vec<Tag>,
  pub comments: Vec<Comment>,
}

/// A post with everything a detail view shows next to it.
#[derive(Debug, Clone)]
pub struct PostDetail {
  pub post: Post,
  pub author: User,
  pub category: Option<Category>,
  pub comments: Vec<Comment>,
  pub tags: Vec<Tag>,
}

#[derive(Debug, Clone)]
pub struct Profile {
  pub user: User,
  pub posts: Vec<Post>,
}
