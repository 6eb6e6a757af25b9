//! Cache keys for StudentHub queries.

use crate::cache::{CacheKey, QueryKey};

// ============================================================================
// Query key types
// ============================================================================

/// Query key types for StudentHub API calls.
///
/// Keys nest by segment so related data can be invalidated together:
/// `["post", id]` covers the post and its `["post", id, "comments-and-tags"]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HubQueryKey {
  /// Every feed page of every category
  Feeds,
  /// Every page of one category
  CategoryFeed { category: String },
  /// One feed page with its authors
  Feed { category: String, page: u32 },
  /// A post and everything keyed below it
  Post { id: String },
  /// Assembled detail view of a post
  PostDetail { id: String },
  /// Tags and comments of a post
  PostActivity { id: String },
  User { id: String },
  UserByUsername { username: String },
  UserPosts { id: String },
  /// A user and their posts
  Profile { username: String },
  /// The user behind the current session
  CurrentUser,
  Categories,
  Category { id: String },
  Tags,
}

impl QueryKey for HubQueryKey {
  fn cache_key(&self) -> CacheKey {
    match self {
      Self::Feeds => CacheKey::new(["feed"]),
      Self::CategoryFeed { category } => CacheKey::new(["feed", category.as_str()]),
      Self::Feed { category, page } => {
        CacheKey::new(["feed".to_string(), category.clone(), page.to_string()])
      }
      Self::Post { id } => CacheKey::new(["post", id.as_str()]),
      Self::PostDetail { id } => CacheKey::new(["post", id.as_str(), "detail"]),
      Self::PostActivity { id } => CacheKey::new(["post", id.as_str(), "comments-and-tags"]),
      Self::User { id } => CacheKey::new(["user", id.as_str()]),
      Self::UserByUsername { username } => CacheKey::new(["username", username.as_str()]),
      Self::UserPosts { id } => CacheKey::new(["user", id.as_str(), "posts"]),
      Self::Profile { username } => CacheKey::new(["username", username.as_str(), "profile"]),
      Self::CurrentUser => CacheKey::new(["current-user"]),
      Self::Categories => CacheKey::new(["categories"]),
      Self::Category { id } => CacheKey::new(["categories", id.as_str()]),
      Self::Tags => CacheKey::new(["tags"]),
    }
  }

  fn description(&self) -> String {
    match self {
      Self::Feeds => "all feeds".to_string(),
      Self::CategoryFeed { category } => format!("{} feed", category),
      Self::Feed { category, page } => format!("{} feed page {}", category, page),
      Self::Post { id } => format!("post {}", id),
      Self::PostDetail { id } => format!("post {} detail", id),
      Self::PostActivity { id } => format!("post {} comments and tags", id),
      Self::User { id } => format!("user {}", id),
      Self::UserByUsername { username } => format!("user {}", username),
      Self::UserPosts { id } => format!("posts by user {}", id),
      Self::Profile { username } => format!("profile of {}", username),
      Self::CurrentUser => "current user".to_string(),
      Self::Categories => "all categories".to_string(),
      Self::Category { id } => format!("category {}", id),
      Self::Tags => "all tags".to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_post_subtree_covers_activity_and_detail() {
    let post = HubQueryKey::Post { id: "7".into() }.cache_key();
    let activity = HubQueryKey::PostActivity { id: "7".into() }.cache_key();
    let detail = HubQueryKey::PostDetail { id: "7".into() }.cache_key();
    let other = HubQueryKey::PostActivity { id: "70".into() }.cache_key();

    assert_eq!(activity.segments(), ["post", "7", "comments-and-tags"]);
    assert!(activity.starts_with(&post));
    assert!(detail.starts_with(&post));
    assert!(!other.starts_with(&post));
  }

  #[test]
  fn test_feed_keys_nest_by_category() {
    let page = HubQueryKey::Feed {
      category: "Academic Hub".into(),
      page: 2,
    }
    .cache_key();

    assert_eq!(page.segments(), ["feed", "Academic Hub", "2"]);
    assert!(page.starts_with(&HubQueryKey::Feeds.cache_key()));
    assert!(page.starts_with(
      &HubQueryKey::CategoryFeed {
        category: "Academic Hub".into()
      }
      .cache_key()
    ));
    assert!(!page.starts_with(
      &HubQueryKey::CategoryFeed {
        category: "Academic".into()
      }
      .cache_key()
    ));
  }
}
