//! Multi-step operations built from single gateway calls.
//!
//! Nothing here is transactional. When a later step fails after an earlier
//! one went through, the error is [`ApiError::PartialFailure`] naming both
//! steps and whatever was left behind, and the caller decides how to clean up.

use futures::future::join_all;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::session::fingerprint;

use super::client::HubClient;
use super::types::{
  Avatar, Category, Credentials, FeedPage, NewPost, NewUser, Post, PostActivity, PostDetail,
  PostUpdate, Profile, Tag, UploadResponse, User,
};

impl HubClient {
  /// Log in and adopt the returned token as the session.
  pub async fn sign_in(&self, credentials: &Credentials) -> ApiResult<()> {
    let auth = self.login(credentials).await?;
    info!(username = %credentials.username, token = %fingerprint(&auth.token), "logged in");
    self.session().set_token(Some(auth.token))
  }

  /// Tell the backend (best effort) and drop the local session regardless.
  pub async fn sign_out(&self) -> ApiResult<()> {
    if let Err(e) = self.logout().await {
      warn!(error = %e, "server logout failed, clearing local session anyway");
    }
    self.session().set_token(None)
  }

  /// The user the current session belongs to.
  ///
  /// Fails with `Unauthenticated` without I/O when there is no live session.
  /// A stored token that has expired is cleared on the way.
  pub async fn resolve_current_user(&self) -> ApiResult<User> {
    const OPERATION: &str = "resolve current user";

    let session = self.session();
    let Some(identity) = session.identity() else {
      if session.is_authenticated() {
        warn!("session token expired or unreadable, clearing it");
        if let Err(e) = session.set_token(None) {
          warn!(error = %e, "session cleared in memory only");
        }
      }
      return Err(ApiError::unauthenticated(OPERATION));
    };

    self.user_by_username(&identity.subject).await
  }

  /// Create a post, then attach `tags` to it (skipped when empty).
  pub async fn create_post_with_tags(&self, post: &NewPost, tags: &[Tag]) -> ApiResult<Post> {
    let created = self.create_post(post).await?;
    if tags.is_empty() {
      return Ok(created);
    }

    if let Err(e) = self.add_tags(&created.id, tags).await {
      warn!(post = %created.id, error = %e, "post created but tags were not attached");
      return Err(ApiError::partial("create post", "attach tags", Some(created.id), e));
    }
    debug!(post = %created.id, count = tags.len(), "post created with tags");
    Ok(created)
  }

  /// Update a post's text, then remove and add tags, in that order.
  pub async fn edit_post(
    &self,
    id: &str,
    update: &PostUpdate,
    added_tags: &[Tag],
    removed_tag_ids: &[String],
  ) -> ApiResult<Post> {
    let updated = self.update_post(id, update).await?;
    let mut completed = vec!["update post".to_string()];

    for tag_id in removed_tag_ids {
      if let Err(e) = self.remove_tag(id, tag_id).await {
        return Err(ApiError::partial(
          completed.join(", "),
          format!("remove tag {}", tag_id),
          Some(id.to_string()),
          e,
        ));
      }
      completed.push(format!("remove tag {}", tag_id));
    }

    if !added_tags.is_empty() {
      if let Err(e) = self.add_tags(id, added_tags).await {
        return Err(ApiError::partial(
          completed.join(", "),
          "attach tags",
          Some(id.to_string()),
          e,
        ));
      }
    }
    Ok(updated)
  }

  /// Upload the avatar (when given) under the new username, then create the user with its URL.
  ///
  /// If user creation fails after the upload, the image stays on the server;
  /// the error's `resource_id` is the username it was stored under.
  pub async fn register(&self, user: &NewUser, avatar: Option<&Avatar>) -> ApiResult<User> {
    let Some(avatar) = avatar else {
      return self.create_user(user).await;
    };

    let uploaded = self.upload_avatar(avatar, &user.username).await?;
    let user = NewUser {
      avatar_url: Some(uploaded.url),
      ..user.clone()
    };

    self.create_user(&user).await.map_err(|e| {
      warn!(username = %user.username, error = %e, "avatar uploaded but user was not created");
      ApiError::partial("upload avatar", "create user", Some(user.username.clone()), e)
    })
  }

  /// Store an avatar under a new username and delete the one under the old name.
  ///
  /// On a failed delete the new upload stands and the old image is left
  /// behind; the error's `resource_id` is the old username.
  pub async fn move_avatar(
    &self,
    avatar: &Avatar,
    old_username: &str,
    new_username: &str,
  ) -> ApiResult<UploadResponse> {
    let uploaded = self.upload_avatar(avatar, new_username).await?;

    if let Err(e) = self.remove_avatar(old_username).await {
      return Err(ApiError::partial(
        "upload avatar",
        "remove old avatar",
        Some(old_username.to_string()),
        e,
      ));
    }
    Ok(uploaded)
  }

  // --------------------------------------------------------------------------
  // Assembled reads
  // --------------------------------------------------------------------------

  /// A feed page and the authors of its posts, fetched concurrently.
  pub async fn feed(&self, category: &str, page: u32) -> ApiResult<FeedPage> {
    let posts = self.posts_by_category(category, page).await?;
    let ids = FeedPage::author_ids(&posts);

    let fetched = join_all(ids.iter().map(|id| self.user(id))).await;
    let mut authors = HashMap::with_capacity(ids.len());
    for (id, result) in ids.into_iter().zip(fetched) {
      match result {
        Ok(user) => {
          authors.insert(id, user);
        }
        Err(e) if e.is_unauthenticated() => return Err(e),
        Err(e) => warn!(author = %id, error = %e, "failed to load post author"),
      }
    }

    Ok(FeedPage { posts, authors })
  }

  pub async fn post_activity(&self, post_id: &str) -> ApiResult<PostActivity> {
    let (tags, comments) = futures::try_join!(self.post_tags(post_id), self.post_comments(post_id))?;
    Ok(PostActivity { tags, comments })
  }

  /// The post first, then its author, category, comments and tags together.
  pub async fn post_detail(&self, post_id: &str) -> ApiResult<PostDetail> {
    let post = self.post(post_id).await?;

    let category = async {
      match post.category_id.as_deref() {
        Some(id) => self.category(id).await.map(Some),
        None => Ok::<Option<Category>, ApiError>(None),
      }
    };
    let (author, category, comments, tags) = futures::try_join!(
      self.user(&post.author_id),
      category,
      self.post_comments(post_id),
      self.post_tags(post_id),
    )?;

    Ok(PostDetail {
      post,
      author,
      category,
      comments,
      tags,
    })
  }

  /// A user and their posts.
  pub async fn profile(&self, username: &str) -> ApiResult<Profile> {
    let user = self.user_by_username(username).await?;
    let posts = self.user_posts(&user.id).await?;
    Ok(Profile { user, posts })
  }
}
