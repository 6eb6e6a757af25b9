use reqwest::multipart::{Form, Part};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::http::{ApiRequest, RequestClient, RetryPolicy};
use crate::session::SessionStore;

use super::types::{
  AuthResponse, Avatar, Category, Comment, Credentials, NewComment, NewPost, NewUser, Post,
  PostUpdate, Tag, UploadResponse, User, UserUpdate,
};

/// StudentHub API client: one method per backend endpoint.
///
/// Methods are thin. They describe the call (path, body, access level) and
/// leave auth, timeouts, retries and 401 handling to [`RequestClient`].
#[derive(Clone)]
pub struct HubClient {
  client: RequestClient,
}

impl HubClient {
  pub fn new(config: &Config, session: Arc<SessionStore>) -> ApiResult<Self> {
    let client = RequestClient::new(&config.api, RetryPolicy::from(&config.retry), session)?;
    Ok(Self { client })
  }

  pub fn from_request_client(client: RequestClient) -> Self {
    Self { client }
  }

  pub fn session(&self) -> &Arc<SessionStore> {
    self.client.session()
  }

  // --------------------------------------------------------------------------
  // Users
  // --------------------------------------------------------------------------

  pub async fn create_user(&self, user: &NewUser) -> ApiResult<User> {
    let request = ApiRequest::post("create user", ["users"]).json(user)?;
    self.client.json(request).await
  }

  pub async fn user(&self, id: &str) -> ApiResult<User> {
    self.client.json(ApiRequest::get("fetch user", ["users", id])).await
  }

  pub async fn user_by_username(&self, username: &str) -> ApiResult<User> {
    let request = ApiRequest::get("fetch user by username", ["users"]).query("username", username);
    self.client.json(request).await
  }

  pub async fn user_posts(&self, id: &str) -> ApiResult<Vec<Post>> {
    self
      .client
      .json(ApiRequest::get("fetch user posts", ["users", id, "posts"]))
      .await
  }

  pub async fn update_user(&self, id: &str, update: &UserUpdate) -> ApiResult<User> {
    let request = ApiRequest::put("update user", ["users", id])
      .json(update)?
      .authenticated();
    self.client.json(request).await
  }

  // --------------------------------------------------------------------------
  // Auth
  // --------------------------------------------------------------------------

  /// Exchange credentials for a token. Does not touch the session, not even on 401.
  pub async fn login(&self, credentials: &Credentials) -> ApiResult<AuthResponse> {
    let request = ApiRequest::post("login", ["login"])
      .json(credentials)?
      .credential_exchange();
    self.client.json(request).await
  }

  pub async fn logout(&self) -> ApiResult<()> {
    self.client.empty(ApiRequest::post("logout", ["logout"])).await
  }

  // --------------------------------------------------------------------------
  // Posts
  // --------------------------------------------------------------------------

  pub async fn create_post(&self, post: &NewPost) -> ApiResult<Post> {
    let request = ApiRequest::post("create post", ["posts"])
      .json(post)?
      .authenticated();
    self.client.json(request).await
  }

  pub async fn post(&self, id: &str) -> ApiResult<Post> {
    self.client.json(ApiRequest::get("fetch post", ["posts", id])).await
  }

  /// Pages are zero-based.
  pub async fn posts_by_category(&self, category: &str, page: u32) -> ApiResult<Vec<Post>> {
    let page = page.to_string();
    let request = ApiRequest::get("fetch category feed", ["posts", "category", category, page.as_str()]);
    self.client.json(request).await
  }

  pub async fn update_post(&self, id: &str, update: &PostUpdate) -> ApiResult<Post> {
    let request = ApiRequest::put("update post", ["posts", id])
      .json(update)?
      .authenticated();
    self.client.json(request).await
  }

  pub async fn delete_post(&self, id: &str) -> ApiResult<()> {
    let request = ApiRequest::delete("delete post", ["posts", id]).authenticated();
    self.client.empty(request).await
  }

  // --------------------------------------------------------------------------
  // Comments and tags
  // --------------------------------------------------------------------------

  pub async fn post_comments(&self, post_id: &str) -> ApiResult<Vec<Comment>> {
    self
      .client
      .json(ApiRequest::get("fetch comments", ["posts", post_id, "comments"]))
      .await
  }

  pub async fn add_comment(&self, post_id: &str, comment: &NewComment) -> ApiResult<Comment> {
    let request = ApiRequest::post("add comment", ["posts", post_id, "comments"])
      .json(comment)?
      .authenticated();
    self.client.json(request).await
  }

  pub async fn post_tags(&self, post_id: &str) -> ApiResult<Vec<Tag>> {
    self
      .client
      .json(ApiRequest::get("fetch post tags", ["posts", post_id, "tags"]))
      .await
  }

  /// Attach tags to a post. The body is the JSON array of tags.
  pub async fn add_tags(&self, post_id: &str, tags: &[Tag]) -> ApiResult<()> {
    let request = ApiRequest::post("attach tags", ["posts", post_id, "tags"])
      .json(tags)?
      .authenticated();
    self.client.empty(request).await
  }

  pub async fn remove_tag(&self, post_id: &str, tag_id: &str) -> ApiResult<()> {
    let request = ApiRequest::delete("remove tag", ["posts", post_id, "tags", tag_id]).authenticated();
    self.client.empty(request).await
  }

  pub async fn tags(&self) -> ApiResult<Vec<Tag>> {
    self.client.json(ApiRequest::get("fetch tags", ["tags"])).await
  }

  // --------------------------------------------------------------------------
  // Categories
  // --------------------------------------------------------------------------

  pub async fn categories(&self) -> ApiResult<Vec<Category>> {
    self
      .client
      .json(ApiRequest::get("fetch categories", ["categories"]))
      .await
  }

  pub async fn category(&self, id: &str) -> ApiResult<Category> {
    self
      .client
      .json(ApiRequest::get("fetch category", ["categories", id]))
      .await
  }

  // --------------------------------------------------------------------------
  // Media
  // --------------------------------------------------------------------------

  /// Upload an avatar stored under `username`. Validated locally first.
  pub async fn upload_avatar(&self, avatar: &Avatar, username: &str) -> ApiResult<UploadResponse> {
    avatar.validate()?;

    let file = Part::bytes(avatar.bytes.clone())
      .file_name(avatar.file_name.clone())
      .mime_str(&avatar.content_type)
      .map_err(|e| ApiError::invalid_request("upload avatar", e.to_string()))?;
    let form = Form::new()
      .part("file", file)
      .text("username", username.to_string());

    let request = ApiRequest::post("upload avatar", ["upload"]).multipart(form);
    self.client.json(request).await
  }

  pub async fn remove_avatar(&self, username: &str) -> ApiResult<()> {
    self
      .client
      .empty(ApiRequest::delete("remove avatar", ["upload", username]))
      .await
  }
}
