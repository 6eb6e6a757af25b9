//! Cached StudentHub client that wraps HubClient with transparent caching.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{CacheKey, QueryCache, QueryKey, QueryOptions};
use crate::config::Config;
use crate::error::ApiResult;
use crate::query::Query;
use crate::session::{SessionStore, SqliteStore};

use super::cache::HubQueryKey;
use super::client::HubClient;
use super::types::{
  Avatar, Category, Comment, Credentials, FeedPage, NewComment, NewPost, Post, PostActivity,
  PostDetail, PostUpdate, Profile, Tag, UploadResponse, User, UserUpdate,
};

/// Feeds tolerate a few seconds of staleness; mutations invalidate them anyway.
const FEED_STALE_TIME: Duration = Duration::from_secs(5);

/// StudentHub client with transparent caching support.
///
/// Reads go through the shared [`QueryCache`]; mutations go straight to the
/// backend and invalidate the keys they affect. Logging out (or any 401)
/// clears the whole cache.
#[derive(Clone)]
pub struct CachedHubClient {
  inner: HubClient,
  cache: QueryCache,
  options: QueryOptions,
}

impl CachedHubClient {
  /// Wrap `inner`, clearing `cache` whenever its session ends.
  pub fn new(inner: HubClient, cache: QueryCache, options: QueryOptions) -> Self {
    let on_logout = cache.clone();
    inner.session().on_logout(move || on_logout.clear());
    Self {
      inner,
      cache,
      options,
    }
  }

  /// Open the persisted session, restore it and build a ready client.
  ///
  /// Must run inside a tokio runtime; it starts the cache collector.
  pub async fn connect(config: &Config) -> ApiResult<Self> {
    let storage = SqliteStore::open()?;
    let session = Arc::new(SessionStore::new(storage));
    let state = session.restore_on_startup();
    info!(authenticated = state.is_authenticated, "session restored");

    let inner = HubClient::new(config, session)?;
    let cache = QueryCache::new(config.cache.gc_time());
    cache.spawn_collector(config.cache.gc_time().max(Duration::from_secs(1)));

    let options = QueryOptions::default().with_stale_time(config.cache.stale_time());
    Ok(Self::new(inner, cache, options))
  }

  pub fn hub(&self) -> &HubClient {
    &self.inner
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  pub fn session(&self) -> &Arc<SessionStore> {
    self.inner.session()
  }

  fn feed_options(&self) -> QueryOptions {
    self.options.clone().with_stale_time(FEED_STALE_TIME)
  }

  async fn cached<T, F, Fut>(&self, key: HubQueryKey, options: &QueryOptions, fetch: F) -> ApiResult<Arc<T>>
  where
    T: Send + Sync + 'static,
    F: FnOnce(HubClient) -> Fut,
    Fut: Future<Output = ApiResult<T>> + Send + 'static,
  {
    let inner = self.inner.clone();
    let result = self.cache.fetch(&key, options, move || fetch(inner)).await?;
    debug!(key = %key.description(), source = ?result.source, "query served");
    Ok(result.data)
  }

  // --------------------------------------------------------------------------
  // Session
  // --------------------------------------------------------------------------

  /// Log in. Anything cached under the previous session is dropped.
  pub async fn sign_in(&self, credentials: &Credentials) -> ApiResult<()> {
    self.inner.sign_in(credentials).await?;
    self.cache.clear();
    Ok(())
  }

  /// Log out; the logout hook clears the cache.
  pub async fn sign_out(&self) -> ApiResult<()> {
    self.inner.sign_out().await
  }

  pub async fn current_user(&self) -> ApiResult<Arc<User>> {
    self
      .cached(HubQueryKey::CurrentUser, &self.options, |hub| async move {
        hub.resolve_current_user().await
      })
      .await
  }

  // --------------------------------------------------------------------------
  // Reads
  // --------------------------------------------------------------------------

  pub async fn feed(&self, category: &str, page: u32) -> ApiResult<Arc<FeedPage>> {
    let key = HubQueryKey::Feed {
      category: category.to_string(),
      page,
    };
    let category = category.to_string();
    self
      .cached(key, &self.feed_options(), move |hub| async move {
        hub.feed(&category, page).await
      })
      .await
  }

  pub async fn post(&self, id: &str) -> ApiResult<Arc<Post>> {
    let id = id.to_string();
    self
      .cached(HubQueryKey::Post { id: id.clone() }, &self.options, move |hub| async move {
        hub.post(&id).await
      })
      .await
  }

  pub async fn post_detail(&self, id: &str) -> ApiResult<Arc<PostDetail>> {
    let id = id.to_string();
    self
      .cached(
        HubQueryKey::PostDetail { id: id.clone() },
        &self.options,
        move |hub| async move { hub.post_detail(&id).await },
      )
      .await
  }

  /// Tags and comments of a post. Always refetched so new comments show at once.
  pub async fn post_activity(&self, id: &str) -> ApiResult<Arc<PostActivity>> {
    let id = id.to_string();
    self
      .cached(
        HubQueryKey::PostActivity { id: id.clone() },
        &QueryOptions::live(),
        move |hub| async move { hub.post_activity(&id).await },
      )
      .await
  }

  pub async fn user(&self, id: &str) -> ApiResult<Arc<User>> {
    let id = id.to_string();
    self
      .cached(HubQueryKey::User { id: id.clone() }, &self.options, move |hub| async move {
        hub.user(&id).await
      })
      .await
  }

  pub async fn user_posts(&self, id: &str) -> ApiResult<Arc<Vec<Post>>> {
    let id = id.to_string();
    self
      .cached(
        HubQueryKey::UserPosts { id: id.clone() },
        &self.options,
        move |hub| async move { hub.user_posts(&id).await },
      )
      .await
  }

  pub async fn profile(&self, username: &str) -> ApiResult<Arc<Profile>> {
    let username = username.to_string();
    self
      .cached(
        HubQueryKey::Profile {
          username: username.clone(),
        },
        &self.options,
        move |hub| async move { hub.profile(&username).await },
      )
      .await
  }

  /// Categories rarely change; stale data is served when the backend is unreachable.
  pub async fn categories(&self) -> ApiResult<Arc<Vec<Category>>> {
    let options = self.options.clone().with_offline_fallback(true);
    self
      .cached(HubQueryKey::Categories, &options, |hub| async move {
        hub.categories().await
      })
      .await
  }

  pub async fn category(&self, id: &str) -> ApiResult<Arc<Category>> {
    let id = id.to_string();
    self
      .cached(
        HubQueryKey::Category { id: id.clone() },
        &self.options,
        move |hub| async move { hub.category(&id).await },
      )
      .await
  }

  pub async fn tags(&self) -> ApiResult<Arc<Vec<Tag>>> {
    let options = self.options.clone().with_offline_fallback(true);
    self
      .cached(HubQueryKey::Tags, &options, |hub| async move { hub.tags().await })
      .await
  }

  // --------------------------------------------------------------------------
  // Subscriptions
  // --------------------------------------------------------------------------

  pub fn watch_feed(&self, category: &str, page: u32) -> Query<FeedPage> {
    let key = HubQueryKey::Feed {
      category: category.to_string(),
      page,
    };
    let hub = self.inner.clone();
    let category = category.to_string();
    self.cache.subscribe(&key, self.feed_options(), move || {
      let hub = hub.clone();
      let category = category.clone();
      async move { hub.feed(&category, page).await }
    })
  }

  pub fn watch_post_activity(&self, id: &str) -> Query<PostActivity> {
    let key = HubQueryKey::PostActivity { id: id.to_string() };
    let hub = self.inner.clone();
    let id = id.to_string();
    self.cache.subscribe(&key, QueryOptions::live(), move || {
      let hub = hub.clone();
      let id = id.clone();
      async move { hub.post_activity(&id).await }
    })
  }

  // --------------------------------------------------------------------------
  // Mutations
  // --------------------------------------------------------------------------

  /// Create a post with tags. Feeds and the author's posts are invalidated
  /// even on a partial failure, since the post exists.
  pub async fn create_post(&self, post: &NewPost, tags: &[Tag]) -> ApiResult<Post> {
    let result = self.inner.create_post_with_tags(post, tags).await;
    if result.is_ok() || result.as_ref().is_err_and(|e| e.is_partial()) {
      self.cache.invalidate_tree(&HubQueryKey::Feeds);
      self.cache.invalidate_tree(&HubQueryKey::User {
        id: post.author_id.clone(),
      });
      self.invalidate_profiles();
    }
    result
  }

  pub async fn edit_post(
    &self,
    id: &str,
    update: &PostUpdate,
    added_tags: &[Tag],
    removed_tag_ids: &[String],
  ) -> ApiResult<Post> {
    let result = self
      .inner
      .edit_post(id, update, added_tags, removed_tag_ids)
      .await;
    if result.is_ok() || result.as_ref().is_err_and(|e| e.is_partial()) {
      self.invalidate_post(id);
    }
    result
  }

  /// Delete a post. The author's post list is invalidated when the post is
  /// cached; otherwise every user's is.
  pub async fn delete_post(&self, id: &str) -> ApiResult<()> {
    let author = self.cached_author_of(id);
    self.inner.delete_post(id).await?;
    self.invalidate_post(id);
    match author {
      Some(author_id) => {
        self.cache.invalidate(&HubQueryKey::UserPosts { id: author_id });
      }
      None => {
        self.cache.invalidate_tree(&CacheKey::new(["user"]));
      }
    }
    self.invalidate_profiles();
    Ok(())
  }

  pub async fn add_comment(&self, post_id: &str, comment: &NewComment) -> ApiResult<Comment> {
    let created = self.inner.add_comment(post_id, comment).await?;
    self.invalidate_activity(post_id);
    Ok(created)
  }

  pub async fn add_tags(&self, post_id: &str, tags: &[Tag]) -> ApiResult<()> {
    self.inner.add_tags(post_id, tags).await?;
    self.invalidate_activity(post_id);
    Ok(())
  }

  pub async fn remove_tag(&self, post_id: &str, tag_id: &str) -> ApiResult<()> {
    self.inner.remove_tag(post_id, tag_id).await?;
    self.invalidate_activity(post_id);
    Ok(())
  }

  pub async fn update_user(&self, id: &str, update: &UserUpdate) -> ApiResult<User> {
    let user = self.inner.update_user(id, update).await?;
    self.invalidate_user(id);
    Ok(user)
  }

  /// Move a user's avatar to a new username. User keys are invalidated once the upload went through.
  pub async fn move_avatar(
    &self,
    user_id: &str,
    avatar: &Avatar,
    old_username: &str,
    new_username: &str,
  ) -> ApiResult<UploadResponse> {
    let result = self.inner.move_avatar(avatar, old_username, new_username).await;
    if result.is_ok() || result.as_ref().is_err_and(|e| e.is_partial()) {
      self.invalidate_user(user_id);
    }
    result
  }

  // --------------------------------------------------------------------------
  // Invalidation
  // --------------------------------------------------------------------------

  fn invalidate_post(&self, id: &str) {
    self.cache.invalidate_tree(&HubQueryKey::Post { id: id.to_string() });
    self.cache.invalidate_tree(&HubQueryKey::Feeds);
  }

  fn invalidate_activity(&self, post_id: &str) {
    self.cache.invalidate(&HubQueryKey::PostActivity {
      id: post_id.to_string(),
    });
    self.cache.invalidate(&HubQueryKey::PostDetail {
      id: post_id.to_string(),
    });
  }

  fn invalidate_user(&self, id: &str) {
    self.cache.invalidate_tree(&HubQueryKey::User { id: id.to_string() });
    self.cache.invalidate(&HubQueryKey::CurrentUser);
    self.invalidate_profiles();
    // Feed pages embed authors.
    self.cache.invalidate_tree(&HubQueryKey::Feeds);
  }

  fn cached_author_of(&self, post_id: &str) -> Option<String> {
    let id = post_id.to_string();
    if let Some(post) = self.cache.snapshot::<_, Post>(&HubQueryKey::Post { id: id.clone() }).data {
      return Some(post.author_id.clone());
    }
    self
      .cache
      .snapshot::<_, PostDetail>(&HubQueryKey::PostDetail { id })
      .data
      .map(|detail| detail.post.author_id.clone())
  }

  /// Profiles and by-username lookups are keyed by name, not id.
  fn invalidate_profiles(&self) {
    self.cache.invalidate_tree(&CacheKey::new(["username"]));
  }
}
