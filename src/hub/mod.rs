//! StudentHub backend: records, the per-endpoint gateway, composite
//! workflows and the cached client built on top of them.

mod cache;
mod cached_client;
mod client;
mod types;
mod workflows;

pub use cache::HubQueryKey;
pub use cached_client::CachedHubClient;
pub use client::HubClient;
pub use types::{
  AuthResponse, Avatar, Category, Comment, Credentials, FeedPage, NewComment, NewPost, NewUser,
  Post, PostActivity, PostDetail, PostUpdate, Profile, Tag, UploadResponse, User, UserUpdate,
  MAX_AVATAR_BYTES,
};
