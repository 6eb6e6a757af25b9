//! Client core for the StudentHub forum: session handling, a retrying
//! request client, the typed backend gateway and a deduplicating query cache.

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod hub;
pub mod logging;
pub mod query;
pub mod session;

pub use cache::{CacheKey, QueryCache, QueryKey, QueryOptions};
pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use hub::{CachedHubClient, HubClient, HubQueryKey};
pub use query::{Query, QueryState};
pub use session::{AuthState, SessionStore};
