//! In-memory query cache shared by every consumer of the gateway.
//!
//! - Entries are keyed by hierarchical [`CacheKey`]s
//! - Concurrent fetches of one key are coalesced into a single network call
//! - Invalidation works on one key or on a whole subtree
//! - Clearing bumps an epoch so fetches still in flight cannot repopulate it
//! - Entries nobody subscribes to are collected after `gc_time`

mod key;
mod layer;
mod traits;

pub use key::{CacheKey, QueryKey};
pub use layer::QueryCache;
pub use traits::{CacheResult, CacheSource, FetchStatus, QueryOptions, QuerySnapshot};
