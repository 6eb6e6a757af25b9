//! Session state: the access token, where it is persisted, and who it belongs to.
//!
//! - [`SessionStore`] is the only writer of the token and the only reader of
//!   durable storage
//! - [`CredentialStore`] abstracts that storage (SQLite on disk, memory in tests)
//! - [`DecodedIdentity`] is derived from the token on demand and never persisted

mod storage;
mod store;
mod token;

pub use storage::{CredentialStore, MemoryStore, SqliteStore};
pub use store::{AuthState, SessionStore};
pub use token::{fingerprint, DecodedIdentity, TokenError};

#[cfg(test)]
pub(crate) use token::encode_for_test;
