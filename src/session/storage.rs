//! Durable storage for the session credential.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{ApiError, ApiResult};

/// Trait for credential storage backends.
///
/// Holds at most one token. Implementations are synchronous; the session
/// store calls them while holding its own lock so that the persisted value
/// and the in-memory value never disagree.
pub trait CredentialStore: Send + Sync {
  /// Read the persisted token, if any.
  fn load(&self) -> ApiResult<Option<String>>;

  /// Persist a token, replacing any previous one.
  fn save(&self, token: &str) -> ApiResult<()>;

  /// Remove the persisted token. Clearing an empty store is not an error.
  fn clear(&self) -> ApiResult<()>;
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
  token: Mutex<Option<String>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start with a token already "persisted", as if left by a previous run.
  pub fn with_token(token: impl Into<String>) -> Self {
    Self {
      token: Mutex::new(Some(token.into())),
    }
  }
}

impl CredentialStore for MemoryStore {
  fn load(&self) -> ApiResult<Option<String>> {
    Ok(self.lock()?.clone())
  }

  fn save(&self, token: &str) -> ApiResult<()> {
    *self.lock()? = Some(token.to_string());
    Ok(())
  }

  fn clear(&self) -> ApiResult<()> {
    *self.lock()? = None;
    Ok(())
  }
}

impl MemoryStore {
  fn lock(&self) -> ApiResult<std::sync::MutexGuard<'_, Option<String>>> {
    self
      .token
      .lock()
      .map_err(|e| ApiError::Storage(format!("Lock poisoned: {}", e)))
  }
}

/// SQLite-backed store under the user data directory.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

const TOKEN_NAME: &str = "token";

/// Schema for the credential table.
const CREDENTIAL_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS credentials (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> ApiResult<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  pub fn open_at(path: &Path) -> ApiResult<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| ApiError::Storage(format!("Failed to create session directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      ApiError::Storage(format!(
        "Failed to open session database at {}: {}",
        path.display(),
        e
      ))
    })?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn default_path() -> ApiResult<PathBuf> {
    let data_dir = crate::config::Config::data_dir().map_err(|e| ApiError::Storage(e.to_string()))?;
    Ok(data_dir.join("session.db"))
  }

  fn run_migrations(&self) -> ApiResult<()> {
    self
      .lock()?
      .execute_batch(CREDENTIAL_SCHEMA)
      .map_err(|e| ApiError::Storage(format!("Failed to run session migrations: {}", e)))
  }

  fn lock(&self) -> ApiResult<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| ApiError::Storage(format!("Lock poisoned: {}", e)))
  }
}

impl CredentialStore for SqliteStore {
  fn load(&self) -> ApiResult<Option<String>> {
    self
      .lock()?
      .query_row(
        "SELECT value FROM credentials WHERE name = ?",
        params![TOKEN_NAME],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| ApiError::Storage(format!("Failed to read token: {}", e)))
  }

  fn save(&self, token: &str) -> ApiResult<()> {
    self
      .lock()?
      .execute(
        "INSERT OR REPLACE INTO credentials (name, value, stored_at)
         VALUES (?, ?, datetime('now'))",
        params![TOKEN_NAME, token],
      )
      .map_err(|e| ApiError::Storage(format!("Failed to store token: {}", e)))?;
    Ok(())
  }

  fn clear(&self) -> ApiResult<()> {
    self
      .lock()?
      .execute("DELETE FROM credentials WHERE name = ?", params![TOKEN_NAME])
      .map_err(|e| ApiError::Storage(format!("Failed to delete token: {}", e)))?;
    Ok(())
  }
}
