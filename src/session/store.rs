//! The single source of truth for "is anyone signed in".

use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::storage::{CredentialStore, MemoryStore};
use super::token::{fingerprint, DecodedIdentity};
use crate::error::ApiResult;

/// What subscribers see when the session changes. Never carries the token itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
  pub is_authenticated: bool,
  /// Username from the token, when it decodes
  pub subject: Option<String>,
}

impl AuthState {
  fn signed_out() -> Self {
    Self {
      is_authenticated: false,
      subject: None,
    }
  }

  fn for_token(token: Option<&str>) -> Self {
    match token {
      Some(t) => Self {
        is_authenticated: true,
        subject: DecodedIdentity::decode(t).ok().map(|id| id.subject),
      },
      None => Self::signed_out(),
    }
  }
}

type LogoutHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct SessionState {
  token: Option<String>,
  /// Whether `token` reflects durable storage yet
  loaded: bool,
}

/// Owns the access token, its persistence and the derived authentication flag.
///
/// One instance per running client, shared through an `Arc`. Every write
/// persists and updates memory under the same lock, and the request client
/// reads the token for its authorization header under that lock too, so
/// nobody observes a persisted token with a stale header.
pub struct SessionStore {
  state: RwLock<SessionState>,
  storage: Box<dyn CredentialStore>,
  logout_hooks: Mutex<Vec<LogoutHook>>,
  changes: watch::Sender<AuthState>,
}

impl SessionStore {
  pub fn new(storage: impl CredentialStore + 'static) -> Self {
    let (changes, _) = watch::channel(AuthState::signed_out());
    Self {
      state: RwLock::new(SessionState::default()),
      storage: Box::new(storage),
      logout_hooks: Mutex::new(Vec::new()),
      changes,
    }
  }

  pub fn in_memory() -> Self {
    Self::new(MemoryStore::new())
  }

  /// Current token, reading durable storage on first access.
  pub fn token(&self) -> Option<String> {
    {
      let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
      if state.loaded {
        return state.token.clone();
      }
    }

    let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
    if !state.loaded {
      state.token = match self.storage.load() {
        Ok(token) => token,
        Err(e) => {
          warn!(error = %e, "could not read persisted token");
          None
        }
      };
      state.loaded = true;
    }
    state.token.clone()
  }

  pub fn is_authenticated(&self) -> bool {
    self.token().is_some()
  }

  /// Value for the `Authorization` header, if signed in.
  pub fn bearer(&self) -> Option<String> {
    self.token().map(|t| format!("Bearer {}", t))
  }

  /// Adopt a new token, or sign out with `None`.
  ///
  /// Signing in persists first and only then switches the in-memory session;
  /// if persisting fails the previous session stays in place. Signing out
  /// always clears memory and runs the logout hooks, even when removing the
  /// persisted copy fails (that failure is still returned).
  pub fn set_token(&self, token: Option<String>) -> ApiResult<()> {
    match token {
      Some(token) => {
        {
          let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
          self.storage.save(&token)?;
          info!(token = %fingerprint(&token), "session established");
          state.token = Some(token);
          state.loaded = true;
          self.publish(state.token.as_deref());
        }
        Ok(())
      }
      None => self.sign_out(None).map(|_| ()),
    }
  }

  /// Sign out, but only if `token` is still the session's token.
  ///
  /// A request that was sent with an older token and comes back 401 must not
  /// end a session established since. Returns whether the session was cleared.
  pub fn clear_if_current(&self, token: &str) -> ApiResult<bool> {
    self.sign_out(Some(token))
  }

  fn sign_out(&self, expected: Option<&str>) -> ApiResult<bool> {
    let persisted = {
      let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
      if let Some(expected) = expected {
        if state.token.as_deref() != Some(expected) {
          debug!(token = %fingerprint(expected), "token already replaced, keeping session");
          return Ok(false);
        }
      }
      let persisted = self.storage.clear();
      if let Some(old) = state.token.take() {
        info!(token = %fingerprint(&old), "session cleared");
      }
      state.loaded = true;
      self.publish(None);
      persisted
    };
    self.run_logout_hooks();
    if let Err(e) = &persisted {
      warn!(error = %e, "persisted token could not be removed");
    }
    persisted.map(|_| true)
  }

  /// Startup gate: adopt the persisted token only if it decodes and has not expired.
  ///
  /// An expired or undecodable token is removed from storage and the session
  /// stays signed out. Never fails; storage errors are logged and treated as
  /// "no token".
  pub fn restore_on_startup(&self) -> AuthState {
    self.restore_on_startup_at(Utc::now())
  }

  pub fn restore_on_startup_at(&self, now: DateTime<Utc>) -> AuthState {
    let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

    let persisted = self.storage.load().unwrap_or_else(|e| {
      warn!(error = %e, "could not read persisted token");
      None
    });

    state.token = match persisted {
      None => {
        debug!("no persisted session");
        None
      }
      Some(token) => match DecodedIdentity::decode(&token) {
        Ok(identity) if !identity.is_expired_at(now) => {
          info!(
            token = %fingerprint(&token),
            subject = %identity.subject,
            "restored persisted session"
          );
          Some(token)
        }
        Ok(identity) => {
          info!(
            token = %fingerprint(&token),
            expired_at = identity.expires_at_epoch_seconds,
            "persisted session expired"
          );
          self.discard_persisted();
          None
        }
        Err(e) => {
          warn!(token = %fingerprint(&token), error = %e, "persisted token unreadable");
          self.discard_persisted();
          None
        }
      },
    };
    state.loaded = true;

    let auth = AuthState::for_token(state.token.as_deref());
    self.publish(state.token.as_deref());
    auth
  }

  /// Identity of the signed-in user, or `None` when signed out, expired or unreadable.
  pub fn identity(&self) -> Option<DecodedIdentity> {
    self.identity_at(Utc::now())
  }

  pub fn identity_at(&self, now: DateTime<Utc>) -> Option<DecodedIdentity> {
    self
      .token()
      .and_then(|t| DecodedIdentity::decode(&t).ok())
      .filter(|identity| !identity.is_expired_at(now))
  }

  /// Subscribe to session changes.
  pub fn subscribe(&self) -> watch::Receiver<AuthState> {
    self.changes.subscribe()
  }

  /// Register a side effect for every sign-out (cache purge, navigation...).
  pub fn on_logout(&self, hook: impl Fn() + Send + Sync + 'static) {
    self
      .logout_hooks
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(Box::new(hook));
  }

  fn discard_persisted(&self) {
    if let Err(e) = self.storage.clear() {
      warn!(error = %e, "could not remove persisted token");
    }
  }

  fn publish(&self, token: Option<&str>) {
    self.changes.send_replace(AuthState::for_token(token));
  }

  fn run_logout_hooks(&self) {
    let hooks = self
      .logout_hooks
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    for hook in hooks.iter() {
      hook();
    }
  }
}

impl std::fmt::Debug for SessionStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SessionStore")
      .field("state", &*self.changes.borrow())
      .finish_non_exhaustive()
  }
}
