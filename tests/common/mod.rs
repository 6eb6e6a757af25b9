#![allow(dead_code)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

use studenthub::config::Config;
use studenthub::hub::{CachedHubClient, HubClient};
use studenthub::session::SessionStore;
use studenthub::{QueryCache, QueryOptions};

/// Config pointing at `server` with millisecond backoff.
pub fn config_for(server: &MockServer) -> Config {
  let mut config = Config::default();
  config.api.base_url = server.uri();
  config.api.timeout_secs = 2;
  config.retry.base_delay_ms = 1;
  config.retry.max_delay_ms = 4;
  config
}

pub fn hub(server: &MockServer) -> (HubClient, Arc<SessionStore>) {
  let session = Arc::new(SessionStore::in_memory());
  let hub = HubClient::new(&config_for(server), session.clone()).unwrap();
  (hub, session)
}

pub fn cached(server: &MockServer) -> CachedHubClient {
  let (hub, _) = hub(server);
  CachedHubClient::new(hub, QueryCache::new(Duration::from_secs(60)), QueryOptions::default())
}

/// Unsigned JWT-shaped token; the client never verifies signatures.
pub fn token_for(subject: &str, exp: i64) -> String {
  let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
  let claims = json!({ "sub": subject, "exp": exp, "iat": exp - 3600 });
  let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
  format!("{}.{}.signature", header, payload)
}

pub fn live_token(subject: &str) -> String {
  token_for(subject, chrono::Utc::now().timestamp() + 3600)
}

pub fn expired_token(subject: &str) -> String {
  token_for(subject, chrono::Utc::now().timestamp() - 60)
}

pub fn user_json(id: &str, username: &str) -> Value {
  json!({ "id": id, "username": username, "email": format!("{}@uni.example", username) })
}

pub fn post_json(id: &str, author: &str, title: &str) -> Value {
  json!({
    "id": id,
    "title": title,
    "content": format!("{} body", title),
    "author_id": author,
    "category_id": "c1"
  })
}

/// `Authorization` header of every request the server saw, in order.
pub async fn authorization_headers(server: &MockServer) -> Vec<Option<String>> {
  server
    .received_requests()
    .await
    .unwrap_or_default()
    .iter()
    .map(|r| {
      r.headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
    })
    .collect()
}
