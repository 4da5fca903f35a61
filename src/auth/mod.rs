//! Authentication gate
//!
//! Resolves the opaque token carried by every envelope to an identity
//! before any command is dispatched. An unknown or expired token yields
//! `None`, which the dispatcher answers with AUTH_FAILED — no session
//! lookup happens first, so unauthenticated callers learn nothing about
//! session existence.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::config::AuthConfig;

/// Identity resolved from an auth token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

struct TokenInfo {
    identity: Identity,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory token registry.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<RwLock<HashMap<String, TokenInfo>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Build a store from configuration. With no configured tokens the two
    /// demo tokens are seeded so a dev build is immediately usable.
    pub async fn from_config(config: &AuthConfig) -> Self {
        let store = Self::new();
        if config.tokens.is_empty() {
            store
                .add_token("test_token_user123", "user_123", "testuser", Some(Duration::hours(24)))
                .await;
            store
                .add_token("test_token_user456", "user_456", "john_doe", Some(Duration::hours(24)))
                .await;
            tracing::warn!("no AUTH_TOKENS configured, seeded demo tokens");
        } else {
            for entry in &config.tokens {
                store
                    .add_token(&entry.token, &entry.user_id, &entry.username, None)
                    .await;
            }
            tracing::info!(count = config.tokens.len(), "loaded auth tokens");
        }
        store
    }

    pub async fn add_token(
        &self,
        token: &str,
        user_id: &str,
        username: &str,
        ttl: Option<Duration>,
    ) {
        let mut tokens = self.inner.write().await;
        tokens.insert(
            token.to_string(),
            TokenInfo {
                identity: Identity {
                    user_id: user_id.to_string(),
                    username: username.to_string(),
                },
                expires_at: ttl.map(|d| Utc::now() + d),
            },
        );
    }

    /// Resolve a raw token to an identity. Tokens must be valid UTF-8;
    /// anything unknown or expired resolves to `None`.
    pub async fn resolve(&self, token: &[u8]) -> Option<Identity> {
        let token = std::str::from_utf8(token).ok()?;
        let tokens = self.inner.read().await;
        let info = tokens.get(token)?;
        if let Some(expires_at) = info.expires_at {
            if Utc::now() > expires_at {
                return None;
            }
        }
        Some(info.identity.clone())
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_known_token() {
        let store = TokenStore::new();
        store.add_token("tok", "user_1", "alice", None).await;

        let identity = store.resolve(b"tok").await.unwrap();
        assert_eq!(identity.user_id, "user_1");
        assert_eq!(identity.username, "alice");
    }

    #[tokio::test]
    async fn test_unknown_token_resolves_none() {
        let store = TokenStore::new();
        assert!(store.resolve(b"nope").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_token_resolves_none() {
        let store = TokenStore::new();
        store
            .add_token("old", "user_1", "alice", Some(Duration::seconds(-1)))
            .await;
        assert!(store.resolve(b"old").await.is_none());
    }

    #[tokio::test]
    async fn test_non_utf8_token_resolves_none() {
        let store = TokenStore::new();
        assert!(store.resolve(&[0xFF, 0xFE]).await.is_none());
    }
}
