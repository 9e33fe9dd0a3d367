//! Persistence interface for the refresh token
//!
//! The access token lives only in the session state; the refresh token is
//! the single credential that survives a restart. Platforms plug in their
//! own secure storage by implementing [`TokenStore`].

use async_trait::async_trait;
use std::sync::RwLock;

/// Single-slot persistent store for the refresh token.
///
/// Implementations must be safe for concurrent use; the client only ever
/// holds one logical token, so `set` replaces any previous value.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Current refresh token, if one is stored.
    async fn get(&self) -> Option<String>;

    /// Store a refresh token, replacing any previous one.
    async fn set(&self, token: String);

    /// Remove the stored refresh token. A no-op when nothing is stored.
    async fn clear(&self);
}

/// In-memory token store for tests, demos and ephemeral sessions.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self) -> Option<String> {
        self.token.read().unwrap().clone()
    }

    async fn set(&self, token: String) {
        *self.token.write().unwrap() = Some(token);
    }

    async fn clear(&self) {
        *self.token.write().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryTokenStore::new();
        assert!(store.get().await.is_none());

        store.set("refresh_token_456".to_string()).await;
        assert_eq!(store.get().await.as_deref(), Some("refresh_token_456"));

        // set replaces the previous value
        store.set("rotated_789".to_string()).await;
        assert_eq!(store.get().await.as_deref(), Some("rotated_789"));

        store.clear().await;
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let store = MemoryTokenStore::new();
        store.clear().await;
        store.clear().await;
        assert!(store.get().await.is_none());
    }
}
