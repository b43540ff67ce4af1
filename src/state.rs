//! Shared application state for Axum handlers.
//!
//! Cloned into every handler. The document store is injected as a trait
//! object so tests and deployments can swap implementations; it is closed
//! once, by [`AppState::shutdown`], after the server has drained.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::config::Config;
use crate::store::ProjectStore;

/// Shared application state for Axum handlers.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(Arc::new(MemoryStore::new()), config);
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Project document store
    pub store: Arc<dyn ProjectStore>,
    /// Application configuration
    pub config: Arc<Config>,
    /// Timestamp when the application started
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn ProjectStore>, config: Config) -> Self {
        Self {
            store,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }

    /// Release the store handle.
    pub async fn shutdown(&self) {
        info!("Closing document store");
        self.store.close().await;
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_shutdown_closes_store() {
        let state = AppState::new(Arc::new(MemoryStore::new()), Config::default());
        assert!(state.store.ping().await.is_ok());

        state.shutdown().await;
        assert!(state.store.ping().await.is_err());
    }
}
