use crate::backend::{AuthProvider, InMemoryStore};
use crate::core::config::{AppConfig, BackendConfig, BackendKind};
use crate::learn::notifications::NotificationFeed;
use crate::session::SessionManager;
use log::info;
use std::sync::Arc;

/// Process-wide state shared by every handler. Identity-scoped data lives in
/// the sessions, never here.
pub struct AppState {
    pub config: AppConfig,
    pub auth: Arc<dyn AuthProvider>,
    pub sessions: Arc<SessionManager>,
    pub feed: NotificationFeed,
}

impl AppState {
    pub fn new(config: AppConfig, auth: Arc<dyn AuthProvider>) -> Self {
        let feed = NotificationFeed::new(config.notifications.channel_capacity);
        let sessions = Arc::new(SessionManager::new(Arc::clone(&auth)));
        Self {
            config,
            auth,
            sessions,
            feed,
        }
    }

    pub fn assets_bucket(&self) -> &str {
        &self.config.backend.assets_bucket
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builds the auth provider named by the configuration.
pub async fn create_backend(config: &BackendConfig) -> anyhow::Result<Arc<dyn AuthProvider>> {
    match config.kind {
        #[cfg(feature = "supabase")]
        BackendKind::Supabase => {
            let client = crate::backend::SupabaseClient::from_config(config);
            info!("Using hosted backend at {}", config.url);
            Ok(Arc::new(client))
        }
        #[cfg(not(feature = "supabase"))]
        BackendKind::Supabase => Err(anyhow::anyhow!(
            "backend.kind = supabase requires the `supabase` feature"
        )),
        BackendKind::Memory => {
            let store = InMemoryStore::new();
            store.seed_demo().await;
            info!("Using in-memory backend with demo data");
            Ok(Arc::new(store))
        }
    }
}
