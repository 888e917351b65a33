use std::sync::Arc;

use chrono::Duration;

use crate::{
    auth::{download::DownloadTokens, session::SessionManager},
    config::AppConfig,
    notify::Notifier,
    storage::ObjectStorage,
    store::Store,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub storage: Arc<dyn ObjectStorage>,
    pub sessions: SessionManager,
    pub downloads: DownloadTokens,
    pub notifier: Notifier,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn Store>,
        storage: Arc<dyn ObjectStorage>,
        notifier: Notifier,
    ) -> Self {
        let sessions = SessionManager::new(store.clone(), Duration::hours(config.session_ttl_hours));
        let downloads = DownloadTokens::from_config(&config);
        Self {
            config: Arc::new(config),
            store,
            storage,
            sessions,
            downloads,
            notifier,
        }
    }

    pub fn invitation_ttl(&self) -> Duration {
        Duration::days(self.config.invitation_expiry_days)
    }
}
