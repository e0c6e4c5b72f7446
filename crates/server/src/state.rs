//! Shared application state injected into Axum handlers.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::Database;
use crate::services::download::DownloadManager;
use crate::services::events::EventBus;
use crate::services::router::Router as RequestRouter;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    config: AppConfig,
    db: Database,
    router: RequestRouter,
    download_manager: Arc<dyn DownloadManager>,
    events: EventBus,
    api_key: Option<String>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: Database,
        router: RequestRouter,
        download_manager: Arc<dyn DownloadManager>,
        events: EventBus,
        api_key: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                db,
                router,
                download_manager,
                events,
                api_key,
            }),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    #[allow(dead_code)]
    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub fn router(&self) -> &RequestRouter {
        &self.inner.router
    }

    pub fn download_manager(&self) -> &Arc<dyn DownloadManager> {
        &self.inner.download_manager
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn api_key(&self) -> Option<&str> {
        self.inner.api_key.as_deref()
    }
}
