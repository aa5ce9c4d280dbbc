//! Registry of app contexts.
//!
//! An app context names a sync backend and the configuration sessions use to
//! reach it. Helpers that open synced databases resolve the context here
//! instead of from process-wide state.

use crate::applier::StoreApplier;
use crate::config::SyncConfig;
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::session::SyncSession;
use crate::transport::SyncTransport;
use driftdb_core::Store;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One registered app context.
#[derive(Debug, Clone)]
pub struct App {
    id: String,
    config: SyncConfig,
}

impl App {
    /// Creates an app context.
    pub fn new(id: impl Into<String>, config: SyncConfig) -> Self {
        Self {
            id: id.into(),
            config,
        }
    }

    /// Returns the app id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the sync configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Creates a logged-out session syncing `store` through `transport`.
    pub fn session<T>(&self, transport: Arc<T>, store: Arc<Store>) -> SyncSession<T, StoreApplier>
    where
        T: SyncTransport + 'static,
    {
        let applier = Arc::new(StoreApplier::new(store));
        let engine = SyncEngine::new(self.config.clone(), transport, applier);
        SyncSession::new(Arc::new(engine))
    }
}

/// Explicit registry of app contexts.
#[derive(Debug, Default)]
pub struct AppRegistry {
    apps: Mutex<BTreeMap<String, Arc<App>>>,
}

impl AppRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an app, replacing any app with the same id.
    pub fn register(&self, app: App) -> Arc<App> {
        let app = Arc::new(app);
        self.apps.lock().insert(app.id.clone(), Arc::clone(&app));
        app
    }

    /// Removes an app. Returns true if it was registered.
    pub fn remove(&self, id: &str) -> bool {
        self.apps.lock().remove(id).is_some()
    }

    /// Resolves the app to use.
    ///
    /// With an explicit id the app must be registered. Without one exactly
    /// one app must be registered.
    pub fn resolve(&self, id: Option<&str>) -> SyncResult<Arc<App>> {
        let apps = self.apps.lock();
        match id {
            Some(id) => apps
                .get(id)
                .cloned()
                .ok_or_else(|| SyncError::UnknownApp(id.to_string())),
            None => match apps.len() {
                0 => Err(SyncError::NoAppContext),
                1 => apps
                    .values()
                    .next()
                    .cloned()
                    .ok_or(SyncError::NoAppContext),
                count => Err(SyncError::AmbiguousAppContext { count }),
            },
        }
    }

    /// Returns the number of registered apps.
    pub fn len(&self) -> usize {
        self.apps.lock().len()
    }

    /// Returns true if no app is registered.
    pub fn is_empty(&self) -> bool {
        self.apps.lock().is_empty()
    }

    /// Removes every app.
    pub fn reset(&self) {
        self.apps.lock().clear();
    }
}
