//! Process-wide table of open stores.

use crate::config::{Config, Location};
use crate::error::CoreResult;
use crate::store::Store;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps store locations to the shared [`Store`] open in this process.
///
/// Every handle opened through the same registry on the same location
/// shares one store, so they share committed versions and the writer lock.
/// The registry also carries the default configuration used by
/// [`Database::open_default`](crate::Database::open_default).
///
/// Applications usually create one registry at startup and pass it (or an
/// `Arc` of it) to every thread. Tests create one per test for isolation.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    default_config: Option<Config>,
    stores: HashMap<Location, Arc<Store>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with a default configuration.
    pub fn with_default_config(config: Config) -> Self {
        let registry = Self::new();
        registry.set_default_config(config);
        registry
    }

    /// Replaces the default configuration.
    pub fn set_default_config(&self, config: Config) {
        self.inner.lock().default_config = Some(config);
    }

    /// Returns the default configuration.
    pub fn default_config(&self) -> Config {
        self.inner.lock().default_config.clone().unwrap_or_default()
    }

    /// Returns the store for `config.location`, opening it on first use.
    ///
    /// When the store is already open, the configured schema is merged into
    /// it; an incompatible schema fails with `Configuration`.
    pub fn store(&self, config: &Config) -> CoreResult<Arc<Store>> {
        let location = normalize(&config.location);
        let mut inner = self.inner.lock();
        if let Some(store) = inner.stores.get(&location) {
            if let Some(schema) = &config.schema {
                store.ensure_schema(schema, false)?;
            }
            return Ok(Arc::clone(store));
        }

        let mut config = config.clone();
        config.location = location.clone();
        let store = Store::open(&config)?;
        inner.stores.insert(location, Arc::clone(&store));
        Ok(store)
    }

    /// Returns the number of open stores.
    pub fn len(&self) -> usize {
        self.inner.lock().stores.len()
    }

    /// Returns true if no stores are open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every open store and the default configuration.
    ///
    /// Handles that are still open keep their store alive; in-memory stores
    /// become unreachable for new handles once the last one closes.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        tracing::debug!(stores = inner.stores.len(), "registry reset");
        inner.stores.clear();
        inner.default_config = None;
    }
}

fn normalize(location: &Location) -> Location {
    match location {
        Location::InMemory(_) => location.clone(),
        Location::Path(path) => match std::path::absolute(path) {
            Ok(absolute) => Location::Path(absolute),
            Err(_) => location.clone(),
        },
    }
}
