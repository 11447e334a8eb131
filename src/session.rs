use std::sync::Arc;

use anyhow::Result;
use humantime::format_rfc3339_millis;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::document::LibraryVariable;
use crate::index::{IndexCache, VariableIndex};
use crate::library::LibraryCache;
use crate::store::DocumentStore;
use crate::tokens::TokenCatalog;

/// Everything one plugin session owns: the document store, the injected
/// clock, and the two TTL caches built over the store.
pub struct Session {
    store: Box<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    catalog: Option<Arc<TokenCatalog>>,
    index_cache: IndexCache,
    library_cache: LibraryCache,
}

impl Session {
    pub fn new(store: Box<dyn DocumentStore>, config: EngineConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(store: Box<dyn DocumentStore>, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            index_cache: IndexCache::new(config.index_ttl()),
            library_cache: LibraryCache::new(config.library_ttl()),
            store,
            clock,
            config,
            catalog: None,
        }
    }

    pub fn with_catalog(mut self, catalog: TokenCatalog) -> Self {
        self.catalog = Some(Arc::new(catalog));
        self
    }

    pub fn set_catalog(&mut self, catalog: Option<Arc<TokenCatalog>>) {
        self.catalog = catalog;
    }

    pub fn catalog(&self) -> Option<Arc<TokenCatalog>> {
        self.catalog.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn DocumentStore {
        self.store.as_mut()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// RFC 3339 wall-clock timestamp from the session clock.
    pub fn timestamp(&self) -> String {
        format_rfc3339_millis(self.clock.wall_time()).to_string()
    }

    pub fn index(&mut self) -> Result<Arc<VariableIndex>> {
        let now = self.clock.elapsed();
        let store = self.store.as_ref();
        let config = &self.config;
        self.index_cache
            .get_or_build(now, || VariableIndex::build(store, config))
    }

    pub fn index_builds(&self) -> usize {
        self.index_cache.builds()
    }

    pub fn invalidate_index(&mut self) {
        self.index_cache.invalidate();
    }

    pub fn library_variables(&mut self) -> Result<Vec<LibraryVariable>> {
        let now = self.clock.elapsed();
        let store = self.store.as_ref();
        self.library_cache
            .get_or_fetch(now, || store.library_variables())
            .map(<[LibraryVariable]>::to_vec)
    }

    pub fn library_fetches(&self) -> usize {
        self.library_cache.fetches()
    }
}
