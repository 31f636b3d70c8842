//! Read cache for published schema documents
//!
//! Keyed by entity name. Entries are loaded lazily on first read and dropped
//! explicitly on publish or delete. The cache is local to one process: other
//! processes sharing the same stores keep their own copies until they
//! invalidate them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::document::SchemaDocument;
use crate::error::Result;

#[derive(Default)]
pub struct SchemaCache {
    entries: RwLock<HashMap<String, Arc<SchemaDocument>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity_name: &str) -> Option<Arc<SchemaDocument>> {
        self.read().get(entity_name).cloned()
    }

    /// Cached document for `entity_name`, or the result of `load` which is
    /// cached when it returns a document
    pub fn get_or_load<F>(&self, entity_name: &str, load: F) -> Result<Option<Arc<SchemaDocument>>>
    where
        F: FnOnce() -> Result<Option<SchemaDocument>>,
    {
        if let Some(hit) = self.get(entity_name) {
            return Ok(Some(hit));
        }

        let Some(document) = load()? else {
            return Ok(None);
        };

        let document = Arc::new(document);
        debug!(entity = entity_name, "caching published schema");
        self.write()
            .insert(entity_name.to_string(), Arc::clone(&document));
        Ok(Some(document))
    }

    /// Drop the entry for `entity_name`; returns whether one was cached
    pub fn invalidate(&self, entity_name: &str) -> bool {
        let removed = self.write().remove(entity_name).is_some();
        debug!(entity = entity_name, removed, "invalidated schema cache entry");
        removed
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A poisoned lock only means a panic mid-insert; the map itself is still usable.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<SchemaDocument>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<SchemaDocument>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}
