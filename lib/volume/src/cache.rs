//! Directory listing cache keyed by catalog id.
//!
//! Listings are stored exactly as the backend returned them. A cache belongs
//! to one volume session and must be cleared whenever that session closes.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::entry::{CatalogId, Entry};

#[derive(Debug, Default)]
pub struct DirectoryCache {
    listings: HashMap<CatalogId, Arc<[Entry]>>,
}

impl DirectoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, dir: CatalogId) -> Option<Arc<[Entry]>> {
        let hit = self.listings.get(&dir).cloned();
        debug!(dir, hit = hit.is_some(), "directory cache lookup");
        hit
    }

    pub fn contains(&self, dir: CatalogId) -> bool {
        self.listings.contains_key(&dir)
    }

    pub fn insert(&mut self, dir: CatalogId, children: Vec<Entry>) -> Arc<[Entry]> {
        let children: Arc<[Entry]> = children.into();
        self.listings.insert(dir, children.clone());
        children
    }

    /// Drop one listing. Returns whether anything was cached.
    pub fn invalidate(&mut self, dir: CatalogId) -> bool {
        self.listings.remove(&dir).is_some()
    }

    pub fn clear(&mut self) {
        self.listings.clear();
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}
