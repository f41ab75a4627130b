use crate::collection::document::Document;
use crate::errors::FerriteResult;
use crate::store::{decode, encode, Store, StorePath, TouchToken};
use dashmap::DashMap;

const DEFAULT_CAPACITY: usize = 4096;

struct CacheEntry {
    document: Document,
    token: TouchToken,
}

/// Write-through decoded-document cache with touch-based invalidation.
///
/// Decoding dominates the read path on the disk engine, so the cache keeps
/// decoded documents keyed by storage path together with the touch token
/// observed when they were loaded. Every `get` re-reads the token first: a
/// matching token serves the cached copy, a changed token (including one
/// changed by an external process rewriting the file) forces a reload.
///
/// The cache is capacity-bounded. When full, new entries are simply not
/// cached; correctness never depends on an entry being present, so skipping
/// admission cannot violate the staleness contract.
pub struct DocumentCache {
    entries: DashMap<StorePath, CacheEntry>,
    capacity: usize,
}

impl DocumentCache {
    pub fn new(capacity: usize) -> Self {
        DocumentCache {
            entries: DashMap::new(),
            capacity,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Loads the document at `path`, serving from cache when the storage
    /// token still matches. Returns `None` when the blob does not exist.
    pub fn get(&self, store: &Store, path: &StorePath) -> FerriteResult<Option<Document>> {
        let token = match store.touch(path)? {
            Some(token) => token,
            None => {
                self.entries.remove(path);
                return Ok(None);
            }
        };

        if let Some(entry) = self.entries.get(path) {
            if entry.token == token {
                return Ok(Some(entry.document.clone()));
            }
        }
        log::debug!("Cache miss for {}", path);

        let bytes = match store.get(path)? {
            Some(bytes) => bytes,
            None => {
                self.entries.remove(path);
                return Ok(None);
            }
        };
        let document: Document = decode(&bytes)?;
        self.admit(path, document.clone(), token);
        Ok(Some(document))
    }

    /// Serializes and stores `document`, then records it in the cache under
    /// the fresh touch token.
    pub fn put(&self, store: &Store, path: &StorePath, document: &Document) -> FerriteResult<()> {
        let bytes = encode(document)?;
        store.put(path, &bytes)?;
        match store.touch(path)? {
            Some(token) => self.admit(path, document.clone(), token),
            None => {
                // blob vanished between put and touch; nothing sane to cache
                self.entries.remove(path);
            }
        }
        Ok(())
    }

    /// Drops one cached entry.
    pub fn invalidate(&self, path: &StorePath) {
        self.entries.remove(path);
    }

    /// Drops every cached entry of one collection.
    pub fn invalidate_collection(&self, database: &str, collection: &str) {
        self.entries
            .retain(|path, _| !(path.database == database && path.collection == collection));
    }

    /// Drops every cached entry of one database.
    pub fn invalidate_database(&self, database: &str) {
        self.entries.retain(|path, _| path.database != database);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn admit(&self, path: &StorePath, document: Document, token: TouchToken) {
        if self.entries.contains_key(path) || self.entries.len() < self.capacity {
            self.entries.insert(path.clone(), CacheEntry { document, token });
        }
    }
}
