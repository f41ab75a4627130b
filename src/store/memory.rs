use crate::errors::FerriteResult;
use crate::store::{StorageEngine, StorePath, TouchToken};
use dashmap::DashMap;
use itertools::Itertools;
use std::sync::atomic::{AtomicU64, Ordering};

struct MemoryBlob {
    bytes: Vec<u8>,
    version: u64,
}

/// Process-local storage engine backed by a concurrent map.
///
/// Every `put` stamps the blob with a fresh value from a global write
/// counter, which is what [`StorageEngine::touch`] reports, so the cache's
/// staleness check works identically against memory and disk backends.
pub struct MemoryEngine {
    blobs: DashMap<StorePath, MemoryBlob>,
    write_counter: AtomicU64,
}

impl MemoryEngine {
    pub fn new() -> Self {
        MemoryEngine {
            blobs: DashMap::new(),
            write_counter: AtomicU64::new(0),
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine for MemoryEngine {
    fn get(&self, path: &StorePath) -> FerriteResult<Option<Vec<u8>>> {
        Ok(self.blobs.get(path).map(|blob| blob.bytes.clone()))
    }

    fn put(&self, path: &StorePath, bytes: &[u8]) -> FerriteResult<()> {
        let version = self.write_counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.blobs.insert(
            path.clone(),
            MemoryBlob {
                bytes: bytes.to_vec(),
                version,
            },
        );
        Ok(())
    }

    fn delete(&self, path: &StorePath) -> FerriteResult<bool> {
        Ok(self.blobs.remove(path).is_some())
    }

    fn touch(&self, path: &StorePath) -> FerriteResult<Option<TouchToken>> {
        Ok(self
            .blobs
            .get(path)
            .map(|blob| TouchToken::counter(blob.version)))
    }

    fn list_blobs(&self, database: &str, collection: &str) -> FerriteResult<Vec<String>> {
        Ok(self
            .blobs
            .iter()
            .filter(|entry| {
                entry.key().database == database && entry.key().collection == collection
            })
            .map(|entry| entry.key().blob.clone())
            .collect())
    }

    fn list_databases(&self) -> FerriteResult<Vec<String>> {
        Ok(self
            .blobs
            .iter()
            .map(|entry| entry.key().database.clone())
            .unique()
            .sorted()
            .collect())
    }

    fn list_collections(&self, database: &str) -> FerriteResult<Vec<String>> {
        Ok(self
            .blobs
            .iter()
            .filter(|entry| entry.key().database == database)
            .map(|entry| entry.key().collection.clone())
            .unique()
            .sorted()
            .collect())
    }

    fn drop_collection(&self, database: &str, collection: &str) -> FerriteResult<bool> {
        let before = self.blobs.len();
        self.blobs
            .retain(|path, _| !(path.database == database && path.collection == collection));
        Ok(self.blobs.len() != before)
    }

    fn drop_database(&self, database: &str) -> FerriteResult<bool> {
        let before = self.blobs.len();
        self.blobs.retain(|path, _| path.database != database);
        Ok(self.blobs.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(blob: &str) -> StorePath {
        StorePath::new("db", "coll", blob)
    }

    #[test]
    fn put_get_delete_round_trip() {
        let engine = MemoryEngine::new();
        let p = path("a");
        assert_eq!(engine.get(&p).unwrap(), None);

        engine.put(&p, b"hello").unwrap();
        assert_eq!(engine.get(&p).unwrap(), Some(b"hello".to_vec()));

        assert!(engine.delete(&p).unwrap());
        assert!(!engine.delete(&p).unwrap());
        assert_eq!(engine.get(&p).unwrap(), None);
    }

    #[test]
    fn touch_changes_on_every_put() {
        let engine = MemoryEngine::new();
        let p = path("a");
        assert_eq!(engine.touch(&p).unwrap(), None);

        engine.put(&p, b"v1").unwrap();
        let first = engine.touch(&p).unwrap().unwrap();
        assert_eq!(engine.touch(&p).unwrap().unwrap(), first);

        engine.put(&p, b"v1").unwrap();
        let second = engine.touch(&p).unwrap().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn listing_and_drops() {
        let engine = MemoryEngine::new();
        engine.put(&StorePath::new("db1", "c1", "a"), b"x").unwrap();
        engine.put(&StorePath::new("db1", "c1", "b"), b"x").unwrap();
        engine.put(&StorePath::new("db1", "c2", "a"), b"x").unwrap();
        engine.put(&StorePath::new("db2", "c1", "a"), b"x").unwrap();

        let mut blobs = engine.list_blobs("db1", "c1").unwrap();
        blobs.sort();
        assert_eq!(blobs, vec!["a", "b"]);
        assert_eq!(engine.list_databases().unwrap(), vec!["db1", "db2"]);
        assert_eq!(engine.list_collections("db1").unwrap(), vec!["c1", "c2"]);

        assert!(engine.drop_collection("db1", "c1").unwrap());
        assert!(engine.list_blobs("db1", "c1").unwrap().is_empty());
        assert!(engine.drop_database("db1").unwrap());
        assert_eq!(engine.list_databases().unwrap(), vec!["db2"]);
        assert!(!engine.drop_database("db1").unwrap());
    }
}
