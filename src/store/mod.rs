pub mod cache;
pub mod disk;
pub mod memory;

use crate::errors::FerriteResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Address of one blob in a storage engine: `[database, collection, blob]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath {
    pub database: String,
    pub collection: String,
    pub blob: String,
}

impl StorePath {
    pub fn new(
        database: impl Into<String>,
        collection: impl Into<String>,
        blob: impl Into<String>,
    ) -> Self {
        StorePath {
            database: database.into(),
            collection: collection.into(),
            blob: blob.into(),
        }
    }
}

impl Display for StorePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.database, self.collection, self.blob)
    }
}

/// Opaque staleness token for one blob.
///
/// The only operation callers get is equality: the token compares equal to a
/// previously observed token iff the blob has not been rewritten in between.
/// The memory engine backs it with a write counter, the disk engine with
/// `(mtime_ns, size)`, so edits to the underlying files made by cooperating
/// threads or external processes both invalidate correctly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchToken(TokenRepr);

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenRepr {
    Counter(u64),
    FileStat { mtime_ns: u128, size: u64 },
}

impl TouchToken {
    pub(crate) fn counter(version: u64) -> Self {
        TouchToken(TokenRepr::Counter(version))
    }

    pub(crate) fn file_stat(mtime_ns: u128, size: u64) -> Self {
        TouchToken(TokenRepr::FileStat { mtime_ns, size })
    }
}

/// Object-addressed blob store.
///
/// # Contract
/// - `put` replaces atomically: a concurrent or subsequent `get` sees either
///   the old bytes or the new bytes, never a mixture.
/// - `delete` is idempotent and reports whether a blob was removed.
/// - `touch` returns a token that changes whenever the blob is rewritten,
///   and `None` for a missing blob.
/// - Listing operations reflect current storage contents.
///
/// Implementations must be `Send + Sync`; they are shared behind [`Store`]
/// across every handle the client creates.
pub trait StorageEngine: Send + Sync {
    fn get(&self, path: &StorePath) -> FerriteResult<Option<Vec<u8>>>;

    fn put(&self, path: &StorePath, bytes: &[u8]) -> FerriteResult<()>;

    fn delete(&self, path: &StorePath) -> FerriteResult<bool>;

    fn touch(&self, path: &StorePath) -> FerriteResult<Option<TouchToken>>;

    /// Blob names within one collection.
    fn list_blobs(&self, database: &str, collection: &str) -> FerriteResult<Vec<String>>;

    fn list_databases(&self) -> FerriteResult<Vec<String>>;

    fn list_collections(&self, database: &str) -> FerriteResult<Vec<String>>;

    /// Removes every blob of the collection. Idempotent.
    fn drop_collection(&self, database: &str, collection: &str) -> FerriteResult<bool>;

    /// Removes every blob of the database. Idempotent.
    fn drop_database(&self, database: &str) -> FerriteResult<bool>;
}

/// Shared handle to a storage engine.
///
/// Cheap to clone; all clones address the same backend.
#[derive(Clone)]
pub struct Store {
    inner: Arc<dyn StorageEngine>,
}

impl Store {
    pub fn new(engine: impl StorageEngine + 'static) -> Self {
        Store {
            inner: Arc::new(engine),
        }
    }

    pub fn get(&self, path: &StorePath) -> FerriteResult<Option<Vec<u8>>> {
        self.inner.get(path)
    }

    pub fn put(&self, path: &StorePath, bytes: &[u8]) -> FerriteResult<()> {
        self.inner.put(path, bytes)
    }

    pub fn delete(&self, path: &StorePath) -> FerriteResult<bool> {
        self.inner.delete(path)
    }

    pub fn touch(&self, path: &StorePath) -> FerriteResult<Option<TouchToken>> {
        self.inner.touch(path)
    }

    pub fn list_blobs(&self, database: &str, collection: &str) -> FerriteResult<Vec<String>> {
        self.inner.list_blobs(database, collection)
    }

    pub fn list_databases(&self) -> FerriteResult<Vec<String>> {
        self.inner.list_databases()
    }

    pub fn list_collections(&self, database: &str) -> FerriteResult<Vec<String>> {
        self.inner.list_collections(database)
    }

    pub fn drop_collection(&self, database: &str, collection: &str) -> FerriteResult<bool> {
        self.inner.drop_collection(database, collection)
    }

    pub fn drop_database(&self, database: &str) -> FerriteResult<bool> {
        self.inner.drop_database(database)
    }
}

/// Serializes a value into the self-describing byte form used for every blob.
pub(crate) fn encode<T: Serialize>(value: &T) -> FerriteResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decodes a blob previously produced by [encode].
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> FerriteResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}
