use crate::collection::{Collection, Document, IdMinter, RandomIdMinter};
use crate::common::{LockScope, DEFAULT_DIR_NAME, ENV_ROOT};
use crate::database::Database;
use crate::errors::{ErrorKind, FerriteError, FerriteResult};
use crate::metadata::Catalog;
use crate::store::cache::DocumentCache;
use crate::store::disk::DiskEngine;
use crate::store::memory::MemoryEngine;
use crate::store::Store;
use crate::LOCKS;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The entry point: owns the storage engine, the document cache, and the
/// id minter shared by every database and collection handle.
///
/// # Examples
///
/// ```ignore
/// let client = Client::builder().in_memory().open()?;
/// let people = client.database("app")?.collection("people")?;
/// people.insert_one(&doc! { "name": "Ada" })?;
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    store: Store,
    cache: Arc<DocumentCache>,
    catalog: Catalog,
    minter: Arc<dyn IdMinter>,
    closed: Arc<AtomicBool>,
    collections: DashMap<String, Collection>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Opens a client over the in-memory engine.
    pub fn open_in_memory() -> FerriteResult<Client> {
        Client::builder().in_memory().open()
    }

    /// Opens a client over the disk engine rooted at `root`.
    pub fn open_at(root: impl Into<PathBuf>) -> FerriteResult<Client> {
        Client::builder().root(root).open()
    }

    /// Returns a database handle. Databases are created implicitly by their
    /// first written collection.
    pub fn database(&self, name: &str) -> FerriteResult<Database> {
        self.ensure_open()?;
        if name.is_empty() {
            log::error!("Database name must not be empty");
            return Err(FerriteError::new(
                "Database name must not be empty",
                ErrorKind::InvalidArgument,
            ));
        }
        Ok(Database::new(name.to_string(), self.clone()))
    }

    /// Names of the databases currently present in storage.
    pub fn list_database_names(&self) -> FerriteResult<Vec<String>> {
        self.ensure_open()?;
        self.inner.store.list_databases()
    }

    /// Database descriptions, one `{"name": …}` document each.
    pub fn list_databases(&self) -> FerriteResult<Vec<Document>> {
        Ok(self
            .list_database_names()?
            .into_iter()
            .map(|name| {
                let mut entry = Document::new();
                entry.put("name", name);
                entry
            })
            .collect())
    }

    /// Removes a whole database: blobs, cached documents, and live
    /// collection state. Returns whether anything existed. Idempotent.
    pub fn drop_database(&self, name: &str) -> FerriteResult<bool> {
        self.ensure_open()?;
        let database_lock = LOCKS.get_lock(LockScope::Database, name);
        let _database_guard = database_lock.write();
        // collection locks follow, in lexicographic order
        let collection_names = self.inner.store.list_collections(name)?;
        let handles: Vec<_> = collection_names
            .iter()
            .map(|collection| {
                LOCKS.get_lock(LockScope::Collection, &format!("{}.{}", name, collection))
            })
            .collect();
        let _collection_guards: Vec<_> = handles.iter().map(|handle| handle.write()).collect();

        let existed = self.inner.store.drop_database(name)?;
        self.inner.cache.invalidate_database(name);
        let prefix = format!("{}.", name);
        self.inner.collections.retain(|key, collection| {
            if key.starts_with(&prefix) {
                collection.clear_live_state();
                false
            } else {
                true
            }
        });
        if existed {
            log::info!("Dropped database {}", name);
        }
        Ok(existed)
    }

    /// Marks the client closed. Every subsequent operation through this
    /// client or any handle derived from it fails with `InvalidOperation`.
    /// Idempotent.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            log::info!("Client closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> FerriteResult<()> {
        if self.is_closed() {
            log::error!("Client is closed");
            return Err(FerriteError::new(
                "Client has been closed",
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }

    pub(crate) fn store(&self) -> &Store {
        &self.inner.store
    }

    pub(crate) fn cache(&self) -> &DocumentCache {
        &self.inner.cache
    }

    /// One shared [Collection] per `(database, name)`, so every handle sees
    /// the same live index state.
    pub(crate) fn collection_handle(
        &self,
        database: &str,
        name: &str,
    ) -> FerriteResult<Collection> {
        self.ensure_open()?;
        let key = format!("{}.{}", database, name);
        let collection = self
            .inner
            .collections
            .entry(key)
            .or_insert_with(|| {
                Collection::new(
                    database.to_string(),
                    name.to_string(),
                    self.inner.store.clone(),
                    self.inner.cache.clone(),
                    self.inner.catalog.clone(),
                    self.inner.minter.clone(),
                    self.inner.closed.clone(),
                )
            })
            .clone();
        Ok(collection)
    }

    pub(crate) fn forget_collection(&self, database: &str, name: &str) {
        let key = format!("{}.{}", database, name);
        if let Some((_, collection)) = self.inner.collections.remove(&key) {
            collection.clear_live_state();
        }
    }
}

enum EngineKind {
    Memory,
    Disk,
}

/// Configures and opens a [Client].
///
/// The disk engine is the default; its root resolves, in order, to the
/// explicitly configured path, the `FERRITE_HOME` environment variable, and
/// finally `$HOME/.ferrite`.
pub struct ClientBuilder {
    engine: EngineKind,
    root: Option<PathBuf>,
    cache_capacity: Option<usize>,
    minter: Option<Arc<dyn IdMinter>>,
}

impl ClientBuilder {
    fn new() -> Self {
        ClientBuilder {
            engine: EngineKind::Disk,
            root: None,
            cache_capacity: None,
            minter: None,
        }
    }

    /// Selects the process-local in-memory engine.
    pub fn in_memory(mut self) -> Self {
        self.engine = EngineKind::Memory;
        self
    }

    /// Selects the disk engine rooted at `root`.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.engine = EngineKind::Disk;
        self.root = Some(root.into());
        self
    }

    /// Bounds the decoded-document cache.
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    /// Injects an id minter; the default draws 96 random bits per id.
    pub fn id_minter(mut self, minter: impl IdMinter + 'static) -> Self {
        self.minter = Some(Arc::new(minter));
        self
    }

    pub fn open(self) -> FerriteResult<Client> {
        let store = match self.engine {
            EngineKind::Memory => Store::new(MemoryEngine::new()),
            EngineKind::Disk => {
                let root = self.root.unwrap_or_else(default_root);
                Store::new(DiskEngine::new(root)?)
            }
        };
        let cache = Arc::new(match self.cache_capacity {
            Some(capacity) => DocumentCache::new(capacity),
            None => DocumentCache::with_default_capacity(),
        });
        let minter: Arc<dyn IdMinter> = self.minter.unwrap_or_else(|| Arc::new(RandomIdMinter));
        Ok(Client {
            inner: Arc::new(ClientInner {
                catalog: Catalog::new(store.clone()),
                store,
                cache,
                minter,
                closed: Arc::new(AtomicBool::new(false)),
                collections: DashMap::new(),
            }),
        })
    }
}

fn default_root() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_ROOT) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => PathBuf::from(home).join(DEFAULT_DIR_NAME),
        _ => PathBuf::from(DEFAULT_DIR_NAME),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn database_name_must_not_be_empty() {
        let client = Client::open_in_memory().unwrap();
        let err = client.database("").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidArgument);
    }

    #[test]
    fn list_and_drop_databases() {
        let client = Client::open_in_memory().unwrap();
        assert!(client.list_database_names().unwrap().is_empty());

        client
            .database("db1")
            .unwrap()
            .collection("c")
            .unwrap()
            .insert_one(&doc! {})
            .unwrap();
        client
            .database("db2")
            .unwrap()
            .collection("c")
            .unwrap()
            .insert_one(&doc! {})
            .unwrap();
        assert_eq!(client.list_database_names().unwrap(), vec!["db1", "db2"]);
        assert_eq!(client.list_databases().unwrap().len(), 2);

        assert!(client.drop_database("db1").unwrap());
        assert!(!client.drop_database("db1").unwrap());
        assert_eq!(client.list_database_names().unwrap(), vec!["db2"]);
    }

    #[test]
    fn close_is_idempotent_and_blocks_operations() {
        let client = Client::open_in_memory().unwrap();
        let db = client.database("db").unwrap();
        let coll = db.collection("c").unwrap();

        client.close();
        client.close();
        assert!(client.is_closed());

        assert_eq!(
            client.database("db").unwrap_err().kind(),
            &ErrorKind::InvalidOperation
        );
        assert_eq!(
            db.list_collection_names().unwrap_err().kind(),
            &ErrorKind::InvalidOperation
        );
        assert_eq!(
            coll.insert_one(&doc! {}).unwrap_err().kind(),
            &ErrorKind::InvalidOperation
        );
    }

    #[test]
    fn disk_client_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let client = Client::open_at(dir.path()).unwrap();
            client
                .database("db")
                .unwrap()
                .collection("c")
                .unwrap()
                .insert_one(&doc! { "_id": "persisted", "n": 7 })
                .unwrap();
            client.close();
        }
        let client = Client::open_at(dir.path()).unwrap();
        let coll = client.database("db").unwrap().collection("c").unwrap();
        let doc = coll
            .find_one(&doc! { "_id": "persisted" }, None)
            .unwrap()
            .unwrap();
        assert_eq!(doc.value_at("n"), Some(crate::common::Value::I64(7)));
    }

    #[test]
    fn injected_minter_is_used() {
        use crate::collection::ObjectId;

        struct FixedMinter(ObjectId);
        impl IdMinter for FixedMinter {
            fn mint(&self) -> ObjectId {
                self.0
            }
        }

        let fixed = ObjectId::new();
        let client = Client::builder()
            .in_memory()
            .id_minter(FixedMinter(fixed))
            .open()
            .unwrap();
        let coll = client.database("db").unwrap().collection("c").unwrap();
        let result = coll.insert_one(&doc! {}).unwrap();
        assert_eq!(result.inserted_id, crate::collection::DocId::Oid(fixed));
    }
}
