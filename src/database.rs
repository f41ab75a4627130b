use crate::client::Client;
use crate::collection::{Collection, Document};
use crate::common::LockScope;
use crate::errors::{ErrorKind, FerriteError, FerriteResult};
use crate::LOCKS;

/// A named database: a namespace of collections sharing one storage root.
///
/// Handles are cheap clones; databases come into existence when their first
/// collection is written.
#[derive(Clone)]
pub struct Database {
    name: String,
    client: Client,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Database {
    pub(crate) fn new(name: String, client: Client) -> Self {
        Database { name, client }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a handle to a collection. All handles to one collection share
    /// state, including in-memory index multimaps.
    pub fn collection(&self, name: &str) -> FerriteResult<Collection> {
        if name.is_empty() {
            log::error!("Collection name must not be empty");
            return Err(FerriteError::new(
                "Collection name must not be empty",
                ErrorKind::InvalidArgument,
            ));
        }
        self.client.collection_handle(&self.name, name)
    }

    /// Names of the collections currently present in storage.
    pub fn list_collection_names(&self) -> FerriteResult<Vec<String>> {
        self.client.ensure_open()?;
        self.client.store().list_collections(&self.name)
    }

    /// Collection descriptions, one `{"name": …}` document each.
    pub fn list_collections(&self) -> FerriteResult<Vec<Document>> {
        Ok(self
            .list_collection_names()?
            .into_iter()
            .map(|name| {
                let mut entry = Document::new();
                entry.put("name", name);
                entry
            })
            .collect())
    }

    /// Removes a collection: its blobs, cached documents, and live index
    /// state. Returns whether anything existed. Idempotent.
    pub fn drop_collection(&self, name: &str) -> FerriteResult<bool> {
        self.client.ensure_open()?;
        // lock ordering: database before collection
        let database_lock = LOCKS.get_lock(LockScope::Database, &self.name);
        let _database_guard = database_lock.write();
        let collection_lock =
            LOCKS.get_lock(LockScope::Collection, &format!("{}.{}", self.name, name));
        let _collection_guard = collection_lock.write();

        let existed = self.client.store().drop_collection(&self.name, name)?;
        self.client.cache().invalidate_collection(&self.name, name);
        self.client.forget_collection(&self.name, name);
        if existed {
            log::info!("Dropped collection {}.{}", self.name, name);
        }
        Ok(existed)
    }
}
