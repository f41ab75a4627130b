pub mod cursor;
pub mod document;
pub mod object_id;
pub mod results;

pub use cursor::Cursor;
pub use document::Document;
pub use object_id::{DocId, IdMinter, ObjectId, RandomIdMinter};
pub use results::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult};

use crate::common::value::Value;
use crate::common::{LockScope, SortOrder, SortSpec};
use crate::errors::{ErrorKind, FerriteError, FerriteResult};
use crate::filter::Filter;
use crate::index::planner::{plan_find, Candidates};
use crate::index::{index_name, IndexDescriptor, SortedIndex};
use crate::metadata::{Catalog, Manifest};
use crate::store::cache::DocumentCache;
use crate::store::{decode, encode, Store, StorePath};
use crate::update::UpdateSpec;
use crate::LOCKS;
use itertools::Itertools;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

/// The index key argument accepted by `create_index` and `drop_index`:
/// either a plain path/name string or `(path, direction)` pairs.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKeys {
    Single(String),
    Pairs(Vec<(String, i64)>),
}

impl From<&str> for IndexKeys {
    fn from(value: &str) -> Self {
        IndexKeys::Single(value.to_string())
    }
}

impl From<String> for IndexKeys {
    fn from(value: String) -> Self {
        IndexKeys::Single(value)
    }
}

impl From<(&str, i64)> for IndexKeys {
    fn from(value: (&str, i64)) -> Self {
        IndexKeys::Pairs(vec![(value.0.to_string(), value.1)])
    }
}

impl From<Vec<(&str, i64)>> for IndexKeys {
    fn from(value: Vec<(&str, i64)>) -> Self {
        IndexKeys::Pairs(value.into_iter().map(|(k, d)| (k.to_string(), d)).collect())
    }
}

impl IndexKeys {
    /// Resolves the key form for index creation into `(path, order)`.
    fn resolve_for_create(&self) -> FerriteResult<(String, SortOrder)> {
        match self {
            IndexKeys::Single(path) => {
                if path.is_empty() {
                    return Err(bad_index_keys());
                }
                Ok((path.clone(), SortOrder::Ascending))
            }
            IndexKeys::Pairs(pairs) => match pairs.as_slice() {
                [] => Err(bad_index_keys()),
                [(path, direction)] => {
                    if path.is_empty() {
                        return Err(bad_index_keys());
                    }
                    Ok((path.clone(), SortOrder::from_direction(*direction)?))
                }
                _ => {
                    log::error!("Compound indexes are not supported");
                    Err(FerriteError::new(
                        "Compound indexes are not supported",
                        ErrorKind::NotImplemented,
                    ))
                }
            },
        }
    }

    /// Resolves the key form for index removal into the index name.
    fn resolve_for_drop(&self) -> FerriteResult<String> {
        match self {
            IndexKeys::Single(name) => {
                let valid = name
                    .rsplit_once('_')
                    .and_then(|(path, direction)| {
                        direction.parse::<i64>().ok().map(|d| (path, d))
                    })
                    .filter(|(path, direction)| {
                        !path.is_empty() && (*direction == 1 || *direction == -1)
                    })
                    .is_some();
                if !valid {
                    return Err(bad_index_keys());
                }
                Ok(name.clone())
            }
            IndexKeys::Pairs(pairs) => match pairs.as_slice() {
                [(path, direction)] if !path.is_empty() => {
                    Ok(index_name(path, SortOrder::from_direction(*direction)?))
                }
                _ => Err(bad_index_keys()),
            },
        }
    }
}

fn bad_index_keys() -> FerriteError {
    log::error!("Unsupported index keys parameter format");
    FerriteError::new(
        "Unsupported index keys parameter format",
        ErrorKind::InvalidArgument,
    )
}

/// A named set of documents within a database.
///
/// The handle is cheap to clone; all clones of one collection share the same
/// state, including the in-memory index multimaps. Collections are created
/// implicitly by their first modifying operation.
///
/// Write operations serialize on the collection's writer lock, including the
/// match phase of updates and deletes, so concurrent `$inc`s from two
/// threads always both land. Reads run under the reader lock and observe the
/// last committed write.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

struct CollectionInner {
    database: String,
    name: String,
    store: Store,
    cache: Arc<DocumentCache>,
    catalog: Catalog,
    minter: Arc<dyn IdMinter>,
    closed: Arc<AtomicBool>,
    live_indexes: RwLock<HashMap<String, SortedIndex>>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("database", &self.inner.database)
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl Collection {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        database: String,
        name: String,
        store: Store,
        cache: Arc<DocumentCache>,
        catalog: Catalog,
        minter: Arc<dyn IdMinter>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Collection {
            inner: Arc::new(CollectionInner {
                database,
                name,
                store,
                cache,
                catalog,
                minter,
                closed,
                live_indexes: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn database_name(&self) -> &str {
        &self.inner.database
    }

    /// Qualified name used for lock registration: `database.collection`.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.inner.database, self.inner.name)
    }

    // ------------------------------------------------------------------
    // inserts
    // ------------------------------------------------------------------

    /// Inserts a single document, minting an `_id` when absent.
    ///
    /// The caller's document is never aliased: the stored form is an
    /// independent copy, so later mutation of the argument cannot reach
    /// stored state.
    ///
    /// # Errors
    /// `DuplicateKey` when the `_id` already exists; `InvalidArgument` for a
    /// bad `_id` type.
    pub fn insert_one(&self, document: &Document) -> FerriteResult<InsertOneResult> {
        self.ensure_open()?;
        let (id, prepared) = self.prepare_document(document)?;

        let lock = self.collection_lock();
        let _guard = lock.write();
        let mut manifest = self.inner.catalog.load_or_create(&self.inner.database, &self.inner.name)?;
        self.ensure_indexes_loaded(&manifest)?;
        self.insert_prepared_locked(&mut manifest, &id, &prepared)?;
        Ok(InsertOneResult { inserted_id: id })
    }

    /// Inserts a batch of documents.
    ///
    /// With `ordered`, insertion stops at the first failure; otherwise every
    /// document is attempted. Either way the documents inserted before (or
    /// around) a failure stay inserted, and the returned error names the
    /// first underlying failure.
    pub fn insert_many(
        &self,
        documents: &[Document],
        ordered: bool,
    ) -> FerriteResult<InsertManyResult> {
        self.ensure_open()?;
        let mut prepared = Vec::with_capacity(documents.len());
        for document in documents {
            prepared.push(self.prepare_document(document)?);
        }

        let lock = self.collection_lock();
        let _guard = lock.write();
        let mut manifest = self.inner.catalog.load_or_create(&self.inner.database, &self.inner.name)?;
        self.ensure_indexes_loaded(&manifest)?;

        let mut inserted: Vec<(DocId, Document)> = vec![];
        let mut failures: Vec<FerriteError> = vec![];
        for (id, document) in prepared {
            let result = self.put_new_document_locked(&mut manifest, &id, &document);
            match result {
                Ok(()) => inserted.push((id, document)),
                Err(err) => {
                    failures.push(err);
                    if ordered {
                        break;
                    }
                }
            }
        }

        self.inner
            .catalog
            .save(&self.inner.database, &self.inner.name, &manifest)?;
        self.index_insert_batch_locked(&mut manifest, &inserted)?;

        let inserted_ids: Vec<DocId> = inserted.into_iter().map(|(id, _)| id).collect();
        if !failures.is_empty() {
            let summary = failures.iter().map(|err| err.to_string()).join("; ");
            let message = format!(
                "insert_many inserted {} of {} documents; {} failed: {}",
                inserted_ids.len(),
                documents.len(),
                failures.len(),
                summary
            );
            log::error!("{}", message);
            let first = failures.remove(0);
            return Err(FerriteError::with_cause(&message, first.kind().clone(), first));
        }
        Ok(InsertManyResult { inserted_ids })
    }

    // ------------------------------------------------------------------
    // reads
    // ------------------------------------------------------------------

    /// Returns a lazy cursor over all documents matching `filter`.
    pub fn find(&self, filter: &Document) -> FerriteResult<Cursor> {
        self.ensure_open()?;
        let filter = Filter::parse(filter)?;
        Ok(Cursor::new(self.clone(), filter))
    }

    /// Returns the first matching document, optionally under a sort.
    pub fn find_one(
        &self,
        filter: &Document,
        sort: Option<&[(&str, i64)]>,
    ) -> FerriteResult<Option<Document>> {
        self.ensure_open()?;
        let filter = Filter::parse(filter)?;
        let sort = parse_sort_spec(sort)?;

        let lock = self.collection_lock();
        let _guard = lock.read();
        let manifest = match self.inner.catalog.load(&self.inner.database, &self.inner.name)? {
            Some(manifest) => manifest,
            None => return Ok(None),
        };
        let ids = self.find_ids_locked(&manifest, &filter, &sort, Some(1), 0)?;
        match ids.first() {
            Some(id) => self.load_document_locked(id),
            None => Ok(None),
        }
    }

    /// Counts documents matching `filter` without materializing them for the
    /// caller.
    pub fn count_documents(&self, filter: &Document) -> FerriteResult<u64> {
        self.ensure_open()?;
        let filter = Filter::parse(filter)?;

        let lock = self.collection_lock();
        let _guard = lock.read();
        let manifest = match self.inner.catalog.load(&self.inner.database, &self.inner.name)? {
            Some(manifest) => manifest,
            None => return Ok(0),
        };
        let ids = self.find_ids_locked(&manifest, &filter, &[], None, 0)?;
        Ok(ids.len() as u64)
    }

    /// Distinct values at `key` across documents matching `filter`, sorted
    /// by the total order. Missing and null values are discarded.
    pub fn distinct(&self, key: &str, filter: Option<&Document>) -> FerriteResult<Vec<Value>> {
        self.ensure_open()?;
        let filter = match filter {
            Some(filter) => Filter::parse(filter)?,
            None => Filter::empty(),
        };

        let lock = self.collection_lock();
        let _guard = lock.read();
        let manifest = match self.inner.catalog.load(&self.inner.database, &self.inner.name)? {
            Some(manifest) => manifest,
            None => return Ok(vec![]),
        };
        let ids = self.find_ids_locked(&manifest, &filter, &[], None, 0)?;
        let mut values = BTreeSet::new();
        for id in &ids {
            if let Some(document) = self.load_document_locked(id)? {
                match document.value_at(key) {
                    Some(Value::Null) | None => {}
                    Some(value) => {
                        values.insert(value);
                    }
                }
            }
        }
        Ok(values.into_iter().collect())
    }

    // ------------------------------------------------------------------
    // writes
    // ------------------------------------------------------------------

    /// Replaces the first matching document wholesale, preserving its `_id`.
    /// With `upsert`, inserts the replacement when nothing matches.
    pub fn replace_one(
        &self,
        filter: &Document,
        replacement: &Document,
        upsert: bool,
    ) -> FerriteResult<UpdateResult> {
        self.ensure_open()?;
        let filter = Filter::parse(filter)?;
        // surfaces a bad _id type before any work happens
        let _ = replacement.doc_id()?;

        let lock = self.collection_lock();
        let _guard = lock.write();
        let mut manifest = self.inner.catalog.load_or_create(&self.inner.database, &self.inner.name)?;
        self.ensure_indexes_loaded(&manifest)?;

        let ids = self.find_ids_locked(&manifest, &filter, &[], Some(1), 0)?;
        match ids.first() {
            Some(id) => {
                let old = self.load_document_locked(id)?.ok_or_else(missing_stored_doc)?;
                let mut replacement = replacement.clone();
                replacement.set_doc_id(id);
                self.inner
                    .cache
                    .put(&self.inner.store, &self.document_path(id), &replacement)?;
                self.index_update_locked(&mut manifest, id, &old, &replacement)?;
                Ok(UpdateResult::new(1, 1))
            }
            None if upsert => {
                let (id, prepared) = self.prepare_document(replacement)?;
                self.insert_prepared_locked(&mut manifest, &id, &prepared)?;
                Ok(UpdateResult::upserted(id))
            }
            None => Ok(UpdateResult::new(0, 0)),
        }
    }

    /// Applies an update document to the first match.
    pub fn update_one(&self, filter: &Document, update: &Document) -> FerriteResult<UpdateResult> {
        self.update_with_limit(filter, update, Some(1))
    }

    /// Applies an update document to every match.
    pub fn update_many(&self, filter: &Document, update: &Document) -> FerriteResult<UpdateResult> {
        self.update_with_limit(filter, update, None)
    }

    fn update_with_limit(
        &self,
        filter: &Document,
        update: &Document,
        limit: Option<usize>,
    ) -> FerriteResult<UpdateResult> {
        self.ensure_open()?;
        let filter = Filter::parse(filter)?;
        let spec = UpdateSpec::parse(update)?;

        let lock = self.collection_lock();
        let _guard = lock.write();
        let mut manifest = self.inner.catalog.load_or_create(&self.inner.database, &self.inner.name)?;
        self.ensure_indexes_loaded(&manifest)?;

        let matched = self.find_ids_locked(&manifest, &filter, &[], None, 0)?;
        if matched.is_empty() {
            return Ok(UpdateResult::new(0, 0));
        }
        let targets: &[DocId] = match limit {
            Some(limit) => &matched[..matched.len().min(limit)],
            None => &matched,
        };

        let mut modified = 0u64;
        for id in targets {
            let old = self.load_document_locked(id)?.ok_or_else(missing_stored_doc)?;
            let mut updated = old.clone();
            spec.apply(&mut updated)?;
            self.inner
                .cache
                .put(&self.inner.store, &self.document_path(id), &updated)?;
            self.index_update_locked(&mut manifest, id, &old, &updated)?;
            modified += 1;
        }
        Ok(UpdateResult::new(matched.len() as u64, modified))
    }

    /// Deletes the first matching document.
    pub fn delete_one(&self, filter: &Document) -> FerriteResult<DeleteResult> {
        self.delete_with_limit(filter, Some(1))
    }

    /// Deletes every matching document.
    pub fn delete_many(&self, filter: &Document) -> FerriteResult<DeleteResult> {
        self.delete_with_limit(filter, None)
    }

    fn delete_with_limit(
        &self,
        filter: &Document,
        limit: Option<usize>,
    ) -> FerriteResult<DeleteResult> {
        self.ensure_open()?;
        let filter = Filter::parse(filter)?;

        let lock = self.collection_lock();
        let _guard = lock.write();
        let manifest = match self.inner.catalog.load(&self.inner.database, &self.inner.name)? {
            Some(manifest) => manifest,
            None => return Ok(DeleteResult { deleted_count: 0 }),
        };
        let mut manifest = manifest;
        self.ensure_indexes_loaded(&manifest)?;

        let ids = self.find_ids_locked(&manifest, &filter, &[], limit, 0)?;
        let mut deleted = 0u64;
        for id in &ids {
            let old = self.load_document_locked(id)?;
            let path = self.document_path(id);
            self.inner.store.delete(&path)?;
            self.inner.cache.invalidate(&path);
            self.inner.catalog.remove_document_id(
                &self.inner.database,
                &self.inner.name,
                &mut manifest,
                id,
            )?;
            if let Some(old) = old {
                self.index_remove_locked(&mut manifest, id, &old)?;
            }
            deleted += 1;
        }
        Ok(DeleteResult { deleted_count: deleted })
    }

    // ------------------------------------------------------------------
    // indexes
    // ------------------------------------------------------------------

    /// Creates a secondary index on a single key path and populates it from
    /// the current documents. Returns the index name (`<path>_<direction>`).
    /// Creating an index that already exists returns its name unchanged.
    pub fn create_index(&self, keys: impl Into<IndexKeys>) -> FerriteResult<String> {
        self.ensure_open()?;
        let (key_path, order) = keys.into().resolve_for_create()?;
        let descriptor = IndexDescriptor::new(key_path.clone(), order);
        let name = descriptor.name().to_string();

        let collection_lock = self.collection_lock();
        let _collection_guard = collection_lock.write();
        let index_lock = LOCKS.get_lock(
            LockScope::Index,
            &format!("{}.{}", self.full_name(), name),
        );
        let _index_guard = index_lock.write();

        let mut manifest = self.inner.catalog.load_or_create(&self.inner.database, &self.inner.name)?;
        if manifest.descriptor(&name).is_some() {
            log::debug!("Index {} already exists on {}", name, self.full_name());
            return Ok(name);
        }

        let mut index = SortedIndex::new();
        for id in &manifest.document_ids {
            if let Some(document) = self.load_document_locked(id)? {
                index.insert_document(&key_path, id, &document);
            }
        }
        let bytes = encode(&index)?;
        self.inner.store.put(&self.index_path(&name), &bytes)?;
        self.inner.live_indexes.write().insert(name.clone(), index);
        self.inner.catalog.add_index_descriptor(
            &self.inner.database,
            &self.inner.name,
            &mut manifest,
            descriptor,
        )?;
        log::info!("Created index {} on {}", name, self.full_name());
        Ok(name)
    }

    /// Drops an index by name (`"age_1"`) or by `[(path, direction)]` pair.
    ///
    /// # Errors
    /// `InvalidOperation` when the index does not exist.
    pub fn drop_index(&self, keys: impl Into<IndexKeys>) -> FerriteResult<()> {
        self.ensure_open()?;
        let name = keys.into().resolve_for_drop()?;

        let lock = self.collection_lock();
        let _guard = lock.write();
        let mut manifest = self.inner.catalog.load_or_create(&self.inner.database, &self.inner.name)?;
        self.inner.catalog.remove_index_descriptor(
            &self.inner.database,
            &self.inner.name,
            &mut manifest,
            &name,
        )?;
        self.inner.store.delete(&self.index_path(&name))?;
        self.inner.live_indexes.write().remove(&name);
        log::info!("Dropped index {} on {}", name, self.full_name());
        Ok(())
    }

    /// Describes every index, including the implicit ascending `_id` index,
    /// as `{name: {"key": [[path, direction]]}}`.
    pub fn index_information(&self) -> FerriteResult<Document> {
        self.ensure_open()?;
        let lock = self.collection_lock();
        let _guard = lock.read();

        let mut info = Document::new();
        info.put("_id_", index_info_entry("_id", 1));
        if let Some(manifest) = self.inner.catalog.load(&self.inner.database, &self.inner.name)? {
            for descriptor in &manifest.indexes {
                info.put(
                    descriptor.name(),
                    index_info_entry(descriptor.key_path(), descriptor.order().direction()),
                );
            }
        }
        Ok(info)
    }

    // ------------------------------------------------------------------
    // cursor support
    // ------------------------------------------------------------------

    /// Runs the filter/sort/skip/limit pipeline and returns the surviving
    /// ids in final order. Called by [Cursor] when iteration begins.
    pub(crate) fn execute_find(
        &self,
        filter: &Filter,
        sort: &[(String, SortOrder)],
        limit: Option<usize>,
        skip: usize,
    ) -> FerriteResult<Vec<DocId>> {
        self.ensure_open()?;
        let lock = self.collection_lock();
        let _guard = lock.read();
        let manifest = match self.inner.catalog.load(&self.inner.database, &self.inner.name)? {
            Some(manifest) => manifest,
            None => return Ok(vec![]),
        };
        self.find_ids_locked(&manifest, filter, sort, limit, skip)
    }

    /// Loads one document through the cache under the reader lock.
    pub(crate) fn read_document(&self, id: &DocId) -> FerriteResult<Option<Document>> {
        self.ensure_open()?;
        let lock = self.collection_lock();
        let _guard = lock.read();
        self.load_document_locked(id)
    }

    /// Forgets in-memory index state; used when the collection is dropped.
    pub(crate) fn clear_live_state(&self) {
        self.inner.live_indexes.write().clear();
    }

    // ------------------------------------------------------------------
    // internals (caller holds the collection lock)
    // ------------------------------------------------------------------

    fn ensure_open(&self) -> FerriteResult<()> {
        if self.inner.closed.load(AtomicOrdering::SeqCst) {
            log::error!("Client is closed");
            return Err(FerriteError::new(
                "Client has been closed",
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }

    fn collection_lock(&self) -> crate::common::LockHandle {
        LOCKS.get_lock(LockScope::Collection, &self.full_name())
    }

    fn document_path(&self, id: &DocId) -> StorePath {
        StorePath::new(
            self.inner.database.clone(),
            self.inner.name.clone(),
            id.blob_name(),
        )
    }

    fn index_path(&self, name: &str) -> StorePath {
        StorePath::new(
            self.inner.database.clone(),
            self.inner.name.clone(),
            format!("{}{}", crate::common::INDEX_BLOB_PREFIX, name),
        )
    }

    fn load_document_locked(&self, id: &DocId) -> FerriteResult<Option<Document>> {
        self.inner.cache.get(&self.inner.store, &self.document_path(id))
    }

    /// Validates the caller's document and returns `(id, stored form)`,
    /// minting an `_id` when absent. The stored form is an independent copy.
    fn prepare_document(&self, document: &Document) -> FerriteResult<(DocId, Document)> {
        let mut prepared = document.clone();
        let id = match prepared.doc_id()? {
            Some(id) => id,
            None => {
                let id = DocId::Oid(self.inner.minter.mint());
                prepared.set_doc_id(&id);
                id
            }
        };
        Ok((id, prepared))
    }

    /// Duplicate-checks, stores the blob, and records the id in the
    /// in-memory manifest without saving it.
    fn put_new_document_locked(
        &self,
        manifest: &mut Manifest,
        id: &DocId,
        document: &Document,
    ) -> FerriteResult<()> {
        if manifest.contains(id) {
            log::error!("Document {} already exists in {}", id, self.full_name());
            return Err(FerriteError::new(
                &format!("Document {} already exists", id),
                ErrorKind::DuplicateKey,
            ));
        }
        self.inner
            .cache
            .put(&self.inner.store, &self.document_path(id), document)?;
        manifest.document_ids.push(id.clone());
        Ok(())
    }

    /// Full single-document insert: blob, manifest, and index maintenance.
    fn insert_prepared_locked(
        &self,
        manifest: &mut Manifest,
        id: &DocId,
        document: &Document,
    ) -> FerriteResult<()> {
        self.put_new_document_locked(manifest, id, document)?;
        self.inner
            .catalog
            .save(&self.inner.database, &self.inner.name, manifest)?;
        let inserted = [(id.clone(), document.clone())];
        self.index_insert_batch_locked(manifest, &inserted)
    }

    /// Adds a batch of freshly inserted documents to every index, persisting
    /// each index blob once.
    fn index_insert_batch_locked(
        &self,
        manifest: &mut Manifest,
        inserted: &[(DocId, Document)],
    ) -> FerriteResult<()> {
        if inserted.is_empty() {
            return Ok(());
        }
        let descriptors: Vec<(String, String)> = manifest
            .indexes
            .iter()
            .map(|d| (d.name().to_string(), d.key_path().to_string()))
            .collect();
        for (name, key_path) in descriptors {
            {
                let mut live = self.inner.live_indexes.write();
                if let Some(index) = live.get_mut(&name) {
                    for (id, document) in inserted {
                        index.insert_document(&key_path, id, document);
                    }
                }
            }
            self.persist_index_locked(manifest, &name)?;
        }
        Ok(())
    }

    /// Reconciles every index after an update or replace: entries move only
    /// for indexes whose key path value actually changed.
    fn index_update_locked(
        &self,
        manifest: &mut Manifest,
        id: &DocId,
        old: &Document,
        new: &Document,
    ) -> FerriteResult<()> {
        let descriptors: Vec<(String, String)> = manifest
            .indexes
            .iter()
            .map(|d| (d.name().to_string(), d.key_path().to_string()))
            .collect();
        for (name, key_path) in descriptors {
            let old_key = old.value_at(&key_path).unwrap_or(Value::Null);
            let new_key = new.value_at(&key_path).unwrap_or(Value::Null);
            if old_key == new_key {
                continue;
            }
            {
                let mut live = self.inner.live_indexes.write();
                if let Some(index) = live.get_mut(&name) {
                    index.remove(&old_key, id);
                    index.insert(new_key, id.clone());
                }
            }
            self.persist_index_locked(manifest, &name)?;
        }
        Ok(())
    }

    /// Removes a deleted document from every index.
    fn index_remove_locked(
        &self,
        manifest: &mut Manifest,
        id: &DocId,
        document: &Document,
    ) -> FerriteResult<()> {
        let descriptors: Vec<(String, String)> = manifest
            .indexes
            .iter()
            .map(|d| (d.name().to_string(), d.key_path().to_string()))
            .collect();
        for (name, key_path) in descriptors {
            {
                let mut live = self.inner.live_indexes.write();
                if let Some(index) = live.get_mut(&name) {
                    index.remove_document(&key_path, id, document);
                }
            }
            self.persist_index_locked(manifest, &name)?;
        }
        Ok(())
    }

    /// Writes one index multimap through to storage. On failure the
    /// descriptor is marked dirty so the index is rebuilt before next use;
    /// on success a previously dirty descriptor is cleared.
    fn persist_index_locked(&self, manifest: &mut Manifest, name: &str) -> FerriteResult<()> {
        let bytes = {
            let live = self.inner.live_indexes.read();
            match live.get(name) {
                Some(index) => encode(index)?,
                None => return Ok(()),
            }
        };
        match self.inner.store.put(&self.index_path(name), &bytes) {
            Ok(()) => {
                if let Some(descriptor) = manifest.descriptor_mut(name) {
                    if descriptor.is_dirty() {
                        descriptor.set_dirty(false);
                        self.inner
                            .catalog
                            .save(&self.inner.database, &self.inner.name, manifest)?;
                    }
                }
                Ok(())
            }
            Err(err) => {
                log::error!("Index {} write-through failed: {}", name, err);
                if let Some(descriptor) = manifest.descriptor_mut(name) {
                    descriptor.set_dirty(true);
                    // best effort: the dirty flag triggers a rebuild later
                    let _ = self
                        .inner
                        .catalog
                        .save(&self.inner.database, &self.inner.name, manifest);
                }
                Err(FerriteError::with_cause(
                    &format!("Failed to persist index {:?}", name),
                    ErrorKind::StorageIo,
                    err,
                ))
            }
        }
    }

    /// Makes sure every declared index has a live multimap: loads the
    /// persisted blob, or rebuilds from the documents when the blob is
    /// missing or the descriptor is dirty.
    fn ensure_indexes_loaded(&self, manifest: &Manifest) -> FerriteResult<()> {
        for descriptor in &manifest.indexes {
            if self
                .inner
                .live_indexes
                .read()
                .contains_key(descriptor.name())
            {
                continue;
            }
            let loaded = if descriptor.is_dirty() {
                None
            } else {
                match self.inner.store.get(&self.index_path(descriptor.name()))? {
                    Some(bytes) => Some(decode::<SortedIndex>(&bytes)?),
                    None => None,
                }
            };
            let index = match loaded {
                Some(index) => index,
                None => {
                    log::info!(
                        "Rebuilding index {} on {}",
                        descriptor.name(),
                        self.full_name()
                    );
                    let mut index = SortedIndex::new();
                    for id in &manifest.document_ids {
                        if let Some(document) = self.load_document_locked(id)? {
                            index.insert_document(descriptor.key_path(), id, &document);
                        }
                    }
                    index
                }
            };
            self.inner
                .live_indexes
                .write()
                .insert(descriptor.name().to_string(), index);
        }
        Ok(())
    }

    /// Candidate ids for `filter`, in manifest order for full scans.
    fn candidate_ids_locked(
        &self,
        manifest: &Manifest,
        filter: &Filter,
    ) -> FerriteResult<Vec<DocId>> {
        self.ensure_indexes_loaded(manifest)?;
        let live = self.inner.live_indexes.read();
        let view: Vec<(&str, &SortedIndex)> = manifest
            .indexes
            .iter()
            .filter_map(|d| live.get(d.name()).map(|index| (d.key_path(), index)))
            .collect();
        let plan = plan_find(filter, &view);
        if let Some(path) = &plan.driving_index {
            log::debug!("Query on {} driven by index on {}", self.full_name(), path);
        }
        Ok(match plan.candidates {
            Candidates::ById(id) => {
                if manifest.contains(&id) {
                    vec![id]
                } else {
                    vec![]
                }
            }
            Candidates::Scan(ids) => ids.into_iter().collect(),
            Candidates::FullScan => manifest.document_ids.clone(),
        })
    }

    /// The filter → sort → skip → limit pipeline over candidate ids.
    fn find_ids_locked(
        &self,
        manifest: &Manifest,
        filter: &Filter,
        sort: &[(String, SortOrder)],
        limit: Option<usize>,
        skip: usize,
    ) -> FerriteResult<Vec<DocId>> {
        if limit == Some(0) {
            return Ok(vec![]);
        }
        let candidates = self.candidate_ids_locked(manifest, filter)?;

        if sort.is_empty() {
            let mut out = vec![];
            let mut to_skip = skip;
            for id in candidates {
                let document = match self.load_document_locked(&id)? {
                    Some(document) => document,
                    None => continue,
                };
                if !filter.matches(&document) {
                    continue;
                }
                if to_skip > 0 {
                    to_skip -= 1;
                    continue;
                }
                out.push(id);
                if let Some(limit) = limit {
                    if out.len() == limit {
                        break;
                    }
                }
            }
            return Ok(out);
        }

        // a sort requires full materialization of the surviving documents
        let mut survivors: Vec<(DocId, Document)> = vec![];
        for id in candidates {
            if let Some(document) = self.load_document_locked(&id)? {
                if filter.matches(&document) {
                    survivors.push((id, document));
                }
            }
        }
        survivors.sort_by(|(_, a), (_, b)| compare_documents(a, b, sort));

        let mut ids: Vec<DocId> = survivors.into_iter().map(|(id, _)| id).skip(skip).collect();
        if let Some(limit) = limit {
            ids.truncate(limit);
        }
        Ok(ids)
    }
}

fn missing_stored_doc() -> FerriteError {
    log::error!("Manifest references a document with no stored blob");
    FerriteError::new(
        "Manifest references a document with no stored blob",
        ErrorKind::Internal,
    )
}

/// Key-tuple comparison per the sort specification; missing fields sort as
/// null.
fn compare_documents(a: &Document, b: &Document, sort: &[(String, SortOrder)]) -> Ordering {
    for (key, order) in sort {
        let left = a.value_at(key).unwrap_or(Value::Null);
        let right = b.value_at(key).unwrap_or(Value::Null);
        let ordering = match order {
            SortOrder::Ascending => left.cmp(&right),
            SortOrder::Descending => right.cmp(&left),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

pub(crate) fn parse_sort_spec(sort: Option<&[(&str, i64)]>) -> FerriteResult<SortSpec> {
    let mut spec = vec![];
    if let Some(pairs) = sort {
        for (key, direction) in pairs {
            spec.push((key.to_string(), SortOrder::from_direction(*direction)?));
        }
    }
    Ok(spec)
}

fn index_info_entry(key_path: &str, direction: i64) -> Document {
    let mut entry = Document::new();
    entry.put(
        "key",
        Value::Array(vec![Value::Array(vec![
            Value::String(key_path.to_string()),
            Value::I64(direction),
        ])]),
    );
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::store::memory::MemoryEngine;

    fn collection() -> Collection {
        let store = Store::new(MemoryEngine::new());
        Collection::new(
            "testdb".into(),
            "people".into(),
            store.clone(),
            Arc::new(DocumentCache::with_default_capacity()),
            Catalog::new(store),
            Arc::new(RandomIdMinter),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn insert_one_mints_an_id_and_round_trips() {
        let people = collection();
        let result = people.insert_one(&doc! { "name": "Ada" }).unwrap();
        assert!(matches!(result.inserted_id, DocId::Oid(_)));

        let found = people
            .find_one(&doc! { "name": "Ada" }, None)
            .unwrap()
            .unwrap();
        assert_eq!(found.get("name"), Some(&Value::String("Ada".into())));
        assert_eq!(found.doc_id().unwrap().as_ref(), Some(&result.inserted_id));
    }

    #[test]
    fn insert_duplicate_id_fails() {
        let people = collection();
        people.insert_one(&doc! { "_id": "a", "x": 1 }).unwrap();
        let err = people.insert_one(&doc! { "_id": "a", "x": 2 }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DuplicateKey);
        // the original document is untouched
        let found = people.find_one(&doc! { "_id": "a" }, None).unwrap().unwrap();
        assert_eq!(found.get("x"), Some(&Value::I64(1)));
    }

    #[test]
    fn caller_document_is_isolated_from_stored_state() {
        let people = collection();
        let mut doc = doc! { "_id": "iso", "n": 1 };
        people.insert_one(&doc).unwrap();
        doc.put("n", 999);

        let stored = people.find_one(&doc! { "_id": "iso" }, None).unwrap().unwrap();
        assert_eq!(stored.get("n"), Some(&Value::I64(1)));

        // and the returned copy is isolated too
        let mut fetched = people.find_one(&doc! { "_id": "iso" }, None).unwrap().unwrap();
        fetched.put("n", 777);
        let again = people.find_one(&doc! { "_id": "iso" }, None).unwrap().unwrap();
        assert_eq!(again.get("n"), Some(&Value::I64(1)));
    }

    #[test]
    fn insert_many_ordered_stops_at_first_failure() {
        let people = collection();
        people.insert_one(&doc! { "_id": "dup" }).unwrap();
        let docs = vec![
            doc! { "_id": "a" },
            doc! { "_id": "dup" },
            doc! { "_id": "b" },
        ];
        let err = people.insert_many(&docs, true).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DuplicateKey);
        // "a" landed, "b" was never attempted
        assert_eq!(people.count_documents(&doc! {}).unwrap(), 2);
        assert!(people.find_one(&doc! { "_id": "b" }, None).unwrap().is_none());
    }

    #[test]
    fn insert_many_unordered_attempts_everything() {
        let people = collection();
        people.insert_one(&doc! { "_id": "dup" }).unwrap();
        let docs = vec![
            doc! { "_id": "a" },
            doc! { "_id": "dup" },
            doc! { "_id": "b" },
        ];
        let err = people.insert_many(&docs, false).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DuplicateKey);
        assert!(people.find_one(&doc! { "_id": "b" }, None).unwrap().is_some());
        assert_eq!(people.count_documents(&doc! {}).unwrap(), 3);
    }

    #[test]
    fn update_one_inc_creates_then_adds() {
        let people = collection();
        people.insert_one(&doc! { "_id": "k" }).unwrap();

        let result = people
            .update_one(&doc! { "_id": "k" }, &doc! { "$inc": doc! { "c": 1 } })
            .unwrap();
        assert_eq!(result.matched_count, 1);
        assert_eq!(result.modified_count, 1);
        let doc = people.find_one(&doc! { "_id": "k" }, None).unwrap().unwrap();
        assert_eq!(doc.get("c"), Some(&Value::I64(1)));

        people
            .update_one(&doc! { "_id": "k" }, &doc! { "$inc": doc! { "c": 1 } })
            .unwrap();
        let doc = people.find_one(&doc! { "_id": "k" }, None).unwrap().unwrap();
        assert_eq!(doc.get("c"), Some(&Value::I64(2)));
    }

    #[test]
    fn update_set_through_missing_and_scalar_intermediates() {
        let people = collection();
        people.insert_one(&doc! { "_id": "k" }).unwrap();
        people
            .update_one(&doc! { "_id": "k" }, &doc! { "$set": doc! { "a.b": 5 } })
            .unwrap();
        let doc = people.find_one(&doc! { "_id": "k" }, None).unwrap().unwrap();
        assert_eq!(doc.value_at("a.b"), Some(Value::I64(5)));

        people.insert_one(&doc! { "_id": "j", "a": 7 }).unwrap();
        let err = people
            .update_one(&doc! { "_id": "j" }, &doc! { "$set": doc! { "a.b": 5 } })
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidUpdate);
        // failed update leaves the stored document untouched
        let doc = people.find_one(&doc! { "_id": "j" }, None).unwrap().unwrap();
        assert_eq!(doc.get("a"), Some(&Value::I64(7)));
    }

    #[test]
    fn update_many_touches_every_match() {
        let people = collection();
        people
            .insert_many(
                &[doc! { "g": 1 }, doc! { "g": 1 }, doc! { "g": 2 }],
                true,
            )
            .unwrap();
        let result = people
            .update_many(&doc! { "g": 1 }, &doc! { "$set": doc! { "seen": true } })
            .unwrap();
        assert_eq!(result.matched_count, 2);
        assert_eq!(result.modified_count, 2);
        assert_eq!(people.count_documents(&doc! { "seen": true }).unwrap(), 2);
    }

    #[test]
    fn replace_one_preserves_id_and_upserts() {
        let people = collection();
        people.insert_one(&doc! { "_id": "r", "a": 1 }).unwrap();

        let result = people
            .replace_one(&doc! { "_id": "r" }, &doc! { "b": 2 }, false)
            .unwrap();
        assert_eq!(result.matched_count, 1);
        let doc = people.find_one(&doc! { "_id": "r" }, None).unwrap().unwrap();
        assert_eq!(doc.get("a"), None);
        assert_eq!(doc.get("b"), Some(&Value::I64(2)));
        assert_eq!(doc.doc_id().unwrap(), Some(DocId::from("r")));

        // no match, no upsert
        let result = people
            .replace_one(&doc! { "_id": "zz" }, &doc! { "b": 3 }, false)
            .unwrap();
        assert_eq!((result.matched_count, result.modified_count), (0, 0));

        // upsert inserts
        let result = people
            .replace_one(&doc! { "_id": "zz" }, &doc! { "_id": "zz", "b": 3 }, true)
            .unwrap();
        assert_eq!(result.upserted_id, Some(DocId::from("zz")));
        assert!(people.find_one(&doc! { "_id": "zz" }, None).unwrap().is_some());
    }

    #[test]
    fn delete_is_idempotent() {
        let people = collection();
        people.insert_one(&doc! { "_id": "d" }).unwrap();
        assert_eq!(people.delete_one(&doc! { "_id": "d" }).unwrap().deleted_count, 1);
        assert_eq!(people.delete_one(&doc! { "_id": "d" }).unwrap().deleted_count, 0);
    }

    #[test]
    fn count_and_distinct() {
        let people = collection();
        people
            .insert_many(
                &[
                    doc! { "city": "Rome", "n": 1 },
                    doc! { "city": "Oslo", "n": 2 },
                    doc! { "city": "Rome", "n": 3 },
                    doc! { "n": 4 },
                ],
                true,
            )
            .unwrap();
        assert_eq!(people.count_documents(&doc! {}).unwrap(), 4);
        assert_eq!(people.count_documents(&doc! { "city": "Rome" }).unwrap(), 2);

        let cities = people.distinct("city", None).unwrap();
        assert_eq!(
            cities,
            vec![Value::String("Oslo".into()), Value::String("Rome".into())]
        );
        let cities = people
            .distinct("city", Some(&doc! { "n": doc! { "$lt": 2 } }))
            .unwrap();
        assert_eq!(cities, vec![Value::String("Rome".into())]);
    }

    #[test]
    fn index_lifecycle_and_information() {
        let people = collection();
        people.insert_one(&doc! { "age": 30 }).unwrap();

        let name = people.create_index("age").unwrap();
        assert_eq!(name, "age_1");
        // idempotent
        assert_eq!(people.create_index("age").unwrap(), "age_1");

        let info = people.index_information().unwrap();
        assert!(info.contains_key("_id_"));
        assert!(info.contains_key("age_1"));

        people.drop_index("age_1").unwrap();
        let err = people.drop_index("age_1").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);

        let err = people.drop_index("no-underscore").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidArgument);
    }

    #[test]
    fn compound_index_is_not_implemented() {
        let people = collection();
        let err = people
            .create_index(vec![("a", 1), ("b", -1)])
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::NotImplemented);
    }

    #[test]
    fn indexed_queries_equal_unindexed_queries() {
        let people = collection();
        for n in 0..50 {
            people.insert_one(&doc! { "n": n % 10, "tag": "t" }).unwrap();
        }
        let filter = doc! { "n": doc! { "$gte": 3, "$lt": 6 } };
        let without: u64 = people.count_documents(&filter).unwrap();
        people.create_index("n").unwrap();
        let with: u64 = people.count_documents(&filter).unwrap();
        assert_eq!(without, with);
        assert_eq!(with, 15);
    }

    #[test]
    fn index_maintained_across_insert_update_delete() {
        let people = collection();
        people.create_index("n").unwrap();
        people.insert_one(&doc! { "_id": "a", "n": 1 }).unwrap();
        people.insert_one(&doc! { "_id": "b", "n": 2 }).unwrap();

        assert_eq!(people.count_documents(&doc! { "n": 1 }).unwrap(), 1);

        people
            .update_one(&doc! { "_id": "a" }, &doc! { "$set": doc! { "n": 2 } })
            .unwrap();
        assert_eq!(people.count_documents(&doc! { "n": 1 }).unwrap(), 0);
        assert_eq!(people.count_documents(&doc! { "n": 2 }).unwrap(), 2);

        people.delete_one(&doc! { "_id": "b" }).unwrap();
        assert_eq!(people.count_documents(&doc! { "n": 2 }).unwrap(), 1);
    }

    #[test]
    fn in_list_equality_works_through_an_index() {
        let people = collection();
        people.create_index("tags").unwrap();
        people
            .insert_one(&doc! { "_id": "1", "tags": vec!["a", "b"] })
            .unwrap();
        let found = people.find_one(&doc! { "tags": "a" }, None).unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn sort_skip_limit_pipeline() {
        let people = collection();
        people
            .insert_many(&[doc! { "x": 1 }, doc! { "x": 2 }, doc! { "x": 3 }], true)
            .unwrap();

        let docs: Vec<Document> = people
            .find(&doc! { "x": doc! { "$gt": 1 } })
            .unwrap()
            .sort("x", -1)
            .unwrap()
            .limit(1)
            .unwrap()
            .collect::<FerriteResult<_>>()
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get("x"), Some(&Value::I64(3)));

        let docs: Vec<Document> = people
            .find(&doc! {})
            .unwrap()
            .sort("x", 1)
            .unwrap()
            .skip(1)
            .unwrap()
            .collect::<FerriteResult<_>>()
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].get("x"), Some(&Value::I64(2)));
    }

    #[test]
    fn cursor_configuration_after_start_is_rejected() {
        let people = collection();
        people.insert_one(&doc! { "x": 1 }).unwrap();
        let mut cursor = people.find(&doc! {}).unwrap();
        assert!(cursor.try_next().unwrap().is_some());
        let err = cursor.sort("x", 1).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
    }

    #[test]
    fn closed_cursor_reports_then_stays_quiet() {
        let people = collection();
        people.insert_one(&doc! { "x": 1 }).unwrap();
        let mut cursor = people.find(&doc! {}).unwrap();
        cursor.close();
        cursor.close(); // idempotent
        let err = cursor.try_next().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
        assert!(cursor.try_next().unwrap().is_none());
    }

    #[test]
    fn cursor_restart_is_independent() {
        let people = collection();
        people
            .insert_many(&[doc! { "x": 1 }, doc! { "x": 2 }], true)
            .unwrap();
        let mut cursor = people.find(&doc! {}).unwrap().sort("x", 1).unwrap();
        let first = cursor.try_next().unwrap().unwrap();
        assert_eq!(first.get("x"), Some(&Value::I64(1)));

        let mut fresh = cursor.restart();
        let again = fresh.try_next().unwrap().unwrap();
        assert_eq!(again.get("x"), Some(&Value::I64(1)));
    }

    #[test]
    fn default_order_is_insertion_order() {
        let people = collection();
        for name in ["c", "a", "b"] {
            people.insert_one(&doc! { "_id": name }).unwrap();
        }
        let ids: Vec<DocId> = people
            .find(&doc! {})
            .unwrap()
            .map(|doc| doc.unwrap().doc_id().unwrap().unwrap())
            .collect();
        assert_eq!(
            ids,
            vec![DocId::from("c"), DocId::from("a"), DocId::from("b")]
        );
    }

    #[test]
    fn concurrent_incs_serialize_on_the_writer_lock() {
        let people = collection();
        people.insert_one(&doc! { "_id": "k" }).unwrap();

        let mut joins = vec![];
        for _ in 0..2 {
            let handle = people.clone();
            joins.push(std::thread::spawn(move || {
                handle
                    .update_one(&doc! { "_id": "k" }, &doc! { "$inc": doc! { "c": 1 } })
                    .unwrap();
            }));
        }
        for join in joins {
            join.join().unwrap();
        }
        let doc = people.find_one(&doc! { "_id": "k" }, None).unwrap().unwrap();
        assert_eq!(doc.get("c"), Some(&Value::I64(2)));
    }

    #[test]
    fn manifest_matches_stored_blobs() {
        let people = collection();
        people.insert_many(&[doc! { "_id": "a" }, doc! { "_id": "b" }], true).unwrap();
        people.delete_one(&doc! { "_id": "a" }).unwrap();

        let manifest = people
            .inner
            .catalog
            .load("testdb", "people")
            .unwrap()
            .unwrap();
        let mut blob_names: Vec<String> = people
            .inner
            .store
            .list_blobs("testdb", "people")
            .unwrap()
            .into_iter()
            .filter(|name| !name.starts_with("$."))
            .collect();
        blob_names.sort();
        let mut manifest_names: Vec<String> = manifest
            .document_ids
            .iter()
            .map(|id| id.blob_name())
            .collect();
        manifest_names.sort();
        assert_eq!(blob_names, manifest_names);
    }
}
