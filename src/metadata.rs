use crate::collection::object_id::{DocId, ObjectId};
use crate::common::METADATA_BLOB;
use crate::errors::{ErrorKind, FerriteError, FerriteResult};
use crate::index::IndexDescriptor;
use crate::store::{decode, encode, Store, StorePath};

pub(crate) const SCHEMA_VERSION: u32 = 1;

/// Per-collection persisted metadata: the single source of truth for which
/// documents exist and which indexes are declared.
///
/// `document_ids` preserves insertion order; that order is the default cursor
/// order for unsorted queries. A document blob present in storage but absent
/// here is garbage and is never served.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Manifest {
    pub collection_id: ObjectId,
    pub document_ids: Vec<DocId>,
    pub indexes: Vec<IndexDescriptor>,
    pub schema_version: u32,
}

impl Manifest {
    pub fn new() -> Self {
        Manifest {
            collection_id: ObjectId::new(),
            document_ids: vec![],
            indexes: vec![],
            schema_version: SCHEMA_VERSION,
        }
    }

    pub fn contains(&self, id: &DocId) -> bool {
        self.document_ids.iter().any(|existing| existing == id)
    }

    pub fn descriptor(&self, name: &str) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|d| d.name() == name)
    }

    pub fn descriptor_mut(&mut self, name: &str) -> Option<&mut IndexDescriptor> {
        self.indexes.iter_mut().find(|d| d.name() == name)
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

/// Loads and saves manifests. Every mutation rewrites the whole manifest
/// blob, so a manifest on storage is always internally consistent; the
/// catalog is the serialization point for structural changes.
#[derive(Clone)]
pub struct Catalog {
    store: Store,
}

impl Catalog {
    pub fn new(store: Store) -> Self {
        Catalog { store }
    }

    fn path(database: &str, collection: &str) -> StorePath {
        StorePath::new(database, collection, METADATA_BLOB)
    }

    /// Loads the manifest, or `None` when the collection does not exist yet.
    pub fn load(&self, database: &str, collection: &str) -> FerriteResult<Option<Manifest>> {
        match self.store.get(&Self::path(database, collection))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Loads the manifest, creating and persisting a fresh one when the
    /// collection is accessed for the first time.
    pub fn load_or_create(&self, database: &str, collection: &str) -> FerriteResult<Manifest> {
        if let Some(manifest) = self.load(database, collection)? {
            return Ok(manifest);
        }
        let manifest = Manifest::new();
        log::info!("Creating collection {}.{}", database, collection);
        self.save(database, collection, &manifest)?;
        Ok(manifest)
    }

    /// Persists a complete manifest blob (copy-on-write).
    pub fn save(
        &self,
        database: &str,
        collection: &str,
        manifest: &Manifest,
    ) -> FerriteResult<()> {
        let bytes = encode(manifest)?;
        self.store.put(&Self::path(database, collection), &bytes)
    }

    /// Appends a document id and persists the manifest.
    pub fn add_document_id(
        &self,
        database: &str,
        collection: &str,
        manifest: &mut Manifest,
        id: DocId,
    ) -> FerriteResult<()> {
        manifest.document_ids.push(id);
        self.save(database, collection, manifest)
    }

    /// Removes a document id and persists the manifest.
    pub fn remove_document_id(
        &self,
        database: &str,
        collection: &str,
        manifest: &mut Manifest,
        id: &DocId,
    ) -> FerriteResult<()> {
        manifest.document_ids.retain(|existing| existing != id);
        self.save(database, collection, manifest)
    }

    /// Appends an index descriptor and persists the manifest.
    ///
    /// # Errors
    /// `InvalidOperation` when an index with the same name already exists.
    pub fn add_index_descriptor(
        &self,
        database: &str,
        collection: &str,
        manifest: &mut Manifest,
        descriptor: IndexDescriptor,
    ) -> FerriteResult<()> {
        if manifest.descriptor(descriptor.name()).is_some() {
            log::error!("Index {} already exists", descriptor.name());
            return Err(FerriteError::new(
                &format!("Index {:?} already exists", descriptor.name()),
                ErrorKind::InvalidOperation,
            ));
        }
        manifest.indexes.push(descriptor);
        self.save(database, collection, manifest)
    }

    /// Removes an index descriptor by name and persists the manifest.
    ///
    /// # Errors
    /// `InvalidOperation` when no index with that name exists.
    pub fn remove_index_descriptor(
        &self,
        database: &str,
        collection: &str,
        manifest: &mut Manifest,
        name: &str,
    ) -> FerriteResult<()> {
        if manifest.descriptor(name).is_none() {
            log::error!("Index {} does not exist", name);
            return Err(FerriteError::new(
                &format!("Index {:?} does not exist", name),
                ErrorKind::InvalidOperation,
            ));
        }
        manifest.indexes.retain(|d| d.name() != name);
        self.save(database, collection, manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SortOrder;
    use crate::store::memory::MemoryEngine;

    fn catalog() -> Catalog {
        Catalog::new(Store::new(MemoryEngine::new()))
    }

    #[test]
    fn load_missing_collection_returns_none() {
        assert_eq!(catalog().load("db", "c").unwrap(), None);
    }

    #[test]
    fn load_or_create_persists_a_fresh_manifest() {
        let catalog = catalog();
        let manifest = catalog.load_or_create("db", "c").unwrap();
        assert!(manifest.document_ids.is_empty());
        assert_eq!(manifest.schema_version, SCHEMA_VERSION);

        let reloaded = catalog.load("db", "c").unwrap().unwrap();
        assert_eq!(reloaded, manifest);
    }

    #[test]
    fn document_id_round_trip() {
        let catalog = catalog();
        let mut manifest = catalog.load_or_create("db", "c").unwrap();

        catalog
            .add_document_id("db", "c", &mut manifest, DocId::from("a"))
            .unwrap();
        catalog
            .add_document_id("db", "c", &mut manifest, DocId::from("b"))
            .unwrap();
        assert!(manifest.contains(&DocId::from("a")));

        let reloaded = catalog.load("db", "c").unwrap().unwrap();
        // insertion order is preserved
        assert_eq!(
            reloaded.document_ids,
            vec![DocId::from("a"), DocId::from("b")]
        );

        catalog
            .remove_document_id("db", "c", &mut manifest, &DocId::from("a"))
            .unwrap();
        assert!(!manifest.contains(&DocId::from("a")));
        assert_eq!(
            catalog.load("db", "c").unwrap().unwrap().document_ids,
            vec![DocId::from("b")]
        );
    }

    #[test]
    fn index_descriptor_round_trip() {
        let catalog = catalog();
        let mut manifest = catalog.load_or_create("db", "c").unwrap();
        let descriptor = IndexDescriptor::new("age", SortOrder::Ascending);

        catalog
            .add_index_descriptor("db", "c", &mut manifest, descriptor.clone())
            .unwrap();
        assert!(manifest.descriptor("age_1").is_some());

        // duplicate rejected
        let err = catalog
            .add_index_descriptor("db", "c", &mut manifest, descriptor)
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);

        catalog
            .remove_index_descriptor("db", "c", &mut manifest, "age_1")
            .unwrap();
        assert!(manifest.descriptor("age_1").is_none());

        let err = catalog
            .remove_index_descriptor("db", "c", &mut manifest, "age_1")
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
    }
}
