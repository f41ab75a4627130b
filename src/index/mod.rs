pub mod planner;
pub mod sorted_index;

pub use sorted_index::SortedIndex;

use crate::common::{SortOrder, INDEX_BLOB_PREFIX};

/// Persisted description of one secondary index.
///
/// The multimap itself lives in a separate blob named by [`blob_name`];
/// descriptors live in the collection manifest. `dirty` marks an index whose
/// persisted multimap may be out of step with the documents (a failed
/// write-through); a dirty index is rebuilt from the collection before its
/// next use.
///
/// [`blob_name`]: IndexDescriptor::blob_name
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct IndexDescriptor {
    name: String,
    key_path: String,
    order: SortOrder,
    #[serde(default)]
    dirty: bool,
}

impl IndexDescriptor {
    pub fn new(key_path: impl Into<String>, order: SortOrder) -> Self {
        let key_path = key_path.into();
        let name = index_name(&key_path, order);
        IndexDescriptor {
            name,
            key_path,
            order,
            dirty: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_path(&self) -> &str {
        &self.key_path
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    /// Blob name of the persisted multimap, e.g. `$.index.age_1`.
    pub fn blob_name(&self) -> String {
        format!("{}{}", INDEX_BLOB_PREFIX, self.name)
    }
}

/// Canonical index name: `<path>_<direction>`, e.g. `age_1` or `age_-1`.
pub fn index_name(key_path: &str, order: SortOrder) -> String {
    format!("{}_{}", key_path, order.direction())
}
