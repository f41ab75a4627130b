pub mod lock;
pub mod value;

pub use lock::{LockHandle, LockRegistry, LockScope};
pub use value::Value;

use crate::errors::{ErrorKind, FerriteError, FerriteResult};

/// Reserved key holding a document's unique id.
pub const DOC_ID: &str = "_id";

/// Blob name of the per-collection manifest.
pub(crate) const METADATA_BLOB: &str = "$.metadata";

/// Blob name prefix for persisted index multimaps.
pub(crate) const INDEX_BLOB_PREFIX: &str = "$.index.";

/// Environment variable overriding the disk engine root directory.
pub(crate) const ENV_ROOT: &str = "FERRITE_HOME";

/// Directory under the user's home used when no root is configured.
pub(crate) const DEFAULT_DIR_NAME: &str = ".ferrite";

/// Direction for sorting documents and for index descriptors.
///
/// The numeric form follows the PyMongo convention: `1` ascending, `-1`
/// descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    /// Parses the `1` / `-1` numeric convention.
    ///
    /// # Errors
    /// `InvalidArgument` for any other value.
    pub fn from_direction(direction: i64) -> FerriteResult<Self> {
        match direction {
            1 => Ok(SortOrder::Ascending),
            -1 => Ok(SortOrder::Descending),
            other => {
                log::error!("Invalid sort direction: {}", other);
                Err(FerriteError::new(
                    "Sort direction must be 1 (ascending) or -1 (descending)",
                    ErrorKind::InvalidArgument,
                ))
            }
        }
    }

    pub fn direction(&self) -> i64 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }
}

/// A sort specification: key paths paired with directions, applied in order.
pub type SortSpec = Vec<(String, SortOrder)>;
