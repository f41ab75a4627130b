use crate::collection::object_id::DocId;
use crate::common::value::{doc_id_from_value, Value};
use crate::common::DOC_ID;
use crate::errors::FerriteResult;
use std::cmp::Ordering;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};

/// A schemaless record: a mapping from string keys to [Value]s.
///
/// Documents are by-value everywhere. Cloning a document produces a fully
/// independent deep copy, which is what the collection API relies on for
/// isolation between the caller's view and stored state.
///
/// Keys are plain strings; dotted strings act as paths only in filters,
/// sort specifications, update paths, and index keys, where
/// [`Document::value_at`] performs the traversal.
///
/// # Examples
///
/// ```ignore
/// let doc = doc! { "name": "Ada", "age": 36, "tags": vec!["math", "dry"] };
/// assert_eq!(doc.get("name"), Some(&Value::String("Ada".into())));
/// assert_eq!(doc.value_at("tags.1"), Some(Value::String("dry".into())));
/// ```
#[derive(Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct Document {
    data: BTreeMap<String, Value>,
}

impl Document {
    /// Creates a new empty document.
    pub fn new() -> Self {
        Document {
            data: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of top-level entries.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Associates `value` with the top-level `key`, replacing any previous
    /// value.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Returns the value at a top-level key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.data.get_mut(key)
    }

    /// Removes a top-level key, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Resolves a dotted path against this document.
    ///
    /// Each segment descends a nested document by key or an array by integer
    /// index. A step that cannot be taken (absent key, non-numeric index on
    /// an array, index out of bounds, scalar in the middle of the path)
    /// yields `None`, which the matcher treats as *missing* rather than as
    /// an error.
    pub fn value_at(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.data.get(first)?.clone();
        for segment in segments {
            current = match current {
                Value::Document(doc) => doc.get(segment)?.clone(),
                Value::Array(items) => {
                    let index: usize = segment.parse().ok()?;
                    items.get(index)?.clone()
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Parses this document's `_id` field, if present.
    ///
    /// # Errors
    /// `InvalidArgument` when `_id` holds anything other than an object id or
    /// a string.
    pub fn doc_id(&self) -> FerriteResult<Option<DocId>> {
        match self.data.get(DOC_ID) {
            Some(value) => Ok(Some(doc_id_from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Sets the `_id` field from a [DocId].
    pub fn set_doc_id(&mut self, id: &DocId) {
        self.data.insert(DOC_ID.to_string(), id.to_value());
    }

    /// Iterates top-level entries in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.data.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }
}

impl PartialOrd for Document {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Document {
    // lexicographic over sorted key/value pairs, which is exactly how a
    // BTreeMap compares
    fn cmp(&self, other: &Self) -> Ordering {
        self.data.cmp(&other.data)
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "\"{}\": {}", key, value)?;
        }
        write!(f, "}}")
    }
}

impl Debug for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Document {
            data: iter.into_iter().collect(),
        }
    }
}

/// Builds a [Document] from `"key": value` pairs.
///
/// Values go through [`Value::from`], so primitives, strings, vectors, and
/// nested `doc!` invocations all work:
///
/// ```ignore
/// let doc = doc! {
///     "name": "Ada",
///     "age": 36,
///     "address": doc! { "city": "London" },
/// };
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::collection::document::Document::new()
    };
    ( $( $key:tt : $value:expr ),* $(,)? ) => {{
        let mut document = $crate::collection::document::Document::new();
        $( document.put($key, $crate::common::value::Value::from($value)); )*
        document
    }};
}
