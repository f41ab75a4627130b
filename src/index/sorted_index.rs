use crate::collection::document::Document;
use crate::collection::object_id::DocId;
use crate::common::value::Value;
use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Formatter;
use std::ops::Bound;

/// Sorted multimap backing one secondary index: value-key → id-set.
///
/// Keys are ordered by the value domain's total order, which gives range
/// scans the exact same semantics as the matcher's ordered comparisons.
/// Documents whose indexed path does not resolve are entered under the
/// `null` sentinel key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedIndex {
    entries: BTreeMap<Value, BTreeSet<DocId>>,
}

impl SortedIndex {
    pub fn new() -> Self {
        SortedIndex {
            entries: BTreeMap::new(),
        }
    }

    /// Builds the multimap from `(id, document)` pairs in one scan.
    pub fn build<'a>(
        key_path: &str,
        documents: impl Iterator<Item = (&'a DocId, &'a Document)>,
    ) -> Self {
        let mut index = SortedIndex::new();
        for (id, document) in documents {
            index.insert_document(key_path, id, document);
        }
        index
    }

    /// Indexes one document's value at `key_path`.
    pub fn insert_document(&mut self, key_path: &str, id: &DocId, document: &Document) {
        let key = document.value_at(key_path).unwrap_or(Value::Null);
        self.insert(key, id.clone());
    }

    /// Removes one document's entry for its value at `key_path`.
    pub fn remove_document(&mut self, key_path: &str, id: &DocId, document: &Document) {
        let key = document.value_at(key_path).unwrap_or(Value::Null);
        self.remove(&key, id);
    }

    pub fn insert(&mut self, key: Value, id: DocId) {
        self.entries.entry(key).or_default().insert(id);
    }

    pub fn remove(&mut self, key: &Value, id: &DocId) {
        if let Some(ids) = self.entries.get_mut(key) {
            ids.remove(id);
            if ids.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    /// Number of distinct value keys.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Total number of `(value, id)` entries.
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(|ids| ids.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Size of the id-set stored under exactly `key`. Used by the planner as
    /// a cheap selectivity estimate.
    pub fn cardinality(&self, key: &Value) -> usize {
        self.entries.get(key).map(|ids| ids.len()).unwrap_or(0)
    }

    /// Ids whose indexed value matches `$eq operand`: the ids stored under
    /// the exact key, plus ids under array keys containing an element equal
    /// to the operand (in-list equality).
    pub fn ids_matching_eq(&self, operand: &Value) -> BTreeSet<DocId> {
        let mut out = BTreeSet::new();
        if let Some(ids) = self.entries.get(operand) {
            out.extend(ids.iter().cloned());
        }
        // array keys form a contiguous run: arrays rank between bytes and
        // documents in the total order
        let lower = Value::Array(vec![]);
        let upper = Value::Document(Document::new());
        let arrays = self
            .entries
            .range::<Value, _>((Bound::Included(&lower), Bound::Excluded(&upper)));
        for (key, ids) in arrays {
            if let Value::Array(items) = key {
                if items.iter().any(|item| item == operand) {
                    out.extend(ids.iter().cloned());
                }
            }
        }
        out
    }

    /// Ids whose indexed value falls in the given key range, per the total
    /// order.
    pub fn ids_in_range(
        &self,
        lower: Bound<&Value>,
        upper: Bound<&Value>,
    ) -> BTreeSet<DocId> {
        // BTreeMap::range panics on an inverted range; a contradictory
        // filter simply selects nothing
        if let (
            Bound::Included(lo) | Bound::Excluded(lo),
            Bound::Included(hi) | Bound::Excluded(hi),
        ) = (&lower, &upper)
        {
            if lo > hi {
                return BTreeSet::new();
            }
            if lo == hi
                && (matches!(lower, Bound::Excluded(_)) || matches!(upper, Bound::Excluded(_)))
            {
                return BTreeSet::new();
            }
        }
        let mut out = BTreeSet::new();
        for (_, ids) in self.entries.range::<Value, _>((lower, upper)) {
            out.extend(ids.iter().cloned());
        }
        out
    }

    /// All `(value, id-set)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &BTreeSet<DocId>)> {
        self.entries.iter()
    }
}

// Persisted as a sequence of (key, [id, …]) pairs: the self-describing codec
// only allows string keys in maps, and the pair form reloads in sorted order
// regardless.
impl Serialize for SortedIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.entries.len()))?;
        for (key, ids) in &self.entries {
            let ids: Vec<&DocId> = ids.iter().collect();
            seq.serialize_element(&(key, ids))?;
        }
        seq.end()
    }
}

struct SortedIndexVisitor;

impl<'de> Visitor<'de> for SortedIndexVisitor {
    type Value = SortedIndex;

    fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "a sequence of (value, id list) pairs")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut index = SortedIndex::new();
        while let Some((key, ids)) = seq.next_element::<(Value, Vec<DocId>)>()? {
            for id in ids {
                index.insert(key.clone(), id);
            }
        }
        Ok(index)
    }
}

impl<'de> Deserialize<'de> for SortedIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_seq(SortedIndexVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn id(name: &str) -> DocId {
        DocId::Text(name.to_string())
    }

    #[test]
    fn insert_and_remove_maintain_id_sets() {
        let mut index = SortedIndex::new();
        index.insert(Value::I64(1), id("a"));
        index.insert(Value::I64(1), id("b"));
        index.insert(Value::I64(2), id("c"));
        assert_eq!(index.key_count(), 2);
        assert_eq!(index.entry_count(), 3);
        assert_eq!(index.cardinality(&Value::I64(1)), 2);

        index.remove(&Value::I64(1), &id("a"));
        assert_eq!(index.cardinality(&Value::I64(1)), 1);
        index.remove(&Value::I64(1), &id("b"));
        // empty key is dropped entirely
        assert_eq!(index.key_count(), 1);
    }

    #[test]
    fn build_indexes_missing_paths_under_null() {
        let docs = vec![
            (id("a"), doc! { "n": 1 }),
            (id("b"), doc! { "other": 2 }),
        ];
        let index = SortedIndex::build("n", docs.iter().map(|(i, d)| (i, d)));
        assert_eq!(index.cardinality(&Value::I64(1)), 1);
        assert_eq!(index.cardinality(&Value::Null), 1);
    }

    #[test]
    fn eq_lookup_includes_array_containment() {
        let mut index = SortedIndex::new();
        index.insert(Value::String("a".into()), id("plain"));
        index.insert(
            Value::Array(vec![Value::String("a".into()), Value::String("b".into())]),
            id("listed"),
        );
        index.insert(Value::Array(vec![Value::String("z".into())]), id("other"));

        let ids = index.ids_matching_eq(&Value::String("a".into()));
        assert!(ids.contains(&id("plain")));
        assert!(ids.contains(&id("listed")));
        assert!(!ids.contains(&id("other")));
    }

    #[test]
    fn range_scan_follows_total_order() {
        let mut index = SortedIndex::new();
        for n in 0..10 {
            index.insert(Value::I64(n), id(&format!("d{}", n)));
        }
        index.insert(Value::String("s".into()), id("str"));

        let ids = index.ids_in_range(
            Bound::Included(&Value::I64(5)),
            Bound::Excluded(&Value::I64(8)),
        );
        assert_eq!(
            ids,
            [id("d5"), id("d6"), id("d7")].into_iter().collect()
        );

        // unbounded upper range picks up strings, which sort above numbers
        let ids = index.ids_in_range(Bound::Excluded(&Value::I64(8)), Bound::Unbounded);
        assert!(ids.contains(&id("d9")));
        assert!(ids.contains(&id("str")));
    }

    #[test]
    fn numeric_keys_unify_across_representations() {
        let mut index = SortedIndex::new();
        index.insert(Value::I64(3), id("int"));
        index.insert(Value::F64(3.0), id("float"));
        // 3 and 3.0 are the same key under the total order
        assert_eq!(index.cardinality(&Value::I64(3)), 2);
    }

    #[test]
    fn serde_round_trip() {
        let mut index = SortedIndex::new();
        index.insert(Value::I64(1), id("a"));
        index.insert(Value::I64(1), id("b"));
        index.insert(Value::Null, id("missing"));
        index.insert(Value::Array(vec![Value::I64(9)]), id("arr"));

        let bytes = serde_json::to_vec(&index).unwrap();
        let back: SortedIndex = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, index);
        assert_eq!(back.iter().count(), index.key_count());
    }
}
