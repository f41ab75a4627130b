use crate::collection::document::Document;
use crate::collection::object_id::{DocId, ObjectId};
use crate::errors::{ErrorKind, FerriteError, FerriteResult};
use std::any::TypeId;
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};

/// Compare two floats with NaN ordered greater than every other number and
/// equal to itself.
#[inline]
fn num_cmp_float(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Compare an integer against a float without round-tripping the integer
/// through f64 (which loses precision past 2^53).
#[inline]
fn num_cmp_int_float(i: i64, f: f64) -> Ordering {
    if f.is_nan() {
        return Ordering::Less;
    }
    if f >= i64::MAX as f64 {
        return Ordering::Less;
    }
    if f < i64::MIN as f64 {
        return Ordering::Greater;
    }
    let trunc = f.trunc() as i64;
    match i.cmp(&trunc) {
        Ordering::Equal => {
            let fract = f - trunc as f64;
            if fract > 0.0 {
                Ordering::Less
            } else if fract < 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        other => other,
    }
}

/// A single value stored in a [Document].
///
/// # Purpose
/// Unified representation of everything a document field can hold: scalars,
/// binary data, arrays, nested documents, and generated object ids.
///
/// # Ordering
/// `Value` carries the total order used by sorts and index keys:
///
/// ```text
/// null < bool < numbers < string < bytes < array < document < object id
/// ```
///
/// Integers and floats compare by numeric value regardless of representation;
/// NaN sorts above every other number. Arrays compare elementwise, documents
/// lexicographically over their sorted key/value pairs.
#[derive(Clone, Default, serde::Deserialize, serde::Serialize)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    /// Boolean true/false.
    Bool(bool),
    /// 64-bit signed integer.
    I64(i64),
    /// 64-bit float.
    F64(f64),
    /// UTF-8 text.
    String(String),
    /// Binary data. Compared bytewise; not a valid `_id`.
    Bytes(Vec<u8>),
    /// Ordered array of values.
    Array(Vec<Value>),
    /// Nested document.
    Document(Document),
    /// Generated document id.
    Id(ObjectId),
}

impl Value {
    /// Rank of the value's type in the total order.
    #[inline]
    pub(crate) fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::I64(_) | Value::F64(_) => 2,
            Value::String(_) => 3,
            Value::Bytes(_) => 4,
            Value::Array(_) => 5,
            Value::Document(_) => 6,
            Value::Id(_) => 7,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::I64(_) | Value::F64(_))
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    #[inline]
    pub fn is_document(&self) -> bool {
        matches!(self, Value::Document(_))
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_document_mut(&mut self) -> Option<&mut Document> {
        match self {
            Value::Document(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_object_id(&self) -> Option<&ObjectId> {
        match self {
            Value::Id(v) => Some(v),
            _ => None,
        }
    }

    /// Takes the value, leaving [Value::Null] in its place.
    pub fn take(&mut self) -> Value {
        std::mem::replace(self, Value::Null)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::I64(a), Value::I64(b)) => a.cmp(b),
            (Value::F64(a), Value::F64(b)) => num_cmp_float(*a, *b),
            (Value::I64(a), Value::F64(b)) => num_cmp_int_float(*a, *b),
            (Value::F64(a), Value::I64(b)) => num_cmp_int_float(*b, *a).reverse(),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Document(a), Value::Document(b)) => a.cmp(b),
            (Value::Id(a), Value::Id(b)) => a.cmp(b),
            // same rank implies same constructor family
            _ => Ordering::Equal,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "\"{}\"", v),
            Value::Bytes(v) => write!(f, "bytes[{}]", v.len()),
            Value::Array(v) => {
                write!(f, "[")?;
                for (i, item) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Document(v) => write!(f, "{}", v),
            Value::Id(v) => write!(f, "ObjectId(\"{}\")", v),
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl From<bool> for Value {
    #[inline]
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<u8> for Value {
    #[inline]
    fn from(value: u8) -> Self {
        Value::I64(value as i64)
    }
}

impl From<i16> for Value {
    #[inline]
    fn from(value: i16) -> Self {
        Value::I64(value as i64)
    }
}

impl From<i32> for Value {
    #[inline]
    fn from(value: i32) -> Self {
        Value::I64(value as i64)
    }
}

impl From<i64> for Value {
    #[inline]
    fn from(value: i64) -> Self {
        Value::I64(value)
    }
}

impl From<u32> for Value {
    #[inline]
    fn from(value: u32) -> Self {
        Value::I64(value as i64)
    }
}

impl From<f32> for Value {
    #[inline]
    fn from(value: f32) -> Self {
        Value::F64(value as f64)
    }
}

impl From<f64> for Value {
    #[inline]
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Document> for Value {
    fn from(value: Document) -> Self {
        Value::Document(value)
    }
}

impl From<ObjectId> for Value {
    fn from(value: ObjectId) -> Self {
        Value::Id(value)
    }
}

impl From<DocId> for Value {
    fn from(value: DocId) -> Self {
        match value {
            DocId::Oid(oid) => Value::Id(oid),
            DocId::Text(s) => Value::String(s),
        }
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl<T> From<Vec<T>> for Value
where
    T: Into<Value> + 'static,
{
    fn from(value: Vec<T>) -> Self {
        if TypeId::of::<T>() == TypeId::of::<u8>() {
            let len = value.len();
            let cap = value.capacity();
            let ptr = value.as_ptr() as *mut u8;

            // SAFETY: T is u8 per the TypeId check, so the buffer already
            // has the layout of a Vec<u8>; forget the original to avoid a
            // double free
            let bytes = unsafe {
                std::mem::forget(value);
                Vec::from_raw_parts(ptr, len, cap)
            };
            return Value::Bytes(bytes);
        }
        Value::Array(value.into_iter().map(|v| v.into()).collect())
    }
}

impl TryFrom<&Value> for DocId {
    type Error = FerriteError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Id(oid) => Ok(DocId::Oid(*oid)),
            Value::String(s) => Ok(DocId::Text(s.clone())),
            other => {
                log::error!("Document _id must be an object id or a string, got {}", other);
                Err(FerriteError::new(
                    "Document _id must be an object id or a string",
                    ErrorKind::InvalidArgument,
                ))
            }
        }
    }
}

impl DocId {
    /// The [Value] form of this id, as it appears in the `_id` field.
    pub fn to_value(&self) -> Value {
        self.clone().into()
    }
}

/// Parses a document id out of an `_id` field value.
pub fn doc_id_from_value(value: &Value) -> FerriteResult<DocId> {
    DocId::try_from(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn type_ranks_follow_total_order() {
        let ordered = vec![
            Value::Null,
            Value::Bool(false),
            Value::Bool(true),
            Value::I64(-3),
            Value::F64(2.5),
            Value::I64(7),
            Value::String("a".into()),
            Value::Bytes(vec![0]),
            Value::Array(vec![Value::I64(1)]),
            Value::Document(doc! { "a": 1 }),
            Value::Id(ObjectId::new()),
        ];
        for window in ordered.windows(2) {
            assert!(
                window[0] <= window[1],
                "{:?} should sort before {:?}",
                window[0],
                window[1]
            );
        }
    }

    #[test]
    fn integers_and_floats_compare_numerically() {
        assert_eq!(Value::I64(3), Value::F64(3.0));
        assert!(Value::I64(3) < Value::F64(3.5));
        assert!(Value::F64(2.9) < Value::I64(3));
        assert!(Value::I64(4) > Value::F64(3.5));
    }

    #[test]
    fn large_integers_keep_precision_against_floats() {
        let big = (1i64 << 53) + 1;
        assert!(Value::I64(big) > Value::F64((1i64 << 53) as f64));
    }

    #[test]
    fn nan_sorts_above_numbers_and_equals_itself() {
        assert!(Value::F64(f64::NAN) > Value::F64(f64::MAX));
        assert!(Value::F64(f64::NAN) > Value::I64(i64::MAX));
        assert_eq!(Value::F64(f64::NAN), Value::F64(f64::NAN));
    }

    #[test]
    fn strings_sort_after_numbers() {
        // type mismatches resolve by the total order, not by error
        assert!(Value::String("3".into()) > Value::I64(1_000_000));
    }

    #[test]
    fn arrays_compare_elementwise_then_by_length() {
        let short: Value = vec![1, 2].into();
        let long: Value = vec![1, 2, 3].into();
        let bigger: Value = vec![2].into();
        assert!(short < long);
        assert!(long < bigger);
    }

    #[test]
    fn documents_compare_over_sorted_pairs() {
        let a = Value::Document(doc! { "a": 1 });
        let b = Value::Document(doc! { "a": 2 });
        let c = Value::Document(doc! { "b": 0 });
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn from_conversions() {
        assert_eq!(Value::from(7i32), Value::I64(7));
        assert_eq!(Value::from(7.5f32), Value::F64(7.5));
        assert_eq!(Value::from("hey"), Value::String("hey".into()));
        assert_eq!(Value::from(vec![1u8, 2u8]), Value::Bytes(vec![1, 2]));
        assert_eq!(
            Value::from(vec!["a", "b"]),
            Value::Array(vec![Value::String("a".into()), Value::String("b".into())])
        );
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn doc_id_from_value_accepts_id_and_string() {
        let oid = ObjectId::new();
        assert_eq!(doc_id_from_value(&Value::Id(oid)).unwrap(), DocId::Oid(oid));
        assert_eq!(
            doc_id_from_value(&Value::String("k".into())).unwrap(),
            DocId::Text("k".into())
        );
        let err = doc_id_from_value(&Value::I64(4)).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidArgument);
    }

    #[test]
    fn serde_round_trip() {
        let value = Value::Array(vec![
            Value::Null,
            Value::Bool(true),
            Value::I64(-9),
            Value::F64(1.25),
            Value::String("s".into()),
            Value::Bytes(vec![1, 2, 3]),
            Value::Document(doc! { "k": "v" }),
            Value::Id(ObjectId::new()),
        ]);
        let bytes = serde_json::to_vec(&value).unwrap();
        let back: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, value);
    }
}
