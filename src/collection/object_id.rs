use crate::errors::{ErrorKind, FerriteError};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

const OBJECT_ID_BYTES: usize = 12;

/// A 96-bit document identifier rendered as 24 lowercase hex characters.
///
/// # Purpose
/// Uniquely identifies a document within a collection. Generated from the
/// operating system RNG by the default [IdMinter] when a document is inserted
/// without an `_id` field.
///
/// # Characteristics
/// - **Copy**: twelve raw bytes, cheap to pass by value
/// - **Ordered**: byte order, so ids sort stably in index id-sets
/// - **Serializable**: serialized as its hex string form
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    bytes: [u8; OBJECT_ID_BYTES],
}

impl ObjectId {
    /// Creates a new random object id from the OS RNG.
    pub fn new() -> Self {
        let mut bytes = [0u8; OBJECT_ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        ObjectId { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_BYTES] {
        &self.bytes
    }

    /// Returns the 24-character lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(OBJECT_ID_BYTES * 2);
        for b in &self.bytes {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        ObjectId::new()
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = FerriteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != OBJECT_ID_BYTES * 2 {
            log::error!("Invalid object id length: {}", s.len());
            return Err(FerriteError::new(
                "Object id must be 24 hex characters",
                ErrorKind::InvalidArgument,
            ));
        }
        let mut bytes = [0u8; OBJECT_ID_BYTES];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| {
                FerriteError::new("Object id must be hex", ErrorKind::InvalidArgument)
            })?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| {
                FerriteError::new("Object id must be hex", ErrorKind::InvalidArgument)
            })?;
        }
        Ok(ObjectId { bytes })
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

struct ObjectIdVisitor;

impl Visitor<'_> for ObjectIdVisitor {
    type Value = ObjectId;

    fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "a 24-character hex string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        ObjectId::from_str(v).map_err(|e| E::custom(e.message().to_string()))
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(ObjectIdVisitor)
    }
}

/// The key under which a document is stored and indexed.
///
/// Documents may carry either a generated [ObjectId] or a caller-supplied
/// string as their `_id`. Both forms participate in manifests, index id-sets,
/// and blob naming.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum DocId {
    Oid(ObjectId),
    Text(String),
}

impl DocId {
    /// The blob name used for this document in the storage engine.
    pub fn blob_name(&self) -> String {
        match self {
            DocId::Oid(oid) => oid.to_hex(),
            DocId::Text(s) => s.clone(),
        }
    }
}

impl Display for DocId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DocId::Oid(oid) => write!(f, "{}", oid),
            DocId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<ObjectId> for DocId {
    fn from(oid: ObjectId) -> Self {
        DocId::Oid(oid)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        DocId::Text(s.to_string())
    }
}

impl From<String> for DocId {
    fn from(s: String) -> Self {
        DocId::Text(s)
    }
}

/// Pluggable generator for document ids.
///
/// The default minter draws 96 random bits from the OS RNG. A deterministic
/// minter can be injected through the client builder for reproducible tests.
pub trait IdMinter: Send + Sync {
    fn mint(&self) -> ObjectId;
}

/// Default [IdMinter] backed by the operating system RNG.
pub struct RandomIdMinter;

impl IdMinter for RandomIdMinter {
    fn mint(&self) -> ObjectId {
        ObjectId::new()
    }
}
