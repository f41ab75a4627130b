//! # Ferrite - Embedded Document Database
//!
//! Ferrite is a lightweight embedded document database with a MongoDB-like
//! data model and a PyMongo-flavoured API: schemaless documents in named
//! collections, filters with operator documents, path-addressed updates,
//! secondary indexes with a transparent planner, and cursors with
//! sort/limit/skip. There is no server process; storage is pluggable
//! between an in-memory engine and a durable one-file-per-document disk
//! engine.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ferrite::{doc, Client};
//!
//! # fn main() -> ferrite::errors::FerriteResult<()> {
//! let client = Client::builder().in_memory().open()?;
//! let people = client.database("app")?.collection("people")?;
//!
//! people.insert_one(&doc! { "name": "Ada", "age": 36 })?;
//! people.create_index("age")?;
//!
//! let mut cursor = people
//!     .find(&doc! { "age": doc! { "$gte": 18 } })?
//!     .sort("age", -1)?
//!     .limit(10)?;
//! for document in &mut cursor {
//!     println!("{}", document?);
//! }
//!
//! client.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`client`] - Client entry point and builder
//! - [`database`] - Database handles
//! - [`collection`] - Collections, documents, ids, cursors, result structs
//! - [`filter`] - Query filters and the predicate matcher
//! - [`update`] - Path-addressed update executor
//! - [`index`] - Secondary index multimaps and the query planner
//! - [`store`] - Storage engine abstraction, memory/disk engines, cache
//! - [`metadata`] - Per-collection manifests and the catalog
//! - [`common`] - Value domain, ordering, locks, constants
//! - [`errors`] - Error kinds and the crate result type

use crate::common::LockRegistry;
use std::sync::LazyLock;

pub mod client;
pub mod collection;
pub mod common;
pub mod database;
pub mod errors;
pub mod filter;
pub mod index;
pub mod metadata;
pub mod store;
pub mod update;

pub use client::{Client, ClientBuilder};
pub use collection::{
    Collection, Cursor, DeleteResult, DocId, Document, IdMinter, IndexKeys, InsertManyResult,
    InsertOneResult, ObjectId, RandomIdMinter, UpdateResult,
};
pub use common::{SortOrder, Value};
pub use database::Database;
pub use errors::{ErrorKind, FerriteError, FerriteResult};

/// Process-wide lock registry; lives for the process lifetime.
pub(crate) static LOCKS: LazyLock<LockRegistry> = LazyLock::new(LockRegistry::new);
