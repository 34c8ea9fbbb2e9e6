//! An embedded, schema-flexible document database core.
//!
//! The crate stores documents in tables, maintains secondary indexes over
//! them, and keeps a transactional catalog of both, all on top of a
//! pluggable ordered key-value engine:
//! - [`kvs`] defines the engine contract and ships an in-memory engine
//! - [`key`] encodes typed values and tuples into order-preserving keys
//! - [`idx`] maintains unique and non-unique indexes with pivoted iteration
//! - [`tbl`] stores documents, validates constraints and fans out to indexes
//! - [`catalog`] caches and persists table and index descriptors
//! - [`dbs`] ties everything together with writer-exclusive transactions
//!
//! ```
//! use genji_core::catalog::info::FieldConstraint;
//! use genji_core::kvs::mem::MemEngine;
//! use genji_core::val::Type;
//! use genji_core::{doc, Database};
//!
//! # fn main() -> Result<(), genji_core::Error> {
//! let db = Database::new(Box::new(MemEngine::new()))?;
//!
//! let mut tx = db.begin(true)?;
//! tx.create_table(
//! 	"users",
//! 	vec![FieldConstraint {
//! 		path: "id".parse()?,
//! 		typ: Type::Integer,
//! 		is_primary_key: true,
//! 		..FieldConstraint::default()
//! 	}],
//! )?;
//! {
//! 	let users = tx.get_table("users")?;
//! 	users.insert(&doc! { "id" => 1i64, "name" => "arthur" })?;
//! }
//! tx.commit()?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod dbs;
pub mod err;
pub mod idx;
pub mod key;
pub mod kvs;
pub mod tbl;
pub mod val;

pub use crate::dbs::{Database, Transaction};
pub use crate::err::Error;
pub use crate::val::{Document, Type, Value};
