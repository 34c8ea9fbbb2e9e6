//! The error type shared by every layer of the engine.
//!
//! The taxonomy is closed: each layer translates lower-layer errors into its
//! own domain variants (a duplicate value in a unique index surfaces from a
//! table insert as [`Error::DuplicateDocument`], an engine `KeyNotFound`
//! during a table read becomes [`Error::DocumentNotFound`]), so callers only
//! ever match on the variants below.

use thiserror::Error;

use crate::val::path::Path;
use crate::val::Type;

/// The error type for every fallible operation in the crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// There is no table with this name in the catalog
	#[error("table not found: {0}")]
	TableNotFound(String),
	/// A table, index or sequence with this name already exists
	#[error("table already exists: {0}")]
	TableAlreadyExists(String),
	/// There is no index with this name in the catalog
	#[error("index not found: {0}")]
	IndexNotFound(String),
	/// An index or table with this name already exists
	#[error("index already exists: {0}")]
	IndexAlreadyExists(String),
	/// The requested document does not exist in its table
	#[error("document not found")]
	DocumentNotFound,
	/// A document with the same primary key or unique value already exists
	#[error("duplicate document")]
	DuplicateDocument,
	/// The value tuple is already present in a unique index
	#[error("duplicate value in unique index {index}")]
	IndexDuplicateValue {
		index: String,
	},
	/// The number of values does not match the index arity
	#[error("wrong number of index values: got {got}, expected {expected}")]
	IndexWrongArity {
		got: usize,
		expected: usize,
	},
	/// An index backing a field constraint may not be dropped directly
	#[error("index {0} is required by a field constraint and cannot be dropped")]
	ConstraintRequiresIndex(String),

	/// A user statement targeted a system-reserved identifier
	#[error("{kind} name must not start with `__`")]
	ReservedName {
		kind: &'static str,
		name: String,
	},
	/// A write was attempted on a read-only table
	#[error("table {0} is read-only")]
	ReadOnlyTable(String),
	/// A table declares more than one primary key
	#[error("multiple primary keys are not allowed")]
	MultiplePrimaryKeys,
	/// Two field constraints target the same path
	#[error("conflicting constraints on path {0}")]
	ConflictingConstraints(Path),
	/// A required field is absent or null
	#[error("field {0} is required and must not be null")]
	NotNullViolation(Path),
	/// The value cannot be converted to the declared type
	#[error("cannot cast {from} as {to}")]
	CastIncompatible {
		from: Type,
		to: Type,
	},
	/// No primary key value could be derived from the document
	#[error("primary key {0} is required")]
	PrimaryKeyRequired(Path),
	/// Every doc-id has been allocated for this table
	#[error("table is full")]
	TableFull,

	/// The engine has no store with this name
	#[error("store not found: {0:?}")]
	StoreNotFound(Vec<u8>),
	/// The engine already has a store with this name
	#[error("store already exists: {0:?}")]
	StoreAlreadyExists(Vec<u8>),
	/// The engine has no entry with this key
	#[error("key not found")]
	KeyNotFound,
	/// An empty key was supplied where one is required
	#[error("key is required")]
	KeyRequired,
	/// A document key could not be decoded
	#[error("malformed document key")]
	MalformedKey,

	/// The transaction was already committed or rolled back
	#[error("transaction already finished")]
	TxFinished,
	/// A write was attempted in a read-only transaction
	#[error("transaction is read-only")]
	TxReadonly,
	/// A transaction is already attached to the database
	#[error("cannot open a transaction within a transaction")]
	TxWithinTx,

	/// A path string could not be parsed
	#[error("invalid path: {0}")]
	InvalidPath(String),
	/// The document codec failed to encode or decode
	#[error("document codec error: {0}")]
	Codec(#[from] bincode::Error),
}
