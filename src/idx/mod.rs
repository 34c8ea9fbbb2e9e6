//! The index layer.
//!
//! An index is an ordered mapping from encoded value tuples to raw document
//! keys, backed by one KV store. Unique indexes reject duplicate tuples;
//! non-unique indexes disambiguate colliding tuples with a per-store
//! sequence suffix that iteration strips before the caller sees the entry.

use std::sync::Arc;

use tracing::trace;

use crate::catalog::info::IndexInfo;
use crate::err::Error;
use crate::key;
use crate::kvs::api::{Store, Tx};
use crate::val::{Type, Value};

/// One position of an iteration pivot.
///
/// A pivot entry either carries a value, or only a type, or nothing. Values
/// must be contiguous from the head of the pivot; a valueless-but-typed
/// first entry restricts iteration to entries whose first component has that
/// type.
#[derive(Clone, Debug)]
pub struct PivotEntry {
	typ: Type,
	value: Option<Value>,
}

impl PivotEntry {
	/// A pivot position holding a concrete value.
	pub fn value(v: Value) -> PivotEntry {
		PivotEntry {
			typ: v.typ(),
			value: Some(v),
		}
	}

	/// A valueless pivot position restricted to a type.
	pub fn typed(typ: Type) -> PivotEntry {
		PivotEntry {
			typ,
			value: None,
		}
	}

	/// An empty pivot position.
	pub fn empty() -> PivotEntry {
		PivotEntry {
			typ: Type::Any,
			value: None,
		}
	}
}

impl From<Value> for PivotEntry {
	fn from(v: Value) -> PivotEntry {
		PivotEntry::value(v)
	}
}

/// A handle on one index for the duration of a transaction.
pub struct Index<'a> {
	tx: &'a dyn Tx,
	info: Arc<IndexInfo>,
}

impl<'a> Index<'a> {
	pub(crate) fn new(tx: &'a dyn Tx, info: Arc<IndexInfo>) -> Index<'a> {
		Index {
			tx,
			info,
		}
	}

	pub fn info(&self) -> &IndexInfo {
		&self.info
	}

	fn store(&self) -> Result<Box<dyn Store + 'a>, Error> {
		self.tx.get_store(&self.info.store_name)
	}

	/// Open the backing store, recreating it if it was dropped.
	fn store_or_create(&self) -> Result<Box<dyn Store + 'a>, Error> {
		match self.tx.get_store(&self.info.store_name) {
			Err(Error::StoreNotFound(_)) => {
				self.tx.create_store(&self.info.store_name)?;
				self.tx.get_store(&self.info.store_name)
			}
			res => res,
		}
	}

	/// Associate a value tuple with a document key.
	///
	/// The tuple arity must match the index arity and every typed position
	/// must hold a matching value. On a unique index an existing tuple fails
	/// with [`Error::IndexDuplicateValue`].
	pub fn set(&self, values: &[Value], doc_key: &[u8]) -> Result<(), Error> {
		if doc_key.is_empty() {
			return Err(Error::KeyRequired);
		}
		if values.len() != self.info.arity() {
			return Err(Error::IndexWrongArity {
				got: values.len(),
				expected: self.info.arity(),
			});
		}
		let mut enc = key::encode_tuple(values, &self.info.types)?;
		let store = self.store_or_create()?;
		if store.get(&enc)?.is_some() {
			if self.info.unique {
				return Err(Error::IndexDuplicateValue {
					index: self.info.index_name.clone(),
				});
			}
			// Make the entry unique with a monotonic suffix
			let seq = store.next_sequence()?;
			key::append_disambiguator(&mut enc, seq);
		}
		store.put(&enc, doc_key)
	}

	/// Remove the entry associating a value tuple with a document key.
	pub fn delete(&self, values: &[Value], doc_key: &[u8]) -> Result<(), Error> {
		if values.len() != self.info.arity() {
			return Err(Error::IndexWrongArity {
				got: values.len(),
				expected: self.info.arity(),
			});
		}
		let enc = key::encode_tuple(values, &self.info.types)?;
		let store = self.store()?;
		let mut it = store.iterator(false)?;
		it.seek(&enc);
		let mut buf = Vec::new();
		while it.valid() {
			if key::strip_disambiguator(it.key()) != enc.as_slice() {
				break;
			}
			it.copy_value(&mut buf)?;
			if buf == doc_key {
				let entry_key = it.key().to_vec();
				return store.delete(&entry_key);
			}
			it.next();
		}
		Err(Error::KeyNotFound)
	}

	/// Call `f` for every entry at or after the pivot, in ascending order.
	pub fn ascend_ge(
		&self,
		pivot: &[PivotEntry],
		f: impl FnMut(&[u8], &[u8]) -> Result<(), Error>,
	) -> Result<(), Error> {
		self.iterate(pivot, false, f)
	}

	/// Call `f` for every entry at or before the pivot, in descending order.
	pub fn descend_le(
		&self,
		pivot: &[PivotEntry],
		f: impl FnMut(&[u8], &[u8]) -> Result<(), Error>,
	) -> Result<(), Error> {
		self.iterate(pivot, true, f)
	}

	fn iterate(
		&self,
		pivot: &[PivotEntry],
		reverse: bool,
		mut f: impl FnMut(&[u8], &[u8]) -> Result<(), Error>,
	) -> Result<(), Error> {
		self.validate_pivot(pivot);

		// A valueless-but-typed first position restricts iteration by type.
		let mut tag_restriction = None;
		if let Some(first) = pivot.first() {
			if first.value.is_none() && first.typ != Type::Any {
				match self.info.types.first().copied().unwrap_or(Type::Any) {
					// Typed index: an incompatible pivot type matches nothing.
					t if t != Type::Any => {
						if !t.is_compatible_with(first.typ) {
							return Ok(());
						}
					}
					_ => tag_restriction = Some(first.typ.order_tag()),
				}
			}
		}

		let values: Vec<Value> =
			pivot.iter().map_while(|e| e.value.clone()).collect();
		let seek_prefix = if !values.is_empty() {
			match key::encode_tuple(&values, &self.info.types) {
				Ok(enc) => Some(enc),
				// A pivot value that cannot take the indexed type matches
				// nothing.
				Err(Error::CastIncompatible { .. }) => return Ok(()),
				Err(e) => return Err(e),
			}
		} else {
			tag_restriction.map(|tag| vec![tag])
		};

		let store = match self.store() {
			Err(Error::StoreNotFound(_)) => return Ok(()),
			res => res?,
		};
		let mut it = store.iterator(reverse)?;
		if reverse {
			// Position after every entry sharing the pivot prefix, then
			// step back over anything at or past that bound.
			match seek_prefix.as_deref().and_then(prefix_successor) {
				Some(upper) => {
					it.seek(&upper);
					while it.valid() && it.key() >= upper.as_slice() {
						it.next();
					}
				}
				None => it.seek(&[]),
			}
		} else {
			it.seek(seek_prefix.as_deref().unwrap_or(&[]));
		}

		let mut buf = Vec::new();
		while it.valid() {
			let entry = it.key();
			if let Some(tag) = tag_restriction {
				if entry.first() != Some(&tag) {
					break;
				}
			}
			it.copy_value(&mut buf)?;
			f(key::strip_disambiguator(entry), &buf)?;
			it.next();
		}
		Ok(())
	}

	fn validate_pivot(&self, pivot: &[PivotEntry]) {
		assert!(
			pivot.len() <= self.info.arity(),
			"pivot is longer than the arity of index {}",
			self.info.index_name
		);
		let mut seen_empty = false;
		for entry in pivot {
			if entry.value.is_some() {
				assert!(
					!seen_empty,
					"pivot values must be contiguous from the head in index {}",
					self.info.index_name
				);
			} else {
				seen_empty = true;
			}
		}
	}

	/// Drop the backing store, tolerating an already missing one.
	pub fn truncate(&self) -> Result<(), Error> {
		trace!(index = %self.info.index_name, "truncating index");
		match self.tx.drop_store(&self.info.store_name) {
			Err(Error::StoreNotFound(_)) => Ok(()),
			res => res,
		}
	}
}

/// The smallest byte string greater than every string with this prefix.
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
	let mut out = prefix.to_vec();
	while let Some(last) = out.last() {
		if *last < 0xFF {
			*out.last_mut().expect("non-empty") += 1;
			return Some(out);
		}
		out.pop();
	}
	None
}
