//! The table layer.
//!
//! A table stores encoded documents under raw keys, either the encoded
//! primary key or an auto-generated doc-id, and fans every mutation out to
//! the indexes defined on the table. Constraint validation runs on an owned
//! copy of the incoming document so implicit coercions never touch caller
//! data.

use std::collections::hash_map::Entry;
use std::collections::BTreeSet;
use std::sync::Arc;

use once_cell::unsync::OnceCell;

use crate::catalog::info::{FieldConstraint, IndexInfo, TableInfo};
use crate::dbs::Transaction;
use crate::err::Error;
use crate::idx::Index;
use crate::key;
use crate::kvs::api::{KvIterator, Store};
use crate::val::{codec, Document, Type, Value};

/// A handle on one table for the duration of a transaction.
pub struct Table<'t, 'db> {
	tx: &'t Transaction<'db>,
	info: Arc<TableInfo>,
	system: bool,
}

impl<'t, 'db> Table<'t, 'db> {
	pub(crate) fn new(tx: &'t Transaction<'db>, info: Arc<TableInfo>) -> Table<'t, 'db> {
		Table {
			tx,
			info,
			system: false,
		}
	}

	/// A handle that may write through the read-only flag, for catalog
	/// persistence.
	pub(crate) fn new_system(tx: &'t Transaction<'db>, info: Arc<TableInfo>) -> Table<'t, 'db> {
		Table {
			tx,
			info,
			system: true,
		}
	}

	pub fn info(&self) -> &TableInfo {
		&self.info
	}

	fn store(&self) -> Result<Box<dyn Store + 't>, Error> {
		self.tx.kv().get_store(&self.info.store_name)
	}

	fn check_writable(&self) -> Result<(), Error> {
		if self.info.read_only && !self.system {
			return Err(Error::ReadOnlyTable(self.info.table_name.clone()));
		}
		Ok(())
	}

	/// Validate, store and index a document.
	///
	/// Returns the raw key the document was stored under together with the
	/// document as persisted, with coercions applied and defaults filled in.
	pub fn insert(&self, doc: &Document) -> Result<(Vec<u8>, Document), Error> {
		self.check_writable()?;
		let doc = validate_document(&self.info, doc)?;
		let raw_key = self.derive_key(&doc)?;
		let store = self.store()?;
		if store.get(&raw_key)?.is_some() {
			return Err(Error::DuplicateDocument);
		}
		store.put(&raw_key, &codec::encode_document(&doc)?)?;
		for info in self.tx.catalog().indexes_of(&self.info.table_name) {
			let idx = Index::new(self.tx.kv(), info);
			if let Some(values) = index_values(&doc, idx.info()) {
				idx.set(&values, &raw_key).map_err(translate_index_error)?;
			}
		}
		Ok((raw_key, doc))
	}

	/// Replace the document stored under `key`.
	pub fn replace(&self, raw_key: &[u8], doc: &Document) -> Result<Document, Error> {
		self.check_writable()?;
		let store = self.store()?;
		let old_bytes = store.get(raw_key)?.ok_or(Error::DocumentNotFound)?;
		let old = codec::decode_document(&old_bytes)?;
		let new = validate_document(&self.info, doc)?;
		let indexes = self.tx.catalog().indexes_of(&self.info.table_name);
		for info in &indexes {
			let idx = Index::new(self.tx.kv(), Arc::clone(info));
			if let Some(values) = index_values(&old, idx.info()) {
				idx.delete(&values, raw_key)?;
			}
		}
		store.put(raw_key, &codec::encode_document(&new)?)?;
		for info in &indexes {
			let idx = Index::new(self.tx.kv(), Arc::clone(info));
			if let Some(values) = index_values(&new, idx.info()) {
				idx.set(&values, raw_key).map_err(translate_index_error)?;
			}
		}
		Ok(new)
	}

	/// Delete the document stored under `key`.
	pub fn delete(&self, raw_key: &[u8]) -> Result<(), Error> {
		self.check_writable()?;
		let store = self.store()?;
		let old_bytes = store.get(raw_key)?.ok_or(Error::DocumentNotFound)?;
		let old = codec::decode_document(&old_bytes)?;
		for info in self.tx.catalog().indexes_of(&self.info.table_name) {
			let idx = Index::new(self.tx.kv(), info);
			if let Some(values) = index_values(&old, idx.info()) {
				idx.delete(&values, raw_key)?;
			}
		}
		store.delete(raw_key)
	}

	/// Fetch the document stored under `key`.
	pub fn get(&self, raw_key: &[u8]) -> Result<Document, Error> {
		let store = self.store()?;
		match store.get(raw_key) {
			Ok(Some(bytes)) => codec::decode_document(&bytes),
			Ok(None) | Err(Error::KeyNotFound) => Err(Error::DocumentNotFound),
			Err(e) => Err(e),
		}
	}

	/// Delete every document in the table.
	///
	/// Indexes are left untouched; callers that need them consistent with
	/// the table must reindex afterwards.
	pub fn truncate(&self) -> Result<(), Error> {
		self.check_writable()?;
		self.store()?.truncate()
	}

	/// Call `f` with every document in the table, in key order.
	pub fn iterate(
		&self,
		f: impl FnMut(&[u8], &LazyDocument) -> Result<(), Error>,
	) -> Result<(), Error> {
		self.scan(None, false, f)
	}

	/// Call `f` with every document whose key is at or after the pivot
	/// value, in ascending key order.
	pub fn ascend_ge(
		&self,
		pivot: Option<&Value>,
		f: impl FnMut(&[u8], &LazyDocument) -> Result<(), Error>,
	) -> Result<(), Error> {
		self.scan(pivot, false, f)
	}

	/// Call `f` with every document whose key is at or before the pivot
	/// value, in descending key order.
	pub fn descend_le(
		&self,
		pivot: Option<&Value>,
		f: impl FnMut(&[u8], &LazyDocument) -> Result<(), Error>,
	) -> Result<(), Error> {
		self.scan(pivot, true, f)
	}

	fn scan(
		&self,
		pivot: Option<&Value>,
		reverse: bool,
		mut f: impl FnMut(&[u8], &LazyDocument) -> Result<(), Error>,
	) -> Result<(), Error> {
		let seek_key = match pivot {
			Some(v) => self.encode_key_value(v)?,
			None => Vec::new(),
		};
		let store = self.store()?;
		let mut it = store.iterator(reverse)?;
		it.seek(&seek_key);
		while it.valid() {
			let doc = LazyDocument::new(&*it);
			f(it.key(), &doc)?;
			drop(doc);
			it.next();
		}
		Ok(())
	}

	/// Encode a value the way this table's raw keys are encoded.
	pub fn encode_key_value(&self, v: &Value) -> Result<Vec<u8>, Error> {
		match self.info.primary_key() {
			Some(pk) => {
				let mut buf = Vec::new();
				key::encode_value(&mut buf, v, pk.typ)?;
				Ok(buf)
			}
			None => match v {
				Value::Integer(i) => Ok(key::docid_key(*i)),
				v => Err(Error::CastIncompatible {
					from: v.typ(),
					to: Type::Integer,
				}),
			},
		}
	}

	fn derive_key(&self, doc: &Document) -> Result<Vec<u8>, Error> {
		match self.info.primary_key() {
			Some(pk) => {
				let v = doc
					.get_path(&pk.path)
					.ok_or_else(|| Error::PrimaryKeyRequired(pk.path.clone()))?;
				let mut buf = Vec::new();
				key::encode_value(&mut buf, v, pk.typ)?;
				Ok(buf)
			}
			None => Ok(key::docid_key(self.next_docid()?)),
		}
	}

	/// Derive the next doc-id for this table.
	///
	/// The first derivation in a database's lifetime seeks the largest
	/// existing key in reverse and caches it; the cache entry is then
	/// incremented under the database doc-id mutex, which is held across the
	/// whole derivation to serialize generators.
	fn next_docid(&self) -> Result<i64, Error> {
		let mut cache = self.tx.db().docid_cache().lock();
		let entry = match cache.entry(self.info.table_name.clone()) {
			Entry::Occupied(e) => e.into_mut(),
			Entry::Vacant(e) => {
				let store = self.store()?;
				let mut it = store.iterator(true)?;
				it.seek(&[]);
				let max = if it.valid() {
					key::decode_docid(it.key())?
				} else {
					0
				};
				e.insert(max)
			}
		};
		if *entry == i64::MAX {
			return self.smallest_unused_docid();
		}
		*entry += 1;
		Ok(*entry)
	}

	/// Fallback once the sequence is exhausted: the smallest positive id
	/// not currently in use.
	fn smallest_unused_docid(&self) -> Result<i64, Error> {
		let store = self.store()?;
		let mut used = BTreeSet::new();
		let mut it = store.iterator(false)?;
		it.seek(&[]);
		while it.valid() {
			used.insert(key::decode_docid(it.key())?);
			it.next();
		}
		let mut candidate: i64 = 1;
		for id in &used {
			if *id > candidate {
				break;
			}
			if *id == candidate {
				candidate = candidate.checked_add(1).ok_or(Error::TableFull)?;
			}
		}
		if used.contains(&candidate) {
			return Err(Error::TableFull);
		}
		Ok(candidate)
	}
}

fn translate_index_error(e: Error) -> Error {
	match e {
		Error::IndexDuplicateValue {
			..
		} => Error::DuplicateDocument,
		e => e,
	}
}

/// The value tuple a document contributes to an index, if any.
///
/// A missing field at any path skips the document, as do document-shaped
/// values and nulls on typed positions.
pub(crate) fn index_values(doc: &Document, info: &IndexInfo) -> Option<Vec<Value>> {
	let mut out = Vec::with_capacity(info.paths.len());
	for (path, typ) in info.paths.iter().zip(info.types.iter()) {
		let v = doc.get_path(path)?;
		if v.is_container() {
			return None;
		}
		if *typ != Type::Any && v.is_null() {
			return None;
		}
		out.push(v.clone());
	}
	Some(out)
}

/// Run constraint validation over an owned copy of `doc`.
///
/// The primary key is validated first, then the remaining constraints in
/// declaration order. Missing or null values fall back to the declared
/// default, or fail when the constraint requires a value; present values of
/// the wrong type are cast.
pub(crate) fn validate_document(info: &TableInfo, doc: &Document) -> Result<Document, Error> {
	let mut out = doc.clone();
	let pk = info.field_constraints.iter().filter(|fc| fc.is_primary_key);
	let rest = info.field_constraints.iter().filter(|fc| !fc.is_primary_key);
	for fc in pk.chain(rest) {
		validate_constraint(&mut out, fc)?;
	}
	Ok(out)
}

fn validate_constraint(doc: &mut Document, fc: &FieldConstraint) -> Result<(), Error> {
	match doc.get_path(&fc.path) {
		Some(v) if !v.is_null() => {
			if fc.typ != Type::Any && v.typ() != fc.typ {
				let cast = v.cast_as(fc.typ)?;
				doc.set_path(&fc.path, cast)?;
			}
			Ok(())
		}
		_ => {
			if let Some(default) = &fc.default_value {
				let value = default.cast_as(fc.typ)?;
				if doc.set_path(&fc.path, value).is_ok() {
					return Ok(());
				}
			}
			if fc.is_primary_key {
				Err(Error::PrimaryKeyRequired(fc.path.clone()))
			} else if fc.is_not_null {
				Err(Error::NotNullViolation(fc.path.clone()))
			} else {
				Ok(())
			}
		}
	}
}

/// A document yielded by iteration, decoded on first access.
pub struct LazyDocument<'a> {
	item: &'a dyn KvIterator,
	decoded: OnceCell<Document>,
}

impl<'a> LazyDocument<'a> {
	fn new(item: &'a dyn KvIterator) -> LazyDocument<'a> {
		LazyDocument {
			item,
			decoded: OnceCell::new(),
		}
	}

	/// The decoded document. The first call copies and decodes the stored
	/// value; later calls are free.
	pub fn document(&self) -> Result<&Document, Error> {
		self.decoded.get_or_try_init(|| {
			let mut buf = Vec::new();
			self.item.copy_value(&mut buf)?;
			codec::decode_document(&buf)
		})
	}

	/// An owned copy of the decoded document.
	pub fn to_document(&self) -> Result<Document, Error> {
		self.document().cloned()
	}
}
