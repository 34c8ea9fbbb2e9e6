//! The catalog: the authoritative in-memory view of tables and indexes.
//!
//! The cache is shared by every transaction and guarded by its own
//! reader/writer lock, orthogonal to the transaction lock. Mutations apply
//! to the cache eagerly and register a compensating closure on the current
//! transaction; on rollback the closures run in LIFO order under the cache's
//! exclusive lock, restoring the exact pre-transaction state. Persistence
//! goes through the two read-only system tables, so it is undone by the KV
//! rollback itself.

pub mod info;
mod store;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::catalog::info::{FieldConstraint, IndexInfo, TableInfo};
use crate::dbs::Transaction;
use crate::err::Error;
use crate::idx::Index;
use crate::key;
use crate::tbl::{self, Table};
use crate::val::path::{Path, PathPart};
use crate::val::Type;

pub use self::store::{INDEXES_TABLE, TABLES_TABLE};

/// Identifiers beginning with this prefix are system-reserved.
pub const RESERVED_PREFIX: &str = "__";

/// A compensating closure restoring the cache on rollback.
pub(crate) type RollbackHook = Box<dyn FnOnce(&mut CatalogCache) + Send>;

#[derive(Default)]
pub(crate) struct CatalogCache {
	tables: HashMap<String, Arc<TableInfo>>,
	indexes: HashMap<String, Arc<IndexInfo>>,
	table_indexes: HashMap<String, Vec<Arc<IndexInfo>>>,
}

/// The table and index catalog of one database.
pub struct Catalog {
	cache: RwLock<CatalogCache>,
	tables_info: Arc<TableInfo>,
	indexes_info: Arc<TableInfo>,
}

impl Catalog {
	pub(crate) fn new() -> Catalog {
		Catalog {
			cache: RwLock::new(CatalogCache::default()),
			tables_info: Arc::new(system_table_info(TABLES_TABLE, "table_name")),
			indexes_info: Arc::new(system_table_info(INDEXES_TABLE, "index_name")),
		}
	}

	/// Create the system stores if needed and load the persisted catalog.
	pub(crate) fn bootstrap(&self, tx: &Transaction) -> Result<(), Error> {
		for sys in [&self.tables_info, &self.indexes_info] {
			match tx.kv().create_store(&sys.store_name) {
				Err(Error::StoreAlreadyExists(_)) => {}
				res => res?,
			}
		}
		{
			let mut cache = self.cache.write();
			for sys in [&self.tables_info, &self.indexes_info] {
				cache.tables.insert(sys.table_name.clone(), Arc::clone(sys));
			}
		}
		let tables = store::load_table_rows(tx, &self.tables_info)?;
		let indexes = store::load_index_rows(tx, &self.indexes_info)?;
		let mut cache = self.cache.write();
		for info in tables {
			cache.tables.insert(info.table_name.clone(), Arc::new(info));
		}
		for info in indexes {
			let arc = Arc::new(info);
			cache.indexes.insert(arc.index_name.clone(), Arc::clone(&arc));
			cache.table_indexes.entry(arc.table_name.clone()).or_default().push(arc);
		}
		Ok(())
	}

	/// Run rollback hooks in LIFO order under the cache's exclusive lock.
	pub(crate) fn run_rollback_hooks(&self, hooks: Vec<RollbackHook>) {
		if hooks.is_empty() {
			return;
		}
		let mut cache = self.cache.write();
		for hook in hooks.into_iter().rev() {
			hook(&mut cache);
		}
	}

	pub fn get_table(&self, name: &str) -> Result<Arc<TableInfo>, Error> {
		self.cache
			.read()
			.tables
			.get(name)
			.cloned()
			.ok_or_else(|| Error::TableNotFound(name.to_owned()))
	}

	pub fn get_index(&self, name: &str) -> Result<Arc<IndexInfo>, Error> {
		self.cache
			.read()
			.indexes
			.get(name)
			.cloned()
			.ok_or_else(|| Error::IndexNotFound(name.to_owned()))
	}

	/// The indexes defined on a table, in creation order.
	pub(crate) fn indexes_of(&self, table: &str) -> Vec<Arc<IndexInfo>> {
		self.cache.read().table_indexes.get(table).cloned().unwrap_or_default()
	}

	/// The indexes of one table in creation order, or every index sorted by
	/// name.
	pub fn list_indexes(&self, table: Option<&str>) -> Vec<Arc<IndexInfo>> {
		match table {
			Some(table) => self.indexes_of(table),
			None => {
				let mut all: Vec<Arc<IndexInfo>> =
					self.cache.read().indexes.values().cloned().collect();
				all.sort_by(|a, b| a.index_name.cmp(&b.index_name));
				all
			}
		}
	}

	/// The names of every user table, sorted.
	pub fn list_tables(&self) -> Vec<String> {
		let mut names: Vec<String> = self
			.cache
			.read()
			.tables
			.keys()
			.filter(|n| !n.starts_with(RESERVED_PREFIX))
			.cloned()
			.collect();
		names.sort();
		names
	}

	/// Create a table and persist its descriptor.
	pub fn create_table(
		&self,
		tx: &Transaction,
		mut info: TableInfo,
	) -> Result<Arc<TableInfo>, Error> {
		ensure_writable(tx)?;
		let name = info.table_name.clone();
		if name.starts_with(RESERVED_PREFIX) {
			return Err(Error::ReservedName {
				kind: "table",
				name,
			});
		}
		{
			let cache = self.cache.read();
			if cache.tables.contains_key(&name) || cache.indexes.contains_key(&name) {
				return Err(Error::TableAlreadyExists(name));
			}
		}
		info.field_constraints = infer_constraints(info.field_constraints)?;
		let seq = store::next_store_sequence(tx, &self.tables_info)?;
		info.store_name = key::table_store_name(seq);
		tx.kv().create_store(&info.store_name)?;
		let arc = Arc::new(info);
		store::insert_table_row(tx, &self.tables_info, &arc)?;
		self.cache.write().tables.insert(name.clone(), Arc::clone(&arc));
		tx.push_rollback_hook(Box::new(move |cache| {
			cache.tables.remove(&name);
			cache.table_indexes.remove(&name);
		}));
		debug!(table = %arc.table_name, "created table");
		Ok(arc)
	}

	/// Drop a table, its indexes and every backing store.
	pub fn drop_table(&self, tx: &Transaction, name: &str) -> Result<(), Error> {
		ensure_writable(tx)?;
		let info = self.get_table(name)?;
		if info.read_only {
			return Err(Error::ReadOnlyTable(name.to_owned()));
		}
		let indexes = self.indexes_of(name);
		for idx in &indexes {
			store::delete_index_row(tx, &self.indexes_info, &idx.index_name)?;
			match tx.kv().drop_store(&idx.store_name) {
				Err(Error::StoreNotFound(_)) => {}
				res => res?,
			}
		}
		store::delete_table_row(tx, &self.tables_info, name)?;
		tx.kv().drop_store(&info.store_name)?;
		tx.db().forget_docid(name);
		{
			let mut cache = self.cache.write();
			cache.tables.remove(name);
			for idx in &indexes {
				cache.indexes.remove(&idx.index_name);
			}
			cache.table_indexes.remove(name);
		}
		let restore_name = name.to_owned();
		tx.push_rollback_hook(Box::new(move |cache| {
			for idx in &indexes {
				cache.indexes.insert(idx.index_name.clone(), Arc::clone(idx));
			}
			if !indexes.is_empty() {
				cache.table_indexes.insert(restore_name.clone(), indexes.clone());
			}
			cache.tables.insert(restore_name, info);
		}));
		debug!(table = name, "dropped table");
		Ok(())
	}

	/// Rename a table, updating every index defined on it.
	pub fn rename_table(&self, tx: &Transaction, old: &str, new: &str) -> Result<(), Error> {
		ensure_writable(tx)?;
		if new.starts_with(RESERVED_PREFIX) {
			return Err(Error::ReservedName {
				kind: "table",
				name: new.to_owned(),
			});
		}
		let info = self.get_table(old)?;
		if info.read_only {
			return Err(Error::ReadOnlyTable(old.to_owned()));
		}
		{
			let cache = self.cache.read();
			if cache.tables.contains_key(new) || cache.indexes.contains_key(new) {
				return Err(Error::TableAlreadyExists(new.to_owned()));
			}
		}
		let mut renamed = (*info).clone();
		renamed.table_name = new.to_owned();
		let renamed = Arc::new(renamed);
		let old_indexes = self.indexes_of(old);
		let new_indexes: Vec<Arc<IndexInfo>> = old_indexes
			.iter()
			.map(|idx| {
				let mut renamed = (**idx).clone();
				renamed.table_name = new.to_owned();
				Arc::new(renamed)
			})
			.collect();
		store::delete_table_row(tx, &self.tables_info, old)?;
		store::insert_table_row(tx, &self.tables_info, &renamed)?;
		for idx in &new_indexes {
			store::replace_index_row(tx, &self.indexes_info, idx)?;
		}
		tx.db().forget_docid(old);
		{
			let mut cache = self.cache.write();
			cache.tables.remove(old);
			cache.tables.insert(new.to_owned(), Arc::clone(&renamed));
			for idx in &new_indexes {
				cache.indexes.insert(idx.index_name.clone(), Arc::clone(idx));
			}
			cache.table_indexes.remove(old);
			if !new_indexes.is_empty() {
				cache.table_indexes.insert(new.to_owned(), new_indexes.clone());
			}
		}
		let restore_old = old.to_owned();
		let restore_new = new.to_owned();
		tx.push_rollback_hook(Box::new(move |cache| {
			cache.tables.remove(&restore_new);
			cache.tables.insert(restore_old.clone(), info);
			for idx in &old_indexes {
				cache.indexes.insert(idx.index_name.clone(), Arc::clone(idx));
			}
			cache.table_indexes.remove(&restore_new);
			if !old_indexes.is_empty() {
				cache.table_indexes.insert(restore_old, old_indexes.clone());
			}
		}));
		debug!(from = old, to = new, "renamed table");
		Ok(())
	}

	/// Append a field constraint to an existing table.
	pub fn add_field_constraint(
		&self,
		tx: &Transaction,
		table: &str,
		fc: FieldConstraint,
	) -> Result<(), Error> {
		ensure_writable(tx)?;
		let info = self.get_table(table)?;
		if info.read_only {
			return Err(Error::ReadOnlyTable(table.to_owned()));
		}
		let mut updated = (*info).clone();
		add_constraint(&mut updated.field_constraints, fc)?;
		let updated = Arc::new(updated);
		store::replace_table_row(tx, &self.tables_info, &updated)?;
		self.cache.write().tables.insert(table.to_owned(), Arc::clone(&updated));
		let restore_name = table.to_owned();
		tx.push_rollback_hook(Box::new(move |cache| {
			cache.tables.insert(restore_name, info);
		}));
		debug!(table = table, "added field constraint");
		Ok(())
	}

	/// Create an index, persist its descriptor and build it from the
	/// table's existing documents.
	pub fn create_index(
		&self,
		tx: &Transaction,
		mut info: IndexInfo,
	) -> Result<Arc<IndexInfo>, Error> {
		ensure_writable(tx)?;
		let name = info.index_name.clone();
		if name.starts_with(RESERVED_PREFIX) {
			return Err(Error::ReservedName {
				kind: "index",
				name,
			});
		}
		{
			let cache = self.cache.read();
			if cache.indexes.contains_key(&name) || cache.tables.contains_key(&name) {
				return Err(Error::IndexAlreadyExists(name));
			}
		}
		let table = self.get_table(&info.table_name)?;
		// Index positions inherit the type of any matching field constraint
		info.types = info
			.paths
			.iter()
			.map(|p| table.constraint_at(p).map(|fc| fc.typ).unwrap_or(Type::Any))
			.collect();
		info.store_name = key::index_store_name(&name);
		tx.kv().create_store(&info.store_name)?;
		let arc = Arc::new(info);
		store::insert_index_row(tx, &self.indexes_info, &arc)?;
		let prior = self.cache.read().table_indexes.get(&arc.table_name).cloned();
		{
			let mut cache = self.cache.write();
			cache.indexes.insert(name.clone(), Arc::clone(&arc));
			cache.table_indexes.entry(arc.table_name.clone()).or_default().push(Arc::clone(&arc));
		}
		let table_name = arc.table_name.clone();
		tx.push_rollback_hook(Box::new(move |cache| {
			cache.indexes.remove(&name);
			match prior {
				Some(list) => {
					cache.table_indexes.insert(table_name, list);
				}
				None => {
					cache.table_indexes.remove(&table_name);
				}
			}
		}));
		self.build_index(tx, &arc, &table)?;
		debug!(index = %arc.index_name, table = %arc.table_name, "created index");
		Ok(arc)
	}

	/// Drop an index, unless it backs a field constraint.
	pub fn drop_index(&self, tx: &Transaction, name: &str) -> Result<(), Error> {
		ensure_writable(tx)?;
		let info = self.get_index(name)?;
		if info.constraint_path.is_some() {
			return Err(Error::ConstraintRequiresIndex(name.to_owned()));
		}
		store::delete_index_row(tx, &self.indexes_info, &info.index_name)?;
		match tx.kv().drop_store(&info.store_name) {
			Err(Error::StoreNotFound(_)) => {}
			res => res?,
		}
		let prior = self.cache.read().table_indexes.get(&info.table_name).cloned();
		{
			let mut cache = self.cache.write();
			cache.indexes.remove(&info.index_name);
			let emptied = match cache.table_indexes.get_mut(&info.table_name) {
				Some(list) => {
					list.retain(|i| i.index_name != info.index_name);
					list.is_empty()
				}
				None => false,
			};
			if emptied {
				cache.table_indexes.remove(&info.table_name);
			}
		}
		tx.push_rollback_hook(Box::new(move |cache| {
			cache.indexes.insert(info.index_name.clone(), Arc::clone(&info));
			if let Some(list) = prior {
				cache.table_indexes.insert(info.table_name.clone(), list);
			}
		}));
		debug!(index = name, "dropped index");
		Ok(())
	}

	/// Truncate and rebuild one index.
	pub fn reindex(&self, tx: &Transaction, name: &str) -> Result<(), Error> {
		ensure_writable(tx)?;
		let info = self.get_index(name)?;
		let table = self.get_table(&info.table_name)?;
		let idx = Index::new(tx.kv(), Arc::clone(&info));
		idx.truncate()?;
		tx.kv().create_store(&info.store_name)?;
		self.build_index(tx, &info, &table)?;
		debug!(index = name, "reindexed");
		Ok(())
	}

	/// Truncate and rebuild every index, in name order.
	pub fn reindex_all(&self, tx: &Transaction) -> Result<(), Error> {
		let mut names: Vec<String> = self.cache.read().indexes.keys().cloned().collect();
		names.sort();
		for name in names {
			self.reindex(tx, &name)?;
		}
		Ok(())
	}

	fn build_index(
		&self,
		tx: &Transaction,
		info: &Arc<IndexInfo>,
		table: &Arc<TableInfo>,
	) -> Result<(), Error> {
		let table = Table::new(tx, Arc::clone(table));
		let idx = Index::new(tx.kv(), Arc::clone(info));
		table.iterate(|raw_key, doc| {
			// A document missing any indexed path is skipped
			match tbl::index_values(doc.document()?, idx.info()) {
				Some(values) => idx.set(&values, raw_key),
				None => Ok(()),
			}
		})
	}
}

fn ensure_writable(tx: &Transaction) -> Result<(), Error> {
	if !tx.writable() {
		return Err(Error::TxReadonly);
	}
	Ok(())
}

fn system_table_info(name: &str, key_field: &str) -> TableInfo {
	TableInfo {
		table_name: name.to_owned(),
		store_name: name.as_bytes().to_vec(),
		read_only: true,
		field_constraints: vec![FieldConstraint {
			path: Path::field(key_field),
			typ: Type::Text,
			is_primary_key: true,
			is_not_null: true,
			..FieldConstraint::default()
		}],
	}
}

/// Expand a user constraint set with the container constraints its deep
/// paths imply.
fn infer_constraints(user: Vec<FieldConstraint>) -> Result<Vec<FieldConstraint>, Error> {
	let mut out = Vec::new();
	for fc in user {
		add_constraint(&mut out, fc)?;
	}
	Ok(out)
}

/// Add one constraint, materializing its implied parents first.
fn add_constraint(out: &mut Vec<FieldConstraint>, fc: FieldConstraint) -> Result<(), Error> {
	for depth in 1..fc.path.len() {
		let parent = fc.path.prefix(depth);
		// The parent's container type follows from the next fragment
		let container = match fc.path.parts()[depth] {
			PathPart::Field(_) => Type::Document,
			PathPart::Index(_) => Type::Array,
		};
		add_inferred(out, parent, container, fc.path.clone())?;
	}
	add_declared(out, fc)
}

fn add_inferred(
	out: &mut Vec<FieldConstraint>,
	path: Path,
	typ: Type,
	source: Path,
) -> Result<(), Error> {
	if let Some(existing) = out.iter_mut().find(|c| c.path == path) {
		if existing.typ != Type::Any && existing.typ != typ {
			return Err(Error::ConflictingConstraints(path));
		}
		if existing.is_inferred && !existing.inferred_by.contains(&source) {
			existing.inferred_by.push(source);
		}
		return Ok(());
	}
	out.push(FieldConstraint {
		path,
		typ,
		is_inferred: true,
		inferred_by: vec![source],
		..FieldConstraint::default()
	});
	Ok(())
}

fn add_declared(out: &mut Vec<FieldConstraint>, fc: FieldConstraint) -> Result<(), Error> {
	if fc.is_primary_key && out.iter().any(|c| c.is_primary_key) {
		return Err(Error::MultiplePrimaryKeys);
	}
	// A default must be expressible in the declared type
	if let Some(default) = &fc.default_value {
		if fc.typ != Type::Any {
			default.cast_as(fc.typ)?;
		}
	}
	match out.iter().position(|c| c.path == fc.path) {
		Some(pos) if out[pos].is_inferred => {
			// A declared constraint takes over a compatible inferred one
			if out[pos].typ != Type::Any && fc.typ != Type::Any && fc.typ != out[pos].typ {
				return Err(Error::ConflictingConstraints(fc.path));
			}
			let typ = if fc.typ == Type::Any {
				out[pos].typ
			} else {
				fc.typ
			};
			out[pos] = FieldConstraint {
				typ,
				..fc
			};
			Ok(())
		}
		Some(_) => Err(Error::ConflictingConstraints(fc.path)),
		None => {
			out.push(fc);
			Ok(())
		}
	}
}
