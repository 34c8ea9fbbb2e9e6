//! Catalog persistence through the system tables.
//!
//! `__genji_tables` and `__genji_indexes` are ordinary read-only tables
//! keyed by entity name, so every catalog mutation goes through the regular
//! table API and therefore through the transactional KV layer. The handles
//! used here are allowed to write through the read-only flag.

use std::sync::Arc;

use crate::catalog::info::{IndexInfo, TableInfo};
use crate::dbs::Transaction;
use crate::err::Error;
use crate::tbl::Table;
use crate::val::Value;

/// The name of the system table persisting table descriptors.
pub const TABLES_TABLE: &str = "__genji_tables";
/// The name of the system table persisting index descriptors.
pub const INDEXES_TABLE: &str = "__genji_indexes";

fn system_table<'t, 'db>(tx: &'t Transaction<'db>, sys: &Arc<TableInfo>) -> Table<'t, 'db> {
	Table::new_system(tx, Arc::clone(sys))
}

fn name_key(table: &Table, name: &str) -> Result<Vec<u8>, Error> {
	table.encode_key_value(&Value::Text(name.to_owned()))
}

pub(super) fn insert_table_row(
	tx: &Transaction,
	sys: &Arc<TableInfo>,
	info: &TableInfo,
) -> Result<(), Error> {
	system_table(tx, sys).insert(&info.to_document())?;
	Ok(())
}

pub(super) fn replace_table_row(
	tx: &Transaction,
	sys: &Arc<TableInfo>,
	info: &TableInfo,
) -> Result<(), Error> {
	let table = system_table(tx, sys);
	let key = name_key(&table, &info.table_name)?;
	table.replace(&key, &info.to_document())?;
	Ok(())
}

pub(super) fn delete_table_row(
	tx: &Transaction,
	sys: &Arc<TableInfo>,
	name: &str,
) -> Result<(), Error> {
	let table = system_table(tx, sys);
	let key = name_key(&table, name)?;
	table.delete(&key)
}

pub(super) fn insert_index_row(
	tx: &Transaction,
	sys: &Arc<TableInfo>,
	info: &IndexInfo,
) -> Result<(), Error> {
	system_table(tx, sys).insert(&info.to_document())?;
	Ok(())
}

pub(super) fn replace_index_row(
	tx: &Transaction,
	sys: &Arc<TableInfo>,
	info: &IndexInfo,
) -> Result<(), Error> {
	let table = system_table(tx, sys);
	let key = name_key(&table, &info.index_name)?;
	table.replace(&key, &info.to_document())?;
	Ok(())
}

pub(super) fn delete_index_row(
	tx: &Transaction,
	sys: &Arc<TableInfo>,
	name: &str,
) -> Result<(), Error> {
	let table = system_table(tx, sys);
	let key = name_key(&table, name)?;
	table.delete(&key)
}

/// Load every persisted table descriptor, in name order.
pub(super) fn load_table_rows(
	tx: &Transaction,
	sys: &Arc<TableInfo>,
) -> Result<Vec<TableInfo>, Error> {
	let table = system_table(tx, sys);
	let mut out = Vec::new();
	table.iterate(|_, doc| {
		out.push(TableInfo::from_document(doc.document()?));
		Ok(())
	})?;
	Ok(out)
}

/// Load every persisted index descriptor, in name order.
pub(super) fn load_index_rows(
	tx: &Transaction,
	sys: &Arc<TableInfo>,
) -> Result<Vec<IndexInfo>, Error> {
	let table = system_table(tx, sys);
	let mut out = Vec::new();
	table.iterate(|_, doc| {
		out.push(IndexInfo::from_document(doc.document()?));
		Ok(())
	})?;
	Ok(out)
}

/// Draw the next store-name sequence number from the tables store.
pub(super) fn next_store_sequence(
	tx: &Transaction,
	sys: &Arc<TableInfo>,
) -> Result<u64, Error> {
	tx.kv().get_store(&sys.store_name)?.next_sequence()
}
