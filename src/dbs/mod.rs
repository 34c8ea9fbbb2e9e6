//! The database: engine handle, catalog, and transaction lifecycle.
//!
//! Any number of read-only transactions run in parallel under a shared
//! database lock; one writable transaction excludes everything else. A
//! transaction may additionally be *attached*, occupying a single slot that
//! makes any further `begin` fail until it finishes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::catalog::info::{FieldConstraint, IndexInfo, TableInfo};
use crate::catalog::{Catalog, RollbackHook};
use crate::err::Error;
use crate::idx::Index;
use crate::kvs::api::{Engine, Tx};
use crate::tbl::Table;
use crate::val::path::Path;

/// A database over one key-value engine.
pub struct Database {
	engine: Box<dyn Engine>,
	catalog: Catalog,
	// Cached largest doc-id per table name
	docid_cache: Mutex<HashMap<String, i64>>,
	// Whether a transaction currently occupies the attached slot
	attached: Mutex<bool>,
	// Writer-exclusive, reader-shared transaction lock
	txlock: RwLock<()>,
}

impl Database {
	/// Open a database over an engine and load the catalog.
	pub fn new(engine: Box<dyn Engine>) -> Result<Database, Error> {
		let db = Database {
			engine,
			catalog: Catalog::new(),
			docid_cache: Mutex::new(HashMap::new()),
			attached: Mutex::new(false),
			txlock: RwLock::new(()),
		};
		{
			let mut tx = db.begin(true)?;
			db.catalog.bootstrap(&tx)?;
			tx.commit()?;
		}
		Ok(db)
	}

	pub fn catalog(&self) -> &Catalog {
		&self.catalog
	}

	/// Begin a transaction.
	///
	/// A writable transaction blocks until it holds the database write lock
	/// exclusively; read-only transactions share it.
	pub fn begin(&self, writable: bool) -> Result<Transaction<'_>, Error> {
		self.begin_inner(writable, false)
	}

	/// Begin a transaction that occupies the database's attached slot.
	///
	/// While it is held, any further `begin` fails with
	/// [`Error::TxWithinTx`]. The slot is released on commit or rollback.
	pub fn begin_attached(&self, writable: bool) -> Result<Transaction<'_>, Error> {
		self.begin_inner(writable, true)
	}

	fn begin_inner(&self, writable: bool, attach: bool) -> Result<Transaction<'_>, Error> {
		if *self.attached.lock() {
			return Err(Error::TxWithinTx);
		}
		let guard = if writable {
			TxGuard::Write(self.txlock.write())
		} else {
			TxGuard::Read(self.txlock.read())
		};
		let kv = self.engine.begin(writable)?;
		if attach {
			let mut slot = self.attached.lock();
			if *slot {
				return Err(Error::TxWithinTx);
			}
			*slot = true;
		}
		debug!(writable, attach, "begin transaction");
		Ok(Transaction {
			db: self,
			kv,
			writable,
			attached: attach,
			done: false,
			hooks: Mutex::new(Vec::new()),
			guard: Some(guard),
		})
	}

	pub(crate) fn docid_cache(&self) -> &Mutex<HashMap<String, i64>> {
		&self.docid_cache
	}

	pub(crate) fn forget_docid(&self, table: &str) {
		self.docid_cache.lock().remove(table);
	}

	fn release_attached(&self) {
		*self.attached.lock() = false;
	}
}

#[allow(dead_code)]
enum TxGuard<'a> {
	Read(RwLockReadGuard<'a, ()>),
	Write(RwLockWriteGuard<'a, ()>),
}

/// A transaction over the database.
///
/// Catalog mutations performed through a transaction register compensating
/// hooks; commit forgets them, rollback runs them in LIFO order before
/// rolling the KV transaction back.
pub struct Transaction<'db> {
	db: &'db Database,
	kv: Box<dyn Tx>,
	writable: bool,
	attached: bool,
	done: bool,
	hooks: Mutex<Vec<RollbackHook>>,
	// Database transaction lock, released when the transaction finishes
	guard: Option<TxGuard<'db>>,
}

impl<'db> Transaction<'db> {
	pub fn writable(&self) -> bool {
		self.writable
	}

	pub(crate) fn kv(&self) -> &dyn Tx {
		&*self.kv
	}

	pub(crate) fn db(&self) -> &'db Database {
		self.db
	}

	pub(crate) fn catalog(&self) -> &'db Catalog {
		&self.db.catalog
	}

	pub(crate) fn push_rollback_hook(&self, hook: RollbackHook) {
		self.hooks.lock().push(hook);
	}

	/// Commit the transaction and forget its rollback hooks.
	pub fn commit(&mut self) -> Result<(), Error> {
		if self.done {
			return Err(Error::TxFinished);
		}
		if !self.writable {
			return Err(Error::TxReadonly);
		}
		self.kv.commit()?;
		self.hooks.lock().clear();
		self.done = true;
		if self.attached {
			self.db.release_attached();
		}
		self.guard.take();
		debug!("commit transaction");
		Ok(())
	}

	/// Roll the transaction back, restoring the catalog cache.
	pub fn rollback(&mut self) -> Result<(), Error> {
		self.rollback_inner()
	}

	fn rollback_inner(&mut self) -> Result<(), Error> {
		if self.done {
			return Err(Error::TxFinished);
		}
		self.done = true;
		let hooks = std::mem::take(&mut *self.hooks.lock());
		self.db.catalog.run_rollback_hooks(hooks);
		self.kv.rollback()?;
		if self.attached {
			self.db.release_attached();
		}
		self.guard.take();
		debug!("rollback transaction");
		Ok(())
	}

	/// A handle on a table for the remainder of this transaction.
	pub fn get_table(&self, name: &str) -> Result<Table<'_, 'db>, Error> {
		let info = self.db.catalog.get_table(name)?;
		Ok(Table::new(self, info))
	}

	/// A handle on an index for the remainder of this transaction.
	pub fn get_index(&self, name: &str) -> Result<Index<'_>, Error> {
		let info = self.db.catalog.get_index(name)?;
		Ok(Index::new(self.kv(), info))
	}

	/// Create a table from a set of field constraints.
	pub fn create_table(
		&self,
		name: &str,
		constraints: Vec<FieldConstraint>,
	) -> Result<(), Error> {
		self.db.catalog.create_table(
			self,
			TableInfo {
				table_name: name.to_owned(),
				store_name: Vec::new(),
				read_only: false,
				field_constraints: constraints,
			},
		)?;
		Ok(())
	}

	pub fn drop_table(&self, name: &str) -> Result<(), Error> {
		self.db.catalog.drop_table(self, name)
	}

	pub fn rename_table(&self, old: &str, new: &str) -> Result<(), Error> {
		self.db.catalog.rename_table(self, old, new)
	}

	pub fn add_field_constraint(&self, table: &str, fc: FieldConstraint) -> Result<(), Error> {
		self.db.catalog.add_field_constraint(self, table, fc)
	}

	/// Create an index over the given paths and build it from the table's
	/// documents.
	pub fn create_index(
		&self,
		name: &str,
		table: &str,
		paths: Vec<Path>,
		unique: bool,
	) -> Result<(), Error> {
		self.db.catalog.create_index(
			self,
			IndexInfo {
				index_name: name.to_owned(),
				table_name: table.to_owned(),
				store_name: Vec::new(),
				paths,
				types: Vec::new(),
				unique,
				constraint_path: None,
			},
		)?;
		Ok(())
	}

	pub fn drop_index(&self, name: &str) -> Result<(), Error> {
		self.db.catalog.drop_index(self, name)
	}

	pub fn reindex(&self, name: &str) -> Result<(), Error> {
		self.db.catalog.reindex(self, name)
	}

	pub fn reindex_all(&self) -> Result<(), Error> {
		self.db.catalog.reindex_all(self)
	}

	pub fn list_indexes(&self, table: Option<&str>) -> Vec<Arc<IndexInfo>> {
		self.db.catalog.list_indexes(table)
	}

	pub fn list_tables(&self) -> Vec<String> {
		self.db.catalog.list_tables()
	}
}

impl Drop for Transaction<'_> {
	fn drop(&mut self) {
		if !self.done {
			// Check if already panicking
			if std::thread::panicking() {
				return;
			}
			if self.writable {
				warn!("A transaction was dropped without being committed or rolled back");
			}
			let _ = self.rollback_inner();
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::mpsc;
	use std::thread;
	use std::time::Duration;

	use super::*;
	use crate::kvs::mem::MemEngine;

	fn new_db() -> Database {
		Database::new(Box::new(MemEngine::new())).unwrap()
	}

	#[test]
	fn readers_share_the_database() {
		let db = new_db();
		let mut tx1 = db.begin(false).unwrap();
		let mut tx2 = db.begin(false).unwrap();
		tx1.rollback().unwrap();
		tx2.rollback().unwrap();
	}

	#[test]
	fn writers_block_until_exclusive() {
		let db = Arc::new(new_db());
		let mut tx = db.begin(true).unwrap();
		let (send, recv) = mpsc::channel();
		let db2 = Arc::clone(&db);
		let handle = thread::spawn(move || {
			// Blocks until the first writer finishes
			let mut tx = db2.begin(true).unwrap();
			send.send(()).unwrap();
			tx.rollback().unwrap();
		});
		assert!(recv.recv_timeout(Duration::from_millis(50)).is_err());
		tx.rollback().unwrap();
		recv.recv_timeout(Duration::from_secs(5)).unwrap();
		handle.join().unwrap();
	}

	#[test]
	fn attached_transactions_occupy_the_slot() {
		let db = new_db();
		let mut tx = db.begin_attached(true).unwrap();
		assert!(matches!(db.begin(false), Err(Error::TxWithinTx)));
		assert!(matches!(db.begin_attached(false), Err(Error::TxWithinTx)));
		tx.rollback().unwrap();
		// The slot is free again
		let mut tx = db.begin_attached(true).unwrap();
		tx.commit().unwrap();
		db.begin(false).unwrap().rollback().unwrap();
	}

	#[test]
	fn finished_transactions_are_rejected() {
		let db = new_db();
		let mut tx = db.begin(false).unwrap();
		assert!(matches!(tx.commit(), Err(Error::TxReadonly)));
		tx.rollback().unwrap();
		assert!(matches!(tx.rollback(), Err(Error::TxFinished)));
		assert!(matches!(tx.commit(), Err(Error::TxFinished)));
		let mut tx = db.begin(true).unwrap();
		tx.commit().unwrap();
	}

	#[test]
	fn dropped_write_transaction_rolls_back() {
		let db = new_db();
		{
			let tx = db.begin(true).unwrap();
			tx.create_table("t", Vec::new()).unwrap();
			// Dropped without commit
		}
		let mut tx = db.begin(false).unwrap();
		assert!(matches!(
			db.catalog().get_table("t"),
			Err(Error::TableNotFound(_))
		));
		tx.rollback().unwrap();
	}
}
