//! The in-memory key-value engine.
//!
//! Transactions take a snapshot of the committed state when they begin and
//! swap it back in on commit, so readers always see a stable view. The
//! engine relies on the database layer for writer exclusion: two concurrent
//! write transactions would be last-commit-wins.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::err::Error;
use crate::kvs::api::{Engine, KvIterator, Store, Tx};
use crate::kvs::{Key, Val};

#[derive(Clone, Default)]
struct StoreData {
	entries: BTreeMap<Key, Val>,
	sequence: u64,
}

type Stores = HashMap<Key, StoreData>;

/// An in-memory engine.
///
/// Clones share the same underlying data, so a database can be closed and
/// reopened over a clone of its engine.
#[derive(Clone, Default)]
pub struct MemEngine {
	inner: Arc<RwLock<Stores>>,
}

impl MemEngine {
	/// Open a new, empty engine.
	pub fn new() -> MemEngine {
		MemEngine::default()
	}
}

impl Engine for MemEngine {
	fn begin(&self, writable: bool) -> Result<Box<dyn Tx>, Error> {
		// Snapshot the committed state
		let snapshot = self.inner.read().clone();
		Ok(Box::new(MemTx {
			engine: Arc::clone(&self.inner),
			data: Arc::new(Mutex::new(TxData {
				stores: snapshot,
				writable,
				done: false,
			})),
		}))
	}
}

struct TxData {
	stores: Stores,
	writable: bool,
	done: bool,
}

impl TxData {
	fn check_open(&self) -> Result<(), Error> {
		if self.done {
			return Err(Error::TxFinished);
		}
		Ok(())
	}

	fn check_writable(&self) -> Result<(), Error> {
		self.check_open()?;
		if !self.writable {
			return Err(Error::TxReadonly);
		}
		Ok(())
	}
}

struct MemTx {
	engine: Arc<RwLock<Stores>>,
	data: Arc<Mutex<TxData>>,
}

impl Drop for MemTx {
	fn drop(&mut self) {
		let data = self.data.lock();
		if !data.done && data.writable {
			// Check if already panicking
			if std::thread::panicking() {
				return;
			}
			warn!("A transaction was dropped without being committed or rolled back");
		}
	}
}

impl Tx for MemTx {
	fn commit(&mut self) -> Result<(), Error> {
		let mut data = self.data.lock();
		data.check_writable()?;
		// Mark this transaction as done
		data.done = true;
		// Swap the working copy in as the committed state
		*self.engine.write() = std::mem::take(&mut data.stores);
		Ok(())
	}

	fn rollback(&mut self) -> Result<(), Error> {
		let mut data = self.data.lock();
		data.check_open()?;
		// Mark this transaction as done and discard the working copy
		data.done = true;
		data.stores.clear();
		Ok(())
	}

	fn create_store(&self, name: &[u8]) -> Result<(), Error> {
		let mut data = self.data.lock();
		data.check_writable()?;
		if data.stores.contains_key(name) {
			return Err(Error::StoreAlreadyExists(name.to_vec()));
		}
		data.stores.insert(name.to_vec(), StoreData::default());
		Ok(())
	}

	fn get_store<'a>(&'a self, name: &[u8]) -> Result<Box<dyn Store + 'a>, Error> {
		let data = self.data.lock();
		data.check_open()?;
		if !data.stores.contains_key(name) {
			return Err(Error::StoreNotFound(name.to_vec()));
		}
		Ok(Box::new(MemStore {
			name: name.to_vec(),
			data: Arc::clone(&self.data),
		}))
	}

	fn drop_store(&self, name: &[u8]) -> Result<(), Error> {
		let mut data = self.data.lock();
		data.check_writable()?;
		if data.stores.remove(name).is_none() {
			return Err(Error::StoreNotFound(name.to_vec()));
		}
		Ok(())
	}
}

struct MemStore {
	name: Key,
	data: Arc<Mutex<TxData>>,
}

impl MemStore {
	fn with<T>(&self, f: impl FnOnce(&StoreData) -> Result<T, Error>) -> Result<T, Error> {
		let data = self.data.lock();
		data.check_open()?;
		let store =
			data.stores.get(&self.name).ok_or_else(|| Error::StoreNotFound(self.name.clone()))?;
		f(store)
	}

	fn with_mut<T>(&self, f: impl FnOnce(&mut StoreData) -> Result<T, Error>) -> Result<T, Error> {
		let mut data = self.data.lock();
		data.check_writable()?;
		let store = data
			.stores
			.get_mut(&self.name)
			.ok_or_else(|| Error::StoreNotFound(self.name.clone()))?;
		f(store)
	}
}

impl Store for MemStore {
	fn get(&self, key: &[u8]) -> Result<Option<Val>, Error> {
		self.with(|s| Ok(s.entries.get(key).cloned()))
	}

	fn put(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
		if key.is_empty() {
			return Err(Error::KeyRequired);
		}
		self.with_mut(|s| {
			s.entries.insert(key.to_vec(), value.to_vec());
			Ok(())
		})
	}

	fn delete(&self, key: &[u8]) -> Result<(), Error> {
		self.with_mut(|s| match s.entries.remove(key) {
			Some(_) => Ok(()),
			None => Err(Error::KeyNotFound),
		})
	}

	fn truncate(&self) -> Result<(), Error> {
		self.with_mut(|s| {
			s.entries.clear();
			Ok(())
		})
	}

	fn next_sequence(&self) -> Result<u64, Error> {
		self.with_mut(|s| {
			s.sequence += 1;
			Ok(s.sequence)
		})
	}

	fn iterator(&self, reverse: bool) -> Result<Box<dyn KvIterator>, Error> {
		// Iterators run over a snapshot of the store taken here, so the
		// caller may mutate the store while iterating.
		let entries = self.with(|s| {
			Ok(s.entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Vec<_>>())
		})?;
		Ok(Box::new(MemIterator {
			entries,
			reverse,
			pos: None,
		}))
	}
}

struct MemIterator {
	entries: Vec<(Key, Val)>,
	reverse: bool,
	pos: Option<usize>,
}

impl KvIterator for MemIterator {
	fn seek(&mut self, key: &[u8]) {
		if self.reverse {
			// Last entry <= key, or the last entry for an empty key
			let end = if key.is_empty() {
				self.entries.len()
			} else {
				self.entries.partition_point(|(k, _)| k.as_slice() <= key)
			};
			self.pos = end.checked_sub(1);
		} else {
			// First entry >= key
			let start = self.entries.partition_point(|(k, _)| k.as_slice() < key);
			self.pos = (start < self.entries.len()).then_some(start);
		}
	}

	fn valid(&self) -> bool {
		self.pos.is_some()
	}

	fn next(&mut self) {
		self.pos = match self.pos {
			Some(p) if self.reverse => p.checked_sub(1),
			Some(p) => (p + 1 < self.entries.len()).then_some(p + 1),
			None => None,
		};
	}

	fn key(&self) -> &[u8] {
		let pos = self.pos.expect("cursor is valid");
		&self.entries[pos].0
	}

	fn copy_value(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
		let pos = self.pos.expect("cursor is valid");
		buf.clear();
		buf.extend_from_slice(&self.entries[pos].1);
		Ok(())
	}
}
