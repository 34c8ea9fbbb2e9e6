//! Table and index descriptors.
//!
//! Descriptors are plain values owned by the catalog. They convert to and
//! from documents so the system tables can expose them to ordinary queries;
//! a descriptor document that does not convert back is a broken database,
//! and conversion panics rather than erroring.

use serde::{Deserialize, Serialize};

use crate::val::path::Path;
use crate::val::{Document, Type, Value};

/// A single field constraint bound to a table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldConstraint {
	/// The location inside the document this constraint applies to.
	pub path: Path,
	/// The declared type, or [`Type::Any`] when untyped.
	pub typ: Type,
	pub is_primary_key: bool,
	pub is_not_null: bool,
	/// Whether this constraint was synthesized for a deep user path.
	pub is_inferred: bool,
	/// The user-declared paths that caused this constraint to be inferred.
	pub inferred_by: Vec<Path>,
	pub default_value: Option<Value>,
}

/// Everything the catalog knows about one table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
	pub table_name: String,
	/// The name of the KV store holding the table's documents.
	pub store_name: Vec<u8>,
	pub read_only: bool,
	pub field_constraints: Vec<FieldConstraint>,
}

impl TableInfo {
	/// The primary-key constraint, if the table declares one.
	pub fn primary_key(&self) -> Option<&FieldConstraint> {
		self.field_constraints.iter().find(|fc| fc.is_primary_key)
	}

	/// The constraint declared or inferred at `path`, if any.
	pub fn constraint_at(&self, path: &Path) -> Option<&FieldConstraint> {
		self.field_constraints.iter().find(|fc| fc.path == *path)
	}

	/// This descriptor as a queryable document.
	pub fn to_document(&self) -> Document {
		let mut doc = Document::new();
		doc.set("table_name", self.table_name.clone());
		doc.set("store_name", Value::Blob(self.store_name.clone()));
		doc.set("read_only", self.read_only);
		let fcs: Vec<Value> =
			self.field_constraints.iter().map(|fc| fc.to_document().into()).collect();
		doc.set("field_constraints", fcs);
		doc
	}

	/// Rebuild a descriptor from its document form.
	///
	/// Panics on a malformed document: the system tables are authoritative
	/// and a row that does not convert means the database is broken.
	pub fn from_document(doc: &Document) -> TableInfo {
		TableInfo {
			table_name: text_field(doc, "table_name"),
			store_name: blob_field(doc, "store_name"),
			read_only: bool_field(doc, "read_only"),
			field_constraints: array_field(doc, "field_constraints")
				.iter()
				.map(|v| match v {
					Value::Document(d) => FieldConstraint::from_document(d),
					_ => panic!("corrupted table descriptor: field_constraints"),
				})
				.collect(),
		}
	}
}

impl FieldConstraint {
	fn to_document(&self) -> Document {
		let mut doc = Document::new();
		doc.set("path", self.path.to_string());
		doc.set("type", self.typ as i64);
		doc.set("is_primary_key", self.is_primary_key);
		doc.set("is_not_null", self.is_not_null);
		doc.set("is_inferred", self.is_inferred);
		let sources: Vec<Value> =
			self.inferred_by.iter().map(|p| Value::Text(p.to_string())).collect();
		doc.set("inferred_by", sources);
		if let Some(default) = &self.default_value {
			doc.set("default_value", default.clone());
		}
		doc
	}

	fn from_document(doc: &Document) -> FieldConstraint {
		FieldConstraint {
			path: parse_path(&text_field(doc, "path")),
			typ: Type::from_u8(int_field(doc, "type") as u8)
				.unwrap_or_else(|| panic!("corrupted field constraint: type")),
			is_primary_key: bool_field(doc, "is_primary_key"),
			is_not_null: bool_field(doc, "is_not_null"),
			is_inferred: bool_field(doc, "is_inferred"),
			inferred_by: array_field(doc, "inferred_by")
				.iter()
				.map(|v| match v {
					Value::Text(s) => parse_path(s),
					_ => panic!("corrupted field constraint: inferred_by"),
				})
				.collect(),
			default_value: doc.get("default_value").cloned(),
		}
	}
}

/// Everything the catalog knows about one index.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
	pub index_name: String,
	/// The table the index is defined on.
	pub table_name: String,
	/// The name of the KV store holding the index entries.
	pub store_name: Vec<u8>,
	/// The indexed paths, in index order.
	pub paths: Vec<Path>,
	/// One type per path, inherited from a matching field constraint at
	/// creation time, or [`Type::Any`].
	pub types: Vec<Type>,
	pub unique: bool,
	/// Set when the index backs a unique field constraint; such an index
	/// cannot be dropped directly.
	pub constraint_path: Option<Path>,
}

impl IndexInfo {
	/// The number of paths the index covers.
	pub fn arity(&self) -> usize {
		self.paths.len()
	}

	/// This descriptor as a queryable document.
	pub fn to_document(&self) -> Document {
		let mut doc = Document::new();
		doc.set("index_name", self.index_name.clone());
		doc.set("table_name", self.table_name.clone());
		doc.set("store_name", Value::Blob(self.store_name.clone()));
		let paths: Vec<Value> = self.paths.iter().map(|p| Value::Text(p.to_string())).collect();
		doc.set("paths", paths);
		let types: Vec<Value> = self.types.iter().map(|t| Value::Integer(*t as i64)).collect();
		doc.set("types", types);
		doc.set("unique", self.unique);
		if let Some(path) = &self.constraint_path {
			doc.set("constraint_path", path.to_string());
		}
		doc
	}

	/// Rebuild a descriptor from its document form, panicking on a
	/// malformed document.
	pub fn from_document(doc: &Document) -> IndexInfo {
		IndexInfo {
			index_name: text_field(doc, "index_name"),
			table_name: text_field(doc, "table_name"),
			store_name: blob_field(doc, "store_name"),
			paths: array_field(doc, "paths")
				.iter()
				.map(|v| match v {
					Value::Text(s) => parse_path(s),
					_ => panic!("corrupted index descriptor: paths"),
				})
				.collect(),
			types: array_field(doc, "types")
				.iter()
				.map(|v| match v {
					Value::Integer(i) => Type::from_u8(*i as u8)
						.unwrap_or_else(|| panic!("corrupted index descriptor: types")),
					_ => panic!("corrupted index descriptor: types"),
				})
				.collect(),
			unique: bool_field(doc, "unique"),
			constraint_path: doc.get("constraint_path").map(|v| match v {
				Value::Text(s) => parse_path(s),
				_ => panic!("corrupted index descriptor: constraint_path"),
			}),
		}
	}
}

fn text_field(doc: &Document, name: &str) -> String {
	match doc.get(name) {
		Some(Value::Text(s)) => s.clone(),
		_ => panic!("corrupted descriptor: {name}"),
	}
}

fn blob_field(doc: &Document, name: &str) -> Vec<u8> {
	match doc.get(name) {
		Some(Value::Blob(b)) => b.clone(),
		_ => panic!("corrupted descriptor: {name}"),
	}
}

fn bool_field(doc: &Document, name: &str) -> bool {
	match doc.get(name) {
		Some(Value::Bool(b)) => *b,
		_ => panic!("corrupted descriptor: {name}"),
	}
}

fn int_field(doc: &Document, name: &str) -> i64 {
	match doc.get(name) {
		Some(Value::Integer(i)) => *i,
		_ => panic!("corrupted descriptor: {name}"),
	}
}

fn array_field(doc: &Document, name: &str) -> Vec<Value> {
	match doc.get(name) {
		Some(Value::Array(a)) => a.clone(),
		_ => panic!("corrupted descriptor: {name}"),
	}
}

fn parse_path(s: &str) -> Path {
	s.parse().unwrap_or_else(|_| panic!("corrupted descriptor path: {s}"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn table_info_document_round_trip() {
		let info = TableInfo {
			table_name: "users".into(),
			store_name: vec![b't', 0x07],
			read_only: false,
			field_constraints: vec![
				FieldConstraint {
					path: "id".parse().unwrap(),
					typ: Type::Integer,
					is_primary_key: true,
					is_not_null: true,
					..FieldConstraint::default()
				},
				FieldConstraint {
					path: "address.city".parse().unwrap(),
					typ: Type::Text,
					default_value: Some(Value::Text("unknown".into())),
					..FieldConstraint::default()
				},
				FieldConstraint {
					path: "address".parse().unwrap(),
					typ: Type::Document,
					is_inferred: true,
					inferred_by: vec!["address.city".parse().unwrap()],
					..FieldConstraint::default()
				},
			],
		};
		assert_eq!(TableInfo::from_document(&info.to_document()), info);
	}

	#[test]
	fn index_info_document_round_trip() {
		let info = IndexInfo {
			index_name: "idx_city".into(),
			table_name: "users".into(),
			store_name: b"iidx_city".to_vec(),
			paths: vec!["address.city".parse().unwrap(), "age".parse().unwrap()],
			types: vec![Type::Text, Type::Any],
			unique: true,
			constraint_path: Some("address.city".parse().unwrap()),
		};
		assert_eq!(IndexInfo::from_document(&info.to_document()), info);
	}

	#[test]
	#[should_panic(expected = "corrupted descriptor")]
	fn malformed_descriptor_panics() {
		let mut doc = Document::new();
		doc.set("table_name", 42i64);
		let _ = TableInfo::from_document(&doc);
	}
}
