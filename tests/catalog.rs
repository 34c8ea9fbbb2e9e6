use std::sync::Arc;

use genji_core::catalog::info::{FieldConstraint, IndexInfo, TableInfo};
use genji_core::catalog::{INDEXES_TABLE, TABLES_TABLE};
use genji_core::kvs::mem::MemEngine;
use genji_core::val::{Type, Value};
use genji_core::{doc, Database, Error};

fn new_db() -> Database {
	Database::new(Box::new(MemEngine::new())).unwrap()
}

fn text_constraint(path: &str) -> FieldConstraint {
	FieldConstraint {
		path: path.parse().unwrap(),
		typ: Type::Text,
		..FieldConstraint::default()
	}
}

/// The full catalog state visible through the public API, for
/// before-and-after comparisons.
fn catalog_snapshot(db: &Database) -> (Vec<Arc<TableInfo>>, Vec<Arc<IndexInfo>>) {
	let tables = db
		.catalog()
		.list_tables()
		.iter()
		.map(|name| db.catalog().get_table(name).unwrap())
		.collect();
	(tables, db.catalog().list_indexes(None))
}

/// Every row of a system table, keyed by entity name.
fn system_rows(db: &Database, table: &str) -> Vec<(Vec<u8>, genji_core::Document)> {
	let mut tx = db.begin(false).unwrap();
	let mut rows = Vec::new();
	tx.get_table(table)
		.unwrap()
		.iterate(|k, doc| {
			rows.push((k.to_vec(), doc.to_document().unwrap()));
			Ok(())
		})
		.unwrap();
	tx.rollback().unwrap();
	rows
}

#[test_log::test]
fn rename_table_carries_its_indexes() {
	let db = new_db();
	let mut tx = db.begin(true).unwrap();
	tx.create_table("foo", vec![text_constraint("gender"), text_constraint("city")]).unwrap();
	tx.create_index("idx_gender", "foo", vec!["gender".parse().unwrap()], false).unwrap();
	tx.create_index("idx_city", "foo", vec!["city".parse().unwrap()], true).unwrap();
	tx.commit().unwrap();

	let before_cache = catalog_snapshot(&db);
	let before_tables = system_rows(&db, TABLES_TABLE);
	let before_indexes = system_rows(&db, INDEXES_TABLE);

	let mut tx = db.begin(true).unwrap();
	tx.rename_table("foo", "zoo").unwrap();
	assert!(matches!(db.catalog().get_table("foo"), Err(Error::TableNotFound(_))));
	let renamed: Vec<String> =
		tx.list_indexes(Some("zoo")).iter().map(|i| i.index_name.clone()).collect();
	assert_eq!(renamed, ["idx_gender", "idx_city"]);
	for idx in tx.list_indexes(Some("zoo")) {
		assert_eq!(idx.table_name, "zoo");
	}
	// Rolling back restores the catalog and the system tables exactly
	tx.rollback().unwrap();
	assert_eq!(catalog_snapshot(&db), before_cache);
	assert_eq!(system_rows(&db, TABLES_TABLE), before_tables);
	assert_eq!(system_rows(&db, INDEXES_TABLE), before_indexes);

	// Committing makes the rename durable
	let mut tx = db.begin(true).unwrap();
	tx.rename_table("foo", "zoo").unwrap();
	tx.commit().unwrap();
	assert!(matches!(db.catalog().get_table("foo"), Err(Error::TableNotFound(_))));
	assert_eq!(db.catalog().get_table("zoo").unwrap().table_name, "zoo");
	for idx in db.catalog().list_indexes(Some("zoo")) {
		assert_eq!(idx.table_name, "zoo");
	}
}

#[test_log::test]
fn create_table_rolls_back_cleanly() {
	let db = new_db();
	let before_cache = catalog_snapshot(&db);
	let before_rows = system_rows(&db, TABLES_TABLE);

	let mut tx = db.begin(true).unwrap();
	tx.create_table("t", Vec::new()).unwrap();
	assert!(db.catalog().get_table("t").is_ok());
	tx.rollback().unwrap();

	assert!(matches!(db.catalog().get_table("t"), Err(Error::TableNotFound(_))));
	assert_eq!(catalog_snapshot(&db), before_cache);
	assert_eq!(system_rows(&db, TABLES_TABLE), before_rows);
}

#[test_log::test]
fn drop_table_drops_its_indexes() {
	let db = new_db();
	let mut tx = db.begin(true).unwrap();
	tx.create_table("t", vec![text_constraint("a")]).unwrap();
	tx.create_index("ix_a", "t", vec!["a".parse().unwrap()], false).unwrap();
	tx.commit().unwrap();

	let before_cache = catalog_snapshot(&db);

	// Rolled back drop leaves everything in place
	let mut tx = db.begin(true).unwrap();
	tx.drop_table("t").unwrap();
	assert!(matches!(db.catalog().get_table("t"), Err(Error::TableNotFound(_))));
	assert!(matches!(db.catalog().get_index("ix_a"), Err(Error::IndexNotFound(_))));
	tx.rollback().unwrap();
	assert_eq!(catalog_snapshot(&db), before_cache);

	// Committed drop removes table, index and their rows
	let mut tx = db.begin(true).unwrap();
	tx.drop_table("t").unwrap();
	tx.commit().unwrap();
	assert!(matches!(db.catalog().get_table("t"), Err(Error::TableNotFound(_))));
	assert!(matches!(db.catalog().get_index("ix_a"), Err(Error::IndexNotFound(_))));
	assert!(system_rows(&db, TABLES_TABLE).is_empty());
	assert!(system_rows(&db, INDEXES_TABLE).is_empty());
}

#[test_log::test]
fn reserved_names_are_rejected() {
	let db = new_db();
	let mut tx = db.begin(true).unwrap();
	assert!(matches!(
		tx.create_table("__private", Vec::new()),
		Err(Error::ReservedName { .. })
	));
	tx.create_table("t", Vec::new()).unwrap();
	assert!(matches!(
		tx.create_index("__ix", "t", vec!["a".parse().unwrap()], false),
		Err(Error::ReservedName { .. })
	));
	assert!(matches!(tx.rename_table("t", "__t"), Err(Error::ReservedName { .. })));
	tx.commit().unwrap();
}

#[test_log::test]
fn duplicate_names_are_rejected() {
	let db = new_db();
	let mut tx = db.begin(true).unwrap();
	tx.create_table("t", Vec::new()).unwrap();
	assert!(matches!(
		tx.create_table("t", Vec::new()),
		Err(Error::TableAlreadyExists(_))
	));
	tx.create_index("ix", "t", vec!["a".parse().unwrap()], false).unwrap();
	assert!(matches!(
		tx.create_index("ix", "t", vec!["b".parse().unwrap()], false),
		Err(Error::IndexAlreadyExists(_))
	));
	// Table and index names share one namespace
	assert!(matches!(
		tx.create_table("ix", Vec::new()),
		Err(Error::TableAlreadyExists(_))
	));
	assert!(matches!(
		tx.create_index("t", "t", vec!["a".parse().unwrap()], false),
		Err(Error::IndexAlreadyExists(_))
	));
	tx.commit().unwrap();
}

#[test_log::test]
fn create_index_requires_the_table() {
	let db = new_db();
	let mut tx = db.begin(true).unwrap();
	assert!(matches!(
		tx.create_index("ix", "missing", vec!["a".parse().unwrap()], false),
		Err(Error::TableNotFound(_))
	));
	tx.commit().unwrap();
}

#[test_log::test]
fn index_types_inherit_field_constraints() {
	let db = new_db();
	let mut tx = db.begin(true).unwrap();
	tx.create_table("t", vec![text_constraint("a")]).unwrap();
	tx.create_index("ix", "t", vec!["a".parse().unwrap(), "b".parse().unwrap()], false)
		.unwrap();
	let info = db.catalog().get_index("ix").unwrap();
	assert_eq!(info.types, [Type::Text, Type::Any]);
	assert_eq!(info.store_name, b"iix");
	tx.commit().unwrap();
}

#[test_log::test]
fn create_index_builds_from_existing_documents() {
	let db = new_db();
	let mut tx = db.begin(true).unwrap();
	tx.create_table("t", Vec::new()).unwrap();
	{
		let table = tx.get_table("t").unwrap();
		for i in 0..3i64 {
			table.insert(&doc! { "a" => i }).unwrap();
		}
		// One document misses the indexed path and is skipped
		table.insert(&doc! { "b" => 9i64 }).unwrap();
	}
	tx.create_index("ix_a", "t", vec!["a".parse().unwrap()], false).unwrap();
	{
		let idx = tx.get_index("ix_a").unwrap();
		let mut entries = 0;
		idx.ascend_ge(&[], |_, _| {
			entries += 1;
			Ok(())
		})
		.unwrap();
		assert_eq!(entries, 3);
	}
	tx.commit().unwrap();
}

#[test_log::test]
fn constraint_backed_indexes_cannot_be_dropped() {
	let db = new_db();
	let mut tx = db.begin(true).unwrap();
	tx.create_table("t", vec![text_constraint("email")]).unwrap();
	db.catalog()
		.create_index(
			&tx,
			IndexInfo {
				index_name: "ix_email".into(),
				table_name: "t".into(),
				store_name: Vec::new(),
				paths: vec!["email".parse().unwrap()],
				types: Vec::new(),
				unique: true,
				constraint_path: Some("email".parse().unwrap()),
			},
		)
		.unwrap();
	assert!(matches!(
		tx.drop_index("ix_email"),
		Err(Error::ConstraintRequiresIndex(_))
	));
	// Dropping the table still removes it
	tx.drop_table("t").unwrap();
	assert!(matches!(db.catalog().get_index("ix_email"), Err(Error::IndexNotFound(_))));
	tx.commit().unwrap();
}

#[test_log::test]
fn add_field_constraint_updates_validation() {
	let db = new_db();
	let mut tx = db.begin(true).unwrap();
	tx.create_table("t", Vec::new()).unwrap();
	tx.get_table("t").unwrap().insert(&doc! { "x" => 1i64 }).unwrap();
	tx.commit().unwrap();

	let before = db.catalog().get_table("t").unwrap();

	let mut tx = db.begin(true).unwrap();
	tx.add_field_constraint(
		"t",
		FieldConstraint {
			path: "x".parse().unwrap(),
			is_not_null: true,
			..FieldConstraint::default()
		},
	)
	.unwrap();
	assert!(matches!(
		tx.get_table("t").unwrap().insert(&doc! { "y" => 2i64 }),
		Err(Error::NotNullViolation(_))
	));
	// A second primary key is rejected
	tx.add_field_constraint(
		"t",
		FieldConstraint {
			path: "pk1".parse().unwrap(),
			is_primary_key: true,
			..FieldConstraint::default()
		},
	)
	.unwrap();
	assert!(matches!(
		tx.add_field_constraint(
			"t",
			FieldConstraint {
				path: "pk2".parse().unwrap(),
				is_primary_key: true,
				..FieldConstraint::default()
			},
		),
		Err(Error::MultiplePrimaryKeys)
	));
	// A duplicate declared path is rejected
	assert!(matches!(
		tx.add_field_constraint(
			"t",
			FieldConstraint {
				path: "x".parse().unwrap(),
				..FieldConstraint::default()
			},
		),
		Err(Error::ConflictingConstraints(_))
	));
	tx.rollback().unwrap();

	// The rolled back constraints are gone
	assert_eq!(db.catalog().get_table("t").unwrap(), before);
	let mut tx = db.begin(true).unwrap();
	tx.get_table("t").unwrap().insert(&doc! { "y" => 2i64 }).unwrap();
	tx.commit().unwrap();
}

#[test_log::test]
fn catalog_survives_restart() {
	let engine = MemEngine::new();
	let db = Database::new(Box::new(engine.clone())).unwrap();
	let mut tx = db.begin(true).unwrap();
	tx.create_table("t", vec![text_constraint("a")]).unwrap();
	tx.create_index("ix_a", "t", vec!["a".parse().unwrap()], true).unwrap();
	tx.get_table("t").unwrap().insert(&doc! { "a" => "v" }).unwrap();
	tx.commit().unwrap();
	drop(tx);
	let before = catalog_snapshot(&db);
	drop(db);

	let db = Database::new(Box::new(engine)).unwrap();
	assert_eq!(catalog_snapshot(&db), before);
	// The reloaded unique index still enforces uniqueness
	let mut tx = db.begin(true).unwrap();
	assert!(matches!(
		tx.get_table("t").unwrap().insert(&doc! { "a" => "v" }),
		Err(Error::DuplicateDocument)
	));
	tx.rollback().unwrap();
}

#[test_log::test]
fn system_tables_are_queryable_and_read_only() {
	let db = new_db();
	let mut tx = db.begin(true).unwrap();
	tx.create_table("t", Vec::new()).unwrap();
	tx.commit().unwrap();

	let mut tx = db.begin(true).unwrap();
	{
		let tables = tx.get_table(TABLES_TABLE).unwrap();
		let mut names = Vec::new();
		tables
			.iterate(|_, doc| {
				match doc.document()?.get("table_name") {
					Some(Value::Text(s)) => names.push(s.clone()),
					_ => panic!("table_name missing"),
				}
				Ok(())
			})
			.unwrap();
		assert_eq!(names, ["t"]);

		// User writes to the system tables are rejected
		assert!(matches!(
			tables.insert(&doc! { "table_name" => "fake" }),
			Err(Error::ReadOnlyTable(_))
		));
		assert!(matches!(tables.truncate(), Err(Error::ReadOnlyTable(_))));
		assert!(matches!(tx.drop_table(TABLES_TABLE), Err(Error::ReadOnlyTable(_))));
	}
	tx.commit().unwrap();
}

#[test_log::test]
fn catalog_mutations_require_a_writable_transaction() {
	let db = new_db();
	let mut tx = db.begin(false).unwrap();
	assert!(matches!(tx.create_table("t", Vec::new()), Err(Error::TxReadonly)));
	assert!(matches!(tx.drop_table("t"), Err(Error::TxReadonly)));
	tx.rollback().unwrap();
}

#[test_log::test]
fn reindex_all_rebuilds_every_index() {
	let db = new_db();
	let mut tx = db.begin(true).unwrap();
	tx.create_table("t", Vec::new()).unwrap();
	tx.create_index("ix_a", "t", vec!["a".parse().unwrap()], false).unwrap();
	tx.create_index("ix_b", "t", vec!["b".parse().unwrap()], false).unwrap();
	{
		let table = tx.get_table("t").unwrap();
		for i in 0..4i64 {
			table.insert(&doc! { "a" => i, "b" => -i }).unwrap();
		}
		// Wipe both index stores behind the catalog's back
		tx.get_index("ix_a").unwrap().truncate().unwrap();
		tx.get_index("ix_b").unwrap().truncate().unwrap();
	}
	tx.reindex_all().unwrap();
	{
		for name in ["ix_a", "ix_b"] {
			let idx = tx.get_index(name).unwrap();
			let mut entries = 0;
			idx.ascend_ge(&[], |_, _| {
				entries += 1;
				Ok(())
			})
			.unwrap();
			assert_eq!(entries, 4, "{name}");
		}
	}
	tx.commit().unwrap();
}

#[test_log::test]
fn list_tables_names_user_tables_only() {
	let db = new_db();
	let mut tx = db.begin(true).unwrap();
	tx.create_table("b", Vec::new()).unwrap();
	tx.create_table("a", Vec::new()).unwrap();
	assert_eq!(tx.list_tables(), ["a", "b"]);
	tx.commit().unwrap();
}

#[test_log::test]
fn table_store_names_come_from_the_allocator() {
	let db = new_db();
	let mut tx = db.begin(true).unwrap();
	tx.create_table("a", Vec::new()).unwrap();
	tx.create_table("b", Vec::new()).unwrap();
	let a = db.catalog().get_table("a").unwrap();
	let b = db.catalog().get_table("b").unwrap();
	assert_eq!(a.store_name[0], b't');
	assert_eq!(b.store_name[0], b't');
	assert_ne!(a.store_name, b.store_name);
	tx.commit().unwrap();
}
