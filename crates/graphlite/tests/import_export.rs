//! C6 import/export, exercised through `GraphDb::export` / `GraphDb::import`
//! (spec §4.6, §6).

mod common;

use common::{props, temp_db};
use graphlite::GraphError;

#[test]
fn export_then_import_into_a_fresh_database_preserves_shape() {
    let (db, _dir) = temp_db();
    let alice = db.create_node("Person", props(&[("name", "Alice".into())])).unwrap();
    let bob = db.create_node("Person", props(&[("name", "Bob".into())])).unwrap();
    db.create_edge(alice.id, "KNOWS", bob.id, Some(props(&[("since", 2020.into())]))).unwrap();

    let exported = db.export().unwrap();
    assert_eq!(exported.nodes.len(), 2);
    assert_eq!(exported.edges.len(), 1);
    assert_eq!(exported.metadata.version, "1");

    let (fresh, _dir2) = temp_db();
    fresh.import(exported).unwrap();

    assert_eq!(fresh.nodes("Person").exec().unwrap().len(), 2);
    let edges_from_alice = fresh
        .nodes("Person")
        .where_eq([("name".to_string(), "Alice".into())])
        .exec()
        .unwrap();
    assert_eq!(edges_from_alice.len(), 1);
}

#[test]
fn import_is_additive_and_does_not_deduplicate_existing_rows() {
    let (db, _dir) = temp_db();
    db.create_node("Person", props(&[("name", "Alice".into())])).unwrap();
    let exported = db.export().unwrap();

    db.import(exported).unwrap();
    assert_eq!(db.nodes("Person").exec().unwrap().len(), 2);
}

#[test]
fn import_rejects_a_mismatched_schema_version() {
    let (db, _dir) = temp_db();
    let mut exported = db.export().unwrap();
    exported.metadata.version = "999".to_string();

    let err = db.import(exported).unwrap_err();
    assert!(matches!(err, GraphError::UnsupportedVersion(_)));
}

#[test]
fn import_assigns_fresh_ids_and_remaps_edge_endpoints() {
    let (db, _dir) = temp_db();
    let alice = db.create_node("Person", props(&[("name", "Alice".into())])).unwrap();
    let bob = db.create_node("Person", props(&[("name", "Bob".into())])).unwrap();
    db.create_edge(alice.id, "KNOWS", bob.id, None).unwrap();
    let exported = db.export().unwrap();

    let (fresh, _dir2) = temp_db();
    // Seed an unrelated row first so imported node ids diverge from the
    // original export's ids, proving the edge remap follows the id map
    // rather than assuming identity.
    fresh.create_node("Company", props(&[])).unwrap();
    fresh.import(exported).unwrap();

    let imported_alice = fresh
        .nodes("Person")
        .where_eq([("name".to_string(), "Alice".into())])
        .exec()
        .unwrap();
    assert_eq!(imported_alice.len(), 1);
    assert_ne!(imported_alice[0].id, alice.id);

    let neighbors = fresh
        .traverse(imported_alice[0].id)
        .out("KNOWS")
        .max_depth(1)
        .to_array()
        .unwrap();
    assert_eq!(neighbors.len(), 1);
    assert_eq!(neighbors[0].properties["name"], "Bob");
}
