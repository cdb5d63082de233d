//! C6 property-index management, exercised through `GraphDb::create_property_index`
//! / `list_indexes` / `drop_index` (spec §4.6, §6, §8 P9).

mod common;

use common::{props, temp_db};
use graphlite::GraphError;

#[test]
fn create_list_and_drop_round_trip() {
    let (db, _dir) = temp_db();
    db.create_property_index("Job", "url", false).unwrap();

    let names = db.list_indexes().unwrap();
    assert_eq!(names, vec!["idx_merge_Job_url".to_string()]);

    db.drop_index("idx_merge_Job_url").unwrap();
    assert!(db.list_indexes().unwrap().is_empty());
}

#[test]
fn create_property_index_is_idempotent() {
    let (db, _dir) = temp_db();
    db.create_property_index("Job", "url", false).unwrap();
    db.create_property_index("Job", "url", false).unwrap();
    assert_eq!(db.list_indexes().unwrap().len(), 1);
}

#[test]
fn drop_missing_index_fails_not_found() {
    let (db, _dir) = temp_db();
    let err = db.drop_index("idx_merge_Job_url").unwrap_err();
    assert!(matches!(err, GraphError::IndexNotFound(name) if name == "idx_merge_Job_url"));
}

#[test]
fn p9_unique_property_index_rejects_a_duplicate_value_at_insert_time() {
    let (db, _dir) = temp_db();
    db.create_property_index("Job", "url", true).unwrap();

    db.create_node("Job", props(&[("url", "https://example.com/1".into())])).unwrap();
    let err = db
        .create_node("Job", props(&[("url", "https://example.com/1".into())]))
        .unwrap_err();
    assert!(matches!(err, GraphError::Storage { .. }));

    // The duplicate insert was rejected, so only the first row exists.
    assert_eq!(db.nodes("Job").exec().unwrap().len(), 1);
}

#[test]
fn unique_index_does_not_constrain_other_node_types() {
    let (db, _dir) = temp_db();
    db.create_property_index("Job", "url", true).unwrap();

    db.create_node("Job", props(&[("url", "https://example.com/1".into())])).unwrap();
    db.create_node("Task", props(&[("url", "https://example.com/1".into())])).unwrap();
    assert_eq!(db.nodes("Task").exec().unwrap().len(), 1);
}
