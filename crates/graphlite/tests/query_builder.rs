//! C3 Node Query Builder, exercised end-to-end through `GraphDb::nodes`
//! (spec §4.3).

mod common;

use common::{props, temp_db};
use graphlite::{CompareOp, Direction, SortOrder};

#[test]
fn where_cmp_supports_every_comparison_operator() {
    let (db, _dir) = temp_db();
    for age in [18, 25, 30, 40] {
        db.create_node("Person", props(&[("age", age.into())])).unwrap();
    }

    let gte_30 = db.nodes("Person").where_cmp("age", CompareOp::Gte, 30.into()).exec().unwrap();
    assert_eq!(gte_30.len(), 2);

    let lt_30 = db.nodes("Person").where_cmp("age", CompareOp::Lt, 30.into()).exec().unwrap();
    assert_eq!(lt_30.len(), 2);

    let ne_30 = db.nodes("Person").where_cmp("age", CompareOp::Ne, 30.into()).exec().unwrap();
    assert_eq!(ne_30.len(), 3);

    let in_set = db
        .nodes("Person")
        .where_cmp("age", CompareOp::In, serde_json::json!([18, 40]))
        .exec()
        .unwrap();
    assert_eq!(in_set.len(), 2);
}

#[test]
fn like_passes_pattern_verbatim() {
    let (db, _dir) = temp_db();
    db.create_node("Person", props(&[("name", "Alice".into())])).unwrap();
    db.create_node("Person", props(&[("name", "Alicia".into())])).unwrap();
    db.create_node("Person", props(&[("name", "Bob".into())])).unwrap();

    let matches = db
        .nodes("Person")
        .where_cmp("name", CompareOp::Like, "Ali%".into())
        .exec()
        .unwrap();
    assert_eq!(matches.len(), 2);
}

#[test]
fn connected_to_out_direction_joins_across_edge_type() {
    let (db, _dir) = temp_db();
    let alice = db.create_node("Person", props(&[("name", "Alice".into())])).unwrap();
    let bob = db.create_node("Person", props(&[("name", "Bob".into())])).unwrap();
    let acme = db.create_node("Company", props(&[("name", "Acme".into())])).unwrap();
    db.create_edge(alice.id, "WORKS_AT", acme.id, None).unwrap();

    let employed = db
        .nodes("Person")
        .connected_to("Company", "WORKS_AT", Direction::Out)
        .exec()
        .unwrap();
    assert_eq!(employed.len(), 1);
    assert_eq!(employed[0].id, alice.id);

    let _ = bob;
}

#[test]
fn order_by_and_pagination_stack() {
    let (db, _dir) = temp_db();
    for age in [40, 10, 30, 20] {
        db.create_node("Person", props(&[("age", age.into())])).unwrap();
    }

    let page = db
        .nodes("Person")
        .order_by("age", SortOrder::Asc)
        .limit(2)
        .offset(1)
        .exec()
        .unwrap();

    let ages: Vec<i64> = page.iter().map(|n| n.properties["age"].as_i64().unwrap()).collect();
    assert_eq!(ages, vec![20, 30]);
}

#[test]
fn first_returns_none_when_nothing_matches() {
    let (db, _dir) = temp_db();
    assert!(db.nodes("Person").first().unwrap().is_none());
}

#[test]
fn count_uses_distinct_node_id_when_joined() {
    let (db, _dir) = temp_db();
    let alice = db.create_node("Person", props(&[])).unwrap();
    let bob = db.create_node("Person", props(&[])).unwrap();
    db.create_edge(alice.id, "KNOWS", bob.id, None).unwrap();
    db.create_edge(bob.id, "KNOWS", alice.id, None).unwrap();

    let count = db
        .nodes("Person")
        .connected_to("Person", "KNOWS", Direction::Both)
        .count()
        .unwrap();
    assert_eq!(count, 2);
    assert!(db.nodes("Person").connected_to("Person", "KNOWS", Direction::Both).exists().unwrap());
}

#[test]
fn post_materialization_filter_runs_after_storage_query() {
    let (db, _dir) = temp_db();
    db.create_node("Person", props(&[("age", 17.into())])).unwrap();
    db.create_node("Person", props(&[("age", 25.into())])).unwrap();

    let adults = db
        .nodes("Person")
        .filter(|n| n.properties["age"].as_i64().unwrap_or(0) >= 18)
        .exec()
        .unwrap();
    assert_eq!(adults.len(), 1);
}
