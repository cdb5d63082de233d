//! Shared fixtures for `graphlite` integration tests.

#![allow(dead_code)]

use graphlite::{GraphDb, Properties};
use tempfile::TempDir;

/// An on-disk database backed by a temp directory that is cleaned up when
/// the returned `TempDir` drops. Holding both keeps the file alive for the
/// duration of the test.
pub fn temp_db() -> (GraphDb, TempDir) {
    let dir = TempDir::new().expect("create temp dir");
    let db = GraphDb::open(dir.path().join("graph.db")).expect("open db");
    (db, dir)
}

pub fn props(pairs: &[(&str, serde_json::Value)]) -> Properties {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}
