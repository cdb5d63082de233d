//! C5: Merge Engine. `mergeNode`/`mergeEdge` idempotent upsert with an
//! explicit ON CREATE / ON MATCH property split (spec §4.5).
//!
//! Free functions over `&Connection`, invoked only from
//! [`crate::transaction::TransactionContext`] so that the match-then-write
//! sequence always runs inside the internal savepoint spec §4.5 requires
//! ("Each merge runs in a transaction ... so that the MATCH/CREATE decision
//! and the subsequent write are isolated from concurrent writers").

use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, Row};
use tracing::warn;

use crate::error::{GraphError, GraphResult, WithOp};
use crate::index_mgmt;
use crate::query::json_value_to_sql;
use crate::schema::Schema;
use crate::store::{self, validate_edge_type, validate_node_type};
use crate::types::{Edge, EdgeId, Node, NodeId, Properties};

/// Options for [`merge_node`]. `on_create`/`on_match` are the property sets
/// applied only on their respective branch; `warn_on_missing_index`
/// (default on) emits a non-fatal [`GraphError`]-free `tracing::warn!` when
/// no index backs the first match property (spec §4.5 step 2,
/// `MergePerformanceWarning`).
#[derive(Debug, Clone)]
pub struct NodeMergeOptions {
    pub on_create: Option<Properties>,
    pub on_match: Option<Properties>,
    pub warn_on_missing_index: bool,
}

impl Default for NodeMergeOptions {
    /// `warn_on_missing_index` defaults on (spec scenario S4 merges with no
    /// options set and still observes a performance warning).
    fn default() -> Self {
        Self {
            on_create: None,
            on_match: None,
            warn_on_missing_index: true,
        }
    }
}

impl NodeMergeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_create(mut self, props: Properties) -> Self {
        self.on_create = Some(props);
        self
    }

    pub fn on_match(mut self, props: Properties) -> Self {
        self.on_match = Some(props);
        self
    }

    pub fn warn_on_missing_index(mut self, warn: bool) -> Self {
        self.warn_on_missing_index = warn;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct EdgeMergeOptions {
    pub on_create: Option<Properties>,
    pub on_match: Option<Properties>,
}

impl EdgeMergeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_create(mut self, props: Properties) -> Self {
        self.on_create = Some(props);
        self
    }

    pub fn on_match(mut self, props: Properties) -> Self {
        self.on_match = Some(props);
        self
    }
}

#[derive(Debug, Clone)]
pub struct MergeNodeOutcome {
    pub node: Node,
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct MergeEdgeOutcome {
    pub edge: Edge,
    pub created: bool,
}

fn merge_shallow(base: &Properties, overlay: &Properties) -> Properties {
    let mut merged = base.clone();
    for (key, value) in overlay {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

fn union_in_order(sets: impl IntoIterator<Item = Properties>) -> Properties {
    let mut merged = Properties::new();
    for set in sets {
        for (key, value) in set {
            merged.insert(key, value);
        }
    }
    merged
}

fn row_to_node_tuple(row: &Row<'_>) -> rusqlite::Result<(NodeId, String, String, i64, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn materialize_node(
    (id, node_type, properties_json, created_at, updated_at): (NodeId, String, String, i64, i64),
) -> GraphResult<Node> {
    Ok(Node {
        id,
        node_type,
        properties: serde_json::from_str(&properties_json)?,
        created_at: crate::types::Timestamp(created_at),
        updated_at: crate::types::Timestamp(updated_at),
    })
}

/// Run the `SELECT * FROM nodes WHERE type = ? AND json_extract(...) = ? AND
/// ...` match query for `mergeNode` (spec §4.5 step 3).
fn find_matching_nodes(
    conn: &Connection,
    node_type: &str,
    match_props: &Properties,
) -> GraphResult<Vec<Node>> {
    let mut sql = String::from(
        "SELECT id, type, properties, created_at, updated_at FROM nodes WHERE type = ?",
    );
    let mut bound: Vec<SqlValue> = vec![SqlValue::Text(node_type.to_string())];
    for (key, value) in match_props {
        index_mgmt::validate_identifier("property", key)?;
        sql.push_str(&format!(" AND json_extract(properties, '$.{key}') = ?"));
        bound.push(json_value_to_sql(value));
    }

    let mut stmt = conn.prepare(&sql).with_op("merge_node: prepare match query")?;
    let rows = stmt
        .query_map(params_from_iter(bound.iter()), row_to_node_tuple)
        .with_op("merge_node: execute match query")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_op("merge_node: collect match rows")?;
    rows.into_iter().map(materialize_node).collect()
}

/// `mergeNode(type, matchProps, baseProps?, options) -> {node, created}`
/// (spec §4.5).
pub(crate) fn merge_node(
    conn: &Connection,
    schema: Option<&Schema>,
    node_type: &str,
    match_props: Properties,
    base_props: Option<Properties>,
    options: NodeMergeOptions,
) -> GraphResult<MergeNodeOutcome> {
    validate_node_type(schema, node_type)?;
    if match_props.is_empty() {
        return Err(GraphError::EmptyMatch);
    }

    if options.warn_on_missing_index {
        if let Some((first_key, _)) = match_props.iter().next() {
            let name = index_mgmt::index_name(node_type, first_key);
            if !index_mgmt::index_exists(conn, &name)? {
                warn!(
                    node_type,
                    property = first_key,
                    "mergeNode: no property index backs the match key; this scans every node of this type"
                );
            }
        }
    }

    let matches = find_matching_nodes(conn, node_type, &match_props)?;

    match matches.len() {
        0 => {
            let properties = union_in_order(
                [Some(match_props), base_props, options.on_create]
                    .into_iter()
                    .flatten(),
            );
            let node = store::create_node(conn, schema, node_type, properties)?;
            Ok(MergeNodeOutcome { node, created: true })
        }
        1 => {
            let existing = matches.into_iter().next().unwrap();
            let on_match = options.on_match.unwrap_or_default();
            let node = store::update_node(conn, schema, existing.id, on_match)?;
            Ok(MergeNodeOutcome { node, created: false })
        }
        _ => Err(GraphError::merge_conflict(
            node_type.to_string(),
            serde_json::Value::Object(match_props),
            matches.iter().map(|n| n.id).collect(),
        )),
    }
}

fn row_to_edge_tuple(
    row: &Row<'_>,
) -> rusqlite::Result<(EdgeId, String, NodeId, NodeId, Option<String>, i64)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn materialize_edge(
    (id, edge_type, from, to, properties_json, created_at): (
        EdgeId,
        String,
        NodeId,
        NodeId,
        Option<String>,
        i64,
    ),
) -> GraphResult<Edge> {
    Ok(Edge {
        id,
        edge_type,
        from,
        to,
        properties: properties_json
            .map(|j| serde_json::from_str(&j))
            .transpose()?,
        created_at: crate::types::Timestamp(created_at),
    })
}

fn find_matching_edges(
    conn: &Connection,
    from: NodeId,
    edge_type: &str,
    to: NodeId,
) -> GraphResult<Vec<Edge>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT id, type, from_id, to_id, properties, created_at FROM edges WHERE from_id = ?1 AND type = ?2 AND to_id = ?3",
        )
        .with_op("merge_edge: prepare match query")?;
    let rows = stmt
        .query_map(
            rusqlite::params![from, edge_type, to],
            row_to_edge_tuple,
        )
        .with_op("merge_edge: execute match query")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_op("merge_edge: collect match rows")?;
    rows.into_iter().map(materialize_edge).collect()
}

/// `mergeEdge(from, type, to, properties?, options) -> {edge, created}`.
/// Matches on the triple `(from, type, to)` (spec §4.5).
pub(crate) fn merge_edge(
    conn: &Connection,
    schema: Option<&Schema>,
    from: NodeId,
    edge_type: &str,
    to: NodeId,
    properties: Option<Properties>,
    options: EdgeMergeOptions,
) -> GraphResult<MergeEdgeOutcome> {
    let from_node = store::get_node(conn, from)?.ok_or(GraphError::NotFound {
        kind: "node",
        id: from,
    })?;
    let to_node = store::get_node(conn, to)?.ok_or(GraphError::NotFound {
        kind: "node",
        id: to,
    })?;
    validate_edge_type(schema, edge_type, &from_node.node_type, &to_node.node_type)?;

    let matches = find_matching_edges(conn, from, edge_type, to)?;

    match matches.len() {
        0 => {
            let merged_properties = union_in_order(
                [properties, options.on_create].into_iter().flatten(),
            );
            let properties = if merged_properties.is_empty() {
                None
            } else {
                Some(merged_properties)
            };
            let edge = store::create_edge(conn, schema, from, edge_type, to, properties)?;
            Ok(MergeEdgeOutcome { edge, created: true })
        }
        1 => {
            let existing = matches.into_iter().next().unwrap();
            let has_update = properties.as_ref().is_some_and(|p| !p.is_empty())
                || options.on_match.as_ref().is_some_and(|p| !p.is_empty());
            if !has_update {
                return Ok(MergeEdgeOutcome {
                    edge: existing,
                    created: false,
                });
            }
            let base = existing.properties.clone().unwrap_or_default();
            let merged = merge_shallow(
                &merge_shallow(&base, &properties.unwrap_or_default()),
                &options.on_match.unwrap_or_default(),
            );
            let edge = store::update_edge_properties(conn, existing.id, merged)?;
            Ok(MergeEdgeOutcome { edge, created: false })
        }
        _ => Err(GraphError::merge_conflict(
            edge_type.to_string(),
            serde_json::json!({ "from": from, "type": edge_type, "to": to }),
            matches.iter().map(|e| e.id).collect(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::schema::bootstrap(&conn).unwrap();
        conn
    }

    fn props(pairs: &[(&str, serde_json::Value)]) -> Properties {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn create_branch_combines_match_base_and_on_create() {
        let conn = open();
        let outcome = merge_node(
            &conn,
            None,
            "Job",
            props(&[("url", "u".into())]),
            Some(props(&[("title", "t".into())])),
            NodeMergeOptions::new()
                .on_create(props(&[("status", "new".into())]))
                .warn_on_missing_index(false),
        )
        .unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.node.properties["url"], "u");
        assert_eq!(outcome.node.properties["title"], "t");
        assert_eq!(outcome.node.properties["status"], "new");
    }

    #[test]
    fn second_call_matches_and_does_not_duplicate() {
        let conn = open();
        let first = merge_node(
            &conn,
            None,
            "Job",
            props(&[("url", "u".into())]),
            Some(props(&[("title", "t".into())])),
            NodeMergeOptions::new().warn_on_missing_index(false),
        )
        .unwrap();
        assert!(first.created);

        let second = merge_node(
            &conn,
            None,
            "Job",
            props(&[("url", "u".into())]),
            Some(props(&[("title", "other".into())])),
            NodeMergeOptions::new().warn_on_missing_index(false),
        )
        .unwrap();
        assert!(!second.created);
        assert_eq!(second.node.id, first.node.id);
    }

    #[test]
    fn match_branch_ignores_base_props_applies_on_match() {
        let conn = open();
        let created = merge_node(
            &conn,
            None,
            "Company",
            props(&[("name", "Tech".into())]),
            None,
            NodeMergeOptions::new().warn_on_missing_index(false),
        )
        .unwrap();

        let matched = merge_node(
            &conn,
            None,
            "Company",
            props(&[("name", "Tech".into())]),
            Some(props(&[("ignored", true.into())])),
            NodeMergeOptions::new()
                .on_match(props(&[("employees", 10.into())]))
                .warn_on_missing_index(false),
        )
        .unwrap();

        assert_eq!(matched.node.id, created.node.id);
        assert_eq!(matched.node.properties["employees"], 10);
        assert!(!matched.node.properties.contains_key("ignored"));
    }

    #[test]
    fn conflict_on_multiple_matches_never_mutates() {
        let conn = open();
        store::create_node(&conn, None, "Company", props(&[("name", "Tech".into())])).unwrap();
        store::create_node(&conn, None, "Company", props(&[("name", "Tech".into())])).unwrap();

        let err = merge_node(
            &conn,
            None,
            "Company",
            props(&[("name", "Tech".into())]),
            None,
            NodeMergeOptions::new().warn_on_missing_index(false),
        )
        .unwrap_err();

        assert!(matches!(err, GraphError::MergeConflict { .. }));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM nodes WHERE type = 'Company'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn unsafe_match_key_is_rejected_rather_than_interpolated() {
        let conn = open();
        let err = merge_node(
            &conn,
            None,
            "Job",
            props(&[("url'; DROP TABLE nodes; --", "u".into())]),
            None,
            NodeMergeOptions::new().warn_on_missing_index(false),
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::InvalidType(_)));
    }

    #[test]
    fn empty_match_props_rejected() {
        let conn = open();
        let err = merge_node(&conn, None, "Job", Properties::new(), None, NodeMergeOptions::new())
            .unwrap_err();
        assert!(matches!(err, GraphError::EmptyMatch));
    }

    #[test]
    fn edge_merge_create_then_match_is_idempotent() {
        let conn = open();
        let a = store::create_node(&conn, None, "P", Properties::new()).unwrap();
        let b = store::create_node(&conn, None, "P", Properties::new()).unwrap();

        let first = merge_edge(
            &conn,
            None,
            a.id,
            "KNOWS",
            b.id,
            Some(props(&[("since", 2020.into())])),
            EdgeMergeOptions::new(),
        )
        .unwrap();
        assert!(first.created);

        let second = merge_edge(
            &conn,
            None,
            a.id,
            "KNOWS",
            b.id,
            None,
            EdgeMergeOptions::new().on_match(props(&[("since", 2021.into())])),
        )
        .unwrap();
        assert!(!second.created);
        assert_eq!(second.edge.id, first.edge.id);
        assert_eq!(second.edge.properties.unwrap()["since"], 2021);
    }

    #[test]
    fn edge_merge_match_with_no_updates_returns_unchanged() {
        let conn = open();
        let a = store::create_node(&conn, None, "P", Properties::new()).unwrap();
        let b = store::create_node(&conn, None, "P", Properties::new()).unwrap();
        merge_edge(&conn, None, a.id, "KNOWS", b.id, None, EdgeMergeOptions::new()).unwrap();

        let second =
            merge_edge(&conn, None, a.id, "KNOWS", b.id, None, EdgeMergeOptions::new()).unwrap();
        assert!(!second.created);
        assert!(second.edge.properties.is_none());
    }
}
