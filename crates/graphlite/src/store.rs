//! C2: Entity Store. CRUD for nodes and edges, property (de)serialization,
//! and schema validation.
//!
//! These are free functions over `&Connection` rather than methods on
//! [`crate::GraphDb`] so that [`crate::transaction::TransactionContext`]
//! can call the exact same logic against the connection it already holds
//! (see [`crate::db::GraphHandle`]).

use rusqlite::{params, OptionalExtension, Row};
use tracing::warn;

use crate::error::{GraphError, GraphResult, WithOp};
use crate::schema::Schema;
use crate::types::{Edge, EdgeId, Node, NodeId, Properties, Timestamp};

/// Validate a node/edge type name against the optional schema. An absent
/// schema accepts any non-empty string (spec §3).
pub(crate) fn validate_node_type(schema: Option<&Schema>, node_type: &str) -> GraphResult<()> {
    if node_type.is_empty() {
        return Err(GraphError::InvalidType("type must not be empty".into()));
    }
    if let Some(schema) = schema {
        if !schema.allows_node_type(node_type) {
            return Err(GraphError::InvalidType(format!(
                "unknown node type: {node_type}"
            )));
        }
    }
    Ok(())
}

pub(crate) fn validate_edge_type(
    schema: Option<&Schema>,
    edge_type: &str,
    from_type: &str,
    to_type: &str,
) -> GraphResult<()> {
    if edge_type.is_empty() {
        return Err(GraphError::InvalidType("type must not be empty".into()));
    }
    if let Some(schema) = schema {
        if !schema.allows_edge_type(edge_type) {
            return Err(GraphError::InvalidType(format!(
                "unknown edge type: {edge_type}"
            )));
        }
        if let Some(spec) = schema.edge_type(edge_type) {
            if let Some(expected) = &spec.from_type {
                if expected != from_type {
                    return Err(GraphError::InvalidType(format!(
                        "edge type {edge_type} requires from-type {expected}, got {from_type}"
                    )));
                }
            }
            if let Some(expected) = &spec.to_type {
                if expected != to_type {
                    return Err(GraphError::InvalidType(format!(
                        "edge type {edge_type} requires to-type {expected}, got {to_type}"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Warn (never fail) on properties absent from the schema's declared set
/// for this type, per spec §3 ("warns on unknown properties").
fn warn_unknown_properties(schema: Option<&Schema>, node_type: &str, properties: &Properties) {
    let Some(schema) = schema else { return };
    let Some(type_schema) = schema.node_type(node_type) else {
        return;
    };
    if type_schema.properties.is_empty() {
        return;
    }
    for key in properties.keys() {
        if !type_schema.properties.contains(key) {
            warn!(node_type, property = key, "unknown property for node type");
        }
    }
}

/// Reject a zero id before it reaches a query. Ids are SQLite-autoincrement
/// rowids starting at 1, so 0 can never name a real row; spec §4.2 calls
/// this case out as `INVALID_ID` rather than a plain not-found.
fn check_id(id: u64) -> GraphResult<()> {
    if id == 0 {
        return Err(GraphError::invalid_id(id));
    }
    Ok(())
}

fn serialize_properties(properties: &Properties) -> GraphResult<String> {
    serde_json::to_string(properties).map_err(GraphError::from)
}

fn deserialize_properties(raw: &str) -> GraphResult<Properties> {
    serde_json::from_str(raw).map_err(GraphError::from)
}

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<(NodeId, String, String, i64, i64)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn materialize_node(
    (id, node_type, properties_json, created_at, updated_at): (NodeId, String, String, i64, i64),
) -> GraphResult<Node> {
    Ok(Node {
        id,
        node_type,
        properties: deserialize_properties(&properties_json)?,
        created_at: Timestamp(created_at),
        updated_at: Timestamp(updated_at),
    })
}

pub(crate) fn create_node(
    conn: &rusqlite::Connection,
    schema: Option<&Schema>,
    node_type: &str,
    properties: Properties,
) -> GraphResult<Node> {
    validate_node_type(schema, node_type)?;
    warn_unknown_properties(schema, node_type, &properties);
    let properties_json = serialize_properties(&properties)?;
    let now = Timestamp::now();

    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO nodes (type, properties, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .with_op("create_node: prepare")?;
    stmt.execute(params![node_type, properties_json, now.0, now.0])
        .with_op("create_node: insert")?;
    let id = conn.last_insert_rowid() as NodeId;

    Ok(Node {
        id,
        node_type: node_type.to_string(),
        properties,
        created_at: now,
        updated_at: now,
    })
}

pub(crate) fn get_node(conn: &rusqlite::Connection, id: NodeId) -> GraphResult<Option<Node>> {
    check_id(id)?;
    let mut stmt = conn
        .prepare_cached("SELECT id, type, properties, created_at, updated_at FROM nodes WHERE id = ?1")
        .with_op("get_node: prepare")?;
    let row = stmt
        .query_row([id], row_to_node)
        .optional()
        .with_op("get_node: query")?;
    row.map(materialize_node).transpose()
}

pub(crate) fn update_node(
    conn: &rusqlite::Connection,
    schema: Option<&Schema>,
    id: NodeId,
    partial: Properties,
) -> GraphResult<Node> {
    let existing = get_node(conn, id)?.ok_or(GraphError::NotFound { kind: "node", id })?;

    let mut merged = existing.properties;
    for (key, value) in partial {
        merged.insert(key, value);
    }
    warn_unknown_properties(schema, &existing.node_type, &merged);
    let properties_json = serialize_properties(&merged)?;
    let now = Timestamp::now();

    let mut stmt = conn
        .prepare_cached("UPDATE nodes SET properties = ?1, updated_at = ?2 WHERE id = ?3")
        .with_op("update_node: prepare")?;
    stmt.execute(params![properties_json, now.0, id])
        .with_op("update_node: update")?;

    Ok(Node {
        id,
        node_type: existing.node_type,
        properties: merged,
        created_at: existing.created_at,
        updated_at: now,
    })
}

pub(crate) fn delete_node(conn: &rusqlite::Connection, id: NodeId) -> GraphResult<bool> {
    check_id(id)?;
    let mut stmt = conn
        .prepare_cached("DELETE FROM nodes WHERE id = ?1")
        .with_op("delete_node: prepare")?;
    let changed = stmt.execute([id]).with_op("delete_node: delete")?;
    Ok(changed > 0)
}

fn row_to_edge(
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
        properties: properties_json.map(|j| deserialize_properties(&j)).transpose()?,
        created_at: Timestamp(created_at),
    })
}

pub(crate) fn create_edge(
    conn: &rusqlite::Connection,
    schema: Option<&Schema>,
    from: NodeId,
    edge_type: &str,
    to: NodeId,
    properties: Option<Properties>,
) -> GraphResult<Edge> {
    let from_node = get_node(conn, from)?.ok_or(GraphError::NotFound {
        kind: "node",
        id: from,
    })?;
    let to_node = get_node(conn, to)?.ok_or(GraphError::NotFound {
        kind: "node",
        id: to,
    })?;
    validate_edge_type(schema, edge_type, &from_node.node_type, &to_node.node_type)?;

    let properties_json = properties.as_ref().map(serialize_properties).transpose()?;
    let now = Timestamp::now();

    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO edges (type, from_id, to_id, properties, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .with_op("create_edge: prepare")?;
    stmt.execute(params![edge_type, from, to, properties_json, now.0])
        .with_op("create_edge: insert")?;
    let id = conn.last_insert_rowid() as EdgeId;

    Ok(Edge {
        id,
        edge_type: edge_type.to_string(),
        from,
        to,
        properties,
        created_at: now,
    })
}

/// Overwrite an edge's property map in place (used by the merge engine's
/// MATCH branch; edges carry no `updatedAt` in the data model, only
/// `createdAt`, so there is no timestamp to advance here).
pub(crate) fn update_edge_properties(
    conn: &rusqlite::Connection,
    id: EdgeId,
    properties: Properties,
) -> GraphResult<Edge> {
    let existing = get_edge(conn, id)?.ok_or(GraphError::NotFound { kind: "edge", id })?;
    let properties_json = serialize_properties(&properties)?;

    let mut stmt = conn
        .prepare_cached("UPDATE edges SET properties = ?1 WHERE id = ?2")
        .with_op("update_edge_properties: prepare")?;
    stmt.execute(params![properties_json, id])
        .with_op("update_edge_properties: update")?;

    Ok(Edge {
        properties: Some(properties),
        ..existing
    })
}

pub(crate) fn get_edge(conn: &rusqlite::Connection, id: EdgeId) -> GraphResult<Option<Edge>> {
    check_id(id)?;
    let mut stmt = conn
        .prepare_cached(
            "SELECT id, type, from_id, to_id, properties, created_at FROM edges WHERE id = ?1",
        )
        .with_op("get_edge: prepare")?;
    let row = stmt
        .query_row([id], row_to_edge)
        .optional()
        .with_op("get_edge: query")?;
    row.map(materialize_edge).transpose()
}

pub(crate) fn delete_edge(conn: &rusqlite::Connection, id: EdgeId) -> GraphResult<bool> {
    check_id(id)?;
    let mut stmt = conn
        .prepare_cached("DELETE FROM edges WHERE id = ?1")
        .with_op("delete_edge: prepare")?;
    let changed = stmt.execute([id]).with_op("delete_edge: delete")?;
    Ok(changed > 0)
}
