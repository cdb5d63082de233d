//! C6: Import/export. The crate's only file-format surface beyond the
//! storage file itself (spec §6).
//!
//! `export()` walks both entity tables under the caller's connection and
//! produces the JSON shape spec §6 defines verbatim, with `createdAt`/
//! `updatedAt`/`exportedAt` rendered as RFC 3339 (ISO 8601) strings via
//! `chrono` at the serialization boundary. `import()` is deliberately
//! additive. Spec §9's Open Question leaves MERGE-on-import unspecified, so
//! this re-creates every entity via `createNode`/`createEdge` rather than
//! guessing at dedup semantics.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, GraphResult, WithOp};
use crate::schema::SCHEMA_VERSION;
use crate::transaction::TransactionContext;
use crate::types::{EdgeId, NodeId, Properties};

fn to_rfc3339(seconds: i64) -> String {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap())
        .to_rfc3339()
}

fn from_rfc3339(value: &str) -> GraphResult<i64> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc).timestamp())
        .map_err(|e| GraphError::InvalidProperties(format!("invalid timestamp '{value}': {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExport {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    pub properties: Properties,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeExport {
    pub id: EdgeId,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub version: String,
    #[serde(rename = "exportedAt")]
    pub exported_at: String,
}

/// The whole-database export shape of spec §6, `metadata.version = "1"`
/// being the only value readers of `import()` accept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportData {
    pub nodes: Vec<NodeExport>,
    pub edges: Vec<EdgeExport>,
    pub metadata: ExportMetadata,
}

pub(crate) fn export(conn: &Connection) -> GraphResult<ExportData> {
    let mut node_stmt = conn
        .prepare("SELECT id, type, properties, created_at, updated_at FROM nodes ORDER BY id")
        .with_op("export: prepare nodes")?;
    let nodes = node_stmt
        .query_map([], |row| {
            let id: NodeId = row.get(0)?;
            let node_type: String = row.get(1)?;
            let properties_json: String = row.get(2)?;
            let created_at: i64 = row.get(3)?;
            let updated_at: i64 = row.get(4)?;
            Ok((id, node_type, properties_json, created_at, updated_at))
        })
        .with_op("export: query nodes")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_op("export: collect nodes")?
        .into_iter()
        .map(|(id, node_type, properties_json, created_at, updated_at)| {
            Ok(NodeExport {
                id,
                node_type,
                properties: serde_json::from_str(&properties_json)?,
                created_at: to_rfc3339(created_at),
                updated_at: to_rfc3339(updated_at),
            })
        })
        .collect::<GraphResult<Vec<_>>>()?;

    let mut edge_stmt = conn
        .prepare("SELECT id, type, from_id, to_id, properties, created_at FROM edges ORDER BY id")
        .with_op("export: prepare edges")?;
    let edges = edge_stmt
        .query_map([], |row| {
            let id: EdgeId = row.get(0)?;
            let edge_type: String = row.get(1)?;
            let from: NodeId = row.get(2)?;
            let to: NodeId = row.get(3)?;
            let properties_json: Option<String> = row.get(4)?;
            let created_at: i64 = row.get(5)?;
            Ok((id, edge_type, from, to, properties_json, created_at))
        })
        .with_op("export: query edges")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_op("export: collect edges")?
        .into_iter()
        .map(|(id, edge_type, from, to, properties_json, created_at)| {
            Ok(EdgeExport {
                id,
                edge_type,
                from,
                to,
                properties: properties_json.map(|j| serde_json::from_str(&j)).transpose()?,
                created_at: to_rfc3339(created_at),
            })
        })
        .collect::<GraphResult<Vec<_>>>()?;

    Ok(ExportData {
        nodes,
        edges,
        metadata: ExportMetadata {
            version: SCHEMA_VERSION.to_string(),
            exported_at: Utc::now().to_rfc3339(),
        },
    })
}

/// Re-create every node and edge from `data` inside `ctx`'s transaction.
/// New ids are assigned (spec's `createNode`/`createEdge` always
/// auto-assign); edge endpoints are translated through an old-id → new-id
/// map built while inserting nodes, since the export's edge rows reference
/// the *original* node ids. Timestamps are **not** round-tripped: each
/// `createNode`/`createEdge` call stamps the current time, matching spec
/// §4.6's literal "re-creates entities ... via createNode/createEdge".
pub(crate) fn import(ctx: &TransactionContext<'_>, data: ExportData) -> GraphResult<()> {
    if data.metadata.version != SCHEMA_VERSION {
        return Err(GraphError::UnsupportedVersion(data.metadata.version));
    }

    let mut id_map: HashMap<NodeId, NodeId> = HashMap::with_capacity(data.nodes.len());
    for node in data.nodes {
        // Parsed to validate well-formedness; import does not persist
        // the original instant (see doc comment above).
        from_rfc3339(&node.created_at)?;
        from_rfc3339(&node.updated_at)?;
        let created = ctx.create_node(&node.node_type, node.properties)?;
        id_map.insert(node.id, created.id);
    }

    for edge in data.edges {
        from_rfc3339(&edge.created_at)?;
        let from = *id_map
            .get(&edge.from)
            .ok_or(GraphError::NotFound { kind: "node", id: edge.from })?;
        let to = *id_map
            .get(&edge.to)
            .ok_or(GraphError::NotFound { kind: "node", id: edge.to })?;
        ctx.create_edge(from, &edge.edge_type, to, edge.properties)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::GraphDb;
    use crate::types::Properties;

    #[test]
    fn export_then_import_round_trips_shape() {
        let db = GraphDb::open_in_memory().unwrap();
        let a = db
            .create_node("Person", Properties::from_iter([("name".into(), "Alice".into())]))
            .unwrap();
        let b = db
            .create_node("Person", Properties::from_iter([("name".into(), "Bob".into())]))
            .unwrap();
        db.create_edge(a.id, "KNOWS", b.id, Some(Properties::from_iter([("since".into(), 2020.into())])))
            .unwrap();

        let exported = db.export().unwrap();
        assert_eq!(exported.nodes.len(), 2);
        assert_eq!(exported.edges.len(), 1);
        assert_eq!(exported.metadata.version, "1");

        let db2 = GraphDb::open_in_memory().unwrap();
        db2.import(exported).unwrap();
        assert_eq!(db2.nodes("Person").count().unwrap(), 2);
        let bobs = db2.nodes("Person").where_eq([("name".to_string(), "Bob".into())]).exec().unwrap();
        assert_eq!(bobs.len(), 1);
    }

    #[test]
    fn import_rejects_unsupported_version() {
        let db = GraphDb::open_in_memory().unwrap();
        let bad = ExportData {
            nodes: vec![],
            edges: vec![],
            metadata: ExportMetadata {
                version: "2".to_string(),
                exported_at: Utc::now().to_rfc3339(),
            },
        };
        let err = db.import(bad).unwrap_err();
        assert!(matches!(err, GraphError::UnsupportedVersion(_)));
    }

    #[test]
    fn import_is_additive_not_deduplicating() {
        let db = GraphDb::open_in_memory().unwrap();
        db.create_node("Person", Properties::from_iter([("name".into(), "Alice".into())]))
            .unwrap();
        let exported = db.export().unwrap();

        db.import(exported).unwrap();
        assert_eq!(db.nodes("Person").count().unwrap(), 2);
    }
}
