//! C1: Schema & Storage Bootstrap.
//!
//! Creates the `nodes`/`edges`/`_metadata` tables and standing indexes on
//! first open, idempotently, and enables foreign-key cascade. Also defines
//! the optional caller-supplied [`Schema`] value used by validation in
//! [`crate::store`] and [`crate::merge`].

use std::collections::{HashMap, HashSet};

use rusqlite::Connection;
use tracing::debug;

use crate::error::{GraphResult, WithOp};

/// Schema version recorded in `_metadata`. Only `"1"` is understood; a
/// mismatch is a hard error rather than an attempted migration, since this
/// engine ships no schema migration tool (spec Non-goals).
pub const SCHEMA_VERSION: &str = "1";

const CREATE_NODES: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    properties TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)
"#;

const CREATE_EDGES: &str = r#"
CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    from_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    to_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    properties TEXT,
    created_at INTEGER NOT NULL
)
"#;

const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS _metadata (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)
"#;

const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(type);
CREATE INDEX IF NOT EXISTS idx_edges_type ON edges(type);
CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_id);
CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id);
CREATE INDEX IF NOT EXISTS idx_edges_from_type ON edges(from_id, type);
CREATE INDEX IF NOT EXISTS idx_edges_to_type ON edges(to_id, type);
CREATE INDEX IF NOT EXISTS idx_nodes_created_at ON nodes(created_at);
CREATE INDEX IF NOT EXISTS idx_nodes_updated_at ON nodes(updated_at);
CREATE INDEX IF NOT EXISTS idx_edges_created_at ON edges(created_at);
"#;

/// Create the two entity tables, the metadata table, and standing indexes
/// if they do not already exist, and enable foreign-key enforcement.
/// Idempotent: safe to call on every open.
pub(crate) fn bootstrap(conn: &Connection) -> GraphResult<()> {
    conn.pragma_update(None, "foreign_keys", "ON")
        .with_op("bootstrap: enable foreign_keys")?;

    conn.execute(CREATE_NODES, []).with_op("bootstrap: nodes table")?;
    conn.execute(CREATE_EDGES, []).with_op("bootstrap: edges table")?;
    conn.execute(CREATE_METADATA, [])
        .with_op("bootstrap: metadata table")?;
    conn.execute_batch(CREATE_INDEXES)
        .with_op("bootstrap: standing indexes")?;

    conn.execute(
        "INSERT OR IGNORE INTO _metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION],
    )
    .with_op("bootstrap: record schema_version")?;

    debug!(version = SCHEMA_VERSION, "schema bootstrap complete");
    Ok(())
}

/// Declares which node and edge types a database will accept, and what
/// properties/constraints apply to each. A plain data value (per the
/// Design Notes: "Schema as a data value, not a class hierarchy") rather
/// than a trait hierarchy. Validation is just lookups against these maps.
///
/// When absent from [`crate::GraphDb`], any string type is accepted and no
/// property-name warnings are emitted.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub nodes: HashMap<String, NodeTypeSchema>,
    pub edges: HashMap<String, EdgeTypeSchema>,
}

#[derive(Debug, Clone, Default)]
pub struct NodeTypeSchema {
    /// Expected property names; unknown keys are allowed but warned on.
    pub properties: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EdgeTypeSchema {
    pub from_type: Option<String>,
    pub to_type: Option<String>,
    pub properties: HashSet<String>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn node_type(&self, type_name: &str) -> Option<&NodeTypeSchema> {
        self.nodes.get(type_name)
    }

    pub fn edge_type(&self, type_name: &str) -> Option<&EdgeTypeSchema> {
        self.edges.get(type_name)
    }

    pub fn allows_node_type(&self, type_name: &str) -> bool {
        self.nodes.is_empty() || self.nodes.contains_key(type_name)
    }

    pub fn allows_edge_type(&self, type_name: &str) -> bool {
        self.edges.is_empty() || self.edges.contains_key(type_name)
    }
}

/// Small builder for composing a [`Schema`] value.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn node_type(
        mut self,
        name: impl Into<String>,
        properties: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.schema.nodes.insert(
            name.into(),
            NodeTypeSchema {
                properties: properties.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    pub fn edge_type(
        mut self,
        name: impl Into<String>,
        from_type: Option<impl Into<String>>,
        to_type: Option<impl Into<String>>,
        properties: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.schema.edges.insert(
            name.into(),
            EdgeTypeSchema {
                from_type: from_type.map(Into::into),
                to_type: to_type.map(Into::into),
                properties: properties.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    pub fn build(self) -> Schema {
        self.schema
    }
}
