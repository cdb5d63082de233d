//! The top-level database handle.
//!
//! `GraphDb` owns the single SQLite connection for a database file (or an
//! in-memory database) behind a `parking_lot::Mutex`. Per spec §5 there is a
//! single writer at a time inside one process; the mutex enforces that at
//! the Rust type level rather than leaving it to caller discipline.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::{GraphResult, WithOp};
use crate::merge::{EdgeMergeOptions, MergeEdgeOutcome, MergeNodeOutcome, NodeMergeOptions};
use crate::query::NodeQuery;
use crate::schema::{self, Schema};
use crate::store;
use crate::traversal::Traversal;
use crate::transaction::TransactionContext;
use crate::types::{Edge, EdgeId, Node, NodeId, Properties};

/// A handle usable by both [`GraphDb`] (outside any explicit transaction)
/// and [`TransactionContext`] (inside one). Every read/write operation in
/// this crate is generic over `H: GraphHandle` so the same builder and CRUD
/// code works whether or not the caller opened an explicit transaction.
pub trait GraphHandle {
    /// Run `f` with access to the live connection. For [`GraphDb`] this
    /// acquires the connection mutex for the duration of the call, since each
    /// call outside a transaction is its own implicit transaction (spec
    /// §5). For [`TransactionContext`] this reuses the already-held
    /// connection, so multiple calls share one transaction.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> GraphResult<T>) -> GraphResult<T>;

    fn schema(&self) -> Option<&Schema>;
}

/// An embedded property-graph database.
pub struct GraphDb {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) schema: Option<Schema>,
}

impl GraphHandle for GraphDb {
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> GraphResult<T>) -> GraphResult<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }
}

impl GraphDb {
    /// Open (creating if absent) a database file on disk.
    pub fn open(path: impl AsRef<Path>) -> GraphResult<Self> {
        Self::open_with_schema(path, None)
    }

    /// Open an in-memory database, scoped to this handle's lifetime.
    pub fn open_in_memory() -> GraphResult<Self> {
        Self::open_in_memory_with_schema(None)
    }

    /// Open a database file on disk with an enforced [`Schema`].
    pub fn open_with_schema(path: impl AsRef<Path>, schema: Option<Schema>) -> GraphResult<Self> {
        let conn = Connection::open(path).with_op("open")?;
        Self::from_connection(conn, schema)
    }

    /// Open an in-memory database with an enforced [`Schema`].
    pub fn open_in_memory_with_schema(schema: Option<Schema>) -> GraphResult<Self> {
        let conn = Connection::open_in_memory().with_op("open_in_memory")?;
        Self::from_connection(conn, schema)
    }

    fn from_connection(conn: Connection, schema: Option<Schema>) -> GraphResult<Self> {
        schema::bootstrap(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            schema,
        })
    }

    // ---- Entity Store (C2) -------------------------------------------------

    pub fn create_node(&self, node_type: &str, properties: Properties) -> GraphResult<Node> {
        self.with_conn(|conn| store::create_node(conn, self.schema(), node_type, properties))
    }

    pub fn get_node(&self, id: NodeId) -> GraphResult<Option<Node>> {
        self.with_conn(|conn| store::get_node(conn, id))
    }

    pub fn update_node(&self, id: NodeId, partial: Properties) -> GraphResult<Node> {
        self.with_conn(|conn| store::update_node(conn, self.schema(), id, partial))
    }

    pub fn delete_node(&self, id: NodeId) -> GraphResult<bool> {
        self.with_conn(|conn| store::delete_node(conn, id))
    }

    pub fn create_edge(
        &self,
        from: NodeId,
        edge_type: &str,
        to: NodeId,
        properties: Option<Properties>,
    ) -> GraphResult<Edge> {
        self.with_conn(|conn| {
            store::create_edge(conn, self.schema(), from, edge_type, to, properties)
        })
    }

    pub fn get_edge(&self, id: EdgeId) -> GraphResult<Option<Edge>> {
        self.with_conn(|conn| store::get_edge(conn, id))
    }

    pub fn delete_edge(&self, id: EdgeId) -> GraphResult<bool> {
        self.with_conn(|conn| store::delete_edge(conn, id))
    }

    // ---- Node Query Builder (C3) -------------------------------------------

    pub fn nodes(&self, node_type: impl Into<String>) -> NodeQuery<'_, Self> {
        NodeQuery::new(self, node_type.into())
    }

    // ---- Traversal Engine (C4) ---------------------------------------------

    pub fn traverse(&self, start: NodeId) -> GraphResult<Traversal<'_, Self>> {
        Traversal::new(self, start)
    }

    // ---- Merge Engine (C5) --------------------------------------------------

    pub fn merge_node(
        &self,
        node_type: &str,
        match_props: Properties,
        base_props: Option<Properties>,
        options: NodeMergeOptions,
    ) -> GraphResult<MergeNodeOutcome> {
        self.transaction(|ctx| ctx.merge_node(node_type, match_props, base_props, options))
    }

    pub fn merge_edge(
        &self,
        from: NodeId,
        edge_type: &str,
        to: NodeId,
        properties: Option<Properties>,
        options: EdgeMergeOptions,
    ) -> GraphResult<MergeEdgeOutcome> {
        self.transaction(|ctx| ctx.merge_edge(from, edge_type, to, properties, options))
    }

    // ---- Transaction & Index Management (C6) -------------------------------

    /// Begin a transaction, invoke `f(ctx)`, and auto-commit/auto-rollback
    /// per spec §4.6. If `f` finalizes `ctx` itself (explicit `commit()` or
    /// `rollback()`), that finalization is respected and no second one is
    /// performed.
    pub fn transaction<F, T>(&self, f: F) -> GraphResult<T>
    where
        F: FnOnce(&TransactionContext<'_>) -> GraphResult<T>,
    {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN").with_op("transaction: BEGIN")?;
        let ctx = TransactionContext::new(&conn, self.schema.as_ref());

        let result = f(&ctx);

        if !ctx.is_finalized() {
            match &result {
                Ok(_) => ctx.commit()?,
                Err(_) => ctx.rollback()?,
            }
        }

        result
    }

    pub fn create_property_index(
        &self,
        node_type: &str,
        property: &str,
        unique: bool,
    ) -> GraphResult<()> {
        self.with_conn(|conn| {
            crate::index_mgmt::create_property_index(conn, self.schema(), node_type, property, unique)
        })
    }

    pub fn list_indexes(&self) -> GraphResult<Vec<String>> {
        self.with_conn(crate::index_mgmt::list_indexes)
    }

    pub fn drop_index(&self, name: &str) -> GraphResult<()> {
        self.with_conn(|conn| crate::index_mgmt::drop_index(conn, name))
    }

    // ---- Import / Export (C6) ----------------------------------------------

    pub fn export(&self) -> GraphResult<crate::io::ExportData> {
        self.with_conn(crate::io::export)
    }

    /// Additive import: does not deduplicate against existing rows (spec
    /// §4.6, §9 Open Question; callers wanting merge-on-import must do so
    /// explicitly via `merge_node`/`merge_edge`).
    pub fn import(&self, data: crate::io::ExportData) -> GraphResult<()> {
        self.transaction(|ctx| crate::io::import(ctx, data))
    }
}
