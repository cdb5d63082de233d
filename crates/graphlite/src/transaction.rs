//! Transaction and savepoint management, the `TransactionContext` half.
//!
//! Exposed to the caller's closure inside [`crate::GraphDb::transaction`].
//! Wraps the connection already held by the enclosing `BEGIN`/`COMMIT` and
//! layers a named savepoint stack on top of it.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use rusqlite::Connection;
use tracing::trace;

use crate::db::GraphHandle;
use crate::error::{GraphError, GraphResult, WithOp};
use crate::merge::{self, EdgeMergeOptions, MergeEdgeOutcome, MergeNodeOutcome, NodeMergeOptions};
use crate::query::NodeQuery;
use crate::schema::Schema;
use crate::store;
use crate::traversal::Traversal;
use crate::types::{Edge, EdgeId, Node, NodeId, Properties};

/// Quote an identifier for use in a raw `SAVEPOINT`/`RELEASE`/`ROLLBACK TO`
/// statement, doubling any embedded double-quotes. Spec §4.6: "Savepoint
/// names are quoted verbatim ... to permit hyphens and other punctuation."
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A transaction in progress. Either active or finalized (committed or
/// rolled back) exactly once; any operation on a finalized context fails
/// with [`GraphError::TransactionFinalized`].
pub struct TransactionContext<'a> {
    conn: &'a Connection,
    schema: Option<&'a Schema>,
    finalized: Cell<bool>,
    savepoints: RefCell<HashSet<String>>,
    merge_counter: Cell<u64>,
}

impl<'a> GraphHandle for TransactionContext<'a> {
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> GraphResult<T>) -> GraphResult<T> {
        f(self.conn)
    }

    fn schema(&self) -> Option<&Schema> {
        self.schema
    }
}

impl<'a> TransactionContext<'a> {
    pub(crate) fn new(conn: &'a Connection, schema: Option<&'a Schema>) -> Self {
        Self {
            conn,
            schema,
            finalized: Cell::new(false),
            savepoints: RefCell::new(HashSet::new()),
            merge_counter: Cell::new(0),
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.get()
    }

    fn ensure_active(&self) -> GraphResult<()> {
        if self.finalized.get() {
            return Err(GraphError::TransactionFinalized);
        }
        Ok(())
    }

    /// Commit the enclosing transaction. Finalizes this context.
    pub fn commit(&self) -> GraphResult<()> {
        self.ensure_active()?;
        self.conn
            .execute_batch("COMMIT")
            .with_op("transaction: COMMIT")?;
        self.finalized.set(true);
        Ok(())
    }

    /// Roll back the enclosing transaction. Finalizes this context.
    pub fn rollback(&self) -> GraphResult<()> {
        self.ensure_active()?;
        self.conn
            .execute_batch("ROLLBACK")
            .with_op("transaction: ROLLBACK")?;
        self.finalized.set(true);
        Ok(())
    }

    /// `savepoint(name)`: fails with `SAVEPOINT_EXISTS` on a duplicate name.
    pub fn savepoint(&self, name: &str) -> GraphResult<()> {
        self.ensure_active()?;
        if !self.savepoints.borrow_mut().insert(name.to_string()) {
            return Err(GraphError::SavepointExists(name.to_string()));
        }
        self.conn
            .execute_batch(&format!("SAVEPOINT {}", quote_ident(name)))
            .with_op("transaction: SAVEPOINT")?;
        trace!(savepoint = name, "savepoint created");
        Ok(())
    }

    /// `rollbackTo(name)`: fails with `SAVEPOINT_NOT_FOUND` if absent.
    /// Retains everything written before the savepoint, discards everything
    /// after it; the savepoint itself stays active (it can be rolled back to
    /// again or later released).
    pub fn rollback_to(&self, name: &str) -> GraphResult<()> {
        self.ensure_active()?;
        if !self.savepoints.borrow().contains(name) {
            return Err(GraphError::SavepointNotFound(name.to_string()));
        }
        self.conn
            .execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name)))
            .with_op("transaction: ROLLBACK TO SAVEPOINT")?;
        Ok(())
    }

    /// `releaseSavepoint(name)`: fails with `SAVEPOINT_NOT_FOUND` if absent.
    pub fn release_savepoint(&self, name: &str) -> GraphResult<()> {
        self.ensure_active()?;
        if !self.savepoints.borrow_mut().remove(name) {
            return Err(GraphError::SavepointNotFound(name.to_string()));
        }
        self.conn
            .execute_batch(&format!("RELEASE SAVEPOINT {}", quote_ident(name)))
            .with_op("transaction: RELEASE SAVEPOINT")?;
        Ok(())
    }

    /// Run `f` inside a fresh, internally-named savepoint that the caller
    /// never sees: released on success, rolled back (then released) on
    /// failure. Used by the merge engine so a match-then-write sequence is
    /// isolated even when it runs nested inside a caller's own
    /// `transaction(fn)` (spec §4.5: "implicit savepoint if called inside
    /// one").
    pub(crate) fn with_internal_savepoint<T>(
        &self,
        f: impl FnOnce() -> GraphResult<T>,
    ) -> GraphResult<T> {
        let n = self.merge_counter.get();
        self.merge_counter.set(n + 1);
        let name = format!("__graphlite_internal_{n}");
        let quoted = quote_ident(&name);

        self.conn
            .execute_batch(&format!("SAVEPOINT {quoted}"))
            .with_op("internal savepoint: SAVEPOINT")?;

        match f() {
            Ok(value) => {
                self.conn
                    .execute_batch(&format!("RELEASE SAVEPOINT {quoted}"))
                    .with_op("internal savepoint: RELEASE")?;
                Ok(value)
            }
            Err(err) => {
                self.conn
                    .execute_batch(&format!(
                        "ROLLBACK TO SAVEPOINT {quoted}; RELEASE SAVEPOINT {quoted}"
                    ))
                    .with_op("internal savepoint: ROLLBACK")?;
                Err(err)
            }
        }
    }

    // ---- Entity Store (C2), usable inside the transaction -----------------

    pub fn create_node(&self, node_type: &str, properties: Properties) -> GraphResult<Node> {
        self.ensure_active()?;
        store::create_node(self.conn, self.schema, node_type, properties)
    }

    pub fn get_node(&self, id: NodeId) -> GraphResult<Option<Node>> {
        self.ensure_active()?;
        store::get_node(self.conn, id)
    }

    pub fn update_node(&self, id: NodeId, partial: Properties) -> GraphResult<Node> {
        self.ensure_active()?;
        store::update_node(self.conn, self.schema, id, partial)
    }

    pub fn delete_node(&self, id: NodeId) -> GraphResult<bool> {
        self.ensure_active()?;
        store::delete_node(self.conn, id)
    }

    pub fn create_edge(
        &self,
        from: NodeId,
        edge_type: &str,
        to: NodeId,
        properties: Option<Properties>,
    ) -> GraphResult<Edge> {
        self.ensure_active()?;
        store::create_edge(self.conn, self.schema, from, edge_type, to, properties)
    }

    pub fn get_edge(&self, id: EdgeId) -> GraphResult<Option<Edge>> {
        self.ensure_active()?;
        store::get_edge(self.conn, id)
    }

    pub fn delete_edge(&self, id: EdgeId) -> GraphResult<bool> {
        self.ensure_active()?;
        store::delete_edge(self.conn, id)
    }

    // ---- Node Query Builder (C3) / Traversal Engine (C4) -------------------

    pub fn nodes(&self, node_type: impl Into<String>) -> NodeQuery<'_, Self> {
        NodeQuery::new(self, node_type.into())
    }

    pub fn traverse(&self, start: NodeId) -> GraphResult<Traversal<'_, Self>> {
        self.ensure_active()?;
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
        self.ensure_active()?;
        self.with_internal_savepoint(|| {
            merge::merge_node(self.conn, self.schema, node_type, match_props, base_props, options)
        })
    }

    pub fn merge_edge(
        &self,
        from: NodeId,
        edge_type: &str,
        to: NodeId,
        properties: Option<Properties>,
        options: EdgeMergeOptions,
    ) -> GraphResult<MergeEdgeOutcome> {
        self.ensure_active()?;
        self.with_internal_savepoint(|| {
            merge::merge_edge(self.conn, self.schema, from, edge_type, to, properties, options)
        })
    }

    // ---- Property-index management (C6) ------------------------------------

    pub fn create_property_index(
        &self,
        node_type: &str,
        property: &str,
        unique: bool,
    ) -> GraphResult<()> {
        self.ensure_active()?;
        crate::index_mgmt::create_property_index(self.conn, self.schema, node_type, property, unique)
    }

    pub fn list_indexes(&self) -> GraphResult<Vec<String>> {
        self.ensure_active()?;
        crate::index_mgmt::list_indexes(self.conn)
    }

    pub fn drop_index(&self, name: &str) -> GraphResult<()> {
        self.ensure_active()?;
        crate::index_mgmt::drop_index(self.conn, name)
    }
}
