//! graphlite: an embedded property-graph database layered on SQLite.
//!
//! Applications model their domain as typed nodes with key-value
//! properties and typed directed edges between nodes, then interrogate
//! that graph with three orthogonal query surfaces: a fluent node
//! filter/relationship query ([`query::NodeQuery`]), a stateful traversal
//! walker over edges ([`traversal::Traversal`]), and idempotent upsert
//! ("merge") operations ([`merge`]).
//!
//! The storage engine underneath is SQLite via `rusqlite`: prepared
//! statements, transactions and named savepoints, and `json_extract` on a
//! text column back every operation in this crate.

pub mod db;
pub mod error;
pub mod index_mgmt;
pub mod io;
pub mod merge;
pub mod query;
pub mod retry;
pub mod schema;
pub mod store;
pub mod transaction;
pub mod traversal;
pub mod types;
pub mod write_queue;

pub use db::{GraphDb, GraphHandle};
pub use error::{GraphError, GraphResult};
pub use io::{EdgeExport, ExportData, ExportMetadata, NodeExport};
pub use merge::{EdgeMergeOptions, MergeEdgeOutcome, MergeNodeOutcome, NodeMergeOptions};
pub use query::NodeQuery;
pub use retry::{with_retry, RetryOptions};
pub use schema::{EdgeTypeSchema, NodeTypeSchema, Schema, SchemaBuilder};
pub use transaction::TransactionContext;
pub use traversal::{PathsOptions, Traversal};
pub use types::{CompareOp, Direction, Edge, EdgeId, Node, NodeId, Properties, SortOrder, Timestamp};
pub use write_queue::WriteQueue;
