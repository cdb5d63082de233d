//! The closed error taxonomy surfaced to callers (spec §7).
//!
//! All validation, lookup, traversal, merge, transaction, and index errors
//! collapse into this single tagged enum rather than a per-module error
//! hierarchy, one `thiserror` sum type with payloads instead of a class per
//! failure mode.

use crate::types::NodeId;
use thiserror::Error;

/// Every error the engine can surface.
#[derive(Debug, Error)]
pub enum GraphError {
    /// `type` was rejected by the schema, or is empty.
    #[error("invalid node or edge type: {0}")]
    InvalidType(String),

    /// `properties` failed schema or shape validation.
    #[error("invalid properties: {0}")]
    InvalidProperties(String),

    /// An id argument was not a positive integer.
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// A node or edge lookup by id found nothing.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: u64 },

    /// A traversal's start node does not exist.
    #[error("traversal start node not found: {0}")]
    StartNotFound(NodeId),

    /// `minDepth > maxDepth`, or either is negative.
    #[error("invalid depth bounds: min={min_depth}, max={max_depth}")]
    InvalidDepth { min_depth: i64, max_depth: i64 },

    /// `mergeNode`/`mergeEdge` called with an empty match set.
    #[error("merge match criteria must be non-empty")]
    EmptyMatch,

    /// The match set for a merge resolved to more than one entity.
    #[error("merge conflict on {type_name}: {} candidates matched {match_props}", conflicting_ids.len())]
    MergeConflict {
        type_name: String,
        match_props: serde_json::Value,
        conflicting_ids: Vec<NodeId>,
    },

    /// An operation was attempted on a transaction that already committed
    /// or rolled back.
    #[error("transaction already finalized")]
    TransactionFinalized,

    /// `savepoint(name)` was called with a name already active.
    #[error("savepoint already exists: {0}")]
    SavepointExists(String),

    /// `rollbackTo`/`releaseSavepoint` named a savepoint that is not active.
    #[error("savepoint not found: {0}")]
    SavepointNotFound(String),

    /// A property index by that name does not exist.
    #[error("index not found: {0}")]
    IndexNotFound(String),

    /// Export data carried an unsupported `metadata.version`.
    #[error("unsupported export schema version: {0}")]
    UnsupportedVersion(String),

    /// The underlying storage engine faulted; `operation` names the call
    /// site so the wrapped error isn't anonymous.
    #[error("storage error during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Property (de)serialization round-trip failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GraphError {
    pub fn invalid_id(value: impl std::fmt::Display) -> Self {
        Self::InvalidId(value.to_string())
    }

    pub fn not_found(kind: &'static str, id: u64) -> Self {
        Self::NotFound { kind, id }
    }

    pub fn merge_conflict(
        type_name: impl Into<String>,
        match_props: serde_json::Value,
        conflicting_ids: Vec<NodeId>,
    ) -> Self {
        Self::MergeConflict {
            type_name: type_name.into(),
            match_props,
            conflicting_ids,
        }
    }

    pub fn storage(operation: &'static str, source: rusqlite::Error) -> Self {
        Self::Storage { operation, source }
    }

    /// True when the underlying storage fault is a transient lock-contention
    /// condition (`SQLITE_BUSY`/`SQLITE_LOCKED`) rather than a structural
    /// error. `withRetry` uses this to decide whether to back off and retry.
    pub fn is_lock_contention(&self) -> bool {
        matches!(
            self,
            GraphError::Storage { source, .. }
                if matches!(
                    source.sqlite_error_code(),
                    Some(rusqlite::ErrorCode::DatabaseBusy)
                        | Some(rusqlite::ErrorCode::DatabaseLocked)
                )
        )
    }
}

/// Extension trait attaching an operation name to a raw [`rusqlite::Error`]
/// at the call site, per spec §7 ("storage errors are passed through
/// without wrapping except to attach the operation name").
pub(crate) trait WithOp<T> {
    fn with_op(self, operation: &'static str) -> Result<T, GraphError>;
}

impl<T> WithOp<T> for Result<T, rusqlite::Error> {
    fn with_op(self, operation: &'static str) -> Result<T, GraphError> {
        self.map_err(|source| GraphError::storage(operation, source))
    }
}

pub type GraphResult<T> = Result<T, GraphError>;
