//! Data model (spec §3): nodes, edges, property maps, and timestamps.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Stable identifier for a node, assigned monotonically at creation.
pub type NodeId = u64;

/// Stable identifier for an edge, assigned monotonically at creation.
pub type EdgeId = u64;

/// A heterogeneous property mapping: strings, finite numbers, booleans,
/// null, ordered lists, and nested mappings, anything JSON-representable
/// (spec I3). Represented directly as [`serde_json::Value`] (always an
/// `Object`) rather than a parallel enum, since that would just be a lossy
/// reimplementation of the same shape.
pub type Properties = Map<String, Value>;

/// A persisted node (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    pub properties: Properties,
    #[serde(rename = "createdAt")]
    pub created_at: Timestamp,
    #[serde(rename = "updatedAt")]
    pub updated_at: Timestamp,
}

/// A directed, typed edge between two nodes (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
    #[serde(rename = "createdAt")]
    pub created_at: Timestamp,
}

/// Integer seconds since the Unix epoch, as stored; exposed to callers as
/// a real timestamp via [`Timestamp::to_system_time`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// The current wall-clock instant, truncated to whole seconds.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Timestamp(secs as i64)
    }

    pub fn to_system_time(self) -> SystemTime {
        if self.0 >= 0 {
            UNIX_EPOCH + Duration::from_secs(self.0 as u64)
        } else {
            UNIX_EPOCH - Duration::from_secs((-self.0) as u64)
        }
    }
}

/// Direction used by both the join in [`crate::query::NodeQuery`] and the
/// expansion rule in [`crate::traversal::Traversal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
    Both,
}

/// Ascending/descending for `orderBy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Comparison operators for `where(field, op, value)` (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
}

impl CompareOp {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Like => "LIKE",
            CompareOp::In => "IN",
        }
    }
}
