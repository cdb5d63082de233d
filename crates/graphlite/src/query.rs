//! C3: Node Query Builder.
//!
//! `NodeQuery` accumulates an immutable plan (each chaining call consumes
//! `self` and returns a fresh `Self`; nothing here mutates a shared plan in
//! place, per the Design Notes) and compiles it to a single SQL statement
//! against the `nodes`/`edges` tables on execution.

use std::rc::Rc;

use rusqlite::types::Value as SqlValue;
use rusqlite::Row;
use serde_json::Value;

use crate::db::GraphHandle;
use crate::error::{GraphResult, WithOp};
use crate::index_mgmt::validate_identifier;
use crate::types::{CompareOp, Direction, Node, SortOrder};

#[derive(Debug, Clone)]
struct Predicate {
    field: String,
    op: CompareOp,
    value: Value,
}

#[derive(Debug, Clone)]
struct JoinSpec {
    other_type: String,
    edge_type: String,
    direction: Direction,
}

/// A fluent, single-consumption query plan over nodes of one type.
/// Constructed via [`crate::GraphDb::nodes`] or
/// [`crate::transaction::TransactionContext::nodes`].
pub struct NodeQuery<'a, H: GraphHandle> {
    handle: &'a H,
    node_type: String,
    predicates: Vec<Predicate>,
    join: Option<JoinSpec>,
    order_bys: Vec<(String, SortOrder)>,
    limit: Option<i64>,
    offset: Option<i64>,
    post_filter: Option<Rc<dyn Fn(&Node) -> bool>>,
}

impl<'a, H: GraphHandle> NodeQuery<'a, H> {
    pub(crate) fn new(handle: &'a H, node_type: String) -> Self {
        Self {
            handle,
            node_type,
            predicates: Vec::new(),
            join: None,
            order_bys: Vec::new(),
            limit: None,
            offset: None,
            post_filter: None,
        }
    }

    /// `where(mapping)`: AND of equality predicates over JSON-extracted
    /// properties.
    pub fn where_eq(mut self, mapping: impl IntoIterator<Item = (String, Value)>) -> Self {
        for (field, value) in mapping {
            self.predicates.push(Predicate {
                field,
                op: CompareOp::Eq,
                value,
            });
        }
        self
    }

    /// `where(field, op, value)`: a single comparison.
    pub fn where_cmp(mut self, field: impl Into<String>, op: CompareOp, value: Value) -> Self {
        self.predicates.push(Predicate {
            field: field.into(),
            op,
            value,
        });
        self
    }

    /// `connectedTo(otherType, edgeType, direction)`.
    pub fn connected_to(
        mut self,
        other_type: impl Into<String>,
        edge_type: impl Into<String>,
        direction: Direction,
    ) -> Self {
        self.join = Some(JoinSpec {
            other_type: other_type.into(),
            edge_type: edge_type.into(),
            direction,
        });
        self
    }

    /// `filter(predicate)`: applied after materialization, never pushed
    /// into the storage query (Design Notes).
    pub fn filter(mut self, predicate: impl Fn(&Node) -> bool + 'static) -> Self {
        self.post_filter = Some(Rc::new(predicate));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortOrder) -> Self {
        self.order_bys.push((field.into(), direction));
        self
    }

    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: i64) -> Self {
        self.offset = Some(n);
        self
    }

    fn uses_distinct(&self) -> bool {
        matches!(
            self.join,
            Some(JoinSpec {
                direction: Direction::Both,
                ..
            })
        )
    }

    /// Build `SELECT [DISTINCT] n.* FROM nodes n [JOIN ...] WHERE ... [ORDER
    /// BY ...] [LIMIT ...] [OFFSET ...]`, with every value bound as a
    /// parameter, never interpolated. Property names cannot be bound as
    /// parameters since they land in a `json_extract` path string rather
    /// than a value position, so they are checked against the same
    /// identifier grammar as index DDL before being substituted in.
    fn compile(
        &self,
        projection: &str,
        force_distinct_on_join: bool,
    ) -> GraphResult<(String, Vec<SqlValue>)> {
        let mut sql = String::from("SELECT ");
        let distinct = self.uses_distinct() || (force_distinct_on_join && self.join.is_some());
        if distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(projection);
        sql.push_str(" FROM nodes n");

        let mut params: Vec<SqlValue> = Vec::new();

        if let Some(join) = &self.join {
            sql.push_str(" JOIN edges e ON ");
            match join.direction {
                Direction::Out => sql.push_str("e.from_id = n.id"),
                Direction::In => sql.push_str("e.to_id = n.id"),
                Direction::Both => {
                    sql.push_str("(e.from_id = n.id OR e.to_id = n.id)");
                }
            }
            sql.push_str(" AND e.type = ?");
            params.push(SqlValue::Text(join.edge_type.clone()));

            sql.push_str(" JOIN nodes m ON ");
            match join.direction {
                Direction::Out => sql.push_str("m.id = e.to_id"),
                Direction::In => sql.push_str("m.id = e.from_id"),
                Direction::Both => {
                    sql.push_str("((e.from_id = n.id AND m.id = e.to_id) OR (e.to_id = n.id AND m.id = e.from_id))");
                }
            }
            sql.push_str(" AND m.type = ?");
            params.push(SqlValue::Text(join.other_type.clone()));
        }

        sql.push_str(" WHERE n.type = ?");
        params.push(SqlValue::Text(self.node_type.clone()));

        for predicate in &self.predicates {
            validate_identifier("property", &predicate.field)?;
            let extract = format!("json_extract(n.properties, '$.{}')", predicate.field);
            match predicate.op {
                CompareOp::In => {
                    let items = predicate.value.as_array().cloned().unwrap_or_default();
                    let placeholders = vec!["?"; items.len()].join(", ");
                    sql.push_str(&format!(" AND {extract} IN ({placeholders})"));
                    for item in items {
                        params.push(json_value_to_sql(&item));
                    }
                }
                op => {
                    sql.push_str(&format!(" AND {extract} {} ?", op.as_sql()));
                    params.push(json_value_to_sql(&predicate.value));
                }
            }
        }

        if !self.order_bys.is_empty() {
            let mut clauses = Vec::with_capacity(self.order_bys.len());
            for (field, dir) in &self.order_bys {
                validate_identifier("property", field)?;
                clauses.push(format!("json_extract(n.properties, '$.{field}') {}", dir.as_sql()));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&clauses.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        Ok((sql, params))
    }

    fn row_to_node(row: &Row<'_>) -> rusqlite::Result<(u64, String, String, i64, i64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
        ))
    }

    /// Materialize all matching rows.
    pub fn exec(&self) -> GraphResult<Vec<Node>> {
        let (sql, params) =
            self.compile("n.id, n.type, n.properties, n.created_at, n.updated_at", false)?;
        let rows: Vec<Node> = self.handle.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).with_op("node query: prepare")?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), Self::row_to_node)
                .with_op("node query: execute")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .with_op("node query: collect")?;
            rows.into_iter()
                .map(store_materialize)
                .collect::<GraphResult<Vec<_>>>()
        })?;

        Ok(match &self.post_filter {
            Some(predicate) => rows.into_iter().filter(|n| predicate(n)).collect(),
            None => rows,
        })
    }

    /// `limit(1).exec()[0]`, or `None`.
    pub fn first(mut self) -> GraphResult<Option<Node>> {
        self.limit = Some(1);
        Ok(self.exec()?.into_iter().next())
    }

    /// Replaces the projection with `COUNT(*)`, or `COUNT(DISTINCT n.id)`
    /// when a join is present.
    pub fn count(&self) -> GraphResult<i64> {
        let projection = if self.join.is_some() {
            "COUNT(DISTINCT n.id)"
        } else {
            "COUNT(*)"
        };
        let (sql, params) = self.compile(projection, false)?;
        self.handle.with_conn(|conn| {
            conn.query_row(&sql, rusqlite::params_from_iter(params.iter()), |row| {
                row.get(0)
            })
            .with_op("node query: count")
        })
    }

    pub fn exists(&self) -> GraphResult<bool> {
        Ok(self.count()? > 0)
    }
}

fn store_materialize(row: (u64, String, String, i64, i64)) -> GraphResult<Node> {
    let (id, node_type, properties_json, created_at, updated_at) = row;
    Ok(Node {
        id,
        node_type,
        properties: serde_json::from_str(&properties_json)?,
        created_at: crate::types::Timestamp(created_at),
        updated_at: crate::types::Timestamp(updated_at),
    })
}

pub(crate) fn json_value_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::GraphDb;
    use crate::types::Properties;

    fn props(pairs: &[(&str, Value)]) -> Properties {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn where_eq_filters_by_property() {
        let db = GraphDb::open_in_memory().unwrap();
        db.create_node("Person", props(&[("name", "Alice".into()), ("age", 30.into())]))
            .unwrap();
        db.create_node("Person", props(&[("name", "Bob".into()), ("age", 25.into())]))
            .unwrap();

        let results = db
            .nodes("Person")
            .where_eq([("age".to_string(), Value::from(30))])
            .exec()
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].properties["name"], "Alice");
    }

    #[test]
    fn connected_to_both_direction_deduplicates() {
        let db = GraphDb::open_in_memory().unwrap();
        let a = db.create_node("Person", Properties::new()).unwrap();
        let b = db.create_node("Person", Properties::new()).unwrap();
        db.create_edge(a.id, "KNOWS", b.id, None).unwrap();
        db.create_edge(b.id, "KNOWS", a.id, None).unwrap();

        let results = db
            .nodes("Person")
            .connected_to("Person", "KNOWS", Direction::Both)
            .exec()
            .unwrap();
        // a and b are mutually connected; DISTINCT must prevent double
        // counting either side.
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn count_and_exists() {
        let db = GraphDb::open_in_memory().unwrap();
        assert_eq!(db.nodes("Person").count().unwrap(), 0);
        assert!(!db.nodes("Person").exists().unwrap());

        db.create_node("Person", Properties::new()).unwrap();
        assert_eq!(db.nodes("Person").count().unwrap(), 1);
        assert!(db.nodes("Person").exists().unwrap());
    }

    #[test]
    fn unsafe_field_name_is_rejected_rather_than_interpolated() {
        let db = GraphDb::open_in_memory().unwrap();
        let err = db
            .nodes("Person")
            .where_eq([("age'; DROP TABLE nodes; --".to_string(), Value::from(30))])
            .exec()
            .unwrap_err();
        assert!(matches!(err, crate::error::GraphError::InvalidType(_)));
    }

    #[test]
    fn post_filter_runs_after_materialization() {
        let db = GraphDb::open_in_memory().unwrap();
        db.create_node("Person", props(&[("age", 30.into())])).unwrap();
        db.create_node("Person", props(&[("age", 10.into())])).unwrap();

        let results = db
            .nodes("Person")
            .filter(|n| n.properties["age"].as_i64().unwrap_or(0) >= 18)
            .exec()
            .unwrap();
        assert_eq!(results.len(), 1);
    }
}
