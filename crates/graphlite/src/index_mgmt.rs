//! C6: Property-index management. `createPropertyIndex`, `listIndexes`,
//! `dropIndex` (spec §4.6, §6 "Index name convention").
//!
//! Index DDL cannot bind the indexed type/column through `?` parameters
//! (SQLite, like every SQL engine, only parameterizes values, not
//! identifiers), so this module validates `type`/`property` against a
//! narrow identifier grammar before ever composing a DDL string with them,
//! the "keeps type names safe for string substitution" step spec §4.6 calls
//! for.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{GraphError, GraphResult, WithOp};
use crate::schema::Schema;
use crate::store::validate_node_type;

/// Deterministic index name: `idx_merge_<Type>_<prop>` (spec §3, §6).
pub(crate) fn index_name(node_type: &str, property: &str) -> String {
    format!("idx_merge_{node_type}_{property}")
}

/// Identifiers embedded in DDL must be plain ASCII word characters, no
/// quotes, no whitespace, nothing that could escape the string literal or
/// column-name position they are substituted into.
pub(crate) fn validate_identifier(kind: &'static str, value: &str) -> GraphResult<()> {
    let ok = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(GraphError::InvalidType(format!(
            "{kind} '{value}' is not a valid identifier for an index definition"
        )))
    }
}

/// `createPropertyIndex(type, prop, unique)`: a partial index over
/// `json_extract(properties, '$.<prop>')`, scoped to rows of `type`.
pub(crate) fn create_property_index(
    conn: &Connection,
    schema: Option<&Schema>,
    node_type: &str,
    property: &str,
    unique: bool,
) -> GraphResult<()> {
    validate_node_type(schema, node_type)?;
    validate_identifier("node type", node_type)?;
    validate_identifier("property", property)?;

    let name = index_name(node_type, property);
    let unique_kw = if unique { "UNIQUE " } else { "" };
    let type_literal = node_type.replace('\'', "''");
    let sql = format!(
        "CREATE {unique_kw}INDEX IF NOT EXISTS {name} ON nodes(json_extract(properties, '$.{property}')) WHERE type = '{type_literal}'"
    );
    conn.execute(&sql, []).with_op("create_property_index")?;
    Ok(())
}

/// All indexes whose names begin with `idx_merge_` (spec §6).
pub(crate) fn list_indexes(conn: &Connection) -> GraphResult<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx\\_merge\\_%' ESCAPE '\\' ORDER BY name")
        .with_op("list_indexes: prepare")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .with_op("list_indexes: query")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_op("list_indexes: collect")?;
    Ok(names)
}

pub(crate) fn index_exists(conn: &Connection, name: &str) -> GraphResult<bool> {
    let mut stmt = conn
        .prepare_cached("SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1")
        .with_op("index_exists: prepare")?;
    let found = stmt
        .query_row(params![name], |_| Ok(()))
        .optional()
        .with_op("index_exists: query")?;
    Ok(found.is_some())
}

/// `dropIndex(name)`: fails with `IndexNotFound` if no such index exists.
pub(crate) fn drop_index(conn: &Connection, name: &str) -> GraphResult<()> {
    if !index_exists(conn, name)? {
        return Err(GraphError::IndexNotFound(name.to_string()));
    }
    validate_identifier("index name", name)?;
    conn.execute(&format!("DROP INDEX {name}"), [])
        .with_op("drop_index")?;
    Ok(())
}
