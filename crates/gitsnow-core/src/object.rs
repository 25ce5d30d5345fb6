//! Database object identities
//!
//! Every graph key, snapshot key and lineage key in gitsnow goes through the
//! types in this module, so that `"my_schema"."Orders"` and `MY_SCHEMA.ORDERS`
//! are the same node.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalize a single identifier part: trim, strip double quotes, upper-case.
pub fn normalize_identifier(part: &str) -> String {
    let trimmed = part.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.to_uppercase()
}

/// Split a dotted name into parts, honouring double-quoted parts that contain dots.
fn split_dotted(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in s.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '.' if !in_quotes => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    parts.push(current);

    parts
        .into_iter()
        .map(|p| normalize_identifier(&p))
        .collect()
}

/// Schema-qualified object name (`SCHEMA.NAME`), case-folded to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectName {
    schema: String,
    name: String,
}

impl ObjectName {
    /// Create a name from its schema and object parts
    pub fn new(schema: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self {
            schema: normalize_identifier(schema.as_ref()),
            name: normalize_identifier(name.as_ref()),
        }
    }

    /// Parse `schema.name` or `database.schema.name`.
    ///
    /// Three-part names drop the database; single-part names are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        let parts = split_dotted(s);
        match parts.as_slice() {
            [schema, name] | [_, schema, name] if !schema.is_empty() && !name.is_empty() => {
                Some(Self {
                    schema: schema.clone(),
                    name: name.clone(),
                })
            }
            _ => None,
        }
    }

    /// Build a name from 1-3 already split parts; a single part takes `default_schema`.
    pub fn from_parts(parts: &[String], default_schema: &str) -> Option<Self> {
        match parts {
            [name] => Some(Self::new(default_schema, name)),
            [schema, name] | [_, schema, name] => Some(Self::new(schema, name)),
            _ => None,
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `SCHEMA.NAME`
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Column key for a column of this object
    pub fn column(&self, column: impl AsRef<str>) -> ColumnKey {
        ColumnKey::new(self.clone(), column)
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Kind of a creatable database object.
///
/// Adding a kind is a deliberate change: every `match` on this enum is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectKind {
    Table,
    View,
    DynamicTable,
    Procedure,
    Function,
    Stream,
    Task,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 7] = [
        Self::Table,
        Self::View,
        Self::DynamicTable,
        Self::Procedure,
        Self::Function,
        Self::Stream,
        Self::Task,
    ];

    /// SQL keyword(s) naming this kind in DDL
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Table => "TABLE",
            Self::View => "VIEW",
            Self::DynamicTable => "DYNAMIC TABLE",
            Self::Procedure => "PROCEDURE",
            Self::Function => "FUNCTION",
            Self::Stream => "STREAM",
            Self::Task => "TASK",
        }
    }

    /// Directory name used by the `<schema>/<kind plural>/<object>.sql` layout
    pub fn directory(&self) -> &'static str {
        match self {
            Self::Table => "tables",
            Self::View => "views",
            Self::DynamicTable => "dynamic_tables",
            Self::Procedure => "procedures",
            Self::Function => "functions",
            Self::Stream => "streams",
            Self::Task => "tasks",
        }
    }

    /// Parse a kind from a DDL keyword or catalog type label (`"DYNAMIC TABLE"`, `"BASE TABLE"`...)
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let upper = keyword.trim().to_uppercase().replace('_', " ");
        match upper.as_str() {
            "TABLE" | "BASE TABLE" => Some(Self::Table),
            "VIEW" | "MATERIALIZED VIEW" => Some(Self::View),
            "DYNAMIC TABLE" => Some(Self::DynamicTable),
            "PROCEDURE" => Some(Self::Procedure),
            "FUNCTION" => Some(Self::Function),
            "STREAM" => Some(Self::Stream),
            "TASK" => Some(Self::Task),
            _ => None,
        }
    }

    /// Derived objects whose contents must be rebuilt when a source changes
    pub fn is_materialized(&self) -> bool {
        match self {
            Self::DynamicTable => true,
            Self::Table | Self::View | Self::Procedure | Self::Function | Self::Stream | Self::Task => false,
        }
    }

    /// Kinds that may be overloaded by argument signature
    pub fn has_signature(&self) -> bool {
        match self {
            Self::Procedure | Self::Function => true,
            Self::Table | Self::View | Self::DynamicTable | Self::Stream | Self::Task => false,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Fully qualified column (`SCHEMA.TABLE.COLUMN`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnKey {
    pub table: ObjectName,
    pub column: String,
}

impl ColumnKey {
    pub fn new(table: ObjectName, column: impl AsRef<str>) -> Self {
        Self {
            table,
            column: normalize_identifier(column.as_ref()),
        }
    }

    /// Parse `SCHEMA.TABLE.COLUMN`
    pub fn parse(s: &str) -> Option<Self> {
        let parts = split_dotted(s);
        match parts.as_slice() {
            [schema, table, column] if !column.is_empty() => {
                Some(Self::new(ObjectName::new(schema, table), column))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// A single column-to-column lineage edge reported by the lineage adapter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnLineage {
    pub source: ColumnKey,
    pub target: ColumnKey,
}

/// Equality join predicate between two tables.
///
/// Undirected in meaning; `left`/`right` only reflect the order in the SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JoinEdge {
    pub left: ColumnKey,
    pub right: ColumnKey,
}

impl JoinEdge {
    pub fn new(left: ColumnKey, right: ColumnKey) -> Self {
        Self { left, right }
    }

    /// Columns linking `a` to `b` as `(column of a, column of b)`, in either orientation
    pub fn link(&self, a: &ObjectName, b: &ObjectName) -> Option<(&str, &str)> {
        if &self.left.table == a && &self.right.table == b {
            Some((&self.left.column, &self.right.column))
        } else if &self.right.table == a && &self.left.table == b {
            Some((&self.right.column, &self.left.column))
        } else {
            None
        }
    }

    /// Whether this join touches both tables
    pub fn connects(&self, a: &ObjectName, b: &ObjectName) -> bool {
        self.link(a, b).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_and_quote_insensitive() {
        let a = ObjectName::new("\"my_schema\"", "Orders");
        let b = ObjectName::parse("MY_SCHEMA.ORDERS").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "MY_SCHEMA.ORDERS");
    }

    #[test]
    fn three_part_names_drop_database() {
        let name = ObjectName::parse("\"MOCK_DB\".\"MY_SCHEMA\".\"BASE_ORDERS\"").unwrap();
        assert_eq!(name.qualified(), "MY_SCHEMA.BASE_ORDERS");
    }

    #[test]
    fn single_part_name_needs_default_schema() {
        assert!(ObjectName::parse("orders").is_none());
        let name = ObjectName::from_parts(&["orders".to_string()], "sales").unwrap();
        assert_eq!(name.qualified(), "SALES.ORDERS");
    }

    #[test]
    fn quoted_parts_may_contain_dots() {
        let name = ObjectName::parse("s.\"a.b\"").unwrap();
        assert_eq!(name.name(), "A.B");
    }

    #[test]
    fn kind_keywords() {
        assert_eq!(ObjectKind::from_keyword("dynamic table"), Some(ObjectKind::DynamicTable));
        assert_eq!(ObjectKind::from_keyword("BASE TABLE"), Some(ObjectKind::Table));
        assert_eq!(ObjectKind::from_keyword("DYNAMIC_TABLE"), Some(ObjectKind::DynamicTable));
        assert_eq!(ObjectKind::from_keyword("SEQUENCE"), None);
        assert!(ObjectKind::DynamicTable.is_materialized());
        assert!(!ObjectKind::View.is_materialized());
        assert_eq!(ObjectKind::DynamicTable.directory(), "dynamic_tables");
    }

    #[test]
    fn column_keys() {
        let key = ColumnKey::parse("sales.orders.status").unwrap();
        assert_eq!(key.to_string(), "SALES.ORDERS.STATUS");
        assert!(ColumnKey::parse("orders.status").is_none());
    }

    #[test]
    fn join_link_either_orientation() {
        let a = ObjectName::new("s", "a");
        let b = ObjectName::new("s", "b");
        let join = JoinEdge::new(b.column("a_id"), a.column("id"));

        assert_eq!(join.link(&a, &b), Some(("ID", "A_ID")));
        assert_eq!(join.link(&b, &a), Some(("A_ID", "ID")));
        assert!(!join.connects(&a, &ObjectName::new("s", "c")));
    }
}
