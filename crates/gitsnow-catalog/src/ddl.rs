//! Clean-ups applied to DDL as the database reports it
//!
//! `GET_DDL` returns fully qualified headers (`"DB"."SCHEMA"."X"`) and reports
//! argument types in their storage form (`NUMBER(38,0)`). Repository files use
//! two-part names and whatever type spelling the author chose, so both sides
//! are brought to a comparable form here.

use crate::adapter::ColumnDescription;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

/// Column list of a dynamic table header, up to the `TARGET_LAG` clause
static DYNAMIC_TABLE_COLUMNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)(CREATE\s.*?\()(.*?)(\)\s*TARGET_LAG)").expect("column list pattern is valid")
});

static DEFAULT_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^NUMBER\(38,\s*0\)$").expect("number pattern is valid"));

/// Marker the database writes instead of DDL it could not produce
const FAILED_DDL_MARKER: &str = "-- Failed to get DDL";

/// Whether a `GET_DDL` result is unusable
pub fn is_failed_ddl(ddl: &str) -> bool {
    let trimmed = ddl.trim_start();
    trimmed.is_empty() || trimmed.starts_with(FAILED_DDL_MARKER)
}

/// Strip the database qualifier from the object name in the CREATE header.
///
/// Only the first qualified name after `CREATE` and before the first `(` is
/// touched; references inside the body keep their qualifiers.
pub fn fixup_ddl(ddl: &str, database: &str, schema: &str) -> String {
    let pattern = format!(
        r#"(?is)(CREATE\s[^(]*?)(?:"{db}"|\b{db})\s*\.\s*((?:"{schema}"|{schema}\b)\s*\.)"#,
        db = regex::escape(database),
        schema = regex::escape(schema),
    );

    match Regex::new(&pattern) {
        Ok(re) => re.replace(ddl, "${1}${2}").into_owned(),
        Err(e) => {
            debug!("Skipping DDL fix-up for {}.{}: {}", database, schema, e);
            ddl.to_string()
        }
    }
}

/// Whether a dynamic table DDL carries an explicit column list
///
/// `GET_DDL` writes the list with bare column names; the types only come back
/// from `DESCRIBE TABLE`.
pub fn has_dynamic_table_columns(ddl: &str) -> bool {
    DYNAMIC_TABLE_COLUMNS.is_match(ddl)
}

/// Render one described column the way repository files declare it
fn column_definition(column: &ColumnDescription) -> String {
    let data_type = if DEFAULT_NUMBER.is_match(column.data_type.trim()) {
        "INTEGER"
    } else {
        column.data_type.trim()
    };

    let mut definition = format!("{} {}", column.name, data_type);
    if !column.nullable {
        definition.push_str(" NOT NULL");
    }
    if let Some(comment) = column.comment.as_deref().filter(|c| !c.is_empty()) {
        definition.push_str(&format!(" COMMENT '{}'", comment.replace('\'', "''")));
    }
    definition
}

/// Replace the bare column list of a dynamic table with typed definitions.
///
/// The DDL is returned unchanged when it has no column list or no columns were described.
pub fn expand_dynamic_table_columns(ddl: &str, columns: &[ColumnDescription]) -> String {
    if columns.is_empty() {
        return ddl.to_string();
    }

    let definitions: Vec<String> = columns.iter().map(column_definition).collect();
    let body = format!("\n    {}\n", definitions.join(",\n    "));

    DYNAMIC_TABLE_COLUMNS
        .replace(ddl, |caps: &Captures| format!("{}{}{}", &caps[1], body, &caps[3]))
        .into_owned()
}

/// Canonical spelling of an argument type, so `INT` and `NUMBER(38,0)` compare equal
pub fn canonical_type(sf_type: &str) -> String {
    // Types can include precision/scale like "NUMBER(38,0)"
    let base_type = sf_type
        .split('(')
        .next()
        .unwrap_or(sf_type)
        .trim()
        .to_uppercase();

    let canonical = match base_type.as_str() {
        "NUMBER" | "DECIMAL" | "NUMERIC" | "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT"
        | "BYTEINT" => "NUMBER",

        "FLOAT" | "FLOAT4" | "FLOAT8" | "DOUBLE" | "DOUBLE PRECISION" | "REAL" => "FLOAT",

        "VARCHAR" | "STRING" | "TEXT" | "CHAR" | "CHARACTER" | "NVARCHAR" | "NCHAR" => "VARCHAR",

        "BINARY" | "VARBINARY" => "BINARY",

        "DATETIME" | "TIMESTAMP" | "TIMESTAMP_NTZ" => "TIMESTAMP_NTZ",

        _ => return base_type,
    };

    canonical.to_string()
}

/// Split the inside of a parenthesized list on top-level commas
fn split_arguments(signature: &str) -> Vec<&str> {
    let inner = signature
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(signature)
        .trim();

    if inner.is_empty() {
        return Vec::new();
    }

    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, ch) in inner.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(inner[start..].trim());
    parts
}

/// Comparison key for an overload signature: canonical types, no spacing
pub fn signature_key(signature: &str) -> String {
    let types: Vec<String> = split_arguments(signature)
        .into_iter()
        .map(canonical_type)
        .collect();
    format!("({})", types.join(","))
}

/// Drop argument names from a catalog signature: `(P_DATE VARCHAR)` becomes `(VARCHAR)`
pub fn argument_types(signature: &str) -> String {
    let types: Vec<String> = split_arguments(signature)
        .into_iter()
        .map(|arg| match arg.split_once(char::is_whitespace) {
            Some((_name, ty)) => ty.trim().to_string(),
            None => arg.to_string(),
        })
        .collect();
    format!("({})", types.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_quoted_database_qualifier() {
        let ddl = r#"CREATE OR REPLACE TABLE "MOCK_DB"."MY_SCHEMA"."BASE_CUSTOMERS" (ID INT, NAME VARCHAR);"#;
        assert_eq!(
            fixup_ddl(ddl, "MOCK_DB", "MY_SCHEMA"),
            r#"CREATE OR REPLACE TABLE "MY_SCHEMA"."BASE_CUSTOMERS" (ID INT, NAME VARCHAR);"#
        );
    }

    #[test]
    fn strips_unquoted_qualifier_case_insensitively() {
        let ddl = "create or replace view mock_db.my_schema.v as select * from mock_db.my_schema.t;";
        assert_eq!(
            fixup_ddl(ddl, "MOCK_DB", "MY_SCHEMA"),
            "create or replace view my_schema.v as select * from mock_db.my_schema.t;"
        );
    }

    #[test]
    fn body_references_keep_their_qualifier() {
        let ddl = r#"CREATE VIEW "MOCK_DB"."MY_SCHEMA"."AGG" AS SELECT * FROM "MOCK_DB"."MY_SCHEMA"."ENRICHED";"#;
        let fixed = fixup_ddl(ddl, "MOCK_DB", "MY_SCHEMA");
        assert!(fixed.starts_with(r#"CREATE VIEW "MY_SCHEMA"."AGG""#));
        assert!(fixed.ends_with(r#"FROM "MOCK_DB"."MY_SCHEMA"."ENRICHED";"#));
    }

    #[test]
    fn other_databases_are_untouched() {
        let ddl = r#"CREATE TABLE "OTHER_DB"."MY_SCHEMA"."T" (ID INT);"#;
        assert_eq!(fixup_ddl(ddl, "MOCK_DB", "MY_SCHEMA"), ddl);
    }

    #[test]
    fn dynamic_table_columns_get_their_types() {
        let ddl = "create or replace dynamic table S.DT(\n\tID,\n\tNOTE\n) target_lag = '1 minute' refresh_mode = AUTO warehouse = WH\n as select id, note from S.T;";
        assert!(has_dynamic_table_columns(ddl));

        let columns = vec![
            ColumnDescription::new("ID", "NUMBER(38,0)").not_null(),
            ColumnDescription::new("NOTE", "VARCHAR(16777216)").with_comment("owner's note"),
        ];
        let expanded = expand_dynamic_table_columns(ddl, &columns);

        assert_eq!(
            expanded,
            "create or replace dynamic table S.DT(\n    ID INTEGER NOT NULL,\n    NOTE VARCHAR(16777216) COMMENT 'owner''s note'\n) target_lag = '1 minute' refresh_mode = AUTO warehouse = WH\n as select id, note from S.T;"
        );
    }

    #[test]
    fn dynamic_tables_without_column_list_are_untouched() {
        let ddl = "CREATE DYNAMIC TABLE S.DT LAG = '1 MINUTE' WAREHOUSE = WH AS SELECT COUNT(*) FROM S.T;";
        assert!(!has_dynamic_table_columns(ddl));
        assert_eq!(
            expand_dynamic_table_columns(ddl, &[ColumnDescription::new("N", "NUMBER(38,0)")]),
            ddl
        );

        let with_list = "CREATE DYNAMIC TABLE S.DT (N) TARGET_LAG = '1 minute' AS SELECT 1 AS N;";
        assert_eq!(expand_dynamic_table_columns(with_list, &[]), with_list);
    }

    #[test]
    fn failed_ddl_markers() {
        assert!(is_failed_ddl("-- Failed to get DDL for MY_SCHEMA.X"));
        assert!(is_failed_ddl("   "));
        assert!(!is_failed_ddl("CREATE TABLE S.T (ID INT);"));
    }

    #[test]
    fn signature_keys_ignore_type_spelling() {
        assert_eq!(signature_key("(VARCHAR, NUMBER(38, 0))"), "(VARCHAR,NUMBER)");
        assert_eq!(signature_key("(STRING, INT)"), signature_key("(VARCHAR,NUMBER(38,0))"));
        assert_ne!(signature_key("(VARCHAR)"), signature_key("(VARCHAR, VARCHAR)"));
        assert_eq!(signature_key("()"), "()");
    }

    #[test]
    fn argument_names_are_dropped() {
        assert_eq!(
            argument_types("(P_DATE VARCHAR, P_LIMIT NUMBER(38,0))"),
            "(VARCHAR, NUMBER(38,0))"
        );
        assert_eq!(argument_types("()"), "()");
    }
}
