//! Equality join extraction
//!
//! Text-level: works on files the parser rejects, which is most of what the
//! trace builder needs to link tables.

use gitsnow_core::{normalize_identifier, JoinEdge, ObjectName};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

const IDENT: &str = r#"(?:\b[A-Za-z_][\w$]*|"[^"]+")"#;

static RELATION_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:FROM|JOIN)\s+").expect("relation keyword pattern is valid"));

static RELATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^({IDENT}(?:\s*\.\s*{IDENT}){{0,2}})(?:\s+(?:AS\s+)?({IDENT}))?"
    ))
    .expect("relation pattern is valid")
});

static EQUALITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"({IDENT})\s*\.\s*({IDENT})\s*=\s*({IDENT})\s*\.\s*({IDENT})"
    ))
    .expect("equality pattern is valid")
});

static CTE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)(?:\bWITH(?:\s+RECURSIVE)?|,)\s*({IDENT})\s+AS\s*\("))
        .expect("cte pattern is valid")
});

static PART: Lazy<Regex> = Lazy::new(|| Regex::new(IDENT).expect("identifier pattern is valid"));

/// Words that can follow a relation but are never its alias
const NOT_ALIASES: [&str; 22] = [
    "WHERE", "ON", "JOIN", "LEFT", "RIGHT", "INNER", "OUTER", "FULL", "CROSS", "NATURAL",
    "GROUP", "ORDER", "HAVING", "QUALIFY", "LIMIT", "UNION", "USING", "LATERAL", "WINDOW",
    "SELECT", "EXCEPT", "MINUS",
];

/// Tables referenced by `FROM`/`JOIN`, keyed by alias and by bare name
fn relation_aliases(sql: &str, default_schema: &str) -> HashMap<String, ObjectName> {
    let mut aliases = HashMap::new();
    let ctes: Vec<String> = CTE_NAME
        .captures_iter(sql)
        .filter_map(|caps| caps.get(1).map(|m| normalize_identifier(m.as_str())))
        .collect();

    for keyword in RELATION_KEYWORD.find_iter(sql) {
        let rest = &sql[keyword.end()..];
        let Some(caps) = RELATION.captures(rest) else {
            continue;
        };
        let Some(relation) = caps.get(1) else {
            continue;
        };

        let parts: Vec<String> = PART
            .find_iter(relation.as_str())
            .map(|p| p.as_str().to_string())
            .collect();
        if parts.len() == 1 && ctes.contains(&normalize_identifier(&parts[0])) {
            continue;
        }
        let Some(table) = ObjectName::from_parts(&parts, default_schema) else {
            continue;
        };

        aliases
            .entry(table.name().to_string())
            .or_insert_with(|| table.clone());

        if let Some(alias) = caps.get(2) {
            let alias = normalize_identifier(alias.as_str());
            if !NOT_ALIASES.contains(&alias.as_str()) {
                aliases.insert(alias, table);
            }
        }
    }

    aliases
}

/// `alias.column = alias.column` predicates between two different known tables.
///
/// Single-part table names take `default_schema`. Qualifiers that do not name
/// a `FROM`/`JOIN` relation (CTEs, subqueries) are ignored.
pub fn extract_joins(sql: &str, default_schema: &str) -> Vec<JoinEdge> {
    let aliases = relation_aliases(sql, default_schema);
    let mut joins: Vec<JoinEdge> = Vec::new();

    for caps in EQUALITY.captures_iter(sql) {
        let part = |i: usize| caps.get(i).map(|m| normalize_identifier(m.as_str()));
        let (Some(left_alias), Some(left_col), Some(right_alias), Some(right_col)) =
            (part(1), part(2), part(3), part(4))
        else {
            continue;
        };

        let (Some(left), Some(right)) = (aliases.get(&left_alias), aliases.get(&right_alias)) else {
            continue;
        };
        if left == right {
            continue;
        }

        let join = JoinEdge::new(left.column(&left_col), right.column(&right_col));
        if !joins.contains(&join) {
            joins.push(join);
        }
    }

    joins
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn joins_resolve_aliases() {
        let sql = "select o.id, c.name from sales.orders o \
                   left join sales.customers as c on o.customer_id = c.id";
        let joins = extract_joins(sql, "SALES");

        assert_eq!(
            joins,
            vec![JoinEdge::new(
                ObjectName::new("SALES", "ORDERS").column("CUSTOMER_ID"),
                ObjectName::new("SALES", "CUSTOMERS").column("ID"),
            )]
        );
    }

    #[test]
    fn bare_table_names_work_as_qualifiers() {
        let sql = "SELECT * FROM orders JOIN customers ON orders.customer_id = customers.id";
        let joins = extract_joins(sql, "SALES");

        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].left.table, ObjectName::new("SALES", "ORDERS"));
    }

    #[test]
    fn cte_qualifiers_are_ignored() {
        let sql = "WITH x AS (SELECT 1 AS id) SELECT * FROM s.a a JOIN x ON a.id = x.id";
        assert!(extract_joins(sql, "S").is_empty());
    }
}
