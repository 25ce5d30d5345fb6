//! Permissive identifier scanner
//!
//! Used when the lineage adapter cannot make sense of a file. It over-reports
//! on purpose: callers keep only the candidates that name a known object.

use gitsnow_core::ObjectName;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

const IDENT: &str = r#"(?:\b[A-Za-z_][\w$]*|"[^"]+")"#;

static DOTTED_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"{IDENT}(?:\s*\.\s*{IDENT}){{0,2}}")).expect("identifier pattern is valid")
});

static PART: Lazy<Regex> = Lazy::new(|| Regex::new(IDENT).expect("identifier pattern is valid"));

/// Every 1-3 part dotted identifier in `sql`, as a schema-qualified name.
///
/// Single parts take `assumed_schema`; longer names keep their last two parts.
pub fn find_candidate_names(sql: &str, assumed_schema: &str) -> BTreeSet<ObjectName> {
    DOTTED_NAME
        .find_iter(sql)
        .filter_map(|m| {
            let parts: Vec<String> = PART
                .find_iter(m.as_str())
                .map(|p| p.as_str().to_string())
                .collect();
            ObjectName::from_parts(&parts, assumed_schema)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_qualified_and_bare_names() {
        let names = find_candidate_names(
            "CREATE PROCEDURE s.p() AS $$ INSERT INTO s.target SELECT * FROM staging ; $$",
            "S",
        );

        assert!(names.contains(&ObjectName::new("S", "TARGET")));
        assert!(names.contains(&ObjectName::new("S", "STAGING")));
    }

    #[test]
    fn three_part_names_keep_last_two() {
        let names = find_candidate_names(r#"select * from "DB"."Raw" . orders"#, "X");
        assert!(names.contains(&ObjectName::new("RAW", "ORDERS")));
    }

    #[test]
    fn names_are_case_folded() {
        let names = find_candidate_names("from Sales.Orders", "X");
        assert!(names.contains(&ObjectName::new("SALES", "ORDERS")));
    }
}
