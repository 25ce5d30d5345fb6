//! Table- and column-level lineage of `CREATE ... AS <query>` statements
//!
//! The declaration is found on the token stream, the query body is parsed with
//! sqlparser and walked with a [`Visitor`]. Column sources are resolved through
//! aliases, CTEs and derived tables; unqualified columns resolve only when a
//! single relation is in scope.

use crate::declaration::{matching_paren, scan_tokens, split_top_level};
use crate::format::{render_tokens, significant};
use crate::joins::extract_joins;
use crate::parser::SqlParser;
use gitsnow_core::{
    normalize_identifier, ColumnKey, ColumnLineage, DialectConfig, JoinEdge, ObjectKind, ObjectName,
};
use sqlparser::ast::{
    Expr, ObjectName as SqlName, Query, Select, SelectItem, SetExpr, Statement, TableFactor, Visit,
    Visitor,
};
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Word};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::ControlFlow;

/// Everything one SQL file says about lineage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementLineage {
    /// Objects written by the file
    pub targets: Vec<ObjectName>,

    /// Objects read by the file (never includes a target)
    pub sources: BTreeSet<ObjectName>,

    /// Column-to-column edges
    pub column_lineage: Vec<ColumnLineage>,

    /// Equality join predicates
    pub joins: Vec<JoinEdge>,

    /// Known output columns per target, in declaration order
    pub columns: BTreeMap<ObjectName, Vec<String>>,

    /// `(target, source)` pairs where the target selects `*` from the source
    pub wildcards: Vec<(ObjectName, ObjectName)>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineageError {
    #[error("Failed to tokenize SQL: {0}")]
    Tokenize(String),

    #[error("No schema-qualified CREATE target found")]
    NoTarget,

    #[error("{0} bodies are not analyzed")]
    Unsupported(ObjectKind),

    #[error("Failed to parse query body: {0}")]
    Parse(String),
}

/// Lineage service used by graph construction and tracing
pub trait LineageAdapter {
    fn analyze(&self, sql: &str) -> Result<StatementLineage, LineageError>;
}

/// sqlparser-backed lineage adapter
pub struct SqlLineageAdapter {
    parser: SqlParser,
}

impl SqlLineageAdapter {
    pub fn new(dialect: &DialectConfig) -> Self {
        Self {
            parser: SqlParser::from_dialect(dialect),
        }
    }
}

impl Default for SqlLineageAdapter {
    fn default() -> Self {
        Self::new(&DialectConfig::Snowflake)
    }
}

impl LineageAdapter for SqlLineageAdapter {
    fn analyze(&self, sql: &str) -> Result<StatementLineage, LineageError> {
        let tokens = self
            .parser
            .tokenize(sql)
            .map_err(|e| LineageError::Tokenize(e.to_string()))?;
        let tokens = significant(tokens);

        let mut lineage = StatementLineage::default();

        for declaration in scan_tokens(&tokens) {
            match declaration.kind {
                ObjectKind::Procedure | ObjectKind::Function | ObjectKind::Stream | ObjectKind::Task => {
                    return Err(LineageError::Unsupported(declaration.kind));
                }
                ObjectKind::Table | ObjectKind::View | ObjectKind::DynamicTable => {}
            }

            let Some(target) = declaration.name(None) else {
                continue;
            };
            lineage.targets.push(target.clone());

            let header = &tokens[declaration.header_end..declaration.statement_end];
            let declared_columns = column_list(header);

            match query_start(header) {
                Some(start) => {
                    let body = render_tokens(&header[start..]);
                    let query = self.parse_query(&body)?;
                    collect_query(&query, &target, &declared_columns, &mut lineage);

                    for join in extract_joins(&body, target.schema()) {
                        if !lineage.joins.contains(&join) {
                            lineage.joins.push(join);
                        }
                    }
                }
                None => {
                    lineage
                        .columns
                        .entry(target.clone())
                        .or_default()
                        .extend(declared_columns);
                }
            }
        }

        if lineage.targets.is_empty() {
            return Err(LineageError::NoTarget);
        }

        let targets = lineage.targets.clone();
        lineage.sources.retain(|source| !targets.contains(source));

        Ok(lineage)
    }
}

impl SqlLineageAdapter {
    fn parse_query(&self, body: &str) -> Result<Query, LineageError> {
        let statements = self
            .parser
            .parse(body)
            .map_err(|e| LineageError::Parse(e.to_string()))?;

        match statements.into_iter().next() {
            Some(Statement::Query(query)) => Ok(*query),
            Some(other) => Err(LineageError::Parse(format!(
                "expected a query, found: {}",
                other
            ))),
            None => Err(LineageError::Parse("empty query body".to_string())),
        }
    }
}

fn is_keyword(token: Option<&Token>, keyword: Keyword) -> bool {
    matches!(token, Some(Token::Word(Word { keyword: k, quote_style: None, .. })) if *k == keyword)
}

/// Column names of a leading `( ... )` list after the declared name
fn column_list(header: &[Token]) -> Vec<String> {
    const CONSTRAINTS: [&str; 5] = ["CONSTRAINT", "PRIMARY", "UNIQUE", "FOREIGN", "CHECK"];

    if !matches!(header.first(), Some(Token::LParen)) {
        return Vec::new();
    }
    let Some(close) = matching_paren(header, 0, header.len()) else {
        return Vec::new();
    };

    split_top_level(&header[1..close])
        .into_iter()
        .filter_map(|item| match item.first() {
            Some(Token::Word(word)) => {
                let name = normalize_identifier(&word.value);
                let is_constraint = word.quote_style.is_none() && CONSTRAINTS.contains(&name.as_str());
                (!is_constraint).then_some(name)
            }
            _ => None,
        })
        .collect()
}

/// Index of the query following the top-level `AS` of a CREATE header
fn query_start(header: &[Token]) -> Option<usize> {
    let mut depth = 0i64;

    for (i, token) in header.iter().enumerate() {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth -= 1,
            _ if depth == 0 && is_keyword(Some(token), Keyword::AS) => {
                let next = header.get(i + 1);
                let starts_query = is_keyword(next, Keyword::SELECT)
                    || is_keyword(next, Keyword::WITH)
                    || matches!(next, Some(Token::LParen));
                if starts_query {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

fn name_parts(name: &SqlName) -> Vec<String> {
    name.0.iter().map(|ident| ident.value.clone()).collect()
}

/// Collects referenced relations and CTE names
#[derive(Default)]
struct RelationCollector {
    relations: Vec<Vec<String>>,
    ctes: BTreeSet<String>,
}

impl Visitor for RelationCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(normalize_identifier(&cte.alias.name.value));
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &SqlName) -> ControlFlow<Self::Break> {
        self.relations.push(name_parts(relation));
        ControlFlow::Continue(())
    }
}

/// Collects `(qualifier, column)` references of an expression
#[derive(Default)]
struct ColumnRefCollector {
    refs: Vec<(Option<String>, String)>,
}

impl Visitor for ColumnRefCollector {
    type Break = ();

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Identifier(ident) => self.refs.push((None, normalize_identifier(&ident.value))),
            Expr::CompoundIdentifier(idents) if idents.len() >= 2 => {
                let n = idents.len();
                self.refs.push((
                    Some(normalize_identifier(&idents[n - 2].value)),
                    normalize_identifier(&idents[n - 1].value),
                ));
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

fn collect_query(
    query: &Query,
    target: &ObjectName,
    declared_columns: &[String],
    lineage: &mut StatementLineage,
) {
    let mut relations = RelationCollector::default();
    let _ = query.visit(&mut relations);

    for parts in &relations.relations {
        if parts.len() == 1 && relations.ctes.contains(&normalize_identifier(&parts[0])) {
            continue;
        }
        if let Some(source) = ObjectName::from_parts(parts, target.schema()) {
            lineage.sources.insert(source);
        }
    }

    let resolver = ColumnResolver {
        default_schema: target.schema(),
    };
    let resolved = resolver.query(query, &HashMap::new());

    let columns = lineage.columns.entry(target.clone()).or_default();
    for (i, (name, sources)) in resolved.columns.into_iter().enumerate() {
        let column = declared_columns.get(i).cloned().unwrap_or(name);
        for source in sources {
            lineage.column_lineage.push(ColumnLineage {
                source,
                target: target.column(&column),
            });
        }
        if !columns.contains(&column) {
            columns.push(column);
        }
    }

    for table in resolved.wildcard_tables {
        let pair = (target.clone(), table);
        if !lineage.wildcards.contains(&pair) {
            lineage.wildcards.push(pair);
        }
    }
}

/// Output columns of a query with the base columns each one reads
#[derive(Debug, Clone, Default)]
struct Resolved {
    columns: Vec<(String, BTreeSet<ColumnKey>)>,
    wildcard_tables: BTreeSet<ObjectName>,
}

impl Resolved {
    fn sources_of(&self, column: &str) -> Option<BTreeSet<ColumnKey>> {
        if let Some((_, sources)) = self.columns.iter().find(|(name, _)| name == column) {
            return Some(sources.clone());
        }
        if self.wildcard_tables.is_empty() {
            return None;
        }
        Some(
            self.wildcard_tables
                .iter()
                .map(|table| table.column(column))
                .collect(),
        )
    }
}

enum Relation {
    Table(ObjectName),
    Derived(Resolved),
}

impl Relation {
    fn sources_of(&self, column: &str) -> Option<BTreeSet<ColumnKey>> {
        match self {
            Relation::Table(table) => Some(BTreeSet::from([table.column(column)])),
            Relation::Derived(resolved) => resolved.sources_of(column),
        }
    }

    fn expand_into(&self, out: &mut Resolved) {
        match self {
            Relation::Table(table) => {
                out.wildcard_tables.insert(table.clone());
            }
            Relation::Derived(resolved) => {
                out.columns.extend(resolved.columns.iter().cloned());
                out.wildcard_tables.extend(resolved.wildcard_tables.iter().cloned());
            }
        }
    }
}

struct ColumnResolver<'a> {
    default_schema: &'a str,
}

impl ColumnResolver<'_> {
    fn query(&self, query: &Query, outer: &HashMap<String, Resolved>) -> Resolved {
        let mut ctes = outer.clone();
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let resolved = self.query(&cte.query, &ctes);
                ctes.insert(normalize_identifier(&cte.alias.name.value), resolved);
            }
        }
        self.set_expr(&query.body, &ctes)
    }

    fn set_expr(&self, body: &SetExpr, ctes: &HashMap<String, Resolved>) -> Resolved {
        match body {
            SetExpr::Select(select) => self.select(select, ctes),
            SetExpr::Query(query) => self.query(query, ctes),
            SetExpr::SetOperation { left, right, .. } => {
                let mut merged = self.set_expr(left, ctes);
                let right = self.set_expr(right, ctes);
                for (slot, (_, sources)) in merged.columns.iter_mut().zip(right.columns) {
                    slot.1.extend(sources);
                }
                merged.wildcard_tables.extend(right.wildcard_tables);
                merged
            }
            _ => Resolved::default(),
        }
    }

    fn select(&self, select: &Select, ctes: &HashMap<String, Resolved>) -> Resolved {
        let mut scope: Vec<(String, Relation)> = Vec::new();
        for from in &select.from {
            self.bind(&from.relation, ctes, &mut scope);
            for join in &from.joins {
                self.bind(&join.relation, ctes, &mut scope);
            }
        }

        let mut out = Resolved::default();
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) => {
                    if let Some(name) = output_name(expr) {
                        out.columns.push((name, expr_sources(expr, &scope)));
                    }
                }
                SelectItem::ExprWithAlias { expr, alias } => {
                    out.columns
                        .push((normalize_identifier(&alias.value), expr_sources(expr, &scope)));
                }
                SelectItem::Wildcard(_) => {
                    for (_, relation) in &scope {
                        relation.expand_into(&mut out);
                    }
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    let qualifier = name_parts(name)
                        .last()
                        .map(|p| normalize_identifier(p))
                        .unwrap_or_default();
                    if let Some((_, relation)) = scope.iter().find(|(alias, _)| *alias == qualifier) {
                        relation.expand_into(&mut out);
                    }
                }
            }
        }

        out
    }

    fn bind(
        &self,
        factor: &TableFactor,
        ctes: &HashMap<String, Resolved>,
        scope: &mut Vec<(String, Relation)>,
    ) {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let parts = name_parts(name);
                let Some(last) = parts.last().map(|p| normalize_identifier(p)) else {
                    return;
                };
                let key = alias
                    .as_ref()
                    .map(|a| normalize_identifier(&a.name.value))
                    .unwrap_or_else(|| last.clone());

                if parts.len() == 1 {
                    if let Some(cte) = ctes.get(&last) {
                        scope.push((key, Relation::Derived(cte.clone())));
                        return;
                    }
                }
                if let Some(table) = ObjectName::from_parts(&parts, self.default_schema) {
                    scope.push((key, Relation::Table(table)));
                }
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                if let Some(alias) = alias {
                    let resolved = self.query(subquery, ctes);
                    scope.push((normalize_identifier(&alias.name.value), Relation::Derived(resolved)));
                }
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                self.bind(&table_with_joins.relation, ctes, scope);
                for join in &table_with_joins.joins {
                    self.bind(&join.relation, ctes, scope);
                }
            }
            _ => {}
        }
    }
}

fn output_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(normalize_identifier(&ident.value)),
        Expr::CompoundIdentifier(idents) => idents.last().map(|i| normalize_identifier(&i.value)),
        _ => None,
    }
}

fn expr_sources(expr: &Expr, scope: &[(String, Relation)]) -> BTreeSet<ColumnKey> {
    let mut refs = ColumnRefCollector::default();
    let _ = expr.visit(&mut refs);

    let mut sources = BTreeSet::new();
    for (qualifier, column) in refs.refs {
        match qualifier {
            Some(qualifier) => {
                if let Some((_, relation)) = scope.iter().find(|(alias, _)| *alias == qualifier) {
                    sources.extend(relation.sources_of(&column).unwrap_or_default());
                }
            }
            None if scope.len() == 1 => {
                sources.extend(scope[0].1.sources_of(&column).unwrap_or_default());
            }
            None => {
                for (_, relation) in scope {
                    if let Relation::Derived(resolved) = relation {
                        if let Some(found) = resolved.sources_of(&column) {
                            sources.extend(found);
                        }
                    }
                }
            }
        }
    }

    sources
}
