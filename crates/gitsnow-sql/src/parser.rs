//! SQL parsing using datafusion-sqlparser-rs
//!
//! Parses SQL into AST and tokenizes it for the token-level passes
//! (formatting, declaration scanning).

use gitsnow_core::DialectConfig;
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, GenericDialect, PostgreSqlDialect, SnowflakeDialect};
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::{Token, Tokenizer, TokenizerError};

/// SQL parser with configurable dialect
pub struct SqlParser {
    dialect: Box<dyn Dialect>,
}

impl SqlParser {
    /// Create a new SQL parser with the generic dialect
    pub fn new() -> Self {
        Self {
            dialect: Box::new(GenericDialect {}),
        }
    }

    /// Create a SQL parser for PostgreSQL
    pub fn postgres() -> Self {
        Self {
            dialect: Box::new(PostgreSqlDialect {}),
        }
    }

    /// Create a SQL parser for Snowflake
    pub fn snowflake() -> Self {
        Self {
            dialect: Box::new(SnowflakeDialect {}),
        }
    }

    /// Create a parser from a dialect config
    pub fn from_dialect(dialect: &DialectConfig) -> Self {
        match dialect {
            DialectConfig::Snowflake => Self::snowflake(),
            DialectConfig::Postgres => Self::postgres(),
            DialectConfig::Ansi => Self::new(),
        }
    }

    /// Parse SQL into statements
    pub fn parse(&self, sql: &str) -> Result<Vec<Statement>, ParseError> {
        Ok(Parser::parse_sql(&*self.dialect, sql)?)
    }

    /// Tokenize SQL, keeping string literal contents exactly as written.
    ///
    /// Whitespace and comments are returned as `Token::Whitespace`.
    pub fn tokenize(&self, sql: &str) -> Result<Vec<Token>, TokenizerError> {
        Tokenizer::new(&*self.dialect, sql)
            .with_unescape(false)
            .tokenize()
    }
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::snowflake()
    }
}

/// SQL parsing error
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ParseError(#[from] pub ParserError);

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::tokenizer::Whitespace;

    #[test]
    fn parse_simple_select() {
        let parser = SqlParser::snowflake();
        let statements = parser
            .parse("SELECT id, name FROM users WHERE active = true")
            .unwrap();

        assert_eq!(statements.len(), 1);
        assert!(matches!(statements[0], Statement::Query(_)));
    }

    #[test]
    fn parse_invalid_sql() {
        let parser = SqlParser::snowflake();
        let error = parser.parse("SELECT FROM WHERE (").unwrap_err();
        assert!(!error.to_string().is_empty());
    }

    #[test]
    fn tokenize_keeps_comments_as_whitespace() {
        let parser = SqlParser::snowflake();
        let tokens = parser.tokenize("select 1 -- trailing\n").unwrap();

        assert!(tokens.iter().any(|t| matches!(
            t,
            Token::Whitespace(Whitespace::SingleLineComment { .. })
        )));
    }

    #[test]
    fn dialects_from_config() {
        let sql = "SELECT id FROM users";
        for dialect in [DialectConfig::Snowflake, DialectConfig::Postgres, DialectConfig::Ansi] {
            assert!(SqlParser::from_dialect(&dialect).parse(sql).is_ok());
        }
    }
}
