//! Canonical formatting and structural linearization
//!
//! Both sides of a semantic diff go through [`SqlFormatter`]. Formatting drops
//! comments, collapses whitespace, upper-cases unquoted words and unquotes
//! quoted identifiers that would mean the same thing unquoted. The output is a
//! pure function of the significant token sequence, so formatting is idempotent.

use crate::parser::SqlParser;
use gitsnow_core::{DialectConfig, FormatConfig};
use sqlparser::keywords::{Keyword, ALL_KEYWORDS};
use sqlparser::tokenizer::{Token, Word};

/// Formatting failed (the text could not be tokenized)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("Failed to tokenize SQL: {0}")]
    Tokenize(String),
}

/// Structural linearization failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructureError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("Unbalanced parentheses at token {position}")]
    Unbalanced { position: usize },
}

/// Category of a leaf in the linearized structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Keyword,
    Identifier,
    QuotedIdentifier,
    Number,
    StringLiteral,
    Punctuation,
    Operator,
}

/// One leaf of the linearized statement structure: `(kind, text)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructureNode {
    pub kind: NodeKind,
    pub text: String,
}

/// Dialect-aware canonical formatter
pub struct SqlFormatter {
    parser: SqlParser,
    config: FormatConfig,
}

impl SqlFormatter {
    pub fn new(dialect: &DialectConfig, config: &FormatConfig) -> Self {
        Self {
            parser: SqlParser::from_dialect(dialect),
            config: config.clone(),
        }
    }

    pub fn parser(&self) -> &SqlParser {
        &self.parser
    }

    /// Tokenize and canonicalize, dropping whitespace and comments
    pub fn significant_tokens(&self, sql: &str) -> Result<Vec<Token>, FormatError> {
        let tokens = self
            .parser
            .tokenize(sql)
            .map_err(|e| FormatError::Tokenize(e.to_string()))?;

        let mut tokens: Vec<Token> = significant(tokens)
            .into_iter()
            .map(canonical_token)
            .collect();

        if self.config.force_create_or_alter_table {
            force_create_or_alter_table(&mut tokens);
        }

        Ok(tokens)
    }

    /// Canonical text of `sql`, terminated by exactly one `;` when non-empty
    pub fn format(&self, sql: &str) -> Result<String, FormatError> {
        let mut tokens = self.significant_tokens(sql)?;
        while matches!(tokens.last(), Some(Token::SemiColon)) {
            tokens.pop();
        }

        if tokens.is_empty() {
            return Ok(String::new());
        }

        let mut out = render_tokens(&tokens);
        out.push(';');
        Ok(out)
    }

    /// Linearize `sql` into its ordered sequence of leaves.
    ///
    /// The text is formatted first and the formatted output is re-tokenized,
    /// so two inputs with the same structure give equal sequences.
    pub fn structure(&self, sql: &str) -> Result<Vec<StructureNode>, StructureError> {
        let formatted = self.format(sql)?;
        let mut tokens = self.significant_tokens(&formatted)?;
        while matches!(tokens.last(), Some(Token::SemiColon)) {
            tokens.pop();
        }

        let mut depth: i64 = 0;
        for (position, token) in tokens.iter().enumerate() {
            match token {
                Token::LParen => depth += 1,
                Token::RParen => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(StructureError::Unbalanced { position });
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(StructureError::Unbalanced {
                position: tokens.len(),
            });
        }

        Ok(tokens.iter().map(structure_node).collect())
    }
}

/// Drop whitespace, comments and end-of-input markers
pub fn significant(tokens: Vec<Token>) -> Vec<Token> {
    tokens
        .into_iter()
        .filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF))
        .collect()
}

fn canonical_token(token: Token) -> Token {
    match token {
        Token::Word(word) => match word.quote_style {
            None => Token::make_word(&word.value.to_uppercase(), None),
            Some('"') if is_plain_identifier(&word.value) => Token::make_word(&word.value, None),
            Some(_) => Token::Word(word),
        },
        other => other,
    }
}

/// Upper-case identifier that is not a keyword: quoting it changes nothing
fn is_plain_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    let starts_ok = matches!(chars.next(), Some(c) if c.is_ascii_uppercase() || c == '_');

    starts_ok
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '$')
        && ALL_KEYWORDS.binary_search(&value).is_err()
}

fn is_word(token: &Token, keyword: Keyword) -> bool {
    matches!(token, Token::Word(Word { keyword: k, quote_style: None, .. }) if *k == keyword)
}

/// `CREATE [OR REPLACE] [LOCAL|GLOBAL|TEMP|...] TABLE` becomes
/// `CREATE OR ALTER [...] TABLE` at every statement start.
fn force_create_or_alter_table(tokens: &mut Vec<Token>) {
    const MODIFIERS: [Keyword; 6] = [
        Keyword::LOCAL,
        Keyword::GLOBAL,
        Keyword::TEMP,
        Keyword::TEMPORARY,
        Keyword::VOLATILE,
        Keyword::TRANSIENT,
    ];

    let mut i = 0;
    while i < tokens.len() {
        let at_statement_start = i == 0 || matches!(tokens[i - 1], Token::SemiColon);
        if !(at_statement_start && is_word(&tokens[i], Keyword::CREATE)) {
            i += 1;
            continue;
        }

        let mut j = i + 1;
        let has_or_replace = j + 1 < tokens.len()
            && is_word(&tokens[j], Keyword::OR)
            && is_word(&tokens[j + 1], Keyword::REPLACE);
        if has_or_replace {
            j += 2;
        }

        let modifiers_start = j;
        while j < tokens.len() && MODIFIERS.iter().any(|m| is_word(&tokens[j], *m)) {
            j += 1;
        }

        if j < tokens.len() && is_word(&tokens[j], Keyword::TABLE) {
            let replacement = [Token::make_keyword("OR"), Token::make_keyword("ALTER")];
            tokens.splice(i + 1..modifiers_start, replacement);
        }
        i += 1;
    }
}

const CLAUSE_BREAKS: [Keyword; 8] = [
    Keyword::FROM,
    Keyword::WHERE,
    Keyword::GROUP,
    Keyword::ORDER,
    Keyword::HAVING,
    Keyword::QUALIFY,
    Keyword::UNION,
    Keyword::LIMIT,
];

const JOIN_STARTS: [Keyword; 6] = [
    Keyword::LEFT,
    Keyword::RIGHT,
    Keyword::FULL,
    Keyword::INNER,
    Keyword::CROSS,
    Keyword::NATURAL,
];

const SPACED_BEFORE_PAREN: [Keyword; 20] = [
    Keyword::AS,
    Keyword::IN,
    Keyword::ON,
    Keyword::AND,
    Keyword::OR,
    Keyword::NOT,
    Keyword::EXISTS,
    Keyword::VALUES,
    Keyword::USING,
    Keyword::FROM,
    Keyword::JOIN,
    Keyword::WHERE,
    Keyword::SELECT,
    Keyword::OVER,
    Keyword::THEN,
    Keyword::ELSE,
    Keyword::WHEN,
    Keyword::WITH,
    Keyword::ALL,
    Keyword::BY,
];

fn starts_line(tokens: &[Token], i: usize) -> bool {
    let Token::Word(word) = &tokens[i] else {
        return false;
    };
    if word.quote_style.is_some() || i == 0 {
        return false;
    }

    let prev = &tokens[i - 1];
    if matches!(prev, Token::LParen) || is_word(prev, Keyword::WITHIN) {
        return false;
    }

    if CLAUSE_BREAKS.contains(&word.keyword) {
        return true;
    }
    if word.keyword == Keyword::JOIN {
        return !JOIN_STARTS.iter().any(|k| is_word(prev, *k)) && !is_word(prev, Keyword::OUTER);
    }
    if JOIN_STARTS.contains(&word.keyword) {
        return !matches!(tokens.get(i + 1), Some(Token::LParen));
    }
    false
}

fn needs_space(prev: &Token, current: &Token) -> bool {
    if matches!(
        current,
        Token::Comma | Token::RParen | Token::Period | Token::SemiColon
    ) {
        return false;
    }
    if matches!(prev, Token::LParen | Token::Period) {
        return false;
    }
    if let (Token::Word(word), Token::LParen) = (prev, current) {
        return word.quote_style.is_none() && SPACED_BEFORE_PAREN.contains(&word.keyword);
    }
    true
}

/// Render significant tokens as single-spaced text with clause line breaks
pub fn render_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();

    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            let prev = &tokens[i - 1];
            if matches!(prev, Token::SemiColon) || starts_line(tokens, i) {
                out.push('\n');
            } else if needs_space(prev, token) {
                out.push(' ');
            }
        }
        out.push_str(&token.to_string());
    }

    out
}

fn structure_node(token: &Token) -> StructureNode {
    let kind = match token {
        Token::Word(word) => match (word.quote_style, word.keyword) {
            (Some(_), _) => NodeKind::QuotedIdentifier,
            (None, Keyword::NoKeyword) => NodeKind::Identifier,
            (None, _) => NodeKind::Keyword,
        },
        Token::Number(..) => NodeKind::Number,
        Token::SingleQuotedString(_)
        | Token::DoubleQuotedString(_)
        | Token::NationalStringLiteral(_)
        | Token::EscapedStringLiteral(_)
        | Token::HexStringLiteral(_)
        | Token::DollarQuotedString(_) => NodeKind::StringLiteral,
        Token::Comma
        | Token::Period
        | Token::SemiColon
        | Token::LParen
        | Token::RParen
        | Token::LBracket
        | Token::RBracket
        | Token::LBrace
        | Token::RBrace
        | Token::Colon
        | Token::DoubleColon => NodeKind::Punctuation,
        _ => NodeKind::Operator,
    };

    StructureNode {
        kind,
        text: token.to_string(),
    }
}
