//! CREATE header recognition
//!
//! Works on the significant token stream rather than the AST, so procedures,
//! tasks and other statements the parser does not fully understand are still
//! classified.

use crate::format::{render_tokens, significant};
use crate::parser::SqlParser;
use gitsnow_core::{normalize_identifier, ObjectKind, ObjectName};
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Word};

/// Object declared by a `CREATE` statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub kind: ObjectKind,

    /// Name parts as written (1-3), already normalized
    pub parts: Vec<String>,

    /// Argument types for procedures and functions, e.g. `(VARCHAR, NUMBER(38,0))`
    pub signature: Option<String>,

    /// Index of the first token after the declared name (and signature)
    pub(crate) header_end: usize,

    /// Index one past the statement's last token
    pub(crate) statement_end: usize,
}

impl Declaration {
    /// Schema-qualified name; single-part names need a default schema
    pub fn name(&self, default_schema: Option<&str>) -> Option<ObjectName> {
        match (self.parts.as_slice(), default_schema) {
            ([_], None) => None,
            (parts, Some(schema)) => ObjectName::from_parts(parts, schema),
            (parts, None) => ObjectName::from_parts(parts, ""),
        }
    }

    /// Name as used in `DROP` statements (signature included for overloadable kinds)
    pub fn drop_target(&self, name: &ObjectName) -> String {
        match &self.signature {
            Some(signature) if self.kind.has_signature() => format!("{}{}", name, signature),
            _ => name.to_string(),
        }
    }
}

/// Declaration scanning failed before any header could be examined
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeclarationError {
    #[error("Failed to tokenize SQL: {0}")]
    Tokenize(String),
}

/// Find every supported `CREATE` declaration in `sql`, in statement order.
///
/// Statements creating anything else (schemas, stages, sequences...) are skipped.
pub fn scan_declarations(parser: &SqlParser, sql: &str) -> Result<Vec<Declaration>, DeclarationError> {
    let tokens = parser
        .tokenize(sql)
        .map_err(|e| DeclarationError::Tokenize(e.to_string()))?;
    Ok(scan_tokens(&significant(tokens)))
}

pub(crate) fn scan_tokens(tokens: &[Token]) -> Vec<Declaration> {
    let mut declarations = Vec::new();
    let mut start = 0;

    while start < tokens.len() {
        let end = statement_end(tokens, start);
        if let Some(declaration) = scan_header(tokens, start, end) {
            declarations.push(declaration);
        }
        start = end + 1;
    }

    declarations
}

/// Index of the `;` closing the statement starting at `start` (or `tokens.len()`)
fn statement_end(tokens: &[Token], start: usize) -> usize {
    let mut depth = 0i64;
    for (i, token) in tokens.iter().enumerate().skip(start) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth -= 1,
            Token::SemiColon if depth <= 0 => return i,
            _ => {}
        }
    }
    tokens.len()
}

fn keyword_of(token: Option<&Token>) -> Option<Keyword> {
    match token {
        Some(Token::Word(Word {
            keyword,
            quote_style: None,
            ..
        })) => Some(*keyword),
        _ => None,
    }
}

fn word_upper(token: Option<&Token>) -> Option<String> {
    match token {
        Some(Token::Word(word)) if word.quote_style.is_none() => Some(word.value.to_uppercase()),
        _ => None,
    }
}

const MODIFIERS: [&str; 9] = [
    "LOCAL",
    "GLOBAL",
    "TEMP",
    "TEMPORARY",
    "VOLATILE",
    "TRANSIENT",
    "SECURE",
    "RECURSIVE",
    "EXTERNAL",
];

fn scan_header(tokens: &[Token], start: usize, end: usize) -> Option<Declaration> {
    if keyword_of(tokens.get(start)) != Some(Keyword::CREATE) {
        return None;
    }

    let mut i = start + 1;
    if keyword_of(tokens.get(i)) == Some(Keyword::OR)
        && matches!(
            keyword_of(tokens.get(i + 1)),
            Some(Keyword::REPLACE) | Some(Keyword::ALTER)
        )
    {
        i += 2;
    }
    while word_upper(tokens.get(i)).is_some_and(|w| MODIFIERS.contains(&w.as_str())) {
        i += 1;
    }

    let kind = match word_upper(tokens.get(i)).as_deref() {
        Some("DYNAMIC") if keyword_of(tokens.get(i + 1)) == Some(Keyword::TABLE) => {
            i += 1;
            ObjectKind::DynamicTable
        }
        Some("MATERIALIZED") if keyword_of(tokens.get(i + 1)) == Some(Keyword::VIEW) => {
            i += 1;
            ObjectKind::View
        }
        Some(word) => ObjectKind::from_keyword(word)?,
        None => return None,
    };
    i += 1;

    if keyword_of(tokens.get(i)) == Some(Keyword::IF)
        && keyword_of(tokens.get(i + 1)) == Some(Keyword::NOT)
        && keyword_of(tokens.get(i + 2)) == Some(Keyword::EXISTS)
    {
        i += 3;
    }

    let mut parts = Vec::new();
    loop {
        match tokens.get(i) {
            Some(Token::Word(word)) if i < end => parts.push(normalize_identifier(&word.value)),
            _ => return None,
        }
        i += 1;
        if matches!(tokens.get(i), Some(Token::Period)) && parts.len() < 3 {
            i += 1;
        } else {
            break;
        }
    }

    let mut signature = None;
    if kind.has_signature() && matches!(tokens.get(i), Some(Token::LParen)) {
        let close = matching_paren(tokens, i, end)?;
        signature = Some(signature_of(&tokens[i + 1..close]));
        i = close + 1;
    }

    Some(Declaration {
        kind,
        parts,
        signature,
        header_end: i,
        statement_end: end,
    })
}

pub(crate) fn matching_paren(tokens: &[Token], open: usize, end: usize) -> Option<usize> {
    let mut depth = 0i64;
    for (i, token) in tokens.iter().enumerate().take(end).skip(open) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split at top-level commas
pub(crate) fn split_top_level(tokens: &[Token]) -> Vec<&[Token]> {
    let mut items = Vec::new();
    let mut depth = 0i64;
    let mut item_start = 0;

    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth -= 1,
            Token::Comma if depth == 0 => {
                items.push(&tokens[item_start..i]);
                item_start = i + 1;
            }
            _ => {}
        }
    }
    if item_start < tokens.len() {
        items.push(&tokens[item_start..]);
    }

    items
}

/// `(name TYPE [DEFAULT ...], ...)` becomes `(TYPE, ...)`
fn signature_of(params: &[Token]) -> String {
    let types: Vec<String> = split_top_level(params)
        .into_iter()
        .filter(|param| !param.is_empty())
        .map(|param| {
            let type_tokens: Vec<Token> = param
                .iter()
                .skip(1)
                .take_while(|t| keyword_of(Some(t)) != Some(Keyword::DEFAULT))
                .map(|t| match t {
                    Token::Word(word) if word.quote_style.is_none() => {
                        Token::make_word(&word.value.to_uppercase(), None)
                    }
                    other => other.clone(),
                })
                .collect();
            render_tokens(&type_tokens)
        })
        .collect();

    format!("({})", types.join(", "))
}
