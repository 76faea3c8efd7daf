//! JDL Lexer
//!
//! Tokenizes AliEn JDL text with logos. Comments (`//`, `/* */` and `#`
//! at the start of a line) are dropped; every other token keeps its span
//! so raw classad expressions can be sliced back out of the source.

use std::fmt;

use logos::{Logos, Span};

use crate::error::{GeneratorError, Result};

/// A token with its span in the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub token: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(token: T, span: Span) -> Self {
        Self { token, span }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum LexError {
    #[default]
    UnexpectedCharacter,
    UnterminatedString,
    UnterminatedComment,
    InvalidNumber,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::UnexpectedCharacter => write!(f, "unexpected character"),
            LexError::UnterminatedString => write!(f, "unterminated string"),
            LexError::UnterminatedComment => write!(f, "unterminated comment"),
            LexError::InvalidNumber => write!(f, "invalid number"),
        }
    }
}

/// Tokens of the JDL language.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexError)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token(";")]
    Semi,

    #[token(",")]
    Comma,

    /// A lone `=`, separating an attribute name from its value.
    #[token("=")]
    Assign,

    /// Classad operators, only ever kept as part of raw expression text.
    #[regex(r"==|!=|<=|>=|=\?=|=!=|&&|\|\||[-+*/%<>!?:.&|^~@$']", |lex| lex.slice().to_string())]
    Operator(String),

    #[regex(r#""([^"\\]|\\.)*""#, lex_string, allow_greedy = true)]
    Str(String),

    /// Always an error; matches a string running to end of input.
    #[regex(r#""([^"\\]|\\.)*"#, lex_unterminated_string, allow_greedy = true)]
    UnterminatedString,

    #[regex(r"-?[0-9]+", lex_int)]
    Int(i64),

    #[regex(r"[A-Za-z_][A-Za-z0-9_.]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"#[^\n]*", allow_greedy = true)]
    HashComment,

    #[regex(r"//[^\n]*", allow_greedy = true)]
    LineComment,

    #[regex(r"/\*([^*]|\*+[^*/])*\*+/", allow_greedy = true)]
    BlockComment,
}

/// Lex a double-quoted string, processing escape sequences.
fn lex_string(lex: &mut logos::Lexer<Token>) -> String {
    let s = lex.slice();
    let mut out = String::with_capacity(s.len());
    let mut chars = s[1..s.len() - 1].chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn lex_unterminated_string(_lex: &mut logos::Lexer<Token>) -> std::result::Result<(), LexError> {
    Err(LexError::UnterminatedString)
}

fn lex_int(lex: &mut logos::Lexer<Token>) -> std::result::Result<i64, LexError> {
    lex.slice().parse().map_err(|_| LexError::InvalidNumber)
}

/// One-based line number of byte offset `pos`.
pub fn line_of(source: &str, pos: usize) -> usize {
    source[..pos.min(source.len())].matches('\n').count() + 1
}

fn at_line_start(source: &str, pos: usize) -> bool {
    source[..pos]
        .rsplit('\n')
        .next()
        .map_or(true, |prefix| prefix.trim().is_empty())
}

fn error_at(source: &str, pos: usize, msg: impl fmt::Display) -> GeneratorError {
    GeneratorError::Parse(format!("line {}: {}", line_of(source, pos), msg))
}

/// Tokenize JDL source into spanned tokens, comments removed.
pub fn tokenize(source: &str) -> Result<Vec<Spanned<Token>>> {
    let mut tokens: Vec<Spanned<Token>> = Vec::new();

    for (result, span) in Token::lexer(source).spanned() {
        let token = match result {
            Ok(token) => token,
            Err(LexError::UnexpectedCharacter) => {
                return Err(error_at(
                    source,
                    span.start,
                    format!("unexpected character '{}'", &source[span.clone()]),
                ))
            }
            Err(err) => return Err(error_at(source, span.start, err)),
        };

        match token {
            Token::LineComment | Token::BlockComment => continue,
            Token::HashComment if at_line_start(source, span.start) => continue,
            Token::HashComment => return Err(error_at(source, span.start, "unexpected '#'")),
            _ => {}
        }

        // `/*` with no closing `*/` falls apart into two operators
        if let (Token::Operator(op), Some(prev)) = (&token, tokens.last()) {
            if op == "*" && prev.token == Token::Operator("/".to_string()) && prev.span.end == span.start {
                return Err(error_at(source, prev.span.start, LexError::UnterminatedComment));
            }
        }

        tokens.push(Spanned::new(token, span));
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_attribute_tokens() {
        assert_eq!(
            kinds(r#"TTL = -5; Packages = { "a", "b" };"#),
            vec![
                Token::Ident("TTL".to_string()),
                Token::Assign,
                Token::Int(-5),
                Token::Semi,
                Token::Ident("Packages".to_string()),
                Token::Assign,
                Token::LBrace,
                Token::Str("a".to_string()),
                Token::Comma,
                Token::Str("b".to_string()),
                Token::RBrace,
                Token::Semi,
            ]
        );
    }

    #[test]
    fn test_comparison_is_not_assignment() {
        let tokens = kinds("other.Type == \"machine\"");
        assert_eq!(tokens[0], Token::Ident("other.Type".to_string()));
        assert_eq!(tokens[1], Token::Operator("==".to_string()));
        assert!(!tokens.contains(&Token::Assign));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""say \"hi\"\tnow""#),
            vec![Token::Str("say \"hi\"\tnow".to_string())]
        );
    }

    #[test]
    fn test_comments_are_dropped() {
        let source = "# heading\nA = 1; // trailing\n/* block\n comment */ B = 2;";
        assert_eq!(kinds(source).len(), 8);
    }

    #[test]
    fn test_hash_inside_line_is_an_error() {
        let err = tokenize("A = 1; # not a comment").unwrap_err();
        assert!(err.to_string().contains("unexpected '#'"), "{}", err);
    }

    #[test]
    fn test_unterminated_constructs() {
        let err = tokenize("A = \"open;").unwrap_err();
        assert!(err.to_string().contains("unterminated string"), "{}", err);
        let err = tokenize("A = 1;\n/* open").unwrap_err();
        assert!(err.to_string().contains("line 2: unterminated comment"), "{}", err);
    }

    #[test]
    fn test_line_of() {
        assert_eq!(line_of("a\nb\nc", 0), 1);
        assert_eq!(line_of("a\nb\nc", 4), 3);
    }
}
