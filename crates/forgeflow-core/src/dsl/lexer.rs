//! Tokenizer for the workflow dialect.
//!
//! Produces a flat token stream with 1-based line/column spans so parse and
//! evaluation errors can point at the exact source position. `#` starts a
//! comment running to end of line.

use std::fmt;

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// A source position (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Bare identifier or keyword (`workflow`, `let`, `true`, `false`).
    Ident(String),
    /// Double-quoted string literal, escapes resolved.
    Str(String),
    /// Integer literal.
    Int(i64),
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Eq,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(name) => write!(f, "'{name}'"),
            TokenKind::Str(_) => write!(f, "string literal"),
            TokenKind::Int(_) => write!(f, "integer literal"),
            TokenKind::LBrace => write!(f, "'{{'"),
            TokenKind::RBrace => write!(f, "'}}'"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::LBracket => write!(f, "'['"),
            TokenKind::RBracket => write!(f, "']'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Colon => write!(f, "':'"),
            TokenKind::Eq => write!(f, "'='"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// A lexical error at a known position. The caller attaches the file name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

/// Tokenize an entire source unit. The final token is always `Eof`.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line: u32 = 1;
    let mut column: u32 = 1;

    macro_rules! span {
        () => {
            Span { line, column }
        };
    }

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                chars.next();
                line += 1;
                column = 1;
            }
            c if c.is_whitespace() => {
                chars.next();
                column += 1;
            }
            '#' => {
                // Comment to end of line
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                    column += 1;
                }
            }
            '{' | '}' | '(' | ')' | '[' | ']' | ',' | ':' | '=' => {
                let kind = match c {
                    '{' => TokenKind::LBrace,
                    '}' => TokenKind::RBrace,
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '[' => TokenKind::LBracket,
                    ']' => TokenKind::RBracket,
                    ',' => TokenKind::Comma,
                    ':' => TokenKind::Colon,
                    _ => TokenKind::Eq,
                };
                tokens.push(Token { kind, span: span!() });
                chars.next();
                column += 1;
            }
            '"' => {
                let start = span!();
                chars.next();
                column += 1;
                let mut value = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    column += 1;
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\n' => {
                            return Err(LexError {
                                span: start,
                                message: "unterminated string literal".to_string(),
                            });
                        }
                        '\\' => match chars.next() {
                            Some('n') => {
                                value.push('\n');
                                column += 1;
                            }
                            Some('t') => {
                                value.push('\t');
                                column += 1;
                            }
                            Some('"') => {
                                value.push('"');
                                column += 1;
                            }
                            Some('\\') => {
                                value.push('\\');
                                column += 1;
                            }
                            other => {
                                return Err(LexError {
                                    span: span!(),
                                    message: match other {
                                        Some(c) => format!("unknown escape '\\{c}'"),
                                        None => "unterminated string literal".to_string(),
                                    },
                                });
                            }
                        },
                        c => value.push(c),
                    }
                }
                if !closed {
                    return Err(LexError {
                        span: start,
                        message: "unterminated string literal".to_string(),
                    });
                }
                tokens.push(Token {
                    kind: TokenKind::Str(value),
                    span: start,
                });
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = span!();
                let mut text = String::new();
                if c == '-' {
                    text.push(c);
                    chars.next();
                    column += 1;
                }
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        chars.next();
                        column += 1;
                    } else {
                        break;
                    }
                }
                let value: i64 = text.parse().map_err(|_| LexError {
                    span: start,
                    message: format!("invalid integer literal '{text}'"),
                })?;
                tokens.push(Token {
                    kind: TokenKind::Int(value),
                    span: start,
                });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = span!();
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                        column += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(name),
                    span: start,
                });
            }
            other => {
                return Err(LexError {
                    span: span!(),
                    message: format!("unexpected character '{other}'"),
                });
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        span: span!(),
    });
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_punctuation_and_idents() {
        assert_eq!(
            kinds("workflow \"ci\" { }"),
            vec![
                TokenKind::Ident("workflow".to_string()),
                TokenKind::Str("ci".to_string()),
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_spans_are_one_based() {
        let tokens = tokenize("a\n  b").unwrap();
        assert_eq!(tokens[0].span, Span { line: 1, column: 1 });
        assert_eq!(tokens[1].span, Span { line: 2, column: 3 });
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\nb\"c\\d""#),
            vec![TokenKind::Str("a\nb\"c\\d".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            kinds("# a comment\nx # trailing\n"),
            vec![TokenKind::Ident("x".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_integers_including_negative() {
        assert_eq!(
            kinds("12 -3"),
            vec![TokenKind::Int(12), TokenKind::Int(-3), TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_string_reports_start() {
        let err = tokenize("  \"oops").unwrap_err();
        assert_eq!(err.span, Span { line: 1, column: 3 });
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("step @").unwrap_err();
        assert!(err.message.contains("'@'"));
    }
}
