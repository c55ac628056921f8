//! Recursive-descent parser for the workflow dialect.
//!
//! Grammar:
//!
//! ```text
//! file     := workflow*
//! workflow := "workflow" STRING "{" stmt* "}"
//! stmt     := "let" IDENT "=" expr | expr
//! expr     := STRING | INT | "true" | "false" | list | map | call | IDENT
//! call     := IDENT "(" (expr ("," expr)* ","?)? ")"
//! list     := "[" (expr ("," expr)* ","?)? "]"
//! map      := "{" (key ":" expr ("," key ":" expr)* ","?)? "}"
//! key      := IDENT | STRING
//! ```
//!
//! The parser builds a plain AST; all meaning (and all capability policy)
//! lives in the evaluator.

use super::lexer::{LexError, Span, Token, TokenKind};

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SourceAst {
    pub workflows: Vec<WorkflowDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDecl {
    pub name: String,
    pub span: Span,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let { name: String, span: Span, value: Expr },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Str(String),
    Int(i64),
    Bool(bool),
    Ident(String),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Call { name: String, args: Vec<Expr> },
}

/// A parse error at a known position. The caller attaches the file name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    pub span: Span,
    pub message: String,
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError {
            span: e.span,
            message: e.message,
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse a whole source unit.
pub fn parse(source: &str) -> Result<SourceAst, ParseError> {
    let tokens = super::lexer::tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.source_file()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, ParseError> {
        let token = self.peek().clone();
        if &token.kind == kind {
            Ok(self.advance())
        } else {
            Err(ParseError {
                span: token.span,
                message: format!("expected {kind}, found {}", token.kind),
            })
        }
    }

    fn source_file(&mut self) -> Result<SourceAst, ParseError> {
        let mut workflows = Vec::new();
        loop {
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::Eof => break,
                TokenKind::Ident(name) if name == "workflow" => {
                    workflows.push(self.workflow()?);
                }
                other => {
                    return Err(ParseError {
                        span: token.span,
                        message: format!("expected 'workflow', found {other}"),
                    });
                }
            }
        }
        Ok(SourceAst { workflows })
    }

    fn workflow(&mut self) -> Result<WorkflowDecl, ParseError> {
        // Consume the `workflow` keyword
        self.advance();
        let name_token = self.advance();
        let (name, span) = match name_token.kind {
            TokenKind::Str(name) => (name, name_token.span),
            other => {
                return Err(ParseError {
                    span: name_token.span,
                    message: format!("expected workflow name string, found {other}"),
                });
            }
        };
        self.expect(&TokenKind::LBrace)?;

        let mut body = Vec::new();
        loop {
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => {
                    return Err(ParseError {
                        span: token.span,
                        message: format!("unclosed workflow '{name}' body"),
                    });
                }
                TokenKind::Ident(kw) if kw == "let" => {
                    self.advance();
                    let ident = self.advance();
                    let (binding, binding_span) = match ident.kind {
                        TokenKind::Ident(n) => (n, ident.span),
                        other => {
                            return Err(ParseError {
                                span: ident.span,
                                message: format!("expected binding name, found {other}"),
                            });
                        }
                    };
                    self.expect(&TokenKind::Eq)?;
                    let value = self.expr()?;
                    body.push(Stmt::Let {
                        name: binding,
                        span: binding_span,
                        value,
                    });
                }
                _ => body.push(Stmt::Expr(self.expr()?)),
            }
        }

        Ok(WorkflowDecl { name, span, body })
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        let token = self.advance();
        let span = token.span;
        let kind = match token.kind {
            TokenKind::Str(s) => ExprKind::Str(s),
            TokenKind::Int(i) => ExprKind::Int(i),
            TokenKind::Ident(name) if name == "true" => ExprKind::Bool(true),
            TokenKind::Ident(name) if name == "false" => ExprKind::Bool(false),
            TokenKind::Ident(name) => {
                if self.peek().kind == TokenKind::LParen {
                    self.advance();
                    let args = self.comma_separated(TokenKind::RParen, Self::expr)?;
                    ExprKind::Call { name, args }
                } else {
                    ExprKind::Ident(name)
                }
            }
            TokenKind::LBracket => {
                let items = self.comma_separated(TokenKind::RBracket, Self::expr)?;
                ExprKind::List(items)
            }
            TokenKind::LBrace => {
                let entries = self.comma_separated(TokenKind::RBrace, Self::map_entry)?;
                ExprKind::Map(entries)
            }
            other => {
                return Err(ParseError {
                    span,
                    message: format!("expected expression, found {other}"),
                });
            }
        };
        Ok(Expr { kind, span })
    }

    fn map_entry(&mut self) -> Result<(String, Expr), ParseError> {
        let token = self.advance();
        let key = match token.kind {
            TokenKind::Ident(name) => name,
            TokenKind::Str(name) => name,
            other => {
                return Err(ParseError {
                    span: token.span,
                    message: format!("expected map key, found {other}"),
                });
            }
        };
        self.expect(&TokenKind::Colon)?;
        let value = self.expr()?;
        Ok((key, value))
    }

    /// Parse `item ("," item)* ","?` up to (and consuming) `close`.
    fn comma_separated<T>(
        &mut self,
        close: TokenKind,
        mut item: impl FnMut(&mut Self) -> Result<T, ParseError>,
    ) -> Result<Vec<T>, ParseError> {
        let mut items = Vec::new();
        loop {
            if self.peek().kind == close {
                self.advance();
                break;
            }
            items.push(item(self)?);
            let token = self.peek().clone();
            match token.kind {
                TokenKind::Comma => {
                    self.advance();
                }
                ref kind if *kind == close => {
                    self.advance();
                    break;
                }
                other => {
                    return Err(ParseError {
                        span: token.span,
                        message: format!("expected ',' or {close}, found {other}"),
                    });
                }
            }
        }
        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
