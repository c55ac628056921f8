//! The restricted workflow dialect and its sandboxed evaluator.
//!
//! Workflow source is evaluated into immutable [`Plan`]s with zero side
//! effects: the interpreter's global namespace contains only declarative
//! primitives (`step`, `parallel`, `trigger`, schema constructors, and
//! placeholder-returning context accessors). Anything else -- imports,
//! dynamic evaluation, filesystem/network/process access, wall-clock,
//! randomness -- fails evaluation immediately with the offending construct
//! named and its source position.
//!
//! Pipeline: `lexer` -> `parser` -> `eval` -> `graph::validate` -> `Plan`
//! (content-hashed over canonicalized source bytes).

mod eval;
mod lexer;
mod parser;

pub use eval::{evaluate_source, DslError};

use sha2::{Digest, Sha256};

/// Canonicalize workflow source for hashing: CRLF to LF, trailing
/// whitespace stripped per line, exactly one trailing newline.
pub fn canonicalize_source(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for line in source.replace("\r\n", "\n").split('\n') {
        out.push_str(line.trim_end());
        out.push('\n');
    }
    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}

/// Lowercase hex SHA-256 over canonicalized source bytes. Two sources that
/// differ only in line endings or trailing whitespace share a hash.
pub fn content_hash(source: &str) -> String {
    let digest = Sha256::digest(canonicalize_source(source).as_bytes());
    format!("{digest:x}")
}
