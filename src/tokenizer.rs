//! Shell-like argument splitting for instruction lines.
//!
//! Tokens are separated by blanks. Two escapes keep blanks inside a token:
//!
//! ```text
//! echo 'hello world' values(1, 'a b')  x
//! ──┬─ ──────┬────── ────────┬───────  ┬
//!   │        │               │         └── two blanks before: "null" placeholder
//!   │        │               └── parenthesized block, kept verbatim
//!   │        └── quoted run, quotes kept
//!   └── plain token
//! ```
//!
//! Nothing here can fail: an unterminated quote or block simply runs to the
//! end of the line.

use crate::substitute::{Scope, substitute};

/// Placeholder emitted for an empty slot between two delimiters.
pub const EMPTY_TOKEN: &str = "null";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Plain,
    Quoted(char),
    Block,
}

fn is_delimiter(ch: char) -> bool {
    ch == ' ' || ch == '\t'
}

/// Split `line` into tokens without variable substitution.
///
/// # Example
///
/// ```
/// use sqlcell::tokenizer::tokenize;
///
/// let tokens = tokenize("CALL proc(1, 'a b') \"x y\"");
/// assert_eq!(tokens, vec!["CALL", "proc(1, 'a b')", "\"x y\""]);
/// ```
pub fn tokenize(line: &str) -> Vec<String> {
    split(line, |token| token)
}

/// Split `line` into tokens, expanding `{…}` placeholders in every completed
/// token against `scope`.
pub fn tokenize_with(line: &str, scope: &Scope) -> Vec<String> {
    split(line, |token| substitute(&token, scope))
}

fn split(line: &str, mut finish: impl FnMut(String) -> String) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut mode = Mode::Plain;

    for ch in line.trim_start().chars() {
        match mode {
            Mode::Block => {
                current.push(ch);
                if ch == ')' {
                    mode = Mode::Plain;
                }
            }
            Mode::Quoted(quote) => {
                current.push(ch);
                if ch == quote {
                    mode = Mode::Plain;
                }
            }
            Mode::Plain => match ch {
                '(' => {
                    current.push(ch);
                    mode = Mode::Block;
                }
                '\'' | '"' => {
                    current.push(ch);
                    mode = Mode::Quoted(ch);
                }
                c if is_delimiter(c) => {
                    if current.is_empty() {
                        tokens.push(EMPTY_TOKEN.to_string());
                    } else {
                        tokens.push(finish(std::mem::take(&mut current)));
                    }
                }
                c => current.push(c),
            },
        }
    }

    if !current.is_empty() {
        tokens.push(finish(current));
    }

    tokens
}
