//! `{name}` placeholder expansion against a macro's variable scope.
//!
//! | Form        | Result                                             |
//! |-------------|----------------------------------------------------|
//! | `{name}`    | value of `name`                                    |
//! | `{^name}`   | value of `name`, upper-cased                       |
//! | `{*n}`      | `{n} {n+1} …` until the first missing number       |
//! | `{,n}`      | `{n},{n+1},…` until the first missing number       |
//!
//! Unknown names expand to `null`. Expanded values are never re-scanned.

use std::collections::HashMap;
use thiserror::Error;

/// Literal inserted for a name that is not in scope.
pub const UNRESOLVED: &str = "null";

/// Flat variable table for one macro execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    vars: HashMap<String, String>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a scope from invocation tokens: `"0".."N"` plus `argc`.
    pub fn from_tokens(tokens: &[String]) -> Self {
        let mut scope = Self::new();
        for (i, token) in tokens.iter().enumerate() {
            scope.set(i.to_string(), token.clone());
        }
        let argc = tokens.len().saturating_sub(1);
        scope.set("argc", argc.to_string());
        scope
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Why a brace expression could not be expanded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BraceError {
    #[error("No variable name supplied in the braces {{}}")]
    EmptyName,

    #[error("Variable '{0}' must be numeric to join numbered variables")]
    NotNumbered(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modifier {
    Plain,
    Upper,
    JoinAll(&'static str),
}

fn split_modifier(expr: &str) -> (Modifier, &str) {
    // A single character is always a plain name, even `^` or `*`.
    if expr.chars().count() < 2 {
        return (Modifier::Plain, expr);
    }
    match expr.as_bytes()[0] {
        b'^' => (Modifier::Upper, &expr[1..]),
        b'*' => (Modifier::JoinAll(" "), &expr[1..]),
        b',' => (Modifier::JoinAll(","), &expr[1..]),
        _ => (Modifier::Plain, expr),
    }
}

/// Expand every `{…}` span in `text`.
///
/// Fails on an empty brace pair, or on `{*x}` / `{,x}` where `x` is defined
/// but not a number.
pub fn try_substitute(text: &str, scope: &Scope) -> Result<String, BraceError> {
    let mut result = String::with_capacity(text.len());
    let mut remainder = text;

    while let Some(open) = remainder.find('{') {
        let Some(close) = remainder[open..].find('}').map(|i| open + i) else {
            break;
        };

        result.push_str(&remainder[..open]);
        let expr = remainder[open + 1..close].trim();
        remainder = &remainder[close + 1..];

        if expr.is_empty() {
            return Err(BraceError::EmptyName);
        }

        let (modifier, name) = split_modifier(expr);
        match (modifier, scope.get(name)) {
            (Modifier::Plain, Some(value)) => result.push_str(value),
            (Modifier::Upper, Some(value)) => result.push_str(&value.to_uppercase()),
            (Modifier::JoinAll(sep), Some(_)) => {
                let start: usize = name
                    .parse()
                    .map_err(|_| BraceError::NotNumbered(name.to_string()))?;
                let joined: Vec<&str> = (start..)
                    .map_while(|i| scope.get(&i.to_string()))
                    .collect();
                result.push_str(&joined.join(sep));
            }
            (Modifier::JoinAll(_), None) => {}
            (_, None) => result.push_str(UNRESOLVED),
        }
    }

    result.push_str(remainder);
    Ok(result)
}

/// Expand `{…}` spans, falling back to the untouched text on error.
///
/// The failure is logged; callers see the original text, meaning "no
/// substitution performed".
pub fn substitute(text: &str, scope: &Scope) -> String {
    match try_substitute(text, scope) {
        Ok(expanded) => expanded,
        Err(err) => {
            tracing::warn!("{err}");
            text.to_string()
        }
    }
}
