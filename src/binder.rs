//! Host-variable binding: rewrites `:name` references into SQL literals.
//!
//! ```text
//! SELECT * FROM t WHERE id IN (:ids) AND owner = :who
//!                              ──┬──           ──┬─
//!                                │               └── Text  → 'O''Brien'
//!                                └── List         → 1,2,3
//! ```
//!
//! Quoted regions are copied as-is. Names that do not resolve are left in
//! place for a later binding layer.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use crate::table::{Cell, ResultTable, format_float};

/// A host value, classified once when it enters the crate.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Int(i64),
    Float(f64),
    /// Quoted on output.
    Text(String),
    /// Inserted verbatim (hex literals such as `0x0A0B`).
    Raw(String),
    /// Comma-joined, without parentheses.
    List(Vec<HostValue>),
    /// Rendered as `(…),(…)` rows for multi-row `VALUES`.
    Table(ResultTable),
    /// A JSON document, serialized and quoted.
    Json(JsonValue),
}

impl HostValue {
    /// Classify a string: a `0x` prefix marks it raw.
    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.starts_with("0x") {
            Self::Raw(value)
        } else {
            Self::Text(value)
        }
    }

    /// Parse a command-line value: JSON when it parses, text otherwise.
    pub fn parse_arg(input: &str) -> Self {
        match serde_json::from_str::<JsonValue>(input) {
            Ok(json) => json.into(),
            Err(_) => Self::text(input),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    /// SQL text for this value; `quote` controls whether text is quoted.
    pub fn to_sql(&self, quote: bool) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::Float(f) => format_float(*f),
            Self::Text(s) => quoted(s, quote),
            Self::Raw(s) => s.clone(),
            Self::List(items) => items
                .iter()
                .map(|item| item.to_sql(true))
                .collect::<Vec<_>>()
                .join(","),
            Self::Table(table) => table_rows(table),
            Self::Json(doc) => quoted(&doc.to_string(), quote),
        }
    }
}

/// Wrap in single quotes, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn quoted(value: &str, quote: bool) -> String {
    if quote {
        quote_literal(value)
    } else {
        value.to_string()
    }
}

fn table_rows(table: &ResultTable) -> String {
    table
        .rows()
        .iter()
        .map(|row| {
            let cells: Vec<String> = table
                .columns()
                .iter()
                .zip(row)
                .map(|(column, cell)| match cell {
                    Cell::Null => "NULL".to_string(),
                    Cell::Float(f) if f.is_nan() => "NULL".to_string(),
                    cell if column.kind.is_textual() => quote_literal(&cell.to_string()),
                    cell => cell.to_string(),
                })
                .collect();
            format!("({})", cells.join(","))
        })
        .collect::<Vec<_>>()
        .join(",")
}

impl From<i64> for HostValue {
    fn from(v: i64) -> Self {
        HostValue::Int(v)
    }
}

impl From<i32> for HostValue {
    fn from(v: i32) -> Self {
        HostValue::Int(v as i64)
    }
}

impl From<f64> for HostValue {
    fn from(v: f64) -> Self {
        HostValue::Float(v)
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        HostValue::text(v)
    }
}

impl From<String> for HostValue {
    fn from(v: String) -> Self {
        HostValue::text(v)
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(v: Vec<T>) -> Self {
        HostValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<ResultTable> for HostValue {
    fn from(v: ResultTable) -> Self {
        HostValue::Table(v)
    }
}

impl From<JsonValue> for HostValue {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => HostValue::Raw("NULL".into()),
            JsonValue::Bool(b) => HostValue::Raw(if b { "TRUE" } else { "FALSE" }.into()),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => HostValue::Int(i),
                None => HostValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => HostValue::text(s),
            JsonValue::Array(items) => {
                HostValue::List(items.into_iter().map(HostValue::from).collect())
            }
            doc @ JsonValue::Object(_) => HostValue::Json(doc),
        }
    }
}

/// Where `:name` references are resolved.
pub trait HostEnv {
    fn lookup(&self, name: &str) -> Option<&HostValue>;
}

impl HostEnv for HashMap<String, HostValue> {
    fn lookup(&self, name: &str) -> Option<&HostValue> {
        self.get(name)
    }
}

/// The host variable table owned by a session.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    values: HashMap<String, HostValue>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<HostValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&HostValue> {
        self.values.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<HostValue> {
        self.values.remove(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl HostEnv for Variables {
    fn lookup(&self, name: &str) -> Option<&HostValue> {
        self.values.get(name)
    }
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '@' | '[' | ']')
}

/// Text for one `:name` reference ended by `terminator` (`None` at end of
/// input).
fn resolve(name: &str, terminator: Option<char>, env: &impl HostEnv) -> String {
    // `:[…]` is never a host variable.
    if name.is_empty() || name.starts_with(['[', ']']) {
        return format!(":{name}");
    }
    match env.lookup(name) {
        // `:schema.table` inserts text without quotes.
        Some(value) => value.to_sql(terminator != Some('.')),
        None => {
            tracing::trace!(name, "host variable not found, left for driver");
            format!(":{name}")
        }
    }
}

/// Rewrite every `:name` outside quotes using `env`.
///
/// # Example
///
/// ```
/// use sqlcell::binder::{bind, Variables};
///
/// let mut vars = Variables::new();
/// vars.set("ids", vec![1i64, 2, 3]);
/// assert_eq!(bind("SELECT * FROM T WHERE ID IN (:ids)", &vars),
///            "SELECT * FROM T WHERE ID IN (1,2,3)");
/// ```
pub fn bind(sql: &str, env: &impl HostEnv) -> String {
    if !sql.contains(':') {
        return sql.to_string();
    }

    let mut out = String::with_capacity(sql.len());
    let mut name: Option<String> = None;
    let mut quote: Option<char> = None;

    for ch in sql.chars() {
        if let Some(current) = name.as_mut() {
            if is_name_char(ch) {
                current.push(ch);
                continue;
            }
            out.push_str(&resolve(current, Some(ch), env));
            name = None;
            // The terminator never starts another reference.
            out.push(ch);
            if ch == '\'' || ch == '"' {
                quote = Some(ch);
            }
            continue;
        }

        match quote {
            Some(q) => {
                out.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' => {
                    out.push(ch);
                    quote = Some(ch);
                }
                ':' => name = Some(String::new()),
                _ => out.push(ch),
            },
        }
    }

    if let Some(current) = name {
        out.push_str(&resolve(&current, None, env));
    }

    out
}
