//! Tabular query results.

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Broad column type, enough to decide quoting and rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Text,
    Integer,
    Float,
    Boolean,
    Binary,
}

impl ColumnKind {
    /// Map a driver type name (`INT4`, `VARCHAR`, `DOUBLE`, …) to a kind.
    pub fn from_type_name(type_name: &str) -> Self {
        match type_name.to_ascii_uppercase().as_str() {
            "BOOL" | "BOOLEAN" => Self::Boolean,
            "INT2" | "INT4" | "INT8" | "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" => {
                Self::Integer
            }
            "FLOAT4" | "FLOAT8" | "REAL" | "DOUBLE" | "FLOAT" | "DECFLOAT" | "NUMERIC"
            | "DECIMAL" => Self::Float,
            "BLOB" | "BYTEA" | "BINARY" | "VARBINARY" => Self::Binary,
            _ => Self::Text,
        }
    }

    pub fn is_textual(self) -> bool {
        matches!(self, Self::Text)
    }
}

/// Name and type of one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    pub type_name: String,
    pub kind: ColumnKind,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            name: name.into(),
            kind: ColumnKind::from_type_name(&type_name),
            type_name,
        }
    }
}

/// One value in a row. `Null` is the missing-value marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Int(i) => JsonValue::Number((*i).into()),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Text(s) => JsonValue::String(s.clone()),
        }
    }
}

/// Decimal text for a float, keeping a trailing `.0` on whole numbers.
pub fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => f.write_str(&format_float(*v)),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<i32> for Cell {
    fn from(v: i32) -> Self {
        Cell::Int(v as i64)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Bool(v)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Cell::Null)
    }
}

/// Rows with named, typed columns and a row index.
///
/// The index starts out as `0..n` and survives [`ResultTable::concat`]
/// unchanged, so concatenated tables carry duplicate labels until
/// [`ResultTable::reset_index`] is called.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultTable {
    columns: Vec<ColumnMeta>,
    rows: Vec<Vec<Cell>>,
    index: Vec<usize>,
}

impl ResultTable {
    pub fn new(columns: Vec<ColumnMeta>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            index: Vec::new(),
        }
    }

    /// Append a row; its index label is its position.
    pub fn push_row(&mut self, row: Vec<Cell>) {
        self.index.push(self.rows.len());
        self.rows.push(row);
    }

    pub fn with_rows(mut self, rows: impl IntoIterator<Item = Vec<Cell>>) -> Self {
        for row in rows {
            self.push_row(row);
        }
        self
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn index(&self) -> &[usize] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Stack tables vertically. Columns come from the first table; index
    /// labels are kept as they are.
    pub fn concat(tables: impl IntoIterator<Item = ResultTable>) -> ResultTable {
        let mut tables = tables.into_iter();
        let Some(mut merged) = tables.next() else {
            return ResultTable::default();
        };
        for table in tables {
            if merged.columns.is_empty() {
                merged.columns = table.columns;
            }
            merged.rows.extend(table.rows);
            merged.index.extend(table.index);
        }
        merged
    }

    /// Relabel rows `0..n`.
    pub fn reset_index(&mut self) {
        self.index = (0..self.rows.len()).collect();
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<Map<String, JsonValue>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(col, cell)| (col.name.clone(), cell.to_json()))
                    .collect()
            })
            .collect()
    }

    /// Header followed by every row, each as a JSON array.
    pub fn to_arrays(&self) -> Vec<Vec<JsonValue>> {
        let header: Vec<JsonValue> = self
            .columns
            .iter()
            .map(|c| JsonValue::String(c.name.clone()))
            .collect();
        std::iter::once(header)
            .chain(
                self.rows
                    .iter()
                    .map(|row| row.iter().map(Cell::to_json).collect::<Vec<_>>()),
            )
            .collect()
    }

    /// The first column of every row parsed as a JSON document.
    ///
    /// Cells that are not valid JSON are returned as JSON strings.
    pub fn first_column_json(&self) -> Vec<JsonValue> {
        self.rows
            .iter()
            .filter_map(|row| row.first())
            .map(|cell| match cell {
                Cell::Text(s) => {
                    serde_json::from_str(s).unwrap_or_else(|_| JsonValue::String(s.clone()))
                }
                other => other.to_json(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(values: &[i64]) -> ResultTable {
        ResultTable::new(vec![ColumnMeta::new("n", "INTEGER")])
            .with_rows(values.iter().map(|v| vec![Cell::Int(*v)]))
    }

    #[test]
    fn test_column_kind_from_type_name() {
        assert_eq!(ColumnKind::from_type_name("int4"), ColumnKind::Integer);
        assert_eq!(ColumnKind::from_type_name("DOUBLE"), ColumnKind::Float);
        assert_eq!(ColumnKind::from_type_name("VARCHAR"), ColumnKind::Text);
        assert_eq!(ColumnKind::from_type_name("BOOLEAN"), ColumnKind::Boolean);
        assert!(ColumnKind::from_type_name("TIMESTAMP").is_textual());
    }

    #[test]
    fn test_concat_keeps_labels_until_reset() {
        let mut merged = ResultTable::concat(vec![table(&[1, 2]), table(&[3]), table(&[])]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.index(), &[0, 1, 0]);
        merged.reset_index();
        assert_eq!(merged.index(), &[0, 1, 2]);
    }

    #[test]
    fn test_concat_empty() {
        let merged = ResultTable::concat(Vec::new());
        assert!(merged.is_empty());
        assert!(merged.columns().is_empty());
    }

    #[test]
    fn test_records() {
        let t = ResultTable::new(vec![
            ColumnMeta::new("id", "INT"),
            ColumnMeta::new("name", "TEXT"),
        ])
        .with_rows([vec![Cell::Int(1), Cell::from("a")]]);
        let records = t.to_records();
        assert_eq!(records[0]["id"], JsonValue::from(1));
        assert_eq!(records[0]["name"], JsonValue::from("a"));
    }

    #[test]
    fn test_first_column_json() {
        let t = ResultTable::new(vec![ColumnMeta::new("doc", "CLOB")])
            .with_rows([vec![Cell::from(r#"{"a":1}"#)], vec![Cell::from("plain")]]);
        let docs = t.first_column_json();
        assert_eq!(docs[0]["a"], JsonValue::from(1));
        assert_eq!(docs[1], JsonValue::from("plain"));
    }

    #[test]
    fn test_cell_display() {
        assert_eq!(Cell::Float(2.0).to_string(), "2.0");
        assert_eq!(Cell::Float(2.5).to_string(), "2.5");
        assert_eq!(Cell::Null.to_string(), "NULL");
        assert_eq!(Cell::from(None::<i64>), Cell::Null);
    }
}
