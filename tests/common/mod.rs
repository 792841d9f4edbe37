//! In-memory database used by the integration tests.
//!
//! Every query answers with one integer column `N`. For each integer that
//! appears after `WHERE`, the value `v` is returned `v` times; a query without
//! integers returns a single row, and one mentioning `EMPTY` returns none.
//! Statements that are not queries report 3 affected rows (0 for `NOTHING`).

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlcell::prelude::*;

#[derive(Default)]
pub struct MockState {
    pub log: Mutex<Vec<String>>,
    pub connects: AtomicUsize,
    pub fetching: AtomicUsize,
    pub peak_fetching: AtomicUsize,
    pub fail_on: Option<String>,
}

impl MockState {
    pub fn logged(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }
}

#[derive(Clone, Default)]
pub struct MockConnector {
    pub state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(needle: &str) -> Self {
        Self {
            state: Arc::new(MockState {
                fail_on: Some(needle.to_string()),
                ..MockState::default()
            }),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> SqlCellResult<Box<dyn Session>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct MockSession {
    state: Arc<MockState>,
}

fn is_query(sql: &str) -> bool {
    let word = sqlcell::parser::command_word(sql);
    matches!(word.as_str(), "SELECT" | "WITH" | "VALUES")
}

fn row_values(sql: &str) -> Vec<i64> {
    let upper = sql.to_ascii_uppercase();
    if upper.contains("EMPTY") {
        return Vec::new();
    }
    let numbers: Vec<i64> = upper
        .split_once("WHERE")
        .map(|(_, tail)| {
            tail.split(|c: char| !c.is_ascii_digit())
                .filter_map(|n| n.parse().ok())
                .collect()
        })
        .unwrap_or_default();
    if numbers.is_empty() {
        return vec![1];
    }
    numbers
        .into_iter()
        .flat_map(|v| std::iter::repeat(v).take(v as usize))
        .collect()
}

#[async_trait]
impl Session for MockSession {
    async fn prepare(&mut self, sql: &str) -> SqlCellResult<Prepared> {
        self.state.record(sql);
        if let Some(needle) = &self.state.fail_on {
            if sql.contains(needle.as_str()) {
                return Err(SqlCellError::Database {
                    code: Some("-204".into()),
                    state: Some("42704".into()),
                    message: format!("{needle} is an undefined name"),
                });
            }
        }
        let columns = if is_query(sql) {
            vec![ColumnMeta::new("N", "INTEGER")]
        } else {
            Vec::new()
        };
        Ok(Prepared {
            sql: sql.to_string(),
            columns,
        })
    }

    async fn execute(&mut self, stmt: &Prepared) -> SqlCellResult<u64> {
        Ok(if stmt.sql.contains("NOTHING") { 0 } else { 3 })
    }

    async fn fetch(&mut self, stmt: &Prepared) -> SqlCellResult<ResultTable> {
        let now = self.state.fetching.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_fetching.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.state.fetching.fetch_sub(1, Ordering::SeqCst);

        Ok(ResultTable::new(stmt.columns.clone())
            .with_rows(row_values(&stmt.sql).into_iter().map(|v| vec![Cell::Int(v)])))
    }

    async fn set_autocommit(&mut self, enabled: bool) -> SqlCellResult<()> {
        self.state.record(format!("AUTOCOMMIT {enabled}"));
        Ok(())
    }

    async fn commit(&mut self) -> SqlCellResult<()> {
        self.state.record("COMMIT");
        Ok(())
    }

    async fn rollback(&mut self) -> SqlCellResult<()> {
        self.state.record("ROLLBACK");
        Ok(())
    }

    async fn close(&mut self) -> SqlCellResult<()> {
        Ok(())
    }
}
