//! Parallel fan-out of a query over the elements of a list variable.
//!
//! ```text
//!            SELECT … WHERE DEPT = :depts        depts = ['A00', 'B01', 'C01']
//!                         │
//!          ┌──────────────┼──────────────┐       one job per element,
//!          ▼              ▼              ▼       at most `workers` at a time
//!    connect/fetch  connect/fetch  connect/fetch
//!          └──────────────┼──────────────┘
//!                         ▼
//!           concat in completion order, reset index
//! ```
//!
//! Every job opens its own connection. The first failure cancels the jobs
//! that have not yet reached the driver and the whole call fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;

use crate::binder::{HostValue, bind};
use crate::engine::{Connector, Session};
use crate::error::{SqlCellError, SqlCellResult};
use crate::parser::command_word;
use crate::table::ResultTable;

/// Fewest workers for which partitions get their own connections.
pub const MIN_WORKERS: usize = 2;
/// Upper bound on concurrent workers.
pub const MAX_WORKERS: usize = 12;

/// Shared flag telling jobs to stop before their next step.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// A parallel query request.
#[derive(Debug, Clone)]
pub struct ParallelQuery {
    /// Query text, optionally prefixed with `USING name`.
    pub sql: String,
    /// Name of the list variable, without the colon.
    pub name: String,
    /// The list to partition.
    pub value: HostValue,
    /// Concurrent worker limit; below [`MIN_WORKERS`] the partitions run in
    /// turn on the caller's session.
    pub workers: usize,
}

/// Merged output of a successful fan-out.
#[derive(Debug, Clone, Default)]
pub struct FanOutReport {
    /// Concatenated rows with a `0..n` index. Empty means "no rows found".
    pub table: ResultTable,
    /// Number of partitions that ran.
    pub partitions: usize,
    /// SQL issued by each worker, in the order it was sent.
    pub issued_sql: Vec<String>,
}

/// The query after an optional `USING name` prefix.
///
/// The query itself must start with `SELECT` or `WITH`.
pub fn query_body<'a>(sql: &'a str, name: &str) -> SqlCellResult<&'a str> {
    let mut body = sql.trim_start();
    if command_word(body) == "USING" {
        let rest = body["USING".len()..].trim_start();
        body = rest
            .strip_prefix(name)
            .filter(|after| after.starts_with(char::is_whitespace))
            .ok_or_else(|| {
                SqlCellError::Parallel(format!(
                    "The parallelism value ({name}) must follow USING."
                ))
            })?
            .trim_start();
    }
    match command_word(body).as_str() {
        "SELECT" | "WITH" => Ok(body),
        _ => Err(SqlCellError::Parallel(
            "SQL statement does not contain a SELECT statement.".into(),
        )),
    }
}

/// SQL for one partition: the template with `:name` bound to `value` only.
pub fn partition_sql(template: &str, name: &str, value: &HostValue) -> String {
    let mut env = std::collections::HashMap::new();
    env.insert(name.to_string(), value.clone());
    bind(template, &env)
}

/// Value used for the validation prepare: the first element, or the first
/// element of a nested list.
fn prototype_value(name: &str, items: &[HostValue]) -> SqlCellResult<HostValue> {
    match items.first() {
        None => Err(SqlCellError::Parallel(format!(
            "The variable {name} contains no values."
        ))),
        Some(HostValue::List(inner)) => inner.first().cloned().ok_or_else(|| {
            SqlCellError::Parallel(format!(
                "The variable {name} contains array values that are empty."
            ))
        }),
        Some(first) => Ok(first.clone()),
    }
}

fn record_failure(slot: &Mutex<Option<SqlCellError>>, token: &CancellationToken, err: SqlCellError) {
    let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if slot.is_none() {
        tracing::warn!(error = %err, "partition failed, cancelling remaining work");
        *slot = Some(err);
    }
    token.cancel();
}

/// Run `request` across `workers` independent connections.
///
/// `session` validates the query before any worker starts. With fewer than
/// [`MIN_WORKERS`] workers every partition runs on `session` instead.
pub async fn run_parallel(
    session: &mut dyn Session,
    connector: Arc<dyn Connector>,
    request: ParallelQuery,
) -> SqlCellResult<FanOutReport> {
    let name = request.name;
    let template = query_body(&request.sql, &name)?.to_string();

    if !template.contains(&format!(":{name}")) {
        return Err(SqlCellError::Parallel(format!(
            "The parallelism value ({name}) was not found in the SQL statement"
        )));
    }
    let HostValue::List(items) = request.value else {
        return Err(SqlCellError::Parallel(format!(
            "The variable {name} is not an array or a list of values."
        )));
    };

    let proto = partition_sql(&template, &name, &prototype_value(&name, &items)?);
    let prepared = session.prepare(&proto).await?;
    if !prepared.has_answer_set() {
        return Err(SqlCellError::Parallel(
            "The SQL statement does not return an answer set.".into(),
        ));
    }

    if request.workers < MIN_WORKERS {
        return run_serial(session, &template, &name, items).await;
    }
    let workers = request.workers.min(MAX_WORKERS);
    tracing::info!(partitions = items.len(), workers, "starting parallel query");

    let semaphore = Arc::new(Semaphore::new(workers));
    let token = CancellationToken::new();
    let failure = Arc::new(Mutex::new(None));
    let (trace_tx, mut trace_rx) = mpsc::unbounded_channel();
    let partitions = items.len();

    let mut jobs = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let job = PartitionJob {
            index,
            sql: partition_sql(&template, &name, &item),
            connector: Arc::clone(&connector),
            token: token.clone(),
            failure: Arc::clone(&failure),
            trace: trace_tx.clone(),
        };
        let semaphore = Arc::clone(&semaphore);
        jobs.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            job.run().await
        });
    }
    drop(trace_tx);

    let mut tables = Vec::with_capacity(partitions);
    while let Some(joined) = jobs.join_next().await {
        match joined {
            Ok(Some(table)) => tables.push(table),
            Ok(None) => {}
            Err(join_err) => record_failure(
                &failure,
                &token,
                SqlCellError::Partition(format!("worker aborted: {join_err}")),
            ),
        }
    }

    let mut issued_sql = Vec::new();
    while let Ok(sql) = trace_rx.try_recv() {
        issued_sql.push(sql);
    }

    let first_error = failure
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    if let Some(err) = first_error {
        return Err(match err {
            SqlCellError::Partition(msg) => SqlCellError::Partition(msg),
            other => SqlCellError::Partition(other.to_string()),
        });
    }

    let mut table = ResultTable::concat(tables);
    table.reset_index();
    tracing::info!(rows = table.len(), partitions, "parallel query finished");

    Ok(FanOutReport {
        table,
        partitions,
        issued_sql,
    })
}

/// Every partition in turn on one session; the first error ends the run.
async fn run_serial(
    session: &mut dyn Session,
    template: &str,
    name: &str,
    items: Vec<HostValue>,
) -> SqlCellResult<FanOutReport> {
    tracing::info!(partitions = items.len(), "threads disabled, running partitions serially");
    let partitions = items.len();
    let mut tables = Vec::with_capacity(partitions);
    let mut issued_sql = Vec::with_capacity(partitions);

    for item in &items {
        let sql = partition_sql(template, name, item);
        tracing::debug!(sql = %sql, "executing partition");
        let prepared = session.prepare(&sql).await?;
        tables.push(session.fetch(&prepared).await?);
        issued_sql.push(sql);
    }

    let mut table = ResultTable::concat(tables);
    table.reset_index();
    Ok(FanOutReport {
        table,
        partitions,
        issued_sql,
    })
}

/// One element's worth of work.
struct PartitionJob {
    index: usize,
    sql: String,
    connector: Arc<dyn Connector>,
    token: CancellationToken,
    failure: Arc<Mutex<Option<SqlCellError>>>,
    trace: mpsc::UnboundedSender<String>,
}

impl PartitionJob {
    /// `None` when the job failed or was cancelled.
    async fn run(self) -> Option<ResultTable> {
        if self.token.is_cancelled() {
            return None;
        }
        let mut session = match self.connector.connect().await {
            Ok(session) => session,
            Err(err) => {
                record_failure(&self.failure, &self.token, err);
                return None;
            }
        };

        let result = self.query(session.as_mut()).await;
        if let Err(err) = session.close().await {
            tracing::debug!(partition = self.index, error = %err, "close failed");
        }

        match result {
            Ok(table) => table,
            Err(err) => {
                record_failure(&self.failure, &self.token, err);
                None
            }
        }
    }

    async fn query(&self, session: &mut dyn Session) -> SqlCellResult<Option<ResultTable>> {
        if self.token.is_cancelled() {
            return Ok(None);
        }
        let _ = self.trace.send(self.sql.clone());
        tracing::debug!(partition = self.index, sql = %self.sql, "executing partition");
        let prepared = session.prepare(&self.sql).await?;

        if self.token.is_cancelled() {
            return Ok(None);
        }
        let table = session.fetch(&prepared).await?;
        tracing::debug!(partition = self.index, rows = table.len(), "partition done");
        Ok(Some(table))
    }
}
