//! The instruction dispatcher.
//!
//! A [`Context`] owns everything one notebook session needs: options, the
//! macro table, host variables, the current flags, the database session and
//! the status of the last statement. [`Context::run`] takes one instruction
//! line (plus an optional cell body) and drives it through
//!
//! ```text
//! flags → macro expansion → flags → classify ─┬─ DEFINE / OPTION / CONNECT / COMMIT …
//!                                             ├─ USING name SELECT …  → parallel fan-out
//!                                             └─ SQL → split → expand → bind → execute
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;

use crate::binder::{HostEnv, HostValue, Variables, bind};
use crate::builtins;
use crate::engine::{Connector, Session, SqlxConnector};
use crate::error::{SqlCellError, SqlCellResult};
use crate::macros::MacroTable;
use crate::notice::Notice;
use crate::parallel::{ParallelQuery, run_parallel};
use crate::parser::{Instruction, extract_flags, parse_instruction, split_statements};
use crate::settings::Settings;
use crate::table::ResultTable;

/// Text shown for `?` and `-h`.
pub const HELP: &str = "\
sqlcell runs SQL statements and macros.

  [flags] SQL statements separated by ;      run statements
  define NAME  (cell body)                   define a macro
  OPTION [LIST | ? | MAXROWS n | MAXGRID n | DISPLAY TABLE|JSON | THREADS n]
  CONNECT [TO] url | CONNECT CLOSE | CONNECT RESET
  COMMIT | ROLLBACK | AUTOCOMMIT ON|OFF
  USING name SELECT ... :name ...            run the query once per list element

Flags:
  -a  show all rows          -e  echo the SQL
  -q  quiet                  -j  first column as JSON
  -r  raw rows               -d  use @ as the statement delimiter";

/// sqlcode reported when a query returns no rows.
pub const SQLCODE_NO_ROWS: i64 = 100;

/// Status of the last statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub sqlcode: i64,
    pub sqlstate: String,
    pub sqlerror: String,
    pub sqlelapsed: Duration,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            sqlcode: 0,
            sqlstate: "00000".into(),
            sqlerror: String::new(),
            sqlelapsed: Duration::ZERO,
        }
    }
}

/// What an instruction produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A result table; only the first `visible` rows should be shown.
    Table { table: ResultTable, visible: usize },
    /// `-j`: the first column of each row as a JSON document.
    Json(Vec<JsonValue>),
    /// `-r`: header row followed by every row.
    Raw(Vec<Vec<JsonValue>>),
    /// The last query returned no rows.
    NoRows,
    /// Statements without an answer set ran.
    Completed { affected: u64 },
    Defined { name: String },
    Options,
    Connected,
    Disconnected,
    Help,
    Nothing,
}

/// Outcome plus the messages gathered along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub outcome: Outcome,
    pub notices: Vec<Notice>,
}

enum StatementResult {
    Rows(ResultTable),
    Affected(u64),
}

/// Host variables with one name hidden, so it survives binding.
struct Excluding<'a> {
    vars: &'a Variables,
    name: &'a str,
}

impl HostEnv for Excluding<'_> {
    fn lookup(&self, name: &str) -> Option<&HostValue> {
        if name == self.name {
            None
        } else {
            self.vars.lookup(name)
        }
    }
}

/// One notebook session.
pub struct Context {
    settings: Settings,
    settings_path: Option<PathBuf>,
    macros: MacroTable,
    variables: Variables,
    flags: Vec<String>,
    connector: Option<Arc<dyn Connector>>,
    session: Option<Box<dyn Session>>,
    status: Status,
}

impl Context {
    /// A context with the built-in macros and no connection.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            settings_path: None,
            macros: builtins::table(),
            variables: Variables::new(),
            flags: Vec::new(),
            connector: None,
            session: None,
            status: Status::default(),
        }
    }

    /// Use `connector` for the session and for parallel workers.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Persist option changes to `path`.
    pub fn with_settings_path(mut self, path: PathBuf) -> Self {
        self.settings_path = Some(path);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn macros(&self) -> &MacroTable {
        &self.macros
    }

    pub fn macros_mut(&mut self) -> &mut MacroTable {
        &mut self.macros
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut Variables {
        &mut self.variables
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Flags of the instruction being run (or the last one).
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Whether any of `names` is set.
    pub fn flag(&self, names: &[&str]) -> bool {
        self.flags.iter().any(|f| names.contains(&f.as_str()))
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn quiet(&self) -> bool {
        self.flag(&["-q", "-quiet"])
    }

    fn extend_flags(&mut self, text: &str) -> String {
        let (rest, flags) = extract_flags(text);
        self.flags.extend(flags);
        rest
    }

    fn record_error(&mut self, err: &SqlCellError) {
        self.status.sqlcode = err
            .sqlcode()
            .and_then(|code| code.parse().ok())
            .unwrap_or(-1);
        self.status.sqlstate = err.sqlstate().unwrap_or_default().to_string();
        self.status.sqlerror = err.to_string();
        tracing::error!(sqlcode = self.status.sqlcode, error = %err, "statement failed");
    }

    /// Run one instruction. `body` is the rest of a multi-line cell.
    pub async fn run(&mut self, line: &str, body: Option<&str>) -> SqlCellResult<Response> {
        self.flags.clear();
        self.status = Status::default();

        let line = line.replace('\n', " ");
        let text = self.extend_flags(line.trim());
        let expansion = self.macros.expand(&text)?;
        let mut notices = expansion.notices;
        if expansion.exited {
            return Ok(Response {
                outcome: Outcome::Nothing,
                notices,
            });
        }
        let text = self.extend_flags(&expansion.text);

        if text == "?" || self.flag(&["-h", "-help"]) {
            return Ok(Response {
                outcome: Outcome::Help,
                notices,
            });
        }
        let body = body.filter(|b| !b.trim().is_empty());
        if text.is_empty() && body.is_none() {
            return Ok(Response {
                outcome: Outcome::Nothing,
                notices,
            });
        }

        let outcome = match parse_instruction(&text)? {
            Instruction::Define { name } => {
                let body = body.ok_or_else(|| {
                    SqlCellError::parse(text.len(), format!("No body supplied for macro {name}."))
                })?;
                self.macros.define(&name, body);
                Outcome::Defined { name }
            }
            Instruction::Options(args) => {
                let report = self.settings.apply_options(&args);
                if report.changed {
                    self.persist_settings()?;
                }
                notices.extend(report.notices);
                Outcome::Options
            }
            Instruction::Connect(url) => {
                self.connect(url).await?;
                Outcome::Connected
            }
            Instruction::Disconnect { reset } => {
                self.close().await?;
                if reset {
                    self.connector = None;
                    self.settings.database_url = None;
                    self.persist_settings()?;
                }
                Outcome::Disconnected
            }
            Instruction::Commit => self.transaction(&mut notices, Instruction::Commit).await,
            Instruction::Rollback => self.transaction(&mut notices, Instruction::Rollback).await,
            Instruction::Autocommit(on) => {
                self.transaction(&mut notices, Instruction::Autocommit(on))
                    .await
            }
            Instruction::Using { name, query } => {
                self.run_using(&name, &query, &mut notices).await?
            }
            Instruction::Help => Outcome::Help,
            Instruction::Sql(sql) => {
                let sql = if sql.is_empty() {
                    body.unwrap_or_default().to_string()
                } else {
                    sql
                };
                self.run_statements(&sql, &mut notices).await?
            }
        };

        Ok(Response { outcome, notices })
    }

    /// Open a session. A URL replaces the current connector and is saved.
    pub async fn connect(&mut self, url: Option<String>) -> SqlCellResult<()> {
        if let Some(url) = url {
            self.connector = Some(Arc::new(SqlxConnector::new(url.clone())));
            self.settings.database_url = Some(url);
            self.persist_settings()?;
        }
        self.close().await?;
        self.ensure_connected().await
    }

    /// Close the session, if any.
    pub async fn close(&mut self) -> SqlCellResult<()> {
        if let Some(mut session) = self.session.take() {
            session.close().await?;
            tracing::debug!("session closed");
        }
        Ok(())
    }

    fn current_connector(&mut self) -> SqlCellResult<Arc<dyn Connector>> {
        if let Some(connector) = &self.connector {
            return Ok(Arc::clone(connector));
        }
        let url = self.settings.database_url.clone().ok_or_else(|| {
            SqlCellError::Connection(
                "A CONNECT statement must be issued before issuing SQL statements.".into(),
            )
        })?;
        let connector: Arc<dyn Connector> = Arc::new(SqlxConnector::new(url));
        self.connector = Some(Arc::clone(&connector));
        Ok(connector)
    }

    async fn ensure_connected(&mut self) -> SqlCellResult<()> {
        if self.session.is_none() {
            let connector = self.current_connector()?;
            self.session = Some(connector.connect().await?);
            tracing::info!("connected");
        }
        Ok(())
    }

    fn persist_settings(&self) -> SqlCellResult<()> {
        match &self.settings_path {
            Some(path) => self.settings.save_to(path),
            None => Ok(()),
        }
    }

    async fn transaction(&mut self, notices: &mut Vec<Notice>, op: Instruction) -> Outcome {
        let Some(session) = self.session.as_mut() else {
            return Outcome::Nothing;
        };
        let result = match op {
            Instruction::Commit => session.commit().await,
            Instruction::Rollback => session.rollback().await,
            Instruction::Autocommit(on) => session.set_autocommit(on).await,
            _ => Ok(()),
        };
        if let Err(err) = result {
            self.record_error(&err);
            notices.push(Notice::error(err.to_string()));
        }
        Outcome::Nothing
    }

    async fn run_statements(
        &mut self,
        sql: &str,
        notices: &mut Vec<Notice>,
    ) -> SqlCellResult<Outcome> {
        self.ensure_connected().await?;

        let delimiter = if self.flag(&["-d", "-delim"]) { '@' } else { ';' };
        let mut affected = 0;
        let mut last = Outcome::Completed { affected: 0 };

        for statement in split_statements(sql, delimiter) {
            let expansion = self.macros.expand(&statement)?;
            notices.extend(expansion.notices);
            if expansion.exited {
                continue;
            }
            let text = self.extend_flags(&expansion.text);
            let bound = bind(&text, &self.variables);
            if bound.trim().is_empty() {
                continue;
            }
            if self.flag(&["-e", "-echo"]) {
                notices.push(Notice::info(bound.clone()));
            }

            match self.run_statement(&bound).await {
                Ok(StatementResult::Affected(rows)) => {
                    affected += rows;
                    if rows == 0 && !self.quiet() {
                        notices.push(Notice::error("No rows found."));
                    }
                    last = Outcome::Completed { affected };
                }
                Ok(StatementResult::Rows(table)) => match self.present(table, notices) {
                    Outcome::NoRows => last = Outcome::NoRows,
                    shown => return Ok(shown),
                },
                Err(err) => {
                    self.record_error(&err);
                    if !self.quiet() {
                        notices.push(Notice::error(err.to_string()));
                    }
                    last = Outcome::Completed { affected };
                }
            }
        }

        if matches!(last, Outcome::Completed { .. }) && !self.quiet() {
            notices.push(Notice::info("Command completed."));
        }
        Ok(last)
    }

    async fn run_statement(&mut self, sql: &str) -> SqlCellResult<StatementResult> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| SqlCellError::Connection("not connected".into()))?;
        let prepared = session.prepare(sql).await?;
        let start = Instant::now();
        let result = if prepared.has_answer_set() {
            StatementResult::Rows(session.fetch(&prepared).await?)
        } else {
            StatementResult::Affected(session.execute(&prepared).await?)
        };
        self.status.sqlelapsed = start.elapsed();
        Ok(result)
    }

    /// Shape a result table according to the flags.
    fn present(&mut self, table: ResultTable, notices: &mut Vec<Notice>) -> Outcome {
        if table.is_empty() {
            self.status.sqlcode = SQLCODE_NO_ROWS;
        }
        if self.flag(&["-j", "-json"]) {
            return Outcome::Json(table.first_column_json());
        }
        if self.flag(&["-r", "-array"]) {
            return Outcome::Raw(table.to_arrays());
        }
        if table.is_empty() {
            if !self.quiet() {
                notices.push(Notice::error("No rows found"));
            }
            return Outcome::NoRows;
        }
        let visible = self
            .settings
            .visible_rows(table.len(), self.flag(&["-a", "-all"]));
        Outcome::Table { table, visible }
    }

    async fn run_using(
        &mut self,
        name: &str,
        query: &str,
        notices: &mut Vec<Notice>,
    ) -> SqlCellResult<Outcome> {
        self.ensure_connected().await?;
        let connector = self.current_connector()?;

        let value = self.variables.get(name).cloned().ok_or_else(|| {
            SqlCellError::Parallel(format!("The variable {name} was not found."))
        })?;
        let sql = bind(
            query,
            &Excluding {
                vars: &self.variables,
                name,
            },
        );
        let request = ParallelQuery {
            sql,
            name: name.to_string(),
            value,
            workers: self.settings.threads,
        };

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| SqlCellError::Connection("not connected".into()))?;
        let start = Instant::now();
        let report = match run_parallel(session.as_mut(), connector, request).await {
            Ok(report) => report,
            Err(err) => {
                self.record_error(&err);
                return Err(err);
            }
        };
        self.status.sqlelapsed = start.elapsed();

        if self.flag(&["-e", "-echo"]) {
            notices.extend(report.issued_sql.into_iter().map(Notice::info));
        }
        Ok(self.present(report.table, notices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn context() -> Context {
        Context::new(Settings::default())
    }

    #[tokio::test]
    async fn test_define_and_list_names() {
        let mut ctx = context();
        let response = ctx.run("define greet", Some("echo hello {1}")).await.unwrap();
        assert_eq!(
            response.outcome,
            Outcome::Defined {
                name: "GREET".into()
            }
        );
        assert_eq!(ctx.macros().names(), vec!["DESCRIBE", "GREET", "LIST", "SET"]);
    }

    #[tokio::test]
    async fn test_define_without_body() {
        let mut ctx = context();
        assert!(matches!(
            ctx.run("define greet", None).await,
            Err(SqlCellError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_macro_echo_without_sql() {
        let mut ctx = context();
        ctx.run("define greet", Some("echo hello {1}")).await.unwrap();
        let response = ctx.run("greet world", None).await.unwrap();
        assert_eq!(response.outcome, Outcome::Nothing);
        assert_eq!(response.notices, vec![Notice::info("hello world")]);
    }

    #[tokio::test]
    async fn test_exit_reports_error() {
        let mut ctx = context();
        let response = ctx.run("LIST VIEWS", None).await.unwrap();
        assert_eq!(response.outcome, Outcome::Nothing);
        assert!(response.notices[0].is_error());
    }

    #[tokio::test]
    async fn test_structural_error_is_returned() {
        let mut ctx = context();
        ctx.run("define broken", Some("endif")).await.unwrap();
        let err = ctx.run("broken now", None).await.unwrap_err();
        match err {
            SqlCellError::Structural { instruction, .. } => assert_eq!(instruction, "broken now"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_set_macro_changes_options() {
        let mut ctx = context();
        let response = ctx.run("SET THREADS 4", None).await.unwrap();
        assert_eq!(response.outcome, Outcome::Options);
        assert_eq!(ctx.settings().threads, 4);
    }

    #[tokio::test]
    async fn test_options_persist_to_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let mut ctx = context().with_settings_path(path.clone());
        ctx.run("OPTION MAXROWS 42", None).await.unwrap();
        assert_eq!(Settings::load_from(&path).unwrap().maxrows, 42);
    }

    #[tokio::test]
    async fn test_help() {
        let mut ctx = context();
        assert_eq!(ctx.run("?", None).await.unwrap().outcome, Outcome::Help);
        assert_eq!(ctx.run("-h", None).await.unwrap().outcome, Outcome::Help);
    }

    #[tokio::test]
    async fn test_sql_without_connection() {
        let mut ctx = context();
        assert!(matches!(
            ctx.run("SELECT 1", None).await,
            Err(SqlCellError::Connection(_))
        ));
        assert!(!ctx.is_connected());
    }

    #[tokio::test]
    async fn test_flags_are_collected() {
        let mut ctx = context();
        ctx.run("-q -e ?", None).await.unwrap();
        assert!(ctx.flag(&["-q"]));
        assert!(ctx.flag(&["-echo", "-e"]));
        assert!(!ctx.flag(&["-j"]));
    }
}
