//! # sqlcell: SQL cells with macros, host variables and parallel fan-out
//!
//! sqlcell runs notebook-style SQL cells. Each instruction goes through a
//! small pipeline before it reaches the database:
//!
//! ```text
//! LIST TABLES FOR SCHEMA app
//!      │
//!      ▼  macros      if/else/endif, var, echo/exit, flags, {placeholders}
//! -a WITH TYPES … AND TABSCHEMA = 'APP' ORDER BY TABNAME, TABSCHEMA
//!      │
//!      ▼  binder      :name → SQL literal
//!      │
//!      ▼  engine      one session, or one connection per list element
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use sqlcell::prelude::*;
//!
//! let mut ctx = Context::new(Settings::default());
//! ctx.variables_mut().set("depts", vec!["A00", "B01", "C01"]);
//! ctx.connect(Some("sqlite://sample.db".into())).await?;
//! ctx.run("OPTION THREADS 3", None).await?;
//! let response = ctx
//!     .run("USING depts SELECT * FROM EMPLOYEE WHERE WORKDEPT = :depts", None)
//!     .await?;
//! ```
//!
//! ## Placeholders
//!
//! | Form      | Where        | Meaning                                   |
//! |-----------|--------------|-------------------------------------------|
//! | `{1}`     | macro bodies | positional argument                       |
//! | `{^1}`    | macro bodies | argument upper-cased                      |
//! | `{*1}`    | macro bodies | arguments 1..N joined by spaces           |
//! | `{,1}`    | macro bodies | arguments 1..N joined by commas           |
//! | `:name`   | SQL          | host variable, rendered as a SQL literal  |
//! | `:name.`  | SQL          | host variable inserted without quotes     |

pub mod binder;
pub mod builtins;
pub mod context;
pub mod engine;
pub mod error;
pub mod macros;
pub mod notice;
pub mod parallel;
pub mod parser;
pub mod settings;
pub mod substitute;
pub mod table;
pub mod tokenizer;

pub mod prelude {
    pub use crate::binder::{HostEnv, HostValue, Variables, bind};
    pub use crate::context::{Context, Outcome, Response, Status};
    pub use crate::engine::{Connector, Prepared, Session, SqlxConnector};
    pub use crate::error::*;
    pub use crate::macros::{Expansion, MacroTable};
    pub use crate::notice::Notice;
    pub use crate::parallel::{FanOutReport, ParallelQuery, run_parallel};
    pub use crate::settings::{DisplayMode, Settings};
    pub use crate::table::{Cell, ColumnMeta, ResultTable};
}

/// Expand `instruction` against the built-in macros.
///
/// # Example
///
/// ```
/// let expansion = sqlcell::expand("DESCRIBE TABLE EMPLOYEE").unwrap();
/// assert_eq!(expansion.text, "-a CALL ADMIN_CMD('DESCRIBE TABLE EMPLOYEE');");
/// ```
pub fn expand(instruction: &str) -> error::SqlCellResult<macros::Expansion> {
    builtins::table().expand(instruction)
}
