//! sqlcell: run SQL cells from the command line
//!
//! # Usage
//!
//! ```bash
//! # Run one instruction
//! sqlcell --database-url sqlite://sample.db "SELECT * FROM EMPLOYEE"
//!
//! # Host variables and a parallel query
//! sqlcell --var 'depts=["A00","B01"]' "USING depts SELECT * FROM EMPLOYEE WHERE WORKDEPT = :depts"
//!
//! # A cell file: statements separated by ;
//! sqlcell --file setup.sql -- -q
//!
//! # Interactive
//! sqlcell repl
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use serde_json::Value as JsonValue;
use sqlcell::context::HELP;
use sqlcell::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlcell")]
#[command(version)]
#[command(about = "SQL cells with macros, host variables and parallel queries", long_about = None)]
#[command(after_help = "EXAMPLES:
    sqlcell 'LIST TABLES FOR SCHEMA APP'
    sqlcell --var ids=[1,2,3] 'SELECT * FROM T WHERE ID IN (:ids)'
    sqlcell expand 'SET THREADS 4'")]
struct Cli {
    /// The instruction to run; may start with flags such as -e or -q
    #[arg(allow_hyphen_values = true)]
    query: Option<String>,

    /// Read the cell body from a file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Host variables as name=value; JSON values are parsed
    #[arg(long = "var", value_name = "NAME=VALUE")]
    vars: Vec<String>,

    /// Output format, overriding the DISPLAY option
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Database connection URL
    #[arg(long, env = "SQLCELL_DATABASE_URL")]
    database_url: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

impl From<OutputFormat> for DisplayMode {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Table => DisplayMode::Table,
            OutputFormat::Json => DisplayMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive REPL mode
    Repl,
    /// List the defined macros
    Macros,
    /// Show what an instruction expands to, without running it
    Expand {
        /// The instruction to expand
        instruction: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "sqlcell=debug" } else { "sqlcell=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut ctx = build_context(&cli)?;

    match &cli.command {
        Some(Commands::Repl) => run_repl(&mut ctx, cli.format).await,
        Some(Commands::Macros) => {
            for name in ctx.macros().names() {
                println!("{}", name.cyan());
            }
        }
        Some(Commands::Expand { instruction }) => show_expansion(&ctx, instruction),
        None => {
            let body = match &cli.file {
                Some(path) => Some(
                    std::fs::read_to_string(path)
                        .with_context(|| format!("reading {}", path.display()))?,
                ),
                None => None,
            };
            let line = cli.query.clone().unwrap_or_default();
            if line.is_empty() && body.is_none() {
                println!("{}", "sqlcell: SQL cells for the terminal".cyan().bold());
                println!();
                println!("Usage: sqlcell <INSTRUCTION> [OPTIONS]");
                println!();
                println!("Try: sqlcell --help");
                return Ok(());
            }

            let result = ctx.run(&line, body.as_deref()).await;
            ctx.close().await.ok();
            match result {
                Ok(response) => {
                    render(&response, display_mode(&ctx, cli.format));
                    if ctx.status().sqlcode < 0 {
                        std::process::exit(1);
                    }
                }
                Err(e) => {
                    eprintln!("{} {}", "Error:".red().bold(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

fn build_context(cli: &Cli) -> anyhow::Result<Context> {
    let settings = Settings::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not load settings, using defaults");
        Settings::default()
    });

    let mut ctx = Context::new(settings);
    if let Some(path) = Settings::default_path() {
        ctx = ctx.with_settings_path(path);
    }
    if let Some(url) = &cli.database_url {
        ctx = ctx.with_connector(Arc::new(SqlxConnector::new(url.clone())));
    }

    for assignment in &cli.vars {
        let (name, value) = assignment
            .split_once('=')
            .with_context(|| format!("--var expects NAME=VALUE, got '{assignment}'"))?;
        ctx.variables_mut()
            .set(name.trim(), HostValue::parse_arg(value.trim()));
    }

    Ok(ctx)
}

fn display_mode(ctx: &Context, format: Option<OutputFormat>) -> DisplayMode {
    format.map(DisplayMode::from).unwrap_or(ctx.settings().display)
}

fn show_expansion(ctx: &Context, instruction: &str) {
    match ctx.macros().expand(instruction) {
        Ok(expansion) => {
            print_notices(&expansion.notices);
            if !expansion.expanded {
                println!("{}", "(not a macro)".dimmed());
            }
            if !expansion.flags.is_empty() {
                println!("{} {}", "Flags:".dimmed(), expansion.flags.join(" ").yellow());
            }
            if !expansion.text.is_empty() {
                println!("{}", expansion.text.white());
            }
        }
        Err(e) => eprintln!("{} {}", "Macro Error:".red().bold(), e),
    }
}

fn print_notices(notices: &[Notice]) {
    for notice in notices {
        match notice {
            Notice::Info(message) => println!("{}", message.dimmed()),
            Notice::Error(message) => eprintln!("{}", message.red()),
        }
    }
}

fn render(response: &Response, display: DisplayMode) {
    print_notices(&response.notices);

    match &response.outcome {
        Outcome::Table { table, visible } => match display {
            DisplayMode::Table => print_table(table, *visible),
            DisplayMode::Json => {
                let records: Vec<_> = table.to_records().into_iter().take(*visible).collect();
                println!("{}", serde_json::to_string_pretty(&records).unwrap_or_default());
            }
        },
        Outcome::Json(docs) => {
            println!("{}", serde_json::to_string_pretty(docs).unwrap_or_default());
        }
        Outcome::Raw(rows) => {
            for row in rows {
                println!("{}", JsonValue::Array(row.clone()));
            }
        }
        Outcome::Defined { name } => println!("{} Macro {} defined", "✓".green(), name.cyan()),
        Outcome::Connected => println!("{} Connected", "✓".green()),
        Outcome::Disconnected => println!("{}", "Disconnected".dimmed()),
        Outcome::Help => println!("{HELP}"),
        Outcome::NoRows | Outcome::Completed { .. } | Outcome::Options | Outcome::Nothing => {}
    }
}

fn print_table(table: &ResultTable, visible: usize) {
    let columns: Vec<&str> = table.columns().iter().map(|c| c.name.as_str()).collect();
    let rows: Vec<Vec<String>> = table
        .rows()
        .iter()
        .take(visible)
        .map(|row| row.iter().map(Cell::to_string).collect())
        .collect();

    // Column widths
    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let header: Vec<String> = columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!("{:width$}", c, width = w))
        .collect();
    println!("{}", header.join(" │ ").white().bold());

    let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
    println!("{}", sep.join("─┼─").dimmed());

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:width$}", v, width = w))
            .collect();
        println!("{}", cells.join(" │ "));
    }

    println!();
    if visible < table.len() {
        println!(
            "{}",
            format!("… {} more row(s), use -a to show all", table.len() - visible).dimmed()
        );
    }
    println!("{} row(s) returned", table.len().to_string().cyan());
}

/// Run the interactive REPL.
///
/// A line ending in `\` continues on the next line. A line starting with
/// `%%` opens a cell: the rest of that line is the instruction and the
/// following lines, up to a lone `%%`, are its body.
async fn run_repl(ctx: &mut Context, format: Option<OutputFormat>) {
    use rustyline::DefaultEditor;
    use rustyline::error::ReadlineError;

    println!("{}", "sqlcell REPL".cyan().bold());
    println!("{}", "Type ? for instructions, .help for REPL commands.".dimmed());
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{} {}", "Failed to initialize REPL:".red(), e);
            return;
        }
    };

    let history_path = dirs::home_dir()
        .map(|p| p.join(".sqlcell_history"))
        .unwrap_or_default();
    let _ = rl.load_history(&history_path);

    let mut pending = String::new();
    let mut cell: Option<(String, Vec<String>)> = None;

    loop {
        let prompt = if pending.is_empty() && cell.is_none() {
            "sql> ".cyan().bold().to_string()
        } else {
            "...> ".dimmed().to_string()
        };
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("{}", "^C".dimmed());
                pending.clear();
                cell = None;
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("{} {:?}", "Error:".red(), err);
                break;
            }
        };

        if let Some((instruction, mut body)) = cell.take() {
            if line.trim() == "%%" {
                let _ = rl.add_history_entry(format!("%%{instruction}"));
                let body = body.join("\n");
                execute(ctx, &instruction, Some(&body), format).await;
            } else {
                body.push(line);
                cell = Some((instruction, body));
            }
            continue;
        }

        let trimmed = line.trim_end();
        if let Some(head) = trimmed.strip_suffix('\\') {
            pending.push_str(head);
            pending.push(' ');
            continue;
        }
        pending.push_str(trimmed);
        let input = std::mem::take(&mut pending);
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(instruction) = input.strip_prefix("%%") {
            cell = Some((instruction.trim().to_string(), Vec::new()));
            continue;
        }

        let _ = rl.add_history_entry(input);

        match input {
            ".exit" | ".quit" | "exit" | "quit" => break,
            ".help" => {
                show_repl_help();
                continue;
            }
            ".macros" => {
                println!("{}", ctx.macros().names().join(" ").cyan());
                continue;
            }
            ".clear" => {
                print!("\x1B[2J\x1B[1;1H");
                continue;
            }
            _ => {}
        }

        if let Some(assignment) = input.strip_prefix(".set ") {
            match assignment.trim().split_once(' ') {
                Some((name, value)) => {
                    ctx.variables_mut()
                        .set(name, HostValue::parse_arg(value.trim()));
                }
                None => eprintln!("{}", "Usage: .set NAME VALUE".red()),
            }
            continue;
        }

        execute(ctx, input, None, format).await;
    }

    ctx.close().await.ok();
    let _ = rl.save_history(&history_path);
}

async fn execute(ctx: &mut Context, line: &str, body: Option<&str>, format: Option<OutputFormat>) {
    match ctx.run(line, body).await {
        Ok(response) => render(&response, display_mode(ctx, format)),
        Err(e) => eprintln!("{} {}", "✗".red(), e.to_string().red()),
    }
}

fn show_repl_help() {
    println!("{}", "sqlcell REPL Commands:".cyan().bold());
    println!("  {}    - Exit the REPL", ".exit".yellow());
    println!("  {}    - Show this help", ".help".yellow());
    println!("  {}  - List defined macros", ".macros".yellow());
    println!("  {}     - Set a host variable: .set NAME VALUE", ".set".yellow());
    println!("  {}   - Clear screen", ".clear".yellow());
    println!();
    println!("{}", "Cells:".cyan().bold());
    println!("  end a line with \\ to continue it");
    println!("  %%define NAME   starts a cell; a line with %% ends it");
    println!();
}
