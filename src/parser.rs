//! Instruction parsing using nom.
//!
//! Classifies one instruction line into an [`Instruction`] and provides the
//! text helpers the dispatcher runs before classification.
//!
//! ```text
//! -e -q  USING ids SELECT * FROM T WHERE ID = :ids
//! ──┬──  ──┬── ─┬─ ────────────────┬──────────────
//!   │      │    │                  └── query template
//!   │      │    └── list variable
//!   │      └── command word
//!   └── flags
//! ```

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{take_till, take_while},
    character::complete::{alpha1, char, multispace0, multispace1},
    combinator::{eof, peek, recognize},
    multi::many0,
    sequence::{pair, preceded, terminated},
};

use crate::error::{SqlCellError, SqlCellResult};

/// A classified instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// `define <name>`; the body comes from the cell.
    Define { name: String },
    /// `OPTION …` / `OPTIONS …` with the remaining words.
    Options(Vec<String>),
    /// `CONNECT [TO] [url]`.
    Connect(Option<String>),
    /// `CONNECT CLOSE` / `CONNECT RESET`. Reset also forgets the saved URL.
    Disconnect { reset: bool },
    Commit,
    Rollback,
    /// `AUTOCOMMIT ON|OFF`.
    Autocommit(bool),
    /// `USING name SELECT …`: fan the query out over the list `name`.
    Using { name: String, query: String },
    /// `?`
    Help,
    /// Anything else is one or more SQL statements.
    Sql(String),
}

/// Leading alphabetic word, followed by whitespace or the end of input.
fn leading_word(input: &str) -> IResult<&str, &str> {
    terminated(
        preceded(multispace0, alpha1),
        peek(alt((multispace1, eof))),
    )(input)
}

/// Upper-cased first word of `text`, or an empty string.
///
/// # Example
///
/// ```
/// use sqlcell::parser::command_word;
///
/// assert_eq!(command_word("  select * from t"), "SELECT");
/// assert_eq!(command_word("select*"), "");
/// ```
pub fn command_word(text: &str) -> String {
    leading_word(text)
        .map(|(_, word)| word.to_ascii_uppercase())
        .unwrap_or_default()
}

/// A `-xxx` token, ended only by a space.
fn flag_token(input: &str) -> IResult<&str, &str> {
    recognize(pair(char('-'), take_till(|c| c == ' ')))(input)
}

fn spaces(input: &str) -> IResult<&str, &str> {
    take_while(|c| c == ' ')(input)
}

fn leading_flags(input: &str) -> IResult<&str, Vec<&str>> {
    many0(preceded(spaces, flag_token))(input)
}

/// Remove leading flag tokens from `text`.
///
/// Flags are collected until the first character that is neither a space nor
/// part of a flag.
pub fn extract_flags(text: &str) -> (String, Vec<String>) {
    match leading_flags(text) {
        Ok((rest, flags)) => (
            rest.trim_start().to_string(),
            flags.into_iter().map(str::to_string).collect(),
        ),
        Err(_) => (text.trim_start().to_string(), Vec::new()),
    }
}

/// Drop `--` comments outside quotes, line by line.
pub fn strip_comments(text: &str) -> String {
    text.lines()
        .map(|line| {
            let mut quote: Option<char> = None;
            let mut prev = '\0';
            for (pos, ch) in line.char_indices() {
                match quote {
                    Some(q) if ch == q => quote = None,
                    Some(_) => {}
                    None if ch == '\'' || ch == '"' => quote = Some(ch),
                    None if ch == '-' && prev == '-' => return &line[..pos - 1],
                    None => {}
                }
                prev = ch;
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split a cell into statements on `delimiter` outside quotes.
///
/// Comments are removed first and newlines become spaces. Blank statements
/// are dropped.
///
/// # Example
///
/// ```
/// use sqlcell::parser::split_statements;
///
/// let stmts = split_statements("SELECT ';' FROM T; -- note\nVALUES 1;", ';');
/// assert_eq!(stmts, vec!["SELECT ';' FROM T", "VALUES 1"]);
/// ```
pub fn split_statements(text: &str, delimiter: char) -> Vec<String> {
    let folded = strip_comments(text).replace('\n', " ");
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in folded.trim().chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None if ch == '\'' || ch == '"' => {
                current.push(ch);
                quote = Some(ch);
            }
            None if ch == delimiter => statements.push(std::mem::take(&mut current)),
            None => current.push(ch),
        }
    }
    statements.push(current);

    statements
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Classify one instruction (flags already removed).
pub fn parse_instruction(text: &str) -> SqlCellResult<Instruction> {
    let text = text.trim();
    if text == "?" {
        return Ok(Instruction::Help);
    }

    let word = command_word(text);
    let rest = text[word.len()..].trim();
    let mut args = rest.split_whitespace();

    let instruction = match word.as_str() {
        "DEFINE" => match args.next() {
            Some(name) => Instruction::Define {
                name: name.to_uppercase(),
            },
            None => {
                return Err(SqlCellError::parse(text.len(), "No command name supplied."));
            }
        },
        "OPTION" | "OPTIONS" => Instruction::Options(args.map(str::to_string).collect()),
        "CONNECT" => match args.next().map(str::to_ascii_uppercase).as_deref() {
            None => Instruction::Connect(None),
            Some("CLOSE") => Instruction::Disconnect { reset: false },
            Some("RESET") => Instruction::Disconnect { reset: true },
            Some("TO") => Instruction::Connect(args.next().map(str::to_string)),
            Some(_) => Instruction::Connect(Some(rest.to_string())),
        },
        "COMMIT" => Instruction::Commit,
        "ROLLBACK" => Instruction::Rollback,
        "AUTOCOMMIT" => match args.next().map(str::to_ascii_uppercase).as_deref() {
            Some("ON") => Instruction::Autocommit(true),
            Some("OFF") => Instruction::Autocommit(false),
            _ => {
                return Err(SqlCellError::parse(
                    word.len(),
                    "AUTOCOMMIT requires ON or OFF.",
                ));
            }
        },
        "USING" => match args.next() {
            Some(name) => Instruction::Using {
                name: name.to_string(),
                query: text.to_string(),
            },
            None => {
                return Err(SqlCellError::parse(
                    text.len(),
                    "USING requires a variable name.",
                ));
            }
        },
        _ => Instruction::Sql(text.to_string()),
    };

    Ok(instruction)
}
