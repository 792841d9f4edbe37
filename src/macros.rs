//! Macro definitions and the macro script interpreter.
//!
//! A macro is a named block of lines. When the first token of an instruction
//! names a macro, the body runs as a small script against the instruction's
//! tokens and the result replaces the instruction.
//!
//! # Script language
//!
//! ```text
//! var syntax Syntax: LIST TABLES        store a variable
//! flags -a                              prefix flags to the expansion
//! if {^1} <> 'TABLES'                   compare two strings
//!     exit {syntax}                     report an error, expand to nothing
//! else
//!     echo listing {1}                  report a message
//! endif
//! SELECT * FROM {1}                     any other line is output
//! return                                stop, keep the output so far
//! ```
//!
//! Lines starting with `#` are comments. `{…}` placeholders follow
//! [`crate::substitute`]; positional arguments are `{0}` (the macro name)
//! through `{N}`, and `{argc}` is N.

use std::collections::HashMap;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::tag,
    combinator::{all_consuming, value},
};

use crate::error::{SqlCellError, SqlCellResult};
use crate::notice::Notice;
use crate::substitute::{Scope, substitute};
use crate::tokenizer::{tokenize, tokenize_with};

/// Number of run-level slots; slot 0 is the macro body itself.
pub const MAX_DEPTH: usize = 10;

/// A stored macro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    pub name: String,
    pub body: Vec<String>,
}

impl Macro {
    pub fn new(name: &str, body: &str) -> Self {
        Self {
            name: name.to_uppercase(),
            body: body.lines().map(str::to_string).collect(),
        }
    }
}

/// One call site: the tokens of the instruction that named a macro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    tokens: Vec<String>,
}

impl Invocation {
    pub fn parse(instruction: &str) -> Self {
        Self {
            tokens: tokenize(instruction),
        }
    }

    /// Upper-cased macro name (token 0).
    pub fn name(&self) -> Option<String> {
        self.tokens.first().map(|t| t.to_uppercase())
    }

    /// Number of arguments, not counting the name.
    pub fn argc(&self) -> usize {
        self.tokens.len().saturating_sub(1)
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Variable scope seeded with `0..N` and `argc`.
    pub fn scope(&self) -> Scope {
        Scope::from_tokens(&self.tokens)
    }
}

/// Result of running an instruction through the macro table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    /// Text to run next. Empty after `exit`.
    pub text: String,
    /// Flags collected by `flags` statements.
    pub flags: Vec<String>,
    /// Messages from `echo` / `exit`.
    pub notices: Vec<Notice>,
    /// Whether a macro ran at all.
    pub expanded: bool,
    /// Whether the macro stopped with `exit`.
    pub exited: bool,
}

impl Expansion {
    fn passthrough(instruction: &str) -> Self {
        Self {
            text: instruction.to_string(),
            ..Self::default()
        }
    }
}

/// Macros known to one session, keyed by upper-cased name.
#[derive(Debug, Clone, Default)]
pub struct MacroTable {
    macros: HashMap<String, Macro>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a macro, replacing any previous definition with the same name.
    pub fn define(&mut self, name: &str, body: &str) {
        let mac = Macro::new(name, body);
        tracing::debug!(name = %mac.name, lines = mac.body.len(), "macro defined");
        self.macros.insert(mac.name.clone(), mac);
    }

    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.macros.get(&name.to_uppercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(&name.to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    /// Sorted macro names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.macros.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Expand `instruction` if its first token names a macro.
    ///
    /// Unknown names pass through unchanged.
    pub fn expand(&self, instruction: &str) -> SqlCellResult<Expansion> {
        if instruction.trim().is_empty() {
            return Ok(Expansion::passthrough(instruction));
        }
        let invocation = Invocation::parse(instruction);
        let Some(mac) = invocation.name().and_then(|name| self.macros.get(&name)) else {
            return Ok(Expansion::passthrough(instruction));
        };
        tracing::debug!(name = %mac.name, argc = invocation.argc(), "running macro");
        Interpreter::new(instruction, &invocation).run(&mac.body)
    }
}

/// Comparison operators accepted by `if`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// Parse an operator token such as `==`, `=<` or `<>`.
    pub fn parse(token: &str) -> Option<Self> {
        all_consuming(compare_op)(token).ok().map(|(_, op)| op)
    }

    /// String comparison; ordering is lexicographic, never numeric.
    pub fn compare(self, lhs: &str, rhs: &str) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
        }
    }
}

fn compare_op(input: &str) -> IResult<&str, CompareOp> {
    alt((
        value(CompareOp::Eq, tag("==")),
        value(CompareOp::Le, tag("=<")),
        value(CompareOp::Ge, tag("=>")),
        value(CompareOp::Eq, tag("=")),
        value(CompareOp::Ne, tag("<>")),
        value(CompareOp::Le, tag("<=")),
        value(CompareOp::Lt, tag("<")),
        value(CompareOp::Ge, tag(">=")),
        value(CompareOp::Gt, tag(">")),
        value(CompareOp::Ne, tag("!=")),
    ))(input)
}

/// `if lhs op rhs` operands after substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Condition {
    lhs: String,
    op: String,
    rhs: String,
}

impl Condition {
    fn from_tokens(tokens: &[String]) -> Option<Self> {
        match tokens {
            [_, lhs, op, rhs, ..] => Some(Self {
                lhs: lhs.clone(),
                op: op.clone(),
                rhs: strip_quotes(rhs),
            }),
            _ => None,
        }
    }
}

fn strip_quotes(operand: &str) -> String {
    let chars: Vec<char> = operand.chars().collect();
    if chars.len() > 2 {
        let (first, last) = (chars[0], chars[chars.len() - 1]);
        if (first == '\'' || first == '"') && first == last {
            return chars[1..chars.len() - 1]
                .iter()
                .collect::<String>()
                .trim()
                .to_string();
        }
    }
    operand.to_string()
}

/// One classified script line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Statement {
    /// `None` when the line has too few operands.
    If(Option<Condition>),
    Else,
    Endif,
    Var { name: Option<String>, words: Vec<String> },
    Echo(Vec<String>),
    Exit(Vec<String>),
    Flags(Vec<String>),
    Return,
    Pass,
    Text,
}

impl Statement {
    fn classify(tokens: &[String]) -> Self {
        let rest = || tokens.get(1..).unwrap_or_default().to_vec();
        match tokens.first().map(String::as_str) {
            Some("if") => Self::If(Condition::from_tokens(tokens)),
            Some("else") => Self::Else,
            Some("endif") => Self::Endif,
            Some("var") => Self::Var {
                name: tokens.get(1).cloned(),
                words: tokens.get(2..).unwrap_or_default().to_vec(),
            },
            Some("echo") => Self::Echo(rest()),
            Some("exit") => Self::Exit(rest()),
            Some("flags") => Self::Flags(rest()),
            Some("return") => Self::Return,
            Some("pass") => Self::Pass,
            _ => Self::Text,
        }
    }
}

/// Run-level state machine for one macro execution.
struct Interpreter<'a> {
    instruction: &'a str,
    scope: Scope,
    runlevel: [bool; MAX_DEPTH],
    /// Index of the innermost evaluated `if`.
    level: isize,
    /// Every `if` seen, evaluated or not, minus every `endif`.
    nesting: isize,
    flags: Vec<String>,
    output: Vec<String>,
    notices: Vec<Notice>,
}

enum Step {
    Continue,
    Return,
    Exit,
}

impl<'a> Interpreter<'a> {
    fn new(instruction: &'a str, invocation: &Invocation) -> Self {
        let mut runlevel = [false; MAX_DEPTH];
        runlevel[0] = true;
        Self {
            instruction,
            scope: invocation.scope(),
            runlevel,
            level: 0,
            nesting: 0,
            flags: Vec::new(),
            output: Vec::new(),
            notices: Vec::new(),
        }
    }

    fn active(&self) -> bool {
        self.runlevel[self.level as usize]
    }

    fn structural(&self, message: impl Into<String>) -> SqlCellError {
        let message = message.into();
        tracing::warn!(instruction = self.instruction, "{message}");
        SqlCellError::structural(message, self.instruction)
    }

    fn run(mut self, body: &[String]) -> SqlCellResult<Expansion> {
        for raw in body {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let tokens = tokenize_with(line, &self.scope);
            match self.step(line, &tokens)? {
                Step::Continue => {}
                Step::Return => return Ok(self.finish()),
                Step::Exit => {
                    return Ok(Expansion {
                        notices: self.notices,
                        expanded: true,
                        exited: true,
                        ..Expansion::default()
                    });
                }
            }
        }

        if self.nesting != 0 {
            return Err(self.structural("Unmatched if/endif pairs."));
        }
        Ok(self.finish())
    }

    fn step(&mut self, line: &str, tokens: &[String]) -> SqlCellResult<Step> {
        match Statement::classify(tokens) {
            Statement::If(condition) => {
                self.nesting += 1;
                if !self.active() {
                    return Ok(Step::Continue);
                }
                if self.level as usize + 1 >= MAX_DEPTH {
                    return Err(self.structural(format!(
                        "if statements nested deeper than {} levels.",
                        MAX_DEPTH - 1
                    )));
                }
                self.level += 1;
                let Some(condition) = condition else {
                    return Err(self.structural("Incorrect number of arguments for the if clause."));
                };
                let outcome = match CompareOp::parse(&condition.op) {
                    Some(op) => op.compare(&condition.lhs, &condition.rhs),
                    None => {
                        tracing::warn!(op = %condition.op, "unknown comparison operator in if statement");
                        self.notices.push(Notice::error(format!(
                            "Unknown comparison operator in the if statement: {}",
                            condition.op
                        )));
                        false
                    }
                };
                self.runlevel[self.level as usize] = outcome;
            }
            Statement::Else => {
                // Only an else belonging to an evaluated if flips anything.
                if self.nesting == self.level {
                    let slot = self.level as usize;
                    self.runlevel[slot] = !self.runlevel[slot];
                }
            }
            Statement::Endif => {
                self.nesting -= 1;
                if self.nesting < self.level {
                    self.level -= 1;
                    if self.level < 0 {
                        return Err(self.structural("Unmatched if/endif pairs."));
                    }
                }
            }
            _ if !self.active() => {}
            Statement::Var { name, words } => match name {
                Some(name) => self.scope.set(name, words.join(" ")),
                None => tracing::warn!("var statement without a variable name"),
            },
            Statement::Echo(words) => {
                let message = words.join(" ");
                if !message.is_empty() {
                    self.notices.push(Notice::info(message));
                }
            }
            Statement::Exit(words) => {
                let message = words.join(" ");
                if !message.is_empty() {
                    self.notices.push(Notice::error(message));
                }
                return Ok(Step::Exit);
            }
            Statement::Flags(words) => self.flags.extend(words),
            Statement::Return => return Ok(Step::Return),
            Statement::Pass => {}
            Statement::Text => self.output.push(substitute(line, &self.scope)),
        }
        Ok(Step::Continue)
    }

    fn finish(self) -> Expansion {
        let body = self.output.join("\n");
        let text = if self.flags.is_empty() {
            body
        } else {
            format!("{} {}", self.flags.join(" "), body)
        };
        Expansion {
            text,
            flags: self.flags,
            notices: self.notices,
            expanded: true,
            exited: false,
        }
    }
}
