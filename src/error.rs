//! Error types for sqlcell.

use thiserror::Error;

/// The main error type for sqlcell operations.
#[derive(Debug, Error)]
pub enum SqlCellError {
    /// A macro body is structurally broken (unmatched if/endif, bad `if`).
    ///
    /// `instruction` is the original, unexpanded instruction. It is kept for
    /// reporting only and must not be executed.
    #[error("Macro error: {message}")]
    Structural {
        message: String,
        instruction: String,
    },

    /// Malformed dispatcher syntax.
    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    /// Statement failed inside the driver.
    #[error("{}", format_database(.code, .state, .message))]
    Database {
        code: Option<String>,
        state: Option<String>,
        message: String,
    },

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A precondition of the parallel fan-out was not met.
    #[error("Parallel query error: {0}")]
    Parallel(String),

    /// One partition of a parallel query failed; all partial results were dropped.
    #[error("Partition failed: {0}")]
    Partition(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings file could not be decoded.
    #[error("Settings file error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_database(code: &Option<String>, state: &Option<String>, message: &str) -> String {
    match (code, state) {
        (Some(code), Some(state)) => format!("SQLCODE={code} SQLSTATE={state} {message}"),
        (Some(code), None) => format!("SQLCODE={code} {message}"),
        (None, Some(state)) => format!("SQLSTATE={state} {message}"),
        (None, None) => format!("Database error: {message}"),
    }
}

impl SqlCellError {
    /// Create a structural (macro) error for the given instruction.
    pub fn structural(message: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self::Structural {
            message: message.into(),
            instruction: instruction.into(),
        }
    }

    /// Create a parse error at the given position.
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    /// Create a database error without driver code or state.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            code: None,
            state: None,
            message: message.into(),
        }
    }

    /// The driver's native code, when the error carries one.
    pub fn sqlcode(&self) -> Option<&str> {
        match self {
            Self::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// The driver's SQLSTATE, when the error carries one.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Database { state, .. } => state.as_deref(),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for SqlCellError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => Self::Database {
                code: db.code().map(|c| c.into_owned()),
                state: None,
                message: db.message().to_string(),
            },
            sqlx::Error::Io(e) => Self::Connection(e.to_string()),
            sqlx::Error::Tls(e) => Self::Connection(e.to_string()),
            sqlx::Error::Configuration(e) => Self::Connection(e.to_string()),
            other => Self::database(other.to_string()),
        }
    }
}

/// Result type alias for sqlcell operations.
pub type SqlCellResult<T> = Result<T, SqlCellError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SqlCellError::parse(5, "unexpected character");
        assert_eq!(
            err.to_string(),
            "Parse error at position 5: unexpected character"
        );
    }

    #[test]
    fn test_database_display_with_code() {
        let err = SqlCellError::Database {
            code: Some("-204".into()),
            state: Some("42704".into()),
            message: "undefined name".into(),
        };
        assert_eq!(err.to_string(), "SQLCODE=-204 SQLSTATE=42704 undefined name");
        assert_eq!(err.sqlcode(), Some("-204"));
        assert_eq!(err.sqlstate(), Some("42704"));
    }

    #[test]
    fn test_database_display_plain() {
        let err = SqlCellError::database("boom");
        assert_eq!(err.to_string(), "Database error: boom");
        assert_eq!(err.sqlcode(), None);
    }
}
