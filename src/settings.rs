//! Persistent user options.
//!
//! Stored as TOML at `<config dir>/sqlcell/settings.toml`:
//!
//! ```toml
//! maxrows = 10
//! maxgrid = 5
//! display = "TABLE"
//! threads = 4
//! database_url = "sqlite://demo.db"
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{SqlCellError, SqlCellResult};
use crate::notice::Notice;

/// Upper bound for `maxrows` set through `OPTION`.
pub const MAXROWS_LIMIT: i64 = 100;
/// Smallest grid window.
pub const MAXGRID_MIN: i64 = 5;
/// Upper bound for `threads`.
pub const THREADS_LIMIT: i64 = 12;

/// How result tables are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DisplayMode {
    #[default]
    Table,
    Json,
}

impl DisplayMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "TABLE" => Some(Self::Table),
            "JSON" => Some(Self::Json),
            _ => None,
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table => f.write_str("TABLE"),
            Self::Json => f.write_str("JSON"),
        }
    }
}

/// User options. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Rows shown before truncating; `-1` shows everything.
    pub maxrows: i64,
    pub maxgrid: i64,
    pub display: DisplayMode,
    /// Parallel workers; below 2 runs `USING … SELECT` partitions in turn on one connection.
    pub threads: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            maxrows: 10,
            maxgrid: MAXGRID_MIN,
            display: DisplayMode::Table,
            threads: 0,
            database_url: None,
        }
    }
}

/// What an `OPTION` instruction did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionsReport {
    pub notices: Vec<Notice>,
    /// Settings were modified and should be persisted.
    pub changed: bool,
}

impl Settings {
    /// `<config dir>/sqlcell/settings.toml`, when the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sqlcell").join("settings.toml"))
    }

    /// Load from the default location, falling back to defaults.
    pub fn load() -> SqlCellResult<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> SqlCellResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Write to the default location.
    pub fn persist(&self) -> SqlCellResult<()> {
        let path = Self::default_path()
            .ok_or_else(|| SqlCellError::Config("no configuration directory".into()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> SqlCellResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SqlCellError::Config(e.to_string()))?;
        fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "settings saved");
        Ok(())
    }

    /// Current value of `key` as text.
    pub fn get(&self, key: &str) -> Option<String> {
        match key.to_ascii_lowercase().as_str() {
            "maxrows" => Some(self.maxrows.to_string()),
            "maxgrid" => Some(self.maxgrid.to_string()),
            "display" => Some(self.display.to_string()),
            "threads" => Some(self.threads.to_string()),
            "database_url" => self.database_url.clone(),
            _ => None,
        }
    }

    /// Set `key` from text, clamping numeric values into range.
    pub fn set(&mut self, key: &str, value: &str) -> SqlCellResult<()> {
        let key = key.to_ascii_lowercase();
        let invalid = || SqlCellError::Config(format!("Invalid {} value provided.", key.to_uppercase()));
        match key.as_str() {
            "maxrows" => {
                let rows: i64 = value.parse().map_err(|_| invalid())?;
                self.maxrows = if rows <= 0 || rows > MAXROWS_LIMIT {
                    MAXROWS_LIMIT
                } else {
                    rows
                };
            }
            "maxgrid" => {
                let grid: i64 = value.parse().map_err(|_| invalid())?;
                self.maxgrid = grid.max(MAXGRID_MIN);
            }
            "display" => self.display = DisplayMode::parse(value).ok_or_else(invalid)?,
            "threads" => {
                let threads: i64 = value.parse().map_err(|_| invalid())?;
                self.threads = threads.clamp(0, THREADS_LIMIT) as usize;
            }
            "database_url" => self.database_url = Some(value.to_string()),
            _ => return Err(SqlCellError::Config(format!("Unknown option {key}"))),
        }
        Ok(())
    }

    /// Rows to show for a result of `len` rows; `all` overrides the limit.
    pub fn visible_rows(&self, len: usize, all: bool) -> usize {
        if all || self.maxrows < 0 {
            len
        } else {
            len.min(self.maxrows as usize)
        }
    }

    /// One notice per displayed option.
    pub fn listing(&self) -> Vec<Notice> {
        vec![
            Notice::info(format!(
                "(MAXROWS) Maximum number of rows displayed: {}",
                self.maxrows
            )),
            Notice::info(format!(
                "(MAXGRID) Maximum grid display size: {}",
                self.maxgrid
            )),
            Notice::info(format!(
                "(DISPLAY) Use TABLE or JSON display format for output: {}",
                self.display
            )),
            Notice::info(format!(
                "(THREADS) Maximum number of threads to use when running SQL: {}",
                self.threads
            )),
        ]
    }

    /// Run the words of an `OPTION` instruction.
    ///
    /// Pairs like `MAXROWS 20` are applied left to right; unknown words are
    /// skipped. `LIST` (or no words) only shows the options, `?` shows usage.
    pub fn apply_options(&mut self, args: &[String]) -> OptionsReport {
        let mut report = OptionsReport::default();
        let mut words = args.iter();

        while let Some(word) = words.next() {
            if word.starts_with('?') {
                report.notices = options_usage();
                return report;
            }
            let key = word.to_ascii_uppercase();
            match key.as_str() {
                "LIST" => {
                    report.notices.extend(self.listing());
                    return report;
                }
                "MAXROWS" | "MAXGRID" | "DISPLAY" | "THREADS" => {
                    let Some(value) = words.next() else {
                        report
                            .notices
                            .push(Notice::error(format!("No value provided for the {key} option.")));
                        return report;
                    };
                    match self.set(&key, value) {
                        Ok(()) => report.changed = true,
                        Err(err) => report.notices.push(Notice::error(match err {
                            SqlCellError::Config(msg) => msg,
                            other => other.to_string(),
                        })),
                    }
                }
                _ => {}
            }
        }

        report.notices.extend(self.listing());
        report
    }
}

fn options_usage() -> Vec<Notice> {
    [
        "OPTION MAXROWS n MAXGRID n DISPLAY TABLE|JSON THREADS n",
        "LIST      - List the current option settings",
        "MAXROWS n - The maximum number of rows displayed when returning results",
        "MAXGRID n - Maximum size of a grid window",
        "DISPLAY   - TABLE or JSON output",
        "THREADS n - Maximum number of parallel threads to use when running SQL",
    ]
    .into_iter()
    .map(Notice::info)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn words(text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.maxrows, 10);
        assert_eq!(settings.display, DisplayMode::Table);
        assert_eq!(settings.get("threads").as_deref(), Some("0"));
    }

    #[test]
    fn test_set_clamps() {
        let mut settings = Settings::default();
        settings.set("maxrows", "500").unwrap();
        assert_eq!(settings.maxrows, 100);
        settings.set("MAXROWS", "0").unwrap();
        assert_eq!(settings.maxrows, 100);
        settings.set("maxrows", "25").unwrap();
        assert_eq!(settings.maxrows, 25);
        settings.set("maxgrid", "2").unwrap();
        assert_eq!(settings.maxgrid, 5);
        settings.set("threads", "40").unwrap();
        assert_eq!(settings.threads, 12);
        settings.set("threads", "-3").unwrap();
        assert_eq!(settings.threads, 0);
        assert!(settings.set("display", "GRID").is_err());
        assert!(settings.set("threads", "many").is_err());
    }

    #[test]
    fn test_apply_options() {
        let mut settings = Settings::default();
        let report = settings.apply_options(&words("MAXROWS 20 DISPLAY json THREADS 4"));
        assert!(report.changed);
        assert_eq!(settings.maxrows, 20);
        assert_eq!(settings.display, DisplayMode::Json);
        assert_eq!(settings.threads, 4);
        assert_eq!(report.notices.len(), 4);
    }

    #[test]
    fn test_apply_options_missing_value() {
        let mut settings = Settings::default();
        let report = settings.apply_options(&words("THREADS"));
        assert!(!report.changed);
        assert!(report.notices[0].is_error());
    }

    #[test]
    fn test_apply_options_list_and_usage() {
        let mut settings = Settings::default();
        let list = settings.apply_options(&words("LIST"));
        assert!(!list.changed);
        assert!(list.notices[0].message().starts_with("(MAXROWS)"));

        let usage = settings.apply_options(&words("?"));
        assert!(usage.notices[0].message().starts_with("OPTION MAXROWS"));
    }

    #[test]
    fn test_visible_rows() {
        let mut settings = Settings::default();
        assert_eq!(settings.visible_rows(50, false), 10);
        assert_eq!(settings.visible_rows(50, true), 50);
        settings.maxrows = -1;
        assert_eq!(settings.visible_rows(50, false), 50);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.threads = 6;
        settings.database_url = Some("sqlite::memory:".into());
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_load_missing_and_partial() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Settings::load_from(&dir.path().join("none.toml")).unwrap();
        assert_eq!(missing, Settings::default());

        let partial = dir.path().join("partial.toml");
        fs::write(&partial, "maxrows = -1\n").unwrap();
        let loaded = Settings::load_from(&partial).unwrap();
        assert_eq!(loaded.maxrows, -1);
        assert_eq!(loaded.maxgrid, MAXGRID_MIN);
    }

    #[test]
    fn test_bad_file_is_toml_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "threads = [").unwrap();
        assert!(matches!(
            Settings::load_from(&path),
            Err(SqlCellError::Toml(_))
        ));
    }
}
