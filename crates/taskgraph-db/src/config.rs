use std::env;
use std::path::{Path, PathBuf};

/// Database configuration.
///
/// Reads from the `DB_PATH` environment variable, falling back to
/// `./taskgraph.db` when unset. The store is an embedded SQLite file; there
/// is no host/port to configure.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Filesystem path to the SQLite database file.
    pub db_path: PathBuf,
}

impl DbConfig {
    /// The default database path used when no environment variable is set.
    pub const DEFAULT_PATH: &str = "./taskgraph.db";

    /// Build a config from the environment.
    ///
    /// Priority: `DB_PATH` env var, then the compile-time default.
    pub fn from_env() -> Self {
        let db_path = env::var("DB_PATH").unwrap_or_else(|_| Self::DEFAULT_PATH.to_owned());
        Self {
            db_path: PathBuf::from(db_path),
        }
    }

    /// Build a config from an explicit path (useful for tests and CLI flags).
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    /// The path as a string, for error messages.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// The `sqlx`/SQLite connection URL for this path.
    ///
    /// `mode=rwc` creates the file if it does not already exist.
    pub fn connect_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
