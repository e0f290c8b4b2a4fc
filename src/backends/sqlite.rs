//! SQLite backend.
//!
//! Entries live in a two-column table:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS preserve (_id TEXT PRIMARY KEY, _content TEXT)
//! ```
//!
//! Values are stored as JSON text. Date/times are written either as
//! `{"$date": ...}` objects or as bare ISO strings, per the `protocol`
//! parameter. Every write commits immediately.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::codec::{decode_json, encode_json, DateTimeStyle};
use crate::connector::{Backend, BackendConfig, Connector, Entries, Lifecycle, Mapping, Parameter};
use crate::error::{PreserveError, Result};
use crate::uri::Params;
use crate::value::Value;

const SCHEME: &str = "sqlite";

/// Filename that opens a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

const DEFAULT_TABLE: &str = "preserve";

static NEXT_MEMORY_ID: AtomicU64 = AtomicU64::new(1);

static IDENTIFIER: OnceLock<Regex> = OnceLock::new();

fn identifier() -> &'static Regex {
    IDENTIFIER.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static identifier pattern is valid")
    })
}

const PARAMETERS: &[Parameter] = &[
    Parameter::required("filename", "Database file path, or :memory:"),
    Parameter::optional(
        "protocol",
        "Date/time representation in stored JSON: tagged or iso",
        Some("tagged"),
    ),
    Parameter::optional("table", "Table holding the entries", Some(DEFAULT_TABLE)),
];

fn storage_err(err: &rusqlite::Error) -> PreserveError {
    PreserveError::storage(SCHEME, err.to_string())
}

/// Configuration of the SQLite backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConfig {
    /// Database file, or [`IN_MEMORY`].
    pub filename: String,
    /// Date/time representation inside stored JSON.
    pub protocol: DateTimeStyle,
    /// Table name; must be a plain SQL identifier.
    pub table: String,
}

impl SqliteConfig {
    /// Config for `filename` with default protocol and table.
    #[must_use]
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            protocol: DateTimeStyle::default(),
            table: DEFAULT_TABLE.to_string(),
        }
    }

    /// Config for a private in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY)
    }

    /// Sets the date/time protocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: DateTimeStyle) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the table name.
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.filename.is_empty() {
            return Err(PreserveError::missing(SCHEME, "filename"));
        }
        if !identifier().is_match(&self.table) {
            return Err(PreserveError::invalid_config(
                SCHEME,
                "table",
                format!("'{}' is not a valid table name", self.table),
            ));
        }
        Ok(())
    }
}

impl BackendConfig for SqliteConfig {
    fn from_params(mut params: Params) -> Result<Self> {
        let filename = params.require(SCHEME, "filename")?;
        let protocol = params.take_parsed(SCHEME, "protocol")?.unwrap_or_default();
        let table = params
            .take("table")
            .unwrap_or_else(|| DEFAULT_TABLE.to_string());
        params.deny_unknown(SCHEME)?;

        let config = Self {
            filename,
            protocol,
            table,
        };
        config.validate()?;
        Ok(config)
    }

    fn parameters() -> &'static [Parameter] {
        PARAMETERS
    }
}

/// Connector over one table of a SQLite database.
#[derive(Debug)]
pub struct SqliteConnector {
    config: SqliteConfig,
    conn: Option<Connection>,
    identity: String,
}

impl SqliteConnector {
    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteConfig {
        &self.config
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or(PreserveError::ConnectorClosed { scheme: SCHEME })
    }

    fn decode(&self, content: &str) -> Result<Value> {
        decode_json(content, self.config.protocol)
    }
}

impl Mapping for SqliteConnector {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let sql = format!("SELECT _content FROM {} WHERE _id = ?1", self.config.table);
        let content: Option<String> = self
            .conn()?
            .query_row(&sql, params![key], |row| row.get(0))
            .optional()
            .map_err(|e| storage_err(&e))?;
        content.map(|text| self.decode(&text)).transpose()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<()> {
        let content = encode_json(&value, self.config.protocol)?;
        let sql = format!(
            "INSERT OR REPLACE INTO {} (_id, _content) VALUES (?1, ?2)",
            self.config.table
        );
        self.conn()?
            .execute(&sql, params![key, content])
            .map_err(|e| storage_err(&e))?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE _id = ?1", self.config.table);
        self.conn()?
            .execute(&sql, params![key])
            .map_err(|e| storage_err(&e))?;
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE _id = ?1", self.config.table);
        let found: Option<i64> = self
            .conn()?
            .query_row(&sql, params![key], |row| row.get(0))
            .optional()
            .map_err(|e| storage_err(&e))?;
        Ok(found.is_some())
    }

    fn len(&self) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.config.table);
        let count: i64 = self
            .conn()?
            .query_row(&sql, [], |row| row.get(0))
            .map_err(|e| storage_err(&e))?;
        usize::try_from(count).map_err(|_| PreserveError::storage(SCHEME, "negative row count"))
    }

    fn iter(&self) -> Result<Entries<'_>> {
        let sql = format!("SELECT _id, _content FROM {}", self.config.table);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(|e| storage_err(&e))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| storage_err(&e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| storage_err(&e))?;

        Ok(Box::new(
            rows.into_iter()
                .map(move |(key, content)| Ok((key, self.decode(&content)?))),
        ))
    }
}

impl Lifecycle for SqliteConnector {
    fn sync(&mut self) -> Result<()> {
        self.conn()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        debug!(scheme = SCHEME, identity = %self.identity, "closed connector");
        conn.close().map_err(|(_, e)| storage_err(&e))
    }

    fn is_closed(&self) -> bool {
        self.conn.is_none()
    }
}

impl Connector for SqliteConnector {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    fn identity(&self) -> String {
        self.identity.clone()
    }
}

impl Backend for SqliteConnector {
    type Config = SqliteConfig;

    const SCHEME: &'static str = SCHEME;
    const ALIASES: &'static [&'static str] = &["file"];
    const DESCRIPTION: &'static str = "SQLite table of JSON documents keyed by _id";

    fn open(config: Self::Config) -> Result<Self> {
        config.validate()?;

        let conn = Connection::open(&config.filename).map_err(|e| {
            PreserveError::connection(SCHEME, format!("cannot open {}: {e}", config.filename))
        })?;
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (_id TEXT PRIMARY KEY, _content TEXT)",
            config.table
        );
        conn.execute(&sql, []).map_err(|e| {
            PreserveError::connection(SCHEME, format!("cannot prepare {}: {e}", config.filename))
        })?;

        let location = if config.filename == IN_MEMORY {
            format!("{IN_MEMORY}#{}", NEXT_MEMORY_ID.fetch_add(1, Ordering::Relaxed))
        } else {
            let path = Path::new(&config.filename);
            std::fs::canonicalize(path)
                .unwrap_or_else(|_| PathBuf::from(path))
                .display()
                .to_string()
        };
        let identity = format!("{SCHEME}:{location}?table={}", config.table);
        debug!(scheme = SCHEME, identity = %identity, "opened connector");

        Ok(Self {
            config,
            conn: Some(conn),
            identity,
        })
    }
}

impl Drop for SqliteConnector {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(scheme = SCHEME, error = %e, "close on drop failed");
        }
    }
}
