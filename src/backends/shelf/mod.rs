//! Embedded single-file backend.
//!
//! A shelf is one append-only log file plus an in-memory index rebuilt on
//! open. Each value is stored with the protocol it was written with, so a
//! file written under one protocol stays readable after switching.
//!
//! # Durability
//! - Without write-back, every `set`/`delete` is appended and flushed to
//!   the OS before returning
//! - With write-back, mutations are held in memory until `sync`/`close`
//! - `sync` forces the log to stable storage and compacts it when
//!   superseded records dominate
//!
//! # Concurrency
//! A `<filename>.lock` file is held for the connector's lifetime; a second
//! opener fails with `Connection`.

mod codec;
mod file_lock;
mod log;

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, warn};

use crate::codec::{decode_binary, decode_json, encode_binary, encode_json, DateTimeStyle};
use crate::connector::{
    Backend, BackendConfig, Connector, Entries, KeyEncoding, Lifecycle, Mapping, Parameter,
};
use crate::error::{PreserveError, Result};
use crate::uri::Params;
use crate::value::Value;

use self::file_lock::FileLock;
use self::log::{LogRecord, ShelfLog};

const SCHEME: &str = "shelf";

/// Compaction is considered once the log holds more records than this.
const COMPACT_MIN_RECORDS: usize = 1024;

const PARAMETERS: &[Parameter] = &[
    Parameter::required("filename", "Path of the shelf file"),
    Parameter::optional(
        "protocol",
        "Value serialization: 1 = JSON text, 2 = binary",
        Some("2"),
    ),
    Parameter::optional(
        "writeback",
        "Hold mutations in memory until sync or close",
        Some("false"),
    ),
    Parameter::optional(
        "keyencoding",
        "Encoding applied to keys before storing them",
        Some("utf-8"),
    ),
];

/// Serialization format of stored values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// JSON text with tagged date/times.
    Json,
    /// Compact binary encoding.
    #[default]
    Binary,
}

impl Protocol {
    /// Protocol number as written in URIs and log records.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::Json => 1,
            Self::Binary => 2,
        }
    }

    fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(Self::Json),
            2 => Some(Self::Binary),
            _ => None,
        }
    }

    fn encode(self, value: &Value) -> Result<Vec<u8>> {
        match self {
            Self::Json => encode_json(value, DateTimeStyle::Tagged).map(String::into_bytes),
            Self::Binary => encode_binary(value),
        }
    }

    fn decode(self, data: &[u8]) -> Result<Value> {
        match self {
            Self::Json => {
                let text = std::str::from_utf8(data).map_err(|e| {
                    PreserveError::serialization_with("stored JSON value is not UTF-8", e)
                })?;
                decode_json(text, DateTimeStyle::Tagged)
            }
            Self::Binary => decode_binary(data),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim()
            .parse::<u8>()
            .ok()
            .and_then(Self::from_number)
            .ok_or_else(|| format!("expected protocol 1 or 2, got '{s}'"))
    }
}

/// Configuration of the shelf backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShelfConfig {
    /// Path of the shelf file. Created if missing.
    pub filename: PathBuf,
    /// Protocol used for newly written values.
    pub protocol: Protocol,
    /// Hold mutations in memory until `sync`/`close`.
    pub writeback: bool,
    /// Encoding of stored keys.
    pub keyencoding: KeyEncoding,
}

impl ShelfConfig {
    /// Config for `filename` with every other field defaulted.
    #[must_use]
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            protocol: Protocol::default(),
            writeback: false,
            keyencoding: KeyEncoding::default(),
        }
    }

    /// Enables or disables write-back.
    #[must_use]
    pub const fn with_writeback(mut self, writeback: bool) -> Self {
        self.writeback = writeback;
        self
    }

    /// Sets the value protocol.
    #[must_use]
    pub const fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }
}

impl BackendConfig for ShelfConfig {
    fn from_params(mut params: Params) -> Result<Self> {
        let filename = params.require(SCHEME, "filename")?;
        let protocol = params.take_parsed(SCHEME, "protocol")?.unwrap_or_default();
        let writeback = params.take_bool(SCHEME, "writeback")?.unwrap_or(false);
        let keyencoding = params
            .take_parsed(SCHEME, "keyencoding")?
            .unwrap_or_default();
        params.deny_unknown(SCHEME)?;

        Ok(Self {
            filename: PathBuf::from(filename),
            protocol,
            writeback,
            keyencoding,
        })
    }

    fn parameters() -> &'static [Parameter] {
        PARAMETERS
    }
}

/// A value as it sits in the log.
#[derive(Debug, Clone)]
struct StoredValue {
    protocol: u8,
    data: Vec<u8>,
}

impl StoredValue {
    fn decode(&self) -> Result<Value> {
        let protocol = Protocol::from_number(self.protocol).ok_or_else(|| {
            PreserveError::serialization(format!("unknown stored protocol {}", self.protocol))
        })?;
        protocol.decode(&self.data)
    }

    fn to_record(&self, key: &[u8]) -> LogRecord {
        LogRecord::Put {
            key: key.to_vec(),
            protocol: self.protocol,
            data: self.data.clone(),
        }
    }
}

/// Everything held while the shelf is open. Dropping it releases the lock.
#[derive(Debug)]
struct OpenShelf {
    log: ShelfLog,
    index: HashMap<Vec<u8>, StoredValue>,
    /// Write-back cache: `None` marks a pending delete.
    pending: HashMap<Vec<u8>, Option<Value>>,
    _lock: FileLock,
}

impl OpenShelf {
    fn lookup(&self, key: &[u8]) -> Result<Option<Value>> {
        match self.pending.get(key) {
            Some(cached) => Ok(cached.clone()),
            None => self.index.get(key).map(StoredValue::decode).transpose(),
        }
    }

    fn is_live(&self, key: &[u8]) -> bool {
        match self.pending.get(key) {
            Some(cached) => cached.is_some(),
            None => self.index.contains_key(key),
        }
    }

    fn live_len(&self) -> usize {
        let added = self
            .pending
            .iter()
            .filter(|(k, v)| v.is_some() && !self.index.contains_key(*k))
            .count();
        let removed = self
            .pending
            .iter()
            .filter(|(k, v)| v.is_none() && self.index.contains_key(*k))
            .count();
        self.index.len() + added - removed
    }

    fn write(&mut self, key: Vec<u8>, value: &Value, protocol: Protocol) -> Result<()> {
        let stored = StoredValue {
            protocol: protocol.number(),
            data: protocol.encode(value)?,
        };
        self.log.append(&stored.to_record(&key))?;
        self.index.insert(key, stored);
        Ok(())
    }

    fn remove(&mut self, key: Vec<u8>) -> Result<()> {
        if self.index.contains_key(&key) {
            self.log.append(&LogRecord::Delete { key: key.clone() })?;
            self.index.remove(&key);
        }
        Ok(())
    }

    /// Moves cached mutations into the log. An entry leaves the cache only
    /// once its record is appended, so a failed flush loses nothing.
    fn flush_pending(&mut self, protocol: Protocol) -> Result<()> {
        let keys: Vec<Vec<u8>> = self.pending.keys().cloned().collect();
        for key in keys {
            let Some(cached) = self.pending.remove(&key) else {
                continue;
            };
            let applied = match &cached {
                Some(value) => self.write(key.clone(), value, protocol),
                None => self.remove(key.clone()),
            };
            if let Err(err) = applied {
                self.pending.insert(key, cached);
                return Err(err);
            }
        }
        self.log.flush()?;
        Ok(())
    }

    fn sync(&mut self, protocol: Protocol) -> Result<()> {
        self.flush_pending(protocol)?;
        self.log.sync()?;

        let records = self.log.records();
        if records > COMPACT_MIN_RECORDS && records > 2 * self.index.len() {
            let live: Vec<LogRecord> = self
                .index
                .iter()
                .map(|(key, stored)| stored.to_record(key))
                .collect();
            self.log.compact(live.iter())?;
        }
        Ok(())
    }
}

/// Connector over a single shelf file.
#[derive(Debug)]
pub struct ShelfConnector {
    config: ShelfConfig,
    path: PathBuf,
    state: Option<OpenShelf>,
}

impl ShelfConnector {
    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &ShelfConfig {
        &self.config
    }

    /// Canonical path of the shelf file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state(&self) -> Result<&OpenShelf> {
        self.state
            .as_ref()
            .ok_or(PreserveError::ConnectorClosed { scheme: SCHEME })
    }

    fn state_mut(&mut self) -> Result<&mut OpenShelf> {
        self.state
            .as_mut()
            .ok_or(PreserveError::ConnectorClosed { scheme: SCHEME })
    }

    fn encode_key(&self, key: &str) -> Result<Vec<u8>> {
        self.config.keyencoding.encode(key)
    }
}

fn connection_error(path: &Path, err: &std::io::Error) -> PreserveError {
    let message = if err.kind() == ErrorKind::WouldBlock {
        format!("{} is already open: {err}", path.display())
    } else {
        format!("cannot open {}: {err}", path.display())
    };
    PreserveError::connection(SCHEME, message)
}

impl Mapping for ShelfConnector {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let state = self.state()?;
        state.lookup(&self.encode_key(key)?)
    }

    fn set(&mut self, key: &str, value: Value) -> Result<()> {
        let encoded = self.encode_key(key)?;
        let writeback = self.config.writeback;
        let protocol = self.config.protocol;
        let state = self.state_mut()?;
        if writeback {
            // Reject unencodable values now rather than at sync time.
            protocol.encode(&value)?;
            state.pending.insert(encoded, Some(value));
        } else {
            state.write(encoded, &value, protocol)?;
            state.log.flush()?;
        }
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let encoded = self.encode_key(key)?;
        let writeback = self.config.writeback;
        let state = self.state_mut()?;
        if writeback {
            state.pending.insert(encoded, None);
        } else {
            state.remove(encoded)?;
            state.log.flush()?;
        }
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        let state = self.state()?;
        Ok(state.is_live(&self.encode_key(key)?))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.state()?.live_len())
    }

    fn iter(&self) -> Result<Entries<'_>> {
        let state = self.state()?;
        let mut keys: Vec<Vec<u8>> = state
            .index
            .keys()
            .filter(|k| !state.pending.contains_key(*k))
            .cloned()
            .collect();
        keys.extend(
            state
                .pending
                .iter()
                .filter(|(_, v)| v.is_some())
                .map(|(k, _)| k.clone()),
        );

        let encoding = self.config.keyencoding;
        Ok(Box::new(keys.into_iter().filter_map(move |raw| {
            match state.lookup(&raw) {
                Ok(Some(value)) => Some(encoding.decode(&raw).map(|key| (key, value))),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            }
        })))
    }
}

impl Lifecycle for ShelfConnector {
    fn sync(&mut self) -> Result<()> {
        let protocol = self.config.protocol;
        self.state_mut()?.sync(protocol)
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut state) = self.state.take() else {
            return Ok(());
        };
        let result = state.sync(self.config.protocol);
        let entries = state.index.len();
        drop(state);
        debug!(scheme = SCHEME, path = %self.path.display(), entries, "closed connector");
        result
    }

    fn is_closed(&self) -> bool {
        self.state.is_none()
    }
}

impl Connector for ShelfConnector {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    fn identity(&self) -> String {
        format!("{SCHEME}:{}", self.path.display())
    }
}

impl Backend for ShelfConnector {
    type Config = ShelfConfig;

    const SCHEME: &'static str = SCHEME;
    const DESCRIPTION: &'static str = "Single-file embedded store with an append-only log";

    fn open(config: Self::Config) -> Result<Self> {
        let requested = config.filename.clone();
        let lock = FileLock::acquire(&requested).map_err(|e| connection_error(&requested, &e))?;

        let mut index = HashMap::new();
        let log = ShelfLog::open(&requested, |record| match record {
            LogRecord::Put {
                key,
                protocol,
                data,
            } => {
                index.insert(key, StoredValue { protocol, data });
            }
            LogRecord::Delete { key } => {
                index.remove(&key);
            }
        })
        .map_err(|e| connection_error(&requested, &e))?;

        let path = fs::canonicalize(&requested).unwrap_or(requested);
        debug!(
            scheme = SCHEME,
            path = %path.display(),
            lock = %lock.path().display(),
            entries = index.len(),
            records = log.records(),
            "opened connector"
        );

        Ok(Self {
            config,
            path,
            state: Some(OpenShelf {
                log,
                index,
                pending: HashMap::new(),
                _lock: lock,
            }),
        })
    }
}

impl Drop for ShelfConnector {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(scheme = SCHEME, path = %self.path.display(), error = %e, "close on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("1".parse::<Protocol>(), Ok(Protocol::Json));
        assert_eq!("2".parse::<Protocol>(), Ok(Protocol::Binary));
        assert!("3".parse::<Protocol>().is_err());
        assert!("pickle".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_config_from_params() {
        let config = ShelfConfig::from_params(Params::from([
            ("filename", "a.shelf"),
            ("protocol", "1"),
            ("writeback", "on"),
        ]))
        .unwrap();
        assert_eq!(config.filename, PathBuf::from("a.shelf"));
        assert_eq!(config.protocol, Protocol::Json);
        assert!(config.writeback);

        let err = ShelfConfig::from_params(Params::new()).unwrap_err();
        assert!(matches!(err, PreserveError::MissingConfiguration { .. }));

        let err = ShelfConfig::from_params(Params::from([("filename", "a"), ("protocol", "9")]))
            .unwrap_err();
        assert!(matches!(err, PreserveError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_mixed_protocols_stay_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mixed.shelf");

        let mut store =
            ShelfConnector::open(ShelfConfig::new(&path).with_protocol(Protocol::Json)).unwrap();
        store.set("json", Value::from("one")).unwrap();
        store.close().unwrap();

        let mut store = ShelfConnector::open(ShelfConfig::new(&path)).unwrap();
        store.set("binary", Value::from(2)).unwrap();
        assert_eq!(store.at("json").unwrap(), Value::from("one"));
        assert_eq!(store.at("binary").unwrap(), Value::Int(2));
    }

    #[test]
    fn test_json_protocol_rejects_nan() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nan.shelf");
        let mut store =
            ShelfConnector::open(ShelfConfig::new(&path).with_protocol(Protocol::Json)).unwrap();
        let err = store.set("x", Value::Float(f64::NAN)).unwrap_err();
        assert!(matches!(err, PreserveError::Serialization { .. }));
        assert!(!store.contains("x").unwrap());
    }

    #[test]
    fn test_writeback_reads_see_pending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wb.shelf");
        let mut store = ShelfConnector::open(ShelfConfig::new(&path).with_writeback(true)).unwrap();

        store.set("a", Value::from(1)).unwrap();
        store.set("b", Value::from(2)).unwrap();
        store.sync().unwrap();
        store.delete("a").unwrap();
        store.set("c", Value::from(3)).unwrap();

        assert_eq!(store.len().unwrap(), 2);
        assert!(!store.contains("a").unwrap());
        assert_eq!(store.get("a").unwrap(), None);
        let mut keys = store.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn test_failed_flush_keeps_pending_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failing.shelf");
        let mut store = ShelfConnector::open(ShelfConfig::new(&path).with_writeback(true)).unwrap();

        store.set("old", Value::from("synced")).unwrap();
        store.sync().unwrap();
        store.delete("old").unwrap();
        for i in 0..10 {
            store.set(&format!("k{i}"), Value::from(i)).unwrap();
        }

        store.state.as_mut().unwrap().log.fail_writes().unwrap();
        assert!(store.sync().is_err());

        assert_eq!(store.state.as_ref().unwrap().pending.len(), 11);
        assert_eq!(store.len().unwrap(), 10);
        assert!(!store.contains("old").unwrap());
        for i in 0..10 {
            assert_eq!(store.at(&format!("k{i}")).unwrap(), Value::from(i));
        }
    }

    #[test]
    fn test_compaction_shrinks_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("compact.shelf");
        let mut store = ShelfConnector::open(ShelfConfig::new(&path)).unwrap();
        for i in 0..(COMPACT_MIN_RECORDS + 10) {
            store.set("hot", Value::from(i64::try_from(i).unwrap())).unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();
        store.sync().unwrap();
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before);
        store.close().unwrap();

        let store = ShelfConnector::open(ShelfConfig::new(&path)).unwrap();
        let expected = i64::try_from(COMPACT_MIN_RECORDS + 9).unwrap();
        assert_eq!(store.at("hot").unwrap(), Value::Int(expected));
        assert_eq!(store.len().unwrap(), 1);
    }
}
