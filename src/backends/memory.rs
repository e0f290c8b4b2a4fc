//! In-memory backend.
//!
//! Entries live in a `HashMap` keyed by the encoded key bytes. Nothing is
//! persisted: closing the connector drops the data. Intended for tests,
//! caching, and as a reference implementation of the connector contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::connector::{
    Backend, BackendConfig, Connector, Entries, KeyEncoding, Lifecycle, Mapping, Parameter,
};
use crate::error::{PreserveError, Result};
use crate::uri::{ParsedUri, Params};
use crate::value::Value;

const SCHEME: &str = "memory";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

const PARAMETERS: &[Parameter] = &[Parameter::optional(
    "keyencoding",
    "Encoding applied to keys before storing them",
    Some("utf-8"),
)];

/// Configuration of the in-memory backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Encoding of stored keys.
    pub keyencoding: KeyEncoding,
}

impl BackendConfig for MemoryConfig {
    fn from_params(mut params: Params) -> Result<Self> {
        let keyencoding = params
            .take_parsed(SCHEME, "keyencoding")?
            .unwrap_or_default();
        params.deny_unknown(SCHEME)?;
        Ok(Self { keyencoding })
    }

    fn from_uri(uri: ParsedUri) -> Result<Self> {
        if !uri.location.is_empty() {
            return Err(PreserveError::invalid_uri(
                &uri.uri,
                "the memory backend takes no location",
            ));
        }
        Self::from_params(uri.params)
    }

    fn parameters() -> &'static [Parameter] {
        PARAMETERS
    }
}

/// Connector backed by a process-local hash map.
#[derive(Debug)]
pub struct MemoryConnector {
    config: MemoryConfig,
    entries: Option<HashMap<Vec<u8>, Value>>,
    id: u64,
}

impl MemoryConnector {
    /// Opens an empty store with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    fn with_config(config: MemoryConfig) -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        debug!(scheme = SCHEME, id, "opened connector");
        Self {
            config,
            entries: Some(HashMap::new()),
            id,
        }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn entries(&self) -> Result<&HashMap<Vec<u8>, Value>> {
        self.entries
            .as_ref()
            .ok_or(PreserveError::ConnectorClosed { scheme: SCHEME })
    }

    fn entries_mut(&mut self) -> Result<&mut HashMap<Vec<u8>, Value>> {
        self.entries
            .as_mut()
            .ok_or(PreserveError::ConnectorClosed { scheme: SCHEME })
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Mapping for MemoryConnector {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self.entries()?;
        let encoded = self.config.keyencoding.encode(key)?;
        Ok(entries.get(&encoded).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<()> {
        let encoded = self.config.keyencoding.encode(key)?;
        self.entries_mut()?.insert(encoded, value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let encoded = self.config.keyencoding.encode(key)?;
        self.entries_mut()?.remove(&encoded);
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        let entries = self.entries()?;
        let encoded = self.config.keyencoding.encode(key)?;
        Ok(entries.contains_key(&encoded))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    fn iter(&self) -> Result<Entries<'_>> {
        let encoding = self.config.keyencoding;
        let snapshot: Vec<(Vec<u8>, Value)> = self
            .entries()?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Box::new(snapshot.into_iter().map(move |(raw, value)| {
            Ok((encoding.decode(&raw)?, value))
        })))
    }
}

impl Lifecycle for MemoryConnector {
    fn sync(&mut self) -> Result<()> {
        self.entries()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.entries.is_none() {
            return Ok(());
        }
        self.sync()?;
        if let Some(entries) = self.entries.take() {
            debug!(scheme = SCHEME, id = self.id, entries = entries.len(), "closed connector");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.entries.is_none()
    }
}

impl Connector for MemoryConnector {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    fn identity(&self) -> String {
        format!("{SCHEME}:#{}", self.id)
    }
}

impl Backend for MemoryConnector {
    type Config = MemoryConfig;

    const SCHEME: &'static str = SCHEME;
    const DESCRIPTION: &'static str = "Process-local store; contents are lost on close";

    fn open(config: Self::Config) -> Result<Self> {
        Ok(Self::with_config(config))
    }
}
