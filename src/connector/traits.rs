//! The connector contract.
//!
//! These traits define what every backend adapter must implement:
//! - [`Mapping`]: the dictionary-like read/write surface
//! - [`Lifecycle`]: flushing and releasing the native resource
//! - [`Connector`]: the object-safe union the registry hands out
//! - [`Backend`]: the static side (scheme, config, constructors)

use std::fmt;

use tracing::warn;

use crate::error::{PreserveError, Result};
use crate::uri::{ParsedUri, Params};
use crate::value::Value;

/// Iterator over the entries of a connector.
pub type Entries<'a> = Box<dyn Iterator<Item = Result<(String, Value)>> + 'a>;

/// Dictionary-like access to a backend.
///
/// # Semantics
/// - `set` overwrites any existing value
/// - `delete` on an absent key succeeds and changes nothing
/// - every method fails with `ConnectorClosed` after [`Lifecycle::close`]
pub trait Mapping {
    /// Looks up a key.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Looks up a key, falling back to `default` when it is absent.
    fn get_or(&self, key: &str, default: Value) -> Result<Value> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Looks up a key that must be present.
    ///
    /// # Errors
    /// - `KeyNotFound` if the key is absent.
    fn at(&self, key: &str) -> Result<Value> {
        self.get(key)?.ok_or_else(|| PreserveError::key_not_found(key))
    }

    /// Inserts or overwrites a key.
    fn set(&mut self, key: &str, value: Value) -> Result<()>;

    /// Removes a key if present.
    fn delete(&mut self, key: &str) -> Result<()>;

    /// Returns true if the key is present.
    fn contains(&self, key: &str) -> Result<bool>;

    /// Number of stored entries.
    fn len(&self) -> Result<usize>;

    /// Returns true if nothing is stored.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Iterates over all entries.
    ///
    /// Embedded backends iterate a snapshot of the keys present at the time
    /// of the call. Database backends re-query, so each call starts over.
    fn iter(&self) -> Result<Entries<'_>>;

    /// Collects every key.
    fn keys(&self) -> Result<Vec<String>> {
        self.iter()?.map(|entry| entry.map(|(key, _)| key)).collect()
    }
}

/// Resource lifecycle of a connector.
pub trait Lifecycle {
    /// Flushes pending writes. A no-op for backends without a write-back cache.
    fn sync(&mut self) -> Result<()>;

    /// Syncs, releases the native resource, and marks the connector closed.
    ///
    /// Closing twice is not an error. If the flush fails the resource is
    /// still released and the flush error is returned.
    fn close(&mut self) -> Result<()>;

    /// Returns true once `close` has run.
    fn is_closed(&self) -> bool;
}

/// A live handle to one backend resource.
pub trait Connector: Mapping + Lifecycle + Send {
    /// Scheme of the backend this connector belongs to.
    fn scheme(&self) -> &'static str;

    /// Canonical description of the underlying resource.
    ///
    /// Two connectors with equal identities read and write the same data.
    fn identity(&self) -> String;
}

impl fmt::Debug for dyn Connector + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("scheme", &self.scheme())
            .field("identity", &self.identity())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// One entry in a backend's parameter schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    /// Parameter name as it appears in a URI query or [`Params`].
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Whether construction fails without it.
    pub required: bool,
    /// Default applied when the parameter is absent.
    pub default: Option<&'static str>,
}

impl Parameter {
    /// A parameter that must be supplied.
    #[must_use]
    pub const fn required(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            required: true,
            default: None,
        }
    }

    /// A parameter with a default.
    #[must_use]
    pub const fn optional(
        name: &'static str,
        description: &'static str,
        default: Option<&'static str>,
    ) -> Self {
        Self {
            name,
            description,
            required: false,
            default,
        }
    }
}

/// Typed configuration of a backend.
pub trait BackendConfig: Sized {
    /// Builds the config from string parameters.
    ///
    /// # Errors
    /// - `MissingConfiguration` for an absent required field
    /// - `InvalidConfiguration` for a value that does not parse, or an
    ///   unknown parameter on backends that do not forward extras
    fn from_params(params: Params) -> Result<Self>;

    /// Builds the config from a parsed URI whose scheme was already checked.
    ///
    /// The default treats a non-empty location as the `filename` parameter.
    fn from_uri(uri: ParsedUri) -> Result<Self> {
        let mut params = uri.params;
        if !uri.location.is_empty() {
            params.insert("filename", uri.location);
        }
        Self::from_params(params)
    }

    /// Parameter schema, for listing and documentation.
    fn parameters() -> &'static [Parameter];
}

/// Static side of a backend: its scheme, config type, and constructors.
pub trait Backend: Connector + Sized + 'static {
    /// Typed configuration.
    type Config: BackendConfig;

    /// Primary URI scheme.
    const SCHEME: &'static str;

    /// Additional schemes accepted by [`Backend::from_uri`].
    const ALIASES: &'static [&'static str] = &[];

    /// One-line description for listings.
    const DESCRIPTION: &'static str;

    /// Acquires the native resource.
    ///
    /// # Errors
    /// - `Connection` if the resource cannot be opened
    fn open(config: Self::Config) -> Result<Self>;

    /// Parses `uri` into a config and opens it.
    ///
    /// # Errors
    /// - `InvalidUri` if the scheme is not this backend's
    fn from_uri(uri: &str) -> Result<Self> {
        let parsed = ParsedUri::parse(uri)?;
        parsed.expect_scheme(Self::SCHEME, Self::ALIASES)?;
        Self::open(Self::Config::from_uri(parsed)?)
    }
}

/// Runs `body` with `connector`, closing it on every exit path.
///
/// An error from `body` takes precedence; a close error after a failed body
/// is logged and dropped.
///
/// # Errors
/// Returns the body's error, or the close error if the body succeeded.
pub fn scoped<C, T, F>(mut connector: C, body: F) -> Result<T>
where
    C: Connector,
    F: FnOnce(&mut C) -> Result<T>,
{
    let outcome = body(&mut connector);
    let closed = connector.close();
    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            warn!(scheme = connector.scheme(), error = %close_err, "close failed after error");
            Err(err)
        }
    }
}
