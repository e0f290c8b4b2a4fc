//! Error types for preserve.
//!
//! Every failure surfaced by a connector, the registry, or the export routine
//! is a [`PreserveError`]. Driver errors are mapped into this taxonomy inside
//! the backend adapters so callers can match on the condition rather than on
//! the storage engine that produced it.

use thiserror::Error;

/// Boxed underlying cause carried by some variants.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for preserve.
#[derive(Debug, Error)]
pub enum PreserveError {
    /// The URI has no scheme separator, or its scheme does not match the
    /// backend being constructed.
    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri {
        /// The offending URI.
        uri: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No backend is registered under the requested scheme or name.
    #[error("Unknown backend: {scheme}")]
    UnknownBackend {
        /// The scheme that was looked up.
        scheme: String,
    },

    /// A required configuration field was absent at construction.
    #[error("Missing configuration for {backend}: required field '{field}' is absent")]
    MissingConfiguration {
        /// Backend scheme.
        backend: String,
        /// Name of the missing field.
        field: String,
    },

    /// A configuration field was present but could not be used.
    #[error("Invalid configuration for {backend}: field '{field}' {reason}")]
    InvalidConfiguration {
        /// Backend scheme.
        backend: String,
        /// Name of the offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The backend's native resource could not be acquired.
    #[error("Connection error ({backend}): {message}")]
    Connection {
        /// Backend scheme.
        backend: String,
        /// Description of the failure.
        message: String,
    },

    /// Direct-index lookup on an absent key.
    #[error("Key not found: {key}")]
    KeyNotFound {
        /// The key that was looked up.
        key: String,
    },

    /// An operation was attempted after `close()`.
    #[error("Connector closed: {scheme}")]
    ConnectorClosed {
        /// Scheme of the closed connector.
        scheme: &'static str,
    },

    /// A value could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
        /// Underlying codec error, when there is one.
        #[source]
        source: Option<Cause>,
    },

    /// The caller passed arguments that cannot be honoured.
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Why the arguments were rejected.
        reason: String,
    },

    /// The storage engine failed after the connector was opened.
    #[error("Storage error ({backend}): {message}")]
    Storage {
        /// Backend scheme.
        backend: String,
        /// Description of the failure.
        message: String,
    },

    /// File-system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PreserveError {
    /// Creates an invalid-URI error.
    #[must_use]
    pub fn invalid_uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unknown-backend error.
    #[must_use]
    pub fn unknown_backend(scheme: impl Into<String>) -> Self {
        Self::UnknownBackend {
            scheme: scheme.into(),
        }
    }

    /// Creates a missing-configuration error.
    #[must_use]
    pub fn missing(backend: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingConfiguration {
            backend: backend.into(),
            field: field.into(),
        }
    }

    /// Creates an invalid-configuration error.
    #[must_use]
    pub fn invalid_config(
        backend: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidConfiguration {
            backend: backend.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a connection error.
    #[must_use]
    pub fn connection(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Creates a key-not-found error.
    #[must_use]
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    /// Creates a serialization error without an underlying cause.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a serialization error wrapping the codec's own error.
    #[must_use]
    pub fn serialization_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an invalid-arguments error.
    #[must_use]
    pub fn invalid_arguments(reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            reason: reason.into(),
        }
    }

    /// Creates a storage error.
    #[must_use]
    pub fn storage(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Returns true if this is a key-not-found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound { .. })
    }

    /// Returns true if the connector was already closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectorClosed { .. })
    }

    /// Returns true if this error came from configuration or URI handling.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidUri { .. }
                | Self::UnknownBackend { .. }
                | Self::MissingConfiguration { .. }
                | Self::InvalidConfiguration { .. }
        )
    }

    /// Returns true if the native resource could not be acquired.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Result type alias for preserve operations.
pub type Result<T> = std::result::Result<T, PreserveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_uri_display() {
        let err = PreserveError::invalid_uri("no-scheme", "missing ':' separator");
        let msg = format!("{err}");
        assert!(msg.contains("no-scheme"));
        assert!(msg.contains("missing ':'"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_missing_configuration_display() {
        let err = PreserveError::missing("shelf", "filename");
        let msg = format!("{err}");
        assert!(msg.contains("shelf"));
        assert!(msg.contains("'filename'"));
    }

    #[test]
    fn test_key_not_found() {
        let err = PreserveError::key_not_found("missing");
        assert!(err.is_not_found());
        assert!(!err.is_closed());
        assert_eq!(format!("{err}"), "Key not found: missing");
    }

    #[test]
    fn test_connector_closed() {
        let err = PreserveError::ConnectorClosed { scheme: "memory" };
        assert!(err.is_closed());
        assert!(format!("{err}").contains("memory"));
    }

    #[test]
    fn test_serialization_keeps_source() {
        let cause = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = PreserveError::serialization_with("bad document", cause);
        assert!(std::error::Error::source(&err).is_some());

        let err = PreserveError::serialization("no source");
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn test_io_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: PreserveError = io.into();
        assert!(matches!(err, PreserveError::Io(_)));
        assert!(!err.is_connection());
    }
}
