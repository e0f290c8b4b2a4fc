//! # preserve - one mapping interface over many stores
//!
//! preserve gives application code a single dictionary-like interface over
//! interchangeable storage backends, chosen at runtime by URI:
//!
//! - **memory**: process-local map, gone on close
//! - **shelf**: single-file embedded store with an append-only log
//! - **sqlite**: one table of JSON documents
//! - **mongodb**: one collection, one document per key
//!
//! ## Core Concepts
//!
//! - **Connector**: a live handle to one backend resource ([`Mapping`] +
//!   [`Lifecycle`])
//! - **Registry**: resolves a URI scheme to a backend and opens it
//! - **Export**: copies every entry from one connector into another
//!
//! ## Usage
//!
//! ```
//! use preserve::{Lifecycle, Mapping, Value};
//!
//! let mut store = preserve::from_uri("memory:")?;
//! store.set("ada", Value::object([("born", 1815)]))?;
//! assert!(store.contains("ada")?);
//! assert_eq!(store.at("ada")?.field("born"), Some(&Value::Int(1815)));
//! store.close()?;
//! # Ok::<(), preserve::PreserveError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod codec;
pub mod error;
pub mod uri;
pub mod value;

// Contract and adapters
pub mod backends;
pub mod connector;

// Dispatch and migration
pub mod export;
pub mod registry;

pub use codec::DateTimeStyle;
pub use connector::{
    scoped, Backend, BackendConfig, Connector, Entries, KeyEncoding, Lifecycle, Mapping, Parameter,
};
pub use error::{PreserveError, Result};
pub use export::{export, export_uris, ExportReport};
pub use registry::{BackendDescriptor, Plugin, Registry, RegistryBuilder};
pub use uri::{ParsedUri, Params};
pub use value::Value;

/// Opens the backend registered as `name` in the global registry.
///
/// # Errors
/// - `UnknownBackend` if `name` is not registered
/// - any config or open error from the backend
pub fn open(name: &str, params: Params) -> Result<Box<dyn Connector>> {
    Registry::global().open(name, params)
}

/// Opens a connector from a URI using the global registry.
///
/// # Errors
/// - `InvalidUri` if `uri` has no scheme
/// - `UnknownBackend` if the scheme is not registered
/// - any config or open error from the backend
pub fn from_uri(uri: &str) -> Result<Box<dyn Connector>> {
    Registry::global().from_uri(uri)
}

/// Backends in the global registry, sorted by scheme.
#[must_use]
pub fn connectors() -> Vec<BackendDescriptor> {
    Registry::global().connectors()
}
