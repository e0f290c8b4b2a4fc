//! Copying entries between connectors.
//!
//! The copy is not atomic: a failure part-way leaves the destination holding
//! whatever was written before it. Both connectors are closed when the copy
//! ends, whatever the outcome.

use std::fs;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::connector::{Connector, Lifecycle, Mapping};
use crate::error::{PreserveError, Result};
use crate::registry::Registry;
use crate::uri::ParsedUri;

/// Outcome of a successful export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportReport {
    /// Entries written to the destination.
    pub copied: usize,
}

fn copy_entries(source: &dyn Connector, destination: &mut dyn Connector) -> Result<usize> {
    let mut copied = 0;
    for entry in source.iter()? {
        let (key, value) = entry?;
        destination.set(&key, value)?;
        copied += 1;
    }
    Ok(copied)
}

/// Copies every entry of `source` into `destination`, then closes both.
///
/// # Errors
/// - `InvalidArguments` if both connectors address the same resource; nothing
///   is written and neither connector is closed
/// - otherwise the first of: the copy error, the source close error, the
///   destination close error
pub fn export(source: &mut dyn Connector, destination: &mut dyn Connector) -> Result<ExportReport> {
    let identity = source.identity();
    if identity == destination.identity() {
        return Err(PreserveError::invalid_arguments(format!(
            "source and destination are the same resource: {identity}"
        )));
    }

    let copied = copy_entries(source, destination);
    let source_closed = source.close();
    let destination_closed = destination.close();

    let copied = match (copied, source_closed, destination_closed) {
        (Ok(copied), Ok(()), Ok(())) => copied,
        (Err(e), src, dst) => {
            for close_err in [src.err(), dst.err()].into_iter().flatten() {
                warn!(error = %close_err, "close failed after export error");
            }
            return Err(e);
        }
        (Ok(_), Err(e), dst) => {
            if let Err(close_err) = dst {
                warn!(error = %close_err, "destination close failed after source close error");
            }
            return Err(e);
        }
        (Ok(_), Ok(()), Err(e)) => return Err(e),
    };

    debug!(
        source = %identity,
        destination = %destination.identity(),
        entries = copied,
        "export finished"
    );
    Ok(ExportReport { copied })
}

/// Opens both URIs through `registry` and exports between them.
///
/// # Errors
/// - `InvalidArguments` if the URIs are identical or name the same existing
///   file through the same backend, before anything is opened
/// - any open error; a source that was already opened is closed again
/// - any error from [`export`]
pub fn export_uris(registry: &Registry, source: &str, destination: &str) -> Result<ExportReport> {
    if source == destination {
        return Err(PreserveError::invalid_arguments(format!(
            "source and destination are the same URI: {source}"
        )));
    }
    if same_file(registry, source, destination) {
        return Err(PreserveError::invalid_arguments(format!(
            "source and destination name the same file: {source} and {destination}"
        )));
    }

    let mut from = registry.from_uri(source)?;
    let mut to = match registry.from_uri(destination) {
        Ok(to) => to,
        Err(e) => {
            if let Err(close_err) = from.close() {
                warn!(uri = source, error = %close_err, "source close failed");
            }
            return Err(e);
        }
    };

    let outcome = export(from.as_mut(), to.as_mut());
    if outcome.is_err() {
        // A refusal leaves both open.
        for connector in [&mut from, &mut to] {
            if !connector.is_closed() {
                if let Err(close_err) = connector.close() {
                    warn!(error = %close_err, "close failed after refused export");
                }
            }
        }
    }
    outcome
}

/// True when both URIs reach one existing file through one backend.
fn same_file(registry: &Registry, source: &str, destination: &str) -> bool {
    let (Ok(a), Ok(b)) = (ParsedUri::parse(source), ParsedUri::parse(destination)) else {
        return false;
    };
    let backend = |uri: &ParsedUri| registry.descriptor(&uri.scheme).ok().map(|d| d.scheme);
    let scheme = backend(&a);
    let same_table = a.params.get("table") == b.params.get("table");
    if scheme.is_none() || scheme != backend(&b) || !same_table {
        return false;
    }
    matches!((file_of(&a), file_of(&b)), (Some(x), Some(y)) if x == y)
}

fn file_of(uri: &ParsedUri) -> Option<PathBuf> {
    let name = if uri.location.is_empty() {
        uri.params.get("filename")?
    } else {
        uri.location.as_str()
    };
    fs::canonicalize(name).ok()
}
