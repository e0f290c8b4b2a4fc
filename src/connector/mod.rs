//! Connector contract shared by every backend.

mod keys;
mod traits;

pub use keys::KeyEncoding;
pub use traits::{scoped, Backend, BackendConfig, Connector, Entries, Lifecycle, Mapping, Parameter};
