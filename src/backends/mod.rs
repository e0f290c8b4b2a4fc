//! Backend adapters.
//!
//! `memory` is always available; the others are gated behind the cargo
//! feature of the same name.

pub mod memory;

#[cfg(feature = "mongodb")]
pub mod mongo;
#[cfg(feature = "shelf")]
pub mod shelf;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{MemoryConfig, MemoryConnector};

#[cfg(feature = "mongodb")]
pub use mongo::{MongoConfig, MongoConnector};
#[cfg(feature = "shelf")]
pub use shelf::{Protocol, ShelfConfig, ShelfConnector};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConfig, SqliteConnector};
