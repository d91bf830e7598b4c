#![forbid(unsafe_code)]

mod database;
mod error;
mod memory;
mod provider;
mod sqlite;

pub use database::EdgeDatabase;
pub use error::{Result, StorageError};
pub use memory::{DbEntry, MemoryStorage};
pub use provider::{Fields, Snapshot, StorageProvider, TableRows, filter_holds, id_of, values_match};
pub use sqlite::{SqliteOpener, SqliteStorage};
