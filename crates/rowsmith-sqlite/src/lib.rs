//! SQLite backend for rowsmith.
//!
//! Turns loosely structured records into rows: tables are created from the
//! types inferred over a sample, evolved as new fields appear, and written
//! in chunked, savepoint-scoped batches under a chosen conflict policy.
//! Full-text indexes, foreign keys, many-to-many junctions and lookup tables
//! are maintained alongside.
//!
//! [`Database`] is the synchronous entry point; [`AsyncDatabase`] runs the
//! same operations through [`tokio_rusqlite`].

mod conflict;
mod database;
mod encode;
mod handle;
mod pipeline;
mod relations;
mod rows;
mod schema;
mod session;

pub mod catalog;
pub mod config;
pub mod error;
pub mod fts;

pub use catalog::{Index, SchemaCache, Trigger};
pub use config::DatabaseConfig;
pub use database::Database;
pub use error::{Error, Result};
pub use fts::{FtsIndex, FtsOptions, FtsReport, FtsVersion};
pub use handle::AsyncDatabase;
pub use relations::ManyToMany;
pub use schema::IndexOptions;

#[cfg(test)]
mod tests;
