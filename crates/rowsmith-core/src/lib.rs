//! Core types for the rowsmith ingestion engine.
//!
//! This crate is deliberately free of database dependencies. It owns the
//! record model, type inference, naming rules, foreign-key guessing and the
//! write options shared by every storage backend.

pub mod error;
pub mod guess;
pub mod hash;
pub mod infer;
pub mod naming;
pub mod options;
pub mod schema;
pub mod value;

pub use error::{Error, Result};
pub use options::{
  CreateOptions, FailedRecord, ForeignKeySpec, WriteMode, WriteOptions,
  WriteSummary,
};
pub use schema::{
  Column, ColumnType, ForeignKey, PrimaryKey, PrimaryKeyValue, TableSchema,
};
pub use value::{Record, Value};
