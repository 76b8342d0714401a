//! Durable checkpoint store for the tidemark delivery pipeline.
//!
//! Tracks two independent durability tracks per source location: coarse
//! processed ranges (which positions have been fully attempted) and fine
//! failed-event records (which individual positions must be retried). Two
//! backends implement the [`store::CheckpointStore`] trait: SQLite for
//! embedded/local use and Postgres for shared deployments.

#![warn(clippy::pedantic)]

pub mod error;
pub mod postgres;
pub mod sqlite;
pub mod store;

pub use error::{Result, StateError};
pub use self::postgres::PostgresCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
pub use store::CheckpointStore;
