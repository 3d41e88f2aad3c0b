//! Job registry and run audit persistence for tidemark.
//!
//! Provides the [`ControlStore`] trait with [`SqliteControlStore`] and
//! [`PostgresControlStore`] implementations for reading registered jobs and
//! dependency edges and for recording every run attempt.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod postgres;
mod raw;
pub mod schema;
pub mod sqlite;

pub use backend::ControlStore;
pub use error::StoreError;
pub use self::postgres::PostgresControlStore;
pub use sqlite::SqliteControlStore;
