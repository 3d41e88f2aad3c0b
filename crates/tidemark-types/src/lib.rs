//! Shared types for tidemark.
//!
//! The in-memory tabular model ([`Value`], [`Row`], [`Table`]) that job
//! steps operate on, the [`SharedState`] bag threaded between steps, and the
//! control-plane records ([`control`]) persisted by the control store.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod column_type;
pub mod control;
pub mod error;
pub mod group;
mod key;
pub mod row;
pub mod shared_state;
pub mod table;
pub mod value;

pub use column_type::ColumnType;
pub use error::{ParseEnumError, TableError};
pub use group::{Aggregate, GroupedTable};
pub use row::Row;
pub use shared_state::{SharedState, StateValue, MAX_EFFECTIVE_DATE_KEY, MIN_EFFECTIVE_DATE_KEY};
pub use table::{JoinKind, Table};
pub use value::Value;
