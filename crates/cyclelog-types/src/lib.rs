//! Hierarchical typed log table for the cyclelog record/replay logger.
//!
//! This crate is the data model shared by everything else in the
//! workspace: the orchestrator populates a [`LogTable`] each cycle, user
//! components read and write it through [`Subtable`] views, and sinks
//! receive [`Snapshot`]s of it.
//!
//! # Modules
//!
//! - [`value`] -- The closed [`Value`] union, [`FromValue`] conversions, and
//!   [`LogEnum`] enumerations.
//! - [`table`] -- [`LogTable`], [`Subtable`], and [`TableView`].
//! - [`snapshot`] -- Immutable, shareable [`Snapshot`]s.

mod float_repr;
pub mod snapshot;
pub mod table;
pub mod value;

pub use snapshot::Snapshot;
pub use table::{LogTable, ROOT_PATH, Subtable, TableView};
pub use value::{FromValue, LogEnum, Value, ValueKind};
