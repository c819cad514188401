//! Immutable per-cycle snapshots.
//!
//! A [`Snapshot`] is a deep copy of a [`LogTable`] taken at the end of a
//! cycle. It is backed by an [`Arc`], so a sink can keep it, clone it, or
//! hand it to another thread without copying the tree again and without
//! synchronizing with the live table, which keeps mutating.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::table::{LogTable, TableView};
use crate::value::{FromValue, LogEnum, Value};

/// Immutable deep copy of one cycle's [`LogTable`].
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    table: Arc<LogTable>,
}

impl Snapshot {
    /// Timestamp of the cycle this snapshot was taken in.
    pub fn timestamp(&self) -> Duration {
        self.table.timestamp()
    }

    /// The captured table.
    pub fn table(&self) -> &LogTable {
        &self.table
    }

    /// Read a root-level `key`, falling back to `default`.
    pub fn get<T: FromValue>(&self, key: &str, default: T) -> T {
        self.table.get(key, default)
    }

    /// Read a root-level enumeration, falling back to `default`.
    pub fn get_enum<E: LogEnum>(&self, key: &str, default: E) -> E {
        self.table.get_enum(key, default)
    }

    /// Look up a value by its full path.
    pub fn value(&self, full_key: &str) -> Option<&Value> {
        self.table.value(full_key)
    }

    /// Read-only view of the table at `path`.
    pub fn view(&self, path: &str) -> TableView<'_> {
        self.table.view(path)
    }

    /// Recover an owned table, copying only if other handles still share it.
    pub fn into_table(self) -> LogTable {
        Arc::try_unwrap(self.table).unwrap_or_else(|shared| (*shared).clone())
    }
}

impl From<LogTable> for Snapshot {
    fn from(table: LogTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.table.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        LogTable::deserialize(deserializer).map(Self::from)
    }
}
