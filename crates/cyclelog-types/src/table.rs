//! Hierarchical typed key-value table.
//!
//! A [`LogTable`] is the root of one cycle's state. Storage is flat: every
//! value lives in a single ordered map keyed by its full path
//! (`/Parent/Child/key`). A [`Subtable`] is a mutable view over the root
//! bound to a path prefix, and a [`TableView`] is the read-only equivalent.
//!
//! Because views only hold a prefix, `subtable("A")` is referentially
//! stable: every call with the same name addresses the same entries, so a
//! write through one handle is visible through any later one.
//!
//! Reads never fail. [`LogTable::get`] returns the caller's default when the
//! key is absent or was stored under a different [`ValueKind`]; this is what
//! lets replay degrade gracefully when a recording predates a schema change.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;
use crate::value::{FromValue, LogEnum, Value, ValueKind};

/// Path of the root table.
pub const ROOT_PATH: &str = "/";

/// The root of a hierarchical typed key-value store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogTable {
    /// Timestamp of the cycle this table describes.
    #[serde(default)]
    timestamp: Duration,

    /// Every value, keyed by full path.
    #[serde(default)]
    entries: BTreeMap<String, Value>,

    /// Paths of every subtable ever created, each ending in `/`.
    #[serde(default)]
    tables: BTreeSet<String>,
}

impl LogTable {
    /// Create an empty table with a zero timestamp.
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp of the cycle this table describes.
    pub const fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Set the cycle timestamp.
    pub const fn set_timestamp(&mut self, timestamp: Duration) {
        self.timestamp = timestamp;
    }

    /// Store `value` under `key` in the root table, overwriting any previous
    /// value.
    pub fn put(&mut self, key: &str, value: impl Into<Value>) {
        self.put_at(ROOT_PATH, key, value.into());
    }

    /// Read `key` from the root table, falling back to `default`.
    pub fn get<T: FromValue>(&self, key: &str, default: T) -> T {
        self.get_at(ROOT_PATH, key, default)
    }

    /// Store an enumeration variant by name.
    pub fn put_enum<E: LogEnum>(&mut self, key: &str, value: E) {
        self.put(key, value.name());
    }

    /// Read an enumeration variant, falling back to `default`.
    ///
    /// Accepts the variant name or, for data written by other tools, its
    /// ordinal stored as an integer.
    pub fn get_enum<E: LogEnum>(&self, key: &str, default: E) -> E {
        self.get_enum_at(ROOT_PATH, key, default)
    }

    /// Return the mutable view of the child table `name`, creating it on
    /// first access.
    ///
    /// `name` may contain `/` to address a nested table directly.
    pub fn subtable(&mut self, name: &str) -> Subtable<'_> {
        let prefix = child_prefix(ROOT_PATH, name);
        self.register(&prefix);
        Subtable {
            table: self,
            prefix,
        }
    }

    /// Return a read-only view of the table at `path`.
    ///
    /// Does not create the table; reads through the view of a missing
    /// table return defaults.
    pub fn view(&self, path: &str) -> TableView<'_> {
        TableView {
            table: self,
            prefix: child_prefix(ROOT_PATH, path),
        }
    }

    /// Look up a value by its full path (for example `/Inputs/x`).
    pub fn value(&self, full_key: &str) -> Option<&Value> {
        self.entries.get(full_key)
    }

    /// Mutable access to a value by its full path, for in-place edits of
    /// sequence buffers.
    pub fn value_mut(&mut self, full_key: &str) -> Option<&mut Value> {
        self.entries.get_mut(full_key)
    }

    /// Remove a value by its full path. Subtables it lived in are kept.
    pub fn remove(&mut self, full_key: &str) -> Option<Value> {
        self.entries.remove(full_key)
    }

    /// Whether the root table holds `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.value_at(ROOT_PATH, key).is_some()
    }

    /// Iterate over every value in the tree, keyed by full path.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Iterate over the paths of every subtable created so far.
    pub fn table_paths(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(String::as_str)
    }

    /// Number of values in the whole tree.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tree holds no values.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy every value and subtable of `other` into this table.
    ///
    /// Existing keys are overwritten, keys only present here are kept. The
    /// timestamp is left untouched.
    pub fn merge_from(&mut self, other: &Self) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
        for path in &other.tables {
            self.tables.insert(path.clone());
        }
    }

    /// Deep-copy this table into an immutable [`Snapshot`].
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::from(self.clone())
    }

    // -----------------------------------------------------------------------
    // Prefix-addressed primitives shared by the views
    // -----------------------------------------------------------------------

    fn put_at(&mut self, prefix: &str, key: &str, value: Value) {
        let full = full_key(prefix, key);
        if let Some(parent) = parent_path(&full) {
            self.register(parent);
        }
        self.entries.insert(full, value);
    }

    fn value_at(&self, prefix: &str, key: &str) -> Option<&Value> {
        self.entries.get(&full_key(prefix, key))
    }

    fn get_at<T: FromValue>(&self, prefix: &str, key: &str, default: T) -> T {
        self.value_at(prefix, key)
            .and_then(T::from_value)
            .unwrap_or(default)
    }

    fn get_enum_at<E: LogEnum>(&self, prefix: &str, key: &str, default: E) -> E {
        match self.value_at(prefix, key) {
            Some(Value::String(name)) => E::from_name(name).unwrap_or(default),
            Some(Value::Integer(ordinal)) => usize::try_from(*ordinal)
                .ok()
                .and_then(E::from_ordinal)
                .unwrap_or(default),
            _ => default,
        }
    }

    fn get_enum_array_at<E: LogEnum>(&self, prefix: &str, key: &str, default: Vec<E>) -> Vec<E> {
        match self.value_at(prefix, key) {
            Some(Value::StringArray(names)) => names
                .iter()
                .map(|name| E::from_name(name))
                .collect::<Option<Vec<_>>>()
                .unwrap_or(default),
            _ => default,
        }
    }

    fn keys_at<'s>(&'s self, prefix: &'s str) -> impl Iterator<Item = &'s str> + 's {
        self.entries
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .map(|(key, _)| key.as_str())
            .take_while(move |key| key.starts_with(prefix))
            .filter_map(move |key| key.strip_prefix(prefix))
            .filter(|rest| !rest.contains('/'))
    }

    fn children_at<'s>(&'s self, prefix: &'s str) -> impl Iterator<Item = &'s str> + 's {
        self.tables
            .range::<str, _>((Bound::Excluded(prefix), Bound::Unbounded))
            .map(String::as_str)
            .take_while(move |path| path.starts_with(prefix))
            .filter_map(move |path| path.strip_prefix(prefix))
            .filter_map(|rest| rest.strip_suffix('/'))
            .filter(|name| !name.is_empty() && !name.contains('/'))
    }

    /// Record `path` and each of its ancestors (except the root) as tables.
    fn register(&mut self, path: &str) {
        for (idx, _) in path.match_indices('/') {
            if idx == 0 {
                continue;
            }
            if let Some(ancestor) = path.get(..=idx) {
                if !self.tables.contains(ancestor) {
                    self.tables.insert(ancestor.to_owned());
                }
            }
        }
    }
}

/// Mutable view of one table in a [`LogTable`] tree.
#[derive(Debug)]
pub struct Subtable<'a> {
    table: &'a mut LogTable,
    prefix: String,
}

impl Subtable<'_> {
    /// Full path of this table, ending in `/`.
    pub fn path(&self) -> &str {
        &self.prefix
    }

    /// Root timestamp of the tree this table belongs to.
    pub const fn timestamp(&self) -> Duration {
        self.table.timestamp
    }

    /// Store `value` under `key`, overwriting any previous value.
    pub fn put(&mut self, key: &str, value: impl Into<Value>) {
        self.table.put_at(&self.prefix, key, value.into());
    }

    /// Read `key`, falling back to `default` when absent or mistyped.
    pub fn get<T: FromValue>(&self, key: &str, default: T) -> T {
        self.table.get_at(&self.prefix, key, default)
    }

    /// Store an enumeration variant by name.
    pub fn put_enum<E: LogEnum>(&mut self, key: &str, value: E) {
        self.put(key, value.name());
    }

    /// Read an enumeration variant, falling back to `default`.
    pub fn get_enum<E: LogEnum>(&self, key: &str, default: E) -> E {
        self.table.get_enum_at(&self.prefix, key, default)
    }

    /// Store a sequence of enumeration variants by name.
    pub fn put_enum_array<E: LogEnum>(&mut self, key: &str, values: &[E]) {
        let names: Vec<String> = values.iter().map(|v| v.name().to_owned()).collect();
        self.put(key, names);
    }

    /// Read a sequence of enumeration variants. Any unknown name makes the
    /// whole read fall back to `default`.
    pub fn get_enum_array<E: LogEnum>(&self, key: &str, default: Vec<E>) -> Vec<E> {
        self.table.get_enum_array_at(&self.prefix, key, default)
    }

    /// Return the child table `name`, creating it on first access.
    pub fn subtable(&mut self, name: &str) -> Subtable<'_> {
        let prefix = child_prefix(&self.prefix, name);
        self.table.register(&prefix);
        Subtable {
            table: &mut *self.table,
            prefix,
        }
    }

    /// Whether this table holds `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.table.value_at(&self.prefix, key).is_some()
    }

    /// Tag of the value stored under `key`, if any.
    pub fn kind_of(&self, key: &str) -> Option<ValueKind> {
        self.table.value_at(&self.prefix, key).map(Value::kind)
    }

    /// Mutable access to the value under `key`.
    pub fn value_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.table.entries.get_mut(&full_key(&self.prefix, key))
    }

    /// Keys stored directly in this table.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.table.keys_at(&self.prefix)
    }

    /// Names of the direct child tables.
    pub fn subtable_names(&self) -> impl Iterator<Item = &str> {
        self.table.children_at(&self.prefix)
    }

    /// Read-only view of this table.
    pub fn as_view(&self) -> TableView<'_> {
        TableView {
            table: &*self.table,
            prefix: self.prefix.clone(),
        }
    }
}

/// Read-only view of one table in a [`LogTable`] tree.
#[derive(Debug, Clone)]
pub struct TableView<'a> {
    table: &'a LogTable,
    prefix: String,
}

impl<'a> TableView<'a> {
    /// Full path of this table, ending in `/`.
    pub fn path(&self) -> &str {
        &self.prefix
    }

    /// Root timestamp of the tree this table belongs to.
    pub const fn timestamp(&self) -> Duration {
        self.table.timestamp
    }

    /// Read `key`, falling back to `default` when absent or mistyped.
    pub fn get<T: FromValue>(&self, key: &str, default: T) -> T {
        self.table.get_at(&self.prefix, key, default)
    }

    /// Read an enumeration variant, falling back to `default`.
    pub fn get_enum<E: LogEnum>(&self, key: &str, default: E) -> E {
        self.table.get_enum_at(&self.prefix, key, default)
    }

    /// Read a sequence of enumeration variants.
    pub fn get_enum_array<E: LogEnum>(&self, key: &str, default: Vec<E>) -> Vec<E> {
        self.table.get_enum_array_at(&self.prefix, key, default)
    }

    /// View of the child table `name`.
    pub fn subtable(&self, name: &str) -> TableView<'a> {
        TableView {
            table: self.table,
            prefix: child_prefix(&self.prefix, name),
        }
    }

    /// Whether this table holds `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.table.value_at(&self.prefix, key).is_some()
    }

    /// Tag of the value stored under `key`, if any.
    pub fn kind_of(&self, key: &str) -> Option<ValueKind> {
        self.table.value_at(&self.prefix, key).map(Value::kind)
    }

    /// Keys stored directly in this table.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.table.keys_at(&self.prefix)
    }

    /// Names of the direct child tables.
    pub fn subtable_names(&self) -> impl Iterator<Item = &str> {
        self.table.children_at(&self.prefix)
    }
}

/// Path prefix of the child `name` under `prefix`. Empty segments are
/// skipped, so `"A//B/"` and `"A/B"` address the same table.
fn child_prefix(prefix: &str, name: &str) -> String {
    let mut path = prefix.to_owned();
    for segment in name.split('/').filter(|s| !s.is_empty()) {
        path.push_str(segment);
        path.push('/');
    }
    path
}

fn full_key(prefix: &str, key: &str) -> String {
    format!("{prefix}{}", key.trim_start_matches('/'))
}

/// Table path containing `full_key`, or `None` for root-level keys.
fn parent_path(full_key: &str) -> Option<&str> {
    let idx = full_key.rfind('/')?;
    if idx == 0 {
        return None;
    }
    full_key.get(..=idx)
}
