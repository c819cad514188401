//! The read/write contract between user components and the log table.
//!
//! A component that feeds the logger implements [`Loggable`]: while
//! recording the orchestrator calls [`Loggable::write_to`], while replaying
//! it calls [`Loggable::read_from`] so the component's fields are restored
//! from the recording. Either way the control code that follows sees the
//! same values.
//!
//! Most components are plain structs whose fields map one-to-one onto
//! table keys. For those, a [`FieldSet`] lists the fields once and derives
//! both directions from that list, and [`Logged`] pairs a value with its
//! field set.
//!
//! ```
//! use cyclelog_core::inputs::{FieldSet, Logged, Loggable};
//! use cyclelog_types::LogTable;
//!
//! #[derive(Default)]
//! struct Encoder {
//!     position: f64,
//!     connected: bool,
//! }
//!
//! let fields = FieldSet::new()
//!     .field("Position", |e: &Encoder| &e.position, |e| &mut e.position)
//!     .field("Connected", |e: &Encoder| &e.connected, |e| &mut e.connected);
//!
//! let mut table = LogTable::new();
//! let live = Logged::new(Encoder { position: 1.5, connected: true }, &fields);
//! live.write_to(&mut table.subtable("Encoder"));
//!
//! let mut replayed = Logged::new(Encoder::default(), &fields);
//! replayed.read_from(&mut table.subtable("Encoder"));
//! assert!(replayed.connected);
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};

use cyclelog_types::{FromValue, LogEnum, Subtable, Value};

/// A component whose state can be written to and restored from a table.
pub trait Loggable {
    /// Copy the component's current state into `table`.
    fn write_to(&self, table: &mut Subtable<'_>);

    /// Overwrite the component's state with the values stored in `table`.
    ///
    /// Keys that are missing or stored under another type leave the field
    /// at its current value.
    fn read_from(&mut self, table: &mut Subtable<'_>);
}

type WriteFn<S> = Box<dyn Fn(&S, &mut Subtable<'_>) + Send + Sync>;
type ReadFn<S> = Box<dyn Fn(&mut S, &mut Subtable<'_>) + Send + Sync>;

struct Field<S> {
    key: &'static str,
    write: WriteFn<S>,
    read: ReadFn<S>,
}

/// Ordered list of `(key, field)` bindings for a struct `S`.
///
/// Writing visits the fields in declaration order; reading restores each
/// one, using the field's current value as the default.
pub struct FieldSet<S> {
    fields: Vec<Field<S>>,
}

impl<S: 'static> FieldSet<S> {
    /// Create an empty field set.
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Bind `key` to a field of `S` that maps directly onto a [`Value`].
    #[must_use]
    pub fn field<T>(mut self, key: &'static str, get: fn(&S) -> &T, get_mut: fn(&mut S) -> &mut T) -> Self
    where
        T: FromValue + Into<Value> + Clone + 'static,
    {
        self.fields.push(Field {
            key,
            write: Box::new(move |state, table| table.put(key, get(state).clone())),
            read: Box::new(move |state, table| {
                let slot = get_mut(state);
                *slot = table.get(key, slot.clone());
            }),
        });
        self
    }

    /// Bind `key` to an enumeration field, stored by variant name.
    #[must_use]
    pub fn enum_field<E: LogEnum>(
        mut self,
        key: &'static str,
        get: fn(&S) -> &E,
        get_mut: fn(&mut S) -> &mut E,
    ) -> Self {
        self.fields.push(Field {
            key,
            write: Box::new(move |state, table| table.put_enum(key, *get(state))),
            read: Box::new(move |state, table| {
                let slot = get_mut(state);
                *slot = table.get_enum(key, *slot);
            }),
        });
        self
    }

    /// Keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|field| field.key)
    }

    /// Number of bound fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no fields are bound.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Write every field of `state` into `table`.
    pub fn write(&self, state: &S, table: &mut Subtable<'_>) {
        for field in &self.fields {
            (field.write)(state, table);
        }
    }

    /// Restore every field of `state` from `table`.
    pub fn read(&self, state: &mut S, table: &mut Subtable<'_>) {
        for field in &self.fields {
            (field.read)(state, table);
        }
    }
}

impl<S: 'static> Default for FieldSet<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for FieldSet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.fields.iter().map(|field| field.key))
            .finish()
    }
}

/// A value paired with the [`FieldSet`] describing it.
///
/// Dereferences to the inner value, so control code reads fields directly.
#[derive(Debug)]
pub struct Logged<'f, S> {
    value: S,
    fields: &'f FieldSet<S>,
}

impl<'f, S: 'static> Logged<'f, S> {
    /// Pair `value` with `fields`.
    pub const fn new(value: S, fields: &'f FieldSet<S>) -> Self {
        Self { value, fields }
    }

    /// Give back the inner value.
    pub fn into_inner(self) -> S {
        self.value
    }
}

impl<S: 'static> Loggable for Logged<'_, S> {
    fn write_to(&self, table: &mut Subtable<'_>) {
        self.fields.write(&self.value, table);
    }

    fn read_from(&mut self, table: &mut Subtable<'_>) {
        self.fields.read(&mut self.value, table);
    }
}

impl<S> Deref for Logged<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.value
    }
}

impl<S> DerefMut for Logged<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.value
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use cyclelog_types::{LogTable, ValueKind};

    use super::*;

    cyclelog_types::log_enum! {
        enum Gear {
            Low,
            High,
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Drive {
        left_volts: f64,
        right_volts: f64,
        ticks: i64,
        faults: Vec<String>,
        gear: Gear,
    }

    impl Default for Drive {
        fn default() -> Self {
            Self {
                left_volts: 0.0,
                right_volts: 0.0,
                ticks: 0,
                faults: Vec::new(),
                gear: Gear::Low,
            }
        }
    }

    fn drive_fields() -> FieldSet<Drive> {
        FieldSet::new()
            .field("LeftVolts", |d: &Drive| &d.left_volts, |d| &mut d.left_volts)
            .field("RightVolts", |d: &Drive| &d.right_volts, |d| &mut d.right_volts)
            .field("Ticks", |d: &Drive| &d.ticks, |d| &mut d.ticks)
            .field("Faults", |d: &Drive| &d.faults, |d| &mut d.faults)
            .enum_field("Gear", |d: &Drive| &d.gear, |d| &mut d.gear)
    }

    #[test]
    fn write_then_read_restores_every_field() {
        let fields = drive_fields();
        let original = Drive {
            left_volts: 11.5,
            right_volts: -3.25,
            ticks: 1 << 33,
            faults: vec![String::from("brownout")],
            gear: Gear::High,
        };

        let mut table = LogTable::new();
        Logged::new(original.clone(), &fields).write_to(&mut table.subtable("Drive"));

        let mut restored = Logged::new(Drive::default(), &fields);
        restored.read_from(&mut table.subtable("Drive"));
        assert_eq!(restored.into_inner(), original);
    }

    #[test]
    fn missing_or_mistyped_keys_keep_current_values() {
        let fields = drive_fields();
        let mut table = LogTable::new();
        {
            let mut sub = table.subtable("Drive");
            sub.put("LeftVolts", "not a number");
            sub.put("Gear", "Reverse");
        }

        let mut state = Logged::new(
            Drive {
                left_volts: 4.0,
                gear: Gear::High,
                ..Drive::default()
            },
            &fields,
        );
        state.read_from(&mut table.subtable("Drive"));
        assert_eq!(state.left_volts, 4.0);
        assert_eq!(state.gear, Gear::High);
        assert_eq!(state.ticks, 0);
    }

    #[test]
    fn keys_follow_declaration_order() {
        let fields = drive_fields();
        let keys: Vec<_> = fields.keys().collect();
        assert_eq!(keys, vec!["LeftVolts", "RightVolts", "Ticks", "Faults", "Gear"]);
        assert_eq!(fields.len(), 5);

        let mut table = LogTable::new();
        Logged::new(Drive::default(), &fields).write_to(&mut table.subtable("Drive"));
        let view = table.view("Drive");
        assert_eq!(view.kind_of("Ticks"), Some(ValueKind::Long));
        assert_eq!(view.kind_of("Gear"), Some(ValueKind::String));
    }

    #[test]
    fn logged_derefs_to_the_inner_value() {
        let fields = drive_fields();
        let mut drive = Logged::new(Drive::default(), &fields);
        drive.ticks = 7;
        assert_eq!(drive.ticks, 7);
    }
}
