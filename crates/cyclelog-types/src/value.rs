//! Typed values stored in a [`LogTable`].
//!
//! [`Value`] is a closed tagged union: every entry in a table carries its
//! [`ValueKind`] so reads can check the tag before converting. Conversion
//! into a value goes through `From`/`Into`; conversion back out goes through
//! [`FromValue`], which returns `None` on a tag mismatch. The table layers
//! its default-fallback semantics on top of that single check.
//!
//! Enumerations are stored by variant name (see [`LogEnum`]), so a recording
//! survives reordering of variants in later builds.
//!
//! Serialized floats that are not finite are written as `"NaN"`, `"inf"` or
//! `"-inf"`, so every value survives a JSON round trip.
//!
//! [`LogTable`]: crate::LogTable

use serde::{Deserialize, Serialize};

/// A single typed value in a log table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Raw byte sequence (serialized device state, packed structs).
    Raw(Vec<u8>),
    /// Boolean flag.
    Boolean(bool),
    /// 32-bit signed integer.
    Integer(i32),
    /// 64-bit signed integer.
    Long(i64),
    /// 32-bit float.
    Float(#[serde(with = "crate::float_repr::scalar")] f32),
    /// 64-bit float.
    Double(#[serde(with = "crate::float_repr::scalar")] f64),
    /// UTF-8 string.
    String(String),
    /// Homogeneous sequence of booleans.
    BooleanArray(Vec<bool>),
    /// Homogeneous sequence of 32-bit integers.
    IntegerArray(Vec<i32>),
    /// Homogeneous sequence of 64-bit integers.
    LongArray(Vec<i64>),
    /// Homogeneous sequence of 32-bit floats.
    FloatArray(#[serde(with = "crate::float_repr::array")] Vec<f32>),
    /// Homogeneous sequence of 64-bit floats.
    DoubleArray(#[serde(with = "crate::float_repr::array")] Vec<f64>),
    /// Homogeneous sequence of strings.
    StringArray(Vec<String>),
}

/// The tag of a [`Value`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// [`Value::Raw`].
    Raw,
    /// [`Value::Boolean`].
    Boolean,
    /// [`Value::Integer`].
    Integer,
    /// [`Value::Long`].
    Long,
    /// [`Value::Float`].
    Float,
    /// [`Value::Double`].
    Double,
    /// [`Value::String`].
    String,
    /// [`Value::BooleanArray`].
    BooleanArray,
    /// [`Value::IntegerArray`].
    IntegerArray,
    /// [`Value::LongArray`].
    LongArray,
    /// [`Value::FloatArray`].
    FloatArray,
    /// [`Value::DoubleArray`].
    DoubleArray,
    /// [`Value::StringArray`].
    StringArray,
}

impl Value {
    /// Return the tag of this value.
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Raw(_) => ValueKind::Raw,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Integer(_) => ValueKind::Integer,
            Self::Long(_) => ValueKind::Long,
            Self::Float(_) => ValueKind::Float,
            Self::Double(_) => ValueKind::Double,
            Self::String(_) => ValueKind::String,
            Self::BooleanArray(_) => ValueKind::BooleanArray,
            Self::IntegerArray(_) => ValueKind::IntegerArray,
            Self::LongArray(_) => ValueKind::LongArray,
            Self::FloatArray(_) => ValueKind::FloatArray,
            Self::DoubleArray(_) => ValueKind::DoubleArray,
            Self::StringArray(_) => ValueKind::StringArray,
        }
    }

    /// Whether this value is one of the sequence variants.
    pub const fn is_sequence(&self) -> bool {
        matches!(
            self,
            Self::Raw(_)
                | Self::BooleanArray(_)
                | Self::IntegerArray(_)
                | Self::LongArray(_)
                | Self::FloatArray(_)
                | Self::DoubleArray(_)
                | Self::StringArray(_)
        )
    }
}

/// Conversion from a stored [`Value`] back into a Rust type.
///
/// Returns `None` when the value's tag does not match `Self`. Implemented
/// for every payload type of [`Value`].
pub trait FromValue: Sized {
    /// The tag this type is stored under.
    const KIND: ValueKind;

    /// Convert `value` into `Self` if its tag matches [`Self::KIND`].
    fn from_value(value: &Value) -> Option<Self>;
}

/// Implements `From<$ty> for Value` and `FromValue for $ty` for one variant.
macro_rules! value_type {
    (copy $ty:ty => $variant:ident) => {
        impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Self::$variant(value)
            }
        }

        impl FromValue for $ty {
            const KIND: ValueKind = ValueKind::$variant;

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(inner) => Some(*inner),
                    _ => None,
                }
            }
        }
    };
    (owned $ty:ty => $variant:ident) => {
        impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Self::$variant(value)
            }
        }

        impl FromValue for $ty {
            const KIND: ValueKind = ValueKind::$variant;

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(inner) => Some(inner.clone()),
                    _ => None,
                }
            }
        }
    };
}

value_type!(copy bool => Boolean);
value_type!(copy i32 => Integer);
value_type!(copy i64 => Long);
value_type!(copy f32 => Float);
value_type!(copy f64 => Double);
value_type!(owned String => String);
value_type!(owned Vec<u8> => Raw);
value_type!(owned Vec<bool> => BooleanArray);
value_type!(owned Vec<i32> => IntegerArray);
value_type!(owned Vec<i64> => LongArray);
value_type!(owned Vec<f32> => FloatArray);
value_type!(owned Vec<f64> => DoubleArray);
value_type!(owned Vec<String> => StringArray);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Self::Raw(value.to_vec())
    }
}

impl From<&[f64]> for Value {
    fn from(value: &[f64]) -> Self {
        Self::DoubleArray(value.to_vec())
    }
}

impl From<&[&str]> for Value {
    fn from(value: &[&str]) -> Self {
        Self::StringArray(value.iter().map(|s| (*s).to_owned()).collect())
    }
}

/// An enumeration that can be stored in a log table by variant name.
///
/// Use the [`log_enum!`](crate::log_enum) macro to declare one; it fills in
/// [`VARIANTS`](LogEnum::VARIANTS) and [`name`](LogEnum::name).
pub trait LogEnum: Sized + Copy + PartialEq + 'static {
    /// Every variant, in declaration order. A variant's index is its ordinal.
    const VARIANTS: &'static [Self];

    /// The variant's name as stored in the table.
    fn name(self) -> &'static str;

    /// Declaration-order index of this variant.
    fn ordinal(self) -> usize {
        Self::VARIANTS
            .iter()
            .position(|variant| *variant == self)
            .unwrap_or(0)
    }

    /// Look up a variant by its stored name.
    fn from_name(name: &str) -> Option<Self> {
        Self::VARIANTS
            .iter()
            .copied()
            .find(|variant| variant.name() == name)
    }

    /// Look up a variant by its ordinal.
    fn from_ordinal(ordinal: usize) -> Option<Self> {
        Self::VARIANTS.get(ordinal).copied()
    }
}

/// Declares a fieldless enum that implements [`LogEnum`].
///
/// ```
/// cyclelog_types::log_enum! {
///     /// Drive mode.
///     pub enum Mode {
///         /// Autonomous.
///         Auto,
///         /// Driver controlled.
///         Teleop,
///     }
/// }
///
/// use cyclelog_types::LogEnum;
/// assert_eq!(Mode::Teleop.name(), "Teleop");
/// assert_eq!(Mode::from_ordinal(0), Some(Mode::Auto));
/// ```
#[macro_export]
macro_rules! log_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $(
                $(#[$vmeta])*
                $variant
            ),+
        }

        impl $crate::LogEnum for $name {
            const VARIANTS: &'static [Self] = &[$(Self::$variant),+];

            fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant)),+
                }
            }
        }
    };
}
