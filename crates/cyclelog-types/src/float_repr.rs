//! Serde representation of float payloads that survives JSON.
//!
//! JSON has no NaN or infinities; `serde_json` silently writes them as
//! `null`, which then fails to read back. Non-finite floats are written as
//! the strings `"NaN"`, `"inf"` and `"-inf"` instead, and read back from
//! them. Finite values keep their plain number form.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

const NAN: &str = "NaN";
const INFINITY: &str = "inf";
const NEG_INFINITY: &str = "-inf";

/// The float payload types of a [`Value`](crate::Value).
pub(crate) trait LogFloat: Copy {
    const NAN: Self;
    const INFINITY: Self;
    const NEG_INFINITY: Self;

    /// String form of a non-finite value, `None` for finite ones.
    fn non_finite_label(self) -> Option<&'static str>;

    /// Serialize a finite value as a number.
    fn serialize_number<S: Serializer>(self, serializer: S) -> Result<S::Ok, S::Error>;

    /// Convert a parsed number into `Self`.
    fn from_f64(value: f64) -> Self;
}

fn label(value: f64) -> Option<&'static str> {
    if value.is_nan() {
        Some(NAN)
    } else if value.is_infinite() {
        Some(if value.is_sign_negative() { NEG_INFINITY } else { INFINITY })
    } else {
        None
    }
}

impl LogFloat for f64 {
    const NAN: Self = f64::NAN;
    const INFINITY: Self = f64::INFINITY;
    const NEG_INFINITY: Self = f64::NEG_INFINITY;

    fn non_finite_label(self) -> Option<&'static str> {
        label(self)
    }

    fn serialize_number<S: Serializer>(self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self)
    }

    fn from_f64(value: f64) -> Self {
        value
    }
}

impl LogFloat for f32 {
    const NAN: Self = f32::NAN;
    const INFINITY: Self = f32::INFINITY;
    const NEG_INFINITY: Self = f32::NEG_INFINITY;

    fn non_finite_label(self) -> Option<&'static str> {
        label(f64::from(self))
    }

    fn serialize_number<S: Serializer>(self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f32(self)
    }

    // Same narrowing serde applies when it reads an f32 from JSON.
    #[allow(clippy::cast_possible_truncation)]
    fn from_f64(value: f64) -> Self {
        value as Self
    }
}

/// One float in its JSON-safe form.
struct Repr<F>(F);

impl<F: LogFloat> Serialize for Repr<F> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.non_finite_label() {
            Some(text) => serializer.serialize_str(text),
            None => self.0.serialize_number(serializer),
        }
    }
}

impl<'de, F: LogFloat> Deserialize<'de> for Repr<F> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer
            .deserialize_any(FloatVisitor(PhantomData))
            .map(Repr)
    }
}

struct FloatVisitor<F>(PhantomData<F>);

impl<F: LogFloat> Visitor<'_> for FloatVisitor<F> {
    type Value = F;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a number or one of \"NaN\", \"inf\", \"-inf\"")
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<F, E> {
        Ok(F::from_f64(value))
    }

    #[allow(clippy::cast_precision_loss)]
    fn visit_i64<E: de::Error>(self, value: i64) -> Result<F, E> {
        Ok(F::from_f64(value as f64))
    }

    #[allow(clippy::cast_precision_loss)]
    fn visit_u64<E: de::Error>(self, value: u64) -> Result<F, E> {
        Ok(F::from_f64(value as f64))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<F, E> {
        match value {
            NAN => Ok(F::NAN),
            INFINITY => Ok(F::INFINITY),
            NEG_INFINITY => Ok(F::NEG_INFINITY),
            other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
        }
    }
}

/// `#[serde(with)]` adapter for a single float.
pub(crate) mod scalar {
    use super::{Deserialize, Deserializer, LogFloat, Repr, Serialize, Serializer};

    pub(crate) fn serialize<F: LogFloat, S: Serializer>(
        value: &F,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        Repr(*value).serialize(serializer)
    }

    pub(crate) fn deserialize<'de, F: LogFloat, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<F, D::Error> {
        Repr::<F>::deserialize(deserializer).map(|repr| repr.0)
    }
}

/// `#[serde(with)]` adapter for a float sequence.
pub(crate) mod array {
    use super::{Deserialize, Deserializer, LogFloat, Repr, Serializer};

    #[allow(clippy::ptr_arg)]
    pub(crate) fn serialize<F: LogFloat, S: Serializer>(
        values: &Vec<F>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|value| Repr(*value)))
    }

    pub(crate) fn deserialize<'de, F: LogFloat, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<F>, D::Error> {
        Vec::<Repr<F>>::deserialize(deserializer)
            .map(|values| values.into_iter().map(|repr| repr.0).collect())
    }
}
