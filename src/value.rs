//! Parameter and column value types.
//!
//! [`Value`] is the canonical representation of everything that can be bound
//! to a statement parameter or read from a result column. The combinatorial
//! list of native primitive types lives at the API edge: `From` impls fold
//! primitives into the five canonical variants on the way in, and
//! [`FromValue`] projects them back out on the way out. The core bind and
//! extract switches stay exhaustive over five variants only.

// Narrowing projections are lossy by contract: integer reads truncate
// (two's complement) and real reads lose precision.
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// A value that can be bound to a prepared statement parameter or read from
/// a result column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Binary blob.
    ///
    /// A zero-length blob reads back from the engine as [`Value::Null`];
    /// the two are indistinguishable on round-trip.
    Blob(Vec<u8>),
    /// SQL NULL.
    Null,
}

impl Value {
    /// Returns the integer payload, or `None` for other variants.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as a float. Integers widen; other variants are
    /// `None`.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns the text payload, or `None` for other variants.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the blob payload, or `None` for other variants.
    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(v) => Some(v),
            _ => None,
        }
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

// ── Conversions in: native primitives -> canonical variants ─────────────

impl From<bool> for Value {
    /// `true` binds as 1, `false` as 0.
    fn from(v: bool) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Real(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Blob(v.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl From<DateTime<Utc>> for Value {
    /// Dates bind as RFC 3339 text.
    fn from(v: DateTime<Utc>) -> Self {
        Self::Text(v.to_rfc3339())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    /// `None` binds as NULL.
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

// ── Conversions out: canonical variants -> native primitives ────────────

/// Extraction of a native value from a canonical [`Value`].
///
/// Every projection is computed on demand from the canonical variant.
/// `None` means the value does not have the requested shape; NULL columns
/// never reach these impls (the statement accessors report them as absent
/// first).
pub trait FromValue: Sized {
    /// Projects `value` into `Self`, or `None` if the shapes don't match.
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().map(|v| v as Self)
    }
}

impl FromValue for i16 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().map(|v| v as Self)
    }
}

impl FromValue for i8 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().map(|v| v as Self)
    }
}

impl FromValue for u8 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().map(|v| v as Self)
    }
}

impl FromValue for u16 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().map(|v| v as Self)
    }
}

impl FromValue for u32 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().map(|v| v as Self)
    }
}

impl FromValue for bool {
    /// Any non-zero integer reads as `true`.
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().map(|v| v != 0)
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64().map(|v| v as Self)
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(ToOwned::to_owned)
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_blob().map(<[u8]>::to_vec)
    }
}

impl FromValue for DateTime<Utc> {
    /// Reads RFC 3339 or `"%Y-%m-%d %H:%M:%S"` text, or a Unix timestamp
    /// stored as an integer.
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) => parse_datetime(s),
            Value::Integer(secs) => Utc.timestamp_opt(*secs, 0).single(),
            _ => None,
        }
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Convenience macro for building parameter lists.
///
/// Usage: `params![1_i64, blob.as_slice(), "text"]`
#[macro_export]
macro_rules! params {
    ($($val:expr),* $(,)?) => {
        &[$($crate::Value::from($val)),*][..]
    };
}

/// Convenience macro for building named parameter lists. Names are given
/// without the marker character.
///
/// Usage: `named_params! { "id" => 1_i64, "name" => "x" }`
#[macro_export]
macro_rules! named_params {
    ($($name:expr => $val:expr),* $(,)?) => {
        &[$(($name, $crate::Value::from($val))),*][..]
    };
}
