//! Typed cell values.
//!
//! A cell either holds a value of one of the supported column types or is missing. Equality and
//! hashing are structural (floats compare by bit pattern, two missing cells are equal) so cells
//! can be used as hash map keys. SQL-style "missing never matches" semantics are the job of the
//! join tuple extraction, which refuses to build a tuple from a missing cell.

use std::fmt;
use std::hash::{Hash, Hasher};

use arrow::datatypes::DataType;

/// A single nullable cell value.
#[derive(Debug, Clone, Default)]
pub enum DataCell {
    #[default]
    Missing,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

macro_rules! impl_from_for_cell {
    ($variant:ident, $($t:ty),*) => {
        $(
            impl From<$t> for DataCell {
                fn from(v: $t) -> Self {
                    DataCell::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_for_cell!(Boolean, bool);
impl_from_for_cell!(Int32, i8, i16, i32, u8, u16);
impl_from_for_cell!(Int64, i64, u32);
impl_from_for_cell!(Float64, f32, f64);
impl_from_for_cell!(Utf8, String);

impl From<&str> for DataCell {
    fn from(v: &str) -> Self {
        DataCell::Utf8(v.to_string())
    }
}

impl<T: Into<DataCell>> From<Option<T>> for DataCell {
    fn from(v: Option<T>) -> Self {
        v.map_or(DataCell::Missing, Into::into)
    }
}

impl DataCell {
    pub fn is_missing(&self) -> bool {
        matches!(self, DataCell::Missing)
    }

    /// The Arrow type of the value, or `None` for a missing cell.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            DataCell::Missing => None,
            DataCell::Boolean(_) => Some(DataType::Boolean),
            DataCell::Int32(_) => Some(DataType::Int32),
            DataCell::Int64(_) => Some(DataType::Int64),
            DataCell::Float64(_) => Some(DataType::Float64),
            DataCell::Utf8(_) => Some(DataType::Utf8),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataCell::Utf8(s) => Some(s),
            _ => None,
        }
    }

    /// Value of an integer cell widened to `i64`. Floats have no integral view.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DataCell::Int32(v) => Some(i64::from(*v)),
            DataCell::Int64(v) => Some(*v),
            _ => None,
        }
    }
}

impl PartialEq for DataCell {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DataCell::Missing, DataCell::Missing) => true,
            (DataCell::Boolean(a), DataCell::Boolean(b)) => a == b,
            (DataCell::Int32(a), DataCell::Int32(b)) => a == b,
            (DataCell::Int64(a), DataCell::Int64(b)) => a == b,
            (DataCell::Float64(a), DataCell::Float64(b)) => a.to_bits() == b.to_bits(),
            (DataCell::Utf8(a), DataCell::Utf8(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for DataCell {}

impl Hash for DataCell {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            DataCell::Missing => {}
            DataCell::Boolean(v) => v.hash(state),
            DataCell::Int32(v) => v.hash(state),
            DataCell::Int64(v) => v.hash(state),
            DataCell::Float64(v) => v.to_bits().hash(state),
            DataCell::Utf8(v) => v.hash(state),
        }
    }
}

impl fmt::Display for DataCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataCell::Missing => write!(f, "?"),
            DataCell::Boolean(v) => write!(f, "{v}"),
            DataCell::Int32(v) => write!(f, "{v}"),
            DataCell::Int64(v) => write!(f, "{v}"),
            DataCell::Float64(v) => write!(f, "{v}"),
            DataCell::Utf8(v) => write!(f, "{v}"),
        }
    }
}
