//! Scalar values and the generic [`Row`] type.
//!
//! Every table in the record store shares one row representation: an
//! ordered map from column name to [`Value`]. The declared column type is
//! applied when values cross the SQLite boundary in either direction.

use std::collections::BTreeMap;
use std::fmt;

use rusqlite::types::{Null, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::schema::ColumnType;

/// A single row: column name → value.
pub type Row = BTreeMap<String, Value>;

/// A scalar cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Null,
}

impl Value {
    /// Whether the value can be stored in a column of type `ty`.
    ///
    /// `Null` fits everywhere and integers are accepted by real columns.
    pub fn fits(&self, ty: ColumnType) -> bool {
        matches!(
            (self, ty),
            (Self::Null, _)
                | (Self::Integer(_), ColumnType::Integer | ColumnType::Real)
                | (Self::Real(_), ColumnType::Real)
                | (Self::Text(_), ColumnType::Text)
                | (Self::Boolean(_), ColumnType::Boolean)
        )
    }

    /// Convert a raw SQLite value back into a typed value for column type `ty`.
    pub(crate) fn from_sql(value: ValueRef<'_>, ty: ColumnType) -> Self {
        match (value, ty) {
            (ValueRef::Null, _) => Self::Null,
            (ValueRef::Integer(i), ColumnType::Boolean) => Self::Boolean(i != 0),
            (ValueRef::Integer(i), ColumnType::Real) => Self::Real(i as f64),
            (ValueRef::Integer(i), _) => Self::Integer(i),
            (ValueRef::Real(f), _) => Self::Real(f),
            (ValueRef::Text(bytes) | ValueRef::Blob(bytes), _) => {
                Self::Text(String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            Self::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Null => write!(f, "NULL"),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Boolean(b) => ToSqlOutput::from(*b),
            Self::Integer(i) => ToSqlOutput::from(*i),
            Self::Real(r) => ToSqlOutput::from(*r),
            Self::Text(s) => ToSqlOutput::from(s.as_str()),
            Self::Null => ToSqlOutput::from(Null),
        })
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Self::Real(r)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

/// Build a [`Row`] from `(column, value)` pairs.
///
/// ```
/// use saga_store::{row, Value};
/// let r = row([("name", Value::from("axe")), ("count", Value::from(2))]);
/// assert_eq!(r["count"], Value::Integer(2));
/// ```
pub fn row<K, I>(pairs: I) -> Row
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Value)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Render the key columns of a row for error messages, e.g. `(character="bob", item="axe")`.
pub(crate) fn describe_key<'a>(row: &Row, columns: impl IntoIterator<Item = &'a String>) -> String {
    let parts: Vec<String> = columns
        .into_iter()
        .map(|c| match row.get(c) {
            Some(v) => format!("{c}={v}"),
            None => format!("{c}=?"),
        })
        .collect();
    format!("({})", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_respects_column_types() {
        assert!(Value::Integer(1).fits(ColumnType::Real));
        assert!(Value::Null.fits(ColumnType::Text));
        assert!(!Value::Text("x".into()).fits(ColumnType::Integer));
        assert!(!Value::Real(1.5).fits(ColumnType::Integer));
    }

    #[test]
    fn boolean_columns_read_back_as_booleans() {
        assert_eq!(
            Value::from_sql(ValueRef::Integer(1), ColumnType::Boolean),
            Value::Boolean(true)
        );
        assert_eq!(
            Value::from_sql(ValueRef::Integer(3), ColumnType::Real),
            Value::Real(3.0)
        );
    }

    #[test]
    fn json_shape_is_plain_scalars() {
        let r = row([
            ("name", Value::from("axe")),
            ("alive", Value::from(true)),
            ("count", Value::from(3)),
        ]);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json, serde_json::json!({"name": "axe", "alive": true, "count": 3}));

        let back: Row = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }
}
