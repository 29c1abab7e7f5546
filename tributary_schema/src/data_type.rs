use std::fmt::Display;

use arrow_schema::DataType as ArrowDataType;
use serde::{Serialize, Serializer};

/// Column types supported by the row schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Utf8,
    Float64,
    Int64,
    Boolean,
}

/// A single value of a flattened row.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Utf8(String),
    Float64(f64),
    Int64(i64),
    Boolean(bool),
}

impl ColumnType {
    pub fn arrow_data_type(&self) -> ArrowDataType {
        match self {
            Self::Utf8 => ArrowDataType::Utf8,
            Self::Float64 => ArrowDataType::Float64,
            Self::Int64 => ArrowDataType::Int64,
            Self::Boolean => ArrowDataType::Boolean,
        }
    }

    /// The name used by the catalog, e.g. `string` or `double`.
    pub fn catalog_name(&self) -> &'static str {
        match self {
            Self::Utf8 => "string",
            Self::Float64 => "double",
            Self::Int64 => "bigint",
            Self::Boolean => "boolean",
        }
    }
}

impl Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.catalog_name())
    }
}

impl Datum {
    /// Returns the column type of the value, or `None` for nulls.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Self::Null => None,
            Self::Utf8(_) => Some(ColumnType::Utf8),
            Self::Float64(_) => Some(ColumnType::Float64),
            Self::Int64(_) => Some(ColumnType::Int64),
            Self::Boolean(_) => Some(ColumnType::Boolean),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Approximate in-memory size of the value, used for buffer accounting.
    pub fn size_bytes(&self) -> usize {
        match self {
            Self::Null => 1,
            Self::Utf8(value) => value.len() + 4,
            Self::Float64(_) | Self::Int64(_) => 8,
            Self::Boolean(_) => 1,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Utf8(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float64(value) => Some(*value),
            _ => None,
        }
    }
}

impl Serialize for Datum {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Utf8(value) => serializer.serialize_str(value),
            Self::Float64(value) => serializer.serialize_f64(*value),
            Self::Int64(value) => serializer.serialize_i64(*value),
            Self::Boolean(value) => serializer.serialize_bool(*value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datum_column_type() {
        assert_eq!(Datum::Null.column_type(), None);
        assert_eq!(
            Datum::Utf8("a".to_string()).column_type(),
            Some(ColumnType::Utf8)
        );
        assert_eq!(Datum::Float64(1.0).column_type(), Some(ColumnType::Float64));
    }

    #[test]
    fn test_datum_serializes_as_plain_json() {
        let values = vec![
            Datum::Null,
            Datum::Utf8("x".to_string()),
            Datum::Float64(1.5),
            Datum::Boolean(true),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[null,"x",1.5,true]"#);
    }
}
