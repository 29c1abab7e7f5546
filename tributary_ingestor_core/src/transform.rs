//! The transform stage: turns raw channel records into flat rows.
//!
//! A record must be a JSON object. Nested objects are flattened into dotted
//! paths (`{"metadata": {"zip_code": "55111"}}` becomes `metadata.zip_code`)
//! and each column of the schema takes the value at its path. Paths the schema
//! doesn't know about are dropped, paths missing from the record are null.

use std::{collections::BTreeMap, time::SystemTime};

use serde_json::{Map, Value};
use snafu::Snafu;
use tributary_channel::StoredRecord;
use tributary_resources::ErrorKind;
use tributary_schema::{ColumnType, Datum, PATH_SEPARATOR, SchemaRef};

/// Why a record couldn't be transformed.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum TransformError {
    #[snafu(display("malformed record: {message}"))]
    Malformed { message: String },
    #[snafu(display("unrecognized record shape: expected an object, found {found}"))]
    UnrecognizedShape { found: &'static str },
    #[snafu(display("invalid value for column {column}: {message}"))]
    InvalidValue { column: String, message: String },
}

/// A transformed record, keyed by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenedRow {
    /// Offset of the source record in its partition.
    pub offset: u64,
    pub ingested_at: SystemTime,
    /// The schema version the row was produced with.
    pub schema_version: u32,
    pub values: BTreeMap<String, Datum>,
}

/// Flattens records against one schema version.
///
/// The transformer holds no mutable state and can be shared between tasks.
#[derive(Debug, Clone)]
pub struct Transformer {
    schema: SchemaRef,
}

impl Transformer {
    pub fn new(schema: SchemaRef) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn transform(&self, record: &StoredRecord) -> Result<FlattenedRow, TransformError> {
        let object = parse_object(&record.payload)?;
        let flat = flatten(&object);

        let mut values = BTreeMap::new();
        for column in &self.schema.columns {
            let datum = match flat.get(column.name.as_str()) {
                None => Datum::Null,
                Some(value) => to_datum(&column.name, column.column_type, value)?,
            };
            values.insert(column.name.clone(), datum);
        }

        Ok(FlattenedRow {
            offset: record.offset,
            ingested_at: record.ingested_at,
            schema_version: self.schema.version,
            values,
        })
    }
}

impl FlattenedRow {
    /// Approximate size of the row, used to enforce the flush size threshold.
    pub fn size_bytes(&self) -> u64 {
        self.values
            .values()
            .map(|datum| datum.size_bytes() as u64)
            .sum()
    }

    pub fn get(&self, column: &str) -> &Datum {
        self.values.get(column).unwrap_or(&Datum::Null)
    }

    /// Returns the row as a JSON object, with the offset under `_offset`.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("_offset".to_string(), Value::from(self.offset));
        for (name, datum) in &self.values {
            let value = serde_json::to_value(datum).unwrap_or(Value::Null);
            object.insert(name.clone(), value);
        }
        Value::Object(object)
    }
}

impl TransformError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }

    /// A short machine readable reason, used in dead-letter records.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "malformed",
            Self::UnrecognizedShape { .. } => "unrecognized_shape",
            Self::InvalidValue { .. } => "invalid_value",
        }
    }
}

/// Flattens nested objects into a map from dotted path to leaf value.
///
/// Arrays are leaves: they are not descended into.
pub fn flatten(object: &Map<String, Value>) -> BTreeMap<String, &Value> {
    let mut out = BTreeMap::new();
    flatten_into(String::new(), object, &mut out);
    out
}

fn flatten_into<'a>(prefix: String, object: &'a Map<String, Value>, out: &mut BTreeMap<String, &'a Value>) {
    for (key, value) in object {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}{PATH_SEPARATOR}{key}")
        };

        match value {
            Value::Object(nested) => flatten_into(path, nested, out),
            leaf => {
                out.insert(path, leaf);
            }
        }
    }
}

fn parse_object(payload: &[u8]) -> Result<Map<String, Value>, TransformError> {
    let value: Value = serde_json::from_slice(payload).map_err(|err| TransformError::Malformed {
        message: err.to_string(),
    })?;

    match value {
        Value::Object(object) => Ok(object),
        other => UnrecognizedShapeSnafu {
            found: json_type_name(&other),
        }
        .fail(),
    }
}

fn to_datum(column: &str, column_type: ColumnType, value: &Value) -> Result<Datum, TransformError> {
    if value.is_null() {
        return Ok(Datum::Null);
    }

    let invalid = |message: String| TransformError::InvalidValue {
        column: column.to_string(),
        message,
    };

    match (column_type, value) {
        (ColumnType::Utf8, Value::String(s)) => Ok(Datum::Utf8(s.clone())),
        (ColumnType::Utf8, Value::Number(n)) => Ok(Datum::Utf8(n.to_string())),
        (ColumnType::Utf8, Value::Bool(b)) => Ok(Datum::Utf8(b.to_string())),

        (ColumnType::Float64, Value::Number(n)) => n
            .as_f64()
            .map(Datum::Float64)
            .ok_or_else(|| invalid(format!("{n} is not representable as a double"))),
        (ColumnType::Float64, Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Datum::Float64(v)),
            _ => Err(invalid(format!("{s:?} is not a number"))),
        },

        (ColumnType::Int64, Value::Number(n)) => n
            .as_i64()
            .map(Datum::Int64)
            .ok_or_else(|| invalid(format!("{n} is not an integer"))),
        (ColumnType::Int64, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Datum::Int64)
            .map_err(|_| invalid(format!("{s:?} is not an integer"))),

        (ColumnType::Boolean, Value::Bool(b)) => Ok(Datum::Boolean(*b)),
        (ColumnType::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Ok(Datum::Boolean(true)),
            "false" => Ok(Datum::Boolean(false)),
            _ => Err(invalid(format!("{s:?} is not a boolean"))),
        },

        (column_type, other) => Err(invalid(format!(
            "expected {column_type}, found {}",
            json_type_name(other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
