use std::{collections::HashMap, fmt::Display, sync::Arc};

use arrow_schema::{Field as ArrowField, Schema as ArrowSchema, SchemaRef as ArrowSchemaRef};
use parquet::arrow::PARQUET_FIELD_ID_META_KEY;

use crate::data_type::ColumnType;

pub const DEFAULT_DATABASE_NAME: &str = "firehosedb";
pub const DEFAULT_TABLE_NAME: &str = "firehosegluetable";
pub const CLASSIFICATION_PARQUET: &str = "parquet";

/// Separator between the segments of a nested source path.
pub const PATH_SEPARATOR: char = '.';

/// Identifies a table in the schema catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableIdent {
    pub database: String,
    pub table: String,
}

/// A column of the row schema.
///
/// Dotted names, such as `metadata.customer_id`, are populated from the
/// matching nested path of the input record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

/// A version of a table's row schema.
///
/// Table schemas are immutable: a schema change registers a new version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub ident: TableIdent,
    pub version: u32,
    pub columns: Vec<Column>,
    pub classification: String,
    pub compression: String,
    column_index: HashMap<String, usize>,
}

pub type SchemaRef = Arc<TableSchema>;

impl TableIdent {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }
}

impl Default for TableIdent {
    fn default() -> Self {
        Self::new(DEFAULT_DATABASE_NAME, DEFAULT_TABLE_NAME)
    }
}

impl Display for TableIdent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable,
        }
    }

    /// The nested path this column is populated from.
    pub fn source_path(&self) -> impl Iterator<Item = &str> {
        self.name.split(PATH_SEPARATOR)
    }
}

impl TableSchema {
    pub fn new(ident: TableIdent, version: u32, columns: Vec<Column>) -> Self {
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(index, column)| (column.name.clone(), index))
            .collect();

        Self {
            ident,
            version,
            columns,
            classification: CLASSIFICATION_PARQUET.to_string(),
            compression: "snappy".to_string(),
            column_index,
        }
    }

    /// Returns the column with the given name and its position.
    pub fn column(&self, name: &str) -> Option<(usize, &Column)> {
        let index = *self.column_index.get(name)?;
        Some((index, &self.columns[index]))
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Returns the arrow schema of the table.
    ///
    /// Each field carries a parquet field id: its 1-based position in this
    /// version's column list. Ids aren't stable across versions.
    pub fn arrow_schema(&self) -> ArrowSchemaRef {
        let fields = self
            .columns
            .iter()
            .enumerate()
            .map(|(index, column)| {
                let metadata = HashMap::from([(
                    PARQUET_FIELD_ID_META_KEY.to_string(),
                    (index + 1).to_string(),
                )]);
                ArrowField::new(
                    &column.name,
                    column.column_type.arrow_data_type(),
                    column.nullable,
                )
                .with_metadata(metadata)
            })
            .collect::<Vec<_>>();

        Arc::new(ArrowSchema::new(fields))
    }
}

/// The columns of the measurement table: the flattened shape of a record.
pub fn measurement_columns() -> Vec<Column> {
    vec![
        Column::new("measure_name", ColumnType::Utf8, true),
        Column::new("measure_value", ColumnType::Float64, true),
        Column::new("metadata.customer_id", ColumnType::Utf8, true),
        Column::new("metadata.zip_code", ColumnType::Utf8, true),
        Column::new("metadata.something_else", ColumnType::Utf8, true),
    ]
}
