pub mod catalog;
mod data_type;
mod table;

pub use self::{
    catalog::{CatalogError, InMemorySchemaCatalog, SchemaCatalog},
    data_type::{ColumnType, Datum},
    table::{
        CLASSIFICATION_PARQUET, Column, DEFAULT_DATABASE_NAME, DEFAULT_TABLE_NAME,
        PATH_SEPARATOR, SchemaRef, TableIdent, TableSchema, measurement_columns,
    },
};
