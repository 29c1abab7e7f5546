//! In-memory implementation of the schema catalog.
//!
//! Suitable for testing and development. It uses a RwLock for thread-safe access.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::table::{Column, SchemaRef, TableIdent, TableSchema, measurement_columns};

use super::{CatalogError, Result, SchemaCatalog};

#[derive(Debug, Default)]
pub struct InMemorySchemaCatalog {
    /// Map of table to its schema versions, oldest first.
    tables: RwLock<HashMap<TableIdent, Vec<SchemaRef>>>,
}

impl InMemorySchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog with the measurement table registered at version 1.
    pub async fn with_measurement_table(table: TableIdent) -> Result<Self> {
        let catalog = Self::new();
        catalog
            .register_schema(table, measurement_columns())
            .await?;
        Ok(catalog)
    }
}

#[async_trait]
impl SchemaCatalog for InMemorySchemaCatalog {
    async fn register_schema(&self, table: TableIdent, columns: Vec<Column>) -> Result<SchemaRef> {
        validate_columns(&table, &columns)?;

        let mut tables = self.tables.write().await;
        let versions = tables.entry(table.clone()).or_default();
        let version = versions.last().map(|s| s.version + 1).unwrap_or(1);
        let schema = Arc::new(TableSchema::new(table, version, columns));
        versions.push(schema.clone());

        Ok(schema)
    }

    async fn latest_schema(&self, table: &TableIdent) -> Result<SchemaRef> {
        let tables = self.tables.read().await;
        tables
            .get(table)
            .and_then(|versions| versions.last())
            .cloned()
            .ok_or_else(|| CatalogError::NotFound {
                resource: "table",
                message: table.to_string(),
            })
    }

    async fn get_schema(&self, table: &TableIdent, version: u32) -> Result<SchemaRef> {
        let tables = self.tables.read().await;
        let Some(versions) = tables.get(table) else {
            return Err(CatalogError::NotFound {
                resource: "table",
                message: table.to_string(),
            });
        };

        versions
            .iter()
            .find(|schema| schema.version == version)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound {
                resource: "schema version",
                message: format!("{table} version {version}"),
            })
    }
}

fn validate_columns(table: &TableIdent, columns: &[Column]) -> Result<()> {
    if columns.is_empty() {
        return Err(CatalogError::InvalidSchema {
            table: table.to_string(),
            message: "schema must have at least one column".to_string(),
        });
    }

    let mut names = HashSet::with_capacity(columns.len());
    for column in columns {
        if column.name.is_empty() || column.source_path().any(str::is_empty) {
            return Err(CatalogError::InvalidSchema {
                table: table.to_string(),
                message: format!("invalid column name '{}'", column.name),
            });
        }

        if !names.insert(column.name.as_str()) {
            return Err(CatalogError::InvalidSchema {
                table: table.to_string(),
                message: format!("duplicate column '{}'", column.name),
            });
        }
    }

    Ok(())
}
