//! Schema catalog.
//!
//! The catalog keeps an append-only list of schema versions per table. The
//! pipeline only ever reads from it: each batch resolves the latest version
//! once and uses that snapshot for every row in the batch.

mod error;
mod memory;

use async_trait::async_trait;

use crate::table::{Column, SchemaRef, TableIdent};

pub use self::error::{CatalogError, Result};
pub use self::memory::InMemorySchemaCatalog;

#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    /// Register a new schema version for the table, creating the table if needed.
    ///
    /// Returns the newly registered version.
    async fn register_schema(&self, table: TableIdent, columns: Vec<Column>) -> Result<SchemaRef>;

    /// Return the latest schema version of the table.
    async fn latest_schema(&self, table: &TableIdent) -> Result<SchemaRef>;

    /// Return a specific schema version of the table.
    async fn get_schema(&self, table: &TableIdent, version: u32) -> Result<SchemaRef>;
}
