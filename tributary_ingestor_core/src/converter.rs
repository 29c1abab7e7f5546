//! Converts batches of flattened rows into parquet blocks.
//!
//! Rows are validated against the batch's schema version before conversion.
//! Invalid rows are excluded and returned with the block, unless their share
//! of the batch exceeds `max_invalid_row_ratio`, in which case the whole
//! conversion fails.
//!
//! The output only depends on the rows, the schema and the options: the same
//! batch always converts to the same bytes.

use std::sync::Arc;

use arrow::{
    array::{ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder},
    error::ArrowError,
    record_batch::RecordBatch,
};
use bytes::Bytes;
use parquet::{
    arrow::{ArrowWriter, arrow_reader::ParquetRecordBatchReaderBuilder},
    basic::{Compression, ZstdLevel},
    errors::ParquetError,
    file::{
        metadata::KeyValue,
        properties::{WriterProperties, WriterVersion},
    },
};
use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu};
use tributary_resources::{CompressionCodec, ConverterOptions, ErrorKind};
use tributary_schema::{ColumnType, Datum, TableSchema};

use crate::{batcher::Batch, transform::FlattenedRow};

const DEFAULT_BUFFER_CAPACITY: usize = 1024 * 1024;

pub const METADATA_TABLE: &str = "tributary:table";
pub const METADATA_SCHEMA_VERSION: &str = "tributary:schema-version";
pub const METADATA_PARTITION: &str = "tributary:partition";
pub const METADATA_OFFSET_RANGE: &str = "tributary:offset-range";

#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum ConversionError {
    #[snafu(display(
        "{rejected} of {total} rows don't match schema {table} v{version} (max ratio {max_ratio}): {first_reason}"
    ))]
    SchemaDrift {
        table: String,
        version: u32,
        rejected: usize,
        total: usize,
        max_ratio: f64,
        first_reason: String,
    },
    #[snafu(display("arrow error: {message}"))]
    Arrow {
        message: &'static str,
        #[snafu(source(from(ArrowError, Arc::new)))]
        source: Arc<ArrowError>,
    },
    #[snafu(display("parquet error: {message}"))]
    Parquet {
        message: &'static str,
        #[snafu(source(from(ParquetError, Arc::new)))]
        source: Arc<ParquetError>,
    },
}

pub type Result<T, E = ConversionError> = std::result::Result<T, E>;

/// Rows written to one row group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowGroupInfo {
    pub num_rows: usize,
    pub first_offset: u64,
    pub last_offset: u64,
}

/// A row excluded from a block.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    pub row: FlattenedRow,
    pub reason: String,
}

/// A converted batch.
#[derive(Debug, Clone)]
pub struct ColumnarBlock {
    pub data: Bytes,
    pub num_rows: usize,
    pub row_groups: Vec<RowGroupInfo>,
    pub schema_version: u32,
    pub rejected: Vec<RejectedRow>,
}

#[derive(Debug, Clone)]
pub struct FormatConverter {
    options: ConverterOptions,
}

impl FormatConverter {
    pub fn new(options: ConverterOptions) -> Self {
        Self { options }
    }

    pub fn convert(&self, batch: &Batch, schema: &TableSchema) -> Result<ColumnarBlock> {
        let mut valid = Vec::with_capacity(batch.rows.len());
        let mut rejected = Vec::new();

        for row in &batch.rows {
            match validate_row(row, schema) {
                Ok(()) => valid.push(row),
                Err(reason) => rejected.push(RejectedRow {
                    row: row.clone(),
                    reason,
                }),
            }
        }

        let total = batch.rows.len();
        if !rejected.is_empty() {
            let ratio = rejected.len() as f64 / total as f64;
            if ratio > self.options.max_invalid_row_ratio {
                return SchemaDriftSnafu {
                    table: schema.ident.to_string(),
                    version: schema.version,
                    rejected: rejected.len(),
                    total,
                    max_ratio: self.options.max_invalid_row_ratio,
                    first_reason: rejected[0].reason.clone(),
                }
                .fail();
            }
        }

        let kv_metadata = vec![
            KeyValue::new(METADATA_TABLE.to_string(), schema.ident.to_string()),
            KeyValue::new(
                METADATA_SCHEMA_VERSION.to_string(),
                schema.version.to_string(),
            ),
            KeyValue::new(METADATA_PARTITION.to_string(), batch.partition.to_string()),
            KeyValue::new(METADATA_OFFSET_RANGE.to_string(), batch.range.to_string()),
        ];

        let row_group_size = self.options.max_row_group_size.max(1);
        let properties = WriterProperties::builder()
            .set_compression(compression(self.options.compression))
            .set_dictionary_enabled(true)
            .set_writer_version(WriterVersion::PARQUET_2_0)
            .set_max_row_group_size(row_group_size)
            .set_created_by(format!("tributary version {}", env!("CARGO_PKG_VERSION")))
            .set_key_value_metadata(Some(kv_metadata))
            .build();

        let arrow_schema = schema.arrow_schema();
        let buffer = Vec::with_capacity(DEFAULT_BUFFER_CAPACITY);
        let mut writer = ArrowWriter::try_new(buffer, arrow_schema.clone(), Some(properties))
            .context(ParquetSnafu {
                message: "failed to create writer",
            })?;

        let mut row_groups = Vec::new();
        for chunk in valid.chunks(row_group_size) {
            let columns = schema
                .columns
                .iter()
                .map(|column| build_array(column.column_type, &column.name, chunk))
                .collect::<Vec<_>>();

            let record_batch = RecordBatch::try_new(arrow_schema.clone(), columns)
                .context(ArrowSnafu {
                    message: "failed to build record batch",
                })?;

            writer.write(&record_batch).context(ParquetSnafu {
                message: "failed to write record batch",
            })?;
            writer.flush().context(ParquetSnafu {
                message: "failed to flush row group",
            })?;

            row_groups.push(RowGroupInfo {
                num_rows: chunk.len(),
                first_offset: chunk[0].offset,
                last_offset: chunk[chunk.len() - 1].offset,
            });
        }

        let data = writer.into_inner().context(ParquetSnafu {
            message: "failed to finish parquet file",
        })?;

        Ok(ColumnarBlock {
            data: Bytes::from(data),
            num_rows: valid.len(),
            row_groups,
            schema_version: schema.version,
            rejected,
        })
    }
}

/// Checks that every value of the row has a column of the right type and
/// that non-nullable columns have a value.
fn validate_row(row: &FlattenedRow, schema: &TableSchema) -> std::result::Result<(), String> {
    for (name, datum) in &row.values {
        let Some((_, column)) = schema.column(name) else {
            return Err(format!("column {name} is not in schema v{}", schema.version));
        };

        if let Some(column_type) = datum.column_type()
            && column_type != column.column_type
        {
            return Err(format!(
                "column {name} expects {}, found {column_type}",
                column.column_type
            ));
        }
    }

    for column in &schema.columns {
        if !column.nullable && row.get(&column.name).is_null() {
            return Err(format!("column {} is not nullable", column.name));
        }
    }

    Ok(())
}

/// Builds the array of a column. Rows must have been validated.
fn build_array(column_type: ColumnType, name: &str, rows: &[&FlattenedRow]) -> ArrayRef {
    match column_type {
        ColumnType::Utf8 => {
            let mut builder = StringBuilder::new();
            for row in rows {
                builder.append_option(row.get(name).as_str());
            }
            Arc::new(builder.finish())
        }
        ColumnType::Float64 => {
            let mut builder = Float64Builder::with_capacity(rows.len());
            for row in rows {
                builder.append_option(row.get(name).as_f64());
            }
            Arc::new(builder.finish())
        }
        ColumnType::Int64 => {
            let mut builder = Int64Builder::with_capacity(rows.len());
            for row in rows {
                builder.append_option(match row.get(name) {
                    Datum::Int64(value) => Some(*value),
                    _ => None,
                });
            }
            Arc::new(builder.finish())
        }
        ColumnType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(rows.len());
            for row in rows {
                builder.append_option(match row.get(name) {
                    Datum::Boolean(value) => Some(*value),
                    _ => None,
                });
            }
            Arc::new(builder.finish())
        }
    }
}

fn compression(codec: CompressionCodec) -> Compression {
    match codec {
        CompressionCodec::Uncompressed => Compression::UNCOMPRESSED,
        CompressionCodec::Snappy => Compression::SNAPPY,
        CompressionCodec::Zstd => Compression::ZSTD(ZstdLevel::default()),
    }
}

/// The contents of a block read back from its bytes.
#[derive(Debug)]
pub struct BlockContents {
    pub batches: Vec<RecordBatch>,
    pub num_row_groups: usize,
    pub metadata: Vec<(String, Option<String>)>,
}

/// Reads a parquet block.
pub fn read_block(data: Bytes) -> Result<BlockContents> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data).context(ParquetSnafu {
        message: "failed to open block",
    })?;

    let parquet_metadata = builder.metadata().clone();
    let num_row_groups = parquet_metadata.num_row_groups();
    let metadata = parquet_metadata
        .file_metadata()
        .key_value_metadata()
        .map(|kvs| {
            kvs.iter()
                .map(|kv| (kv.key.clone(), kv.value.clone()))
                .collect()
        })
        .unwrap_or_default();

    let reader = builder.build().context(ParquetSnafu {
        message: "failed to build block reader",
    })?;
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .context(ArrowSnafu {
            message: "failed to read block",
        })?;

    Ok(BlockContents {
        batches,
        num_row_groups,
        metadata,
    })
}

/// Reads a parquet block as JSON objects, one per row.
pub fn read_block_rows(data: Bytes) -> Result<Vec<Map<String, Value>>> {
    let contents = read_block(data)?;

    let mut writer = arrow_json::ArrayWriter::new(Vec::new());
    let batches = contents.batches.iter().collect::<Vec<_>>();
    writer.write_batches(&batches).context(ArrowSnafu {
        message: "failed to encode rows",
    })?;
    writer.finish().context(ArrowSnafu {
        message: "failed to encode rows",
    })?;

    let rows: Vec<Map<String, Value>> = serde_json::from_slice(&writer.into_inner())
        .map_err(|err| ArrowError::JsonError(err.to_string()))
        .context(ArrowSnafu {
            message: "failed to decode rows",
        })?;

    Ok(rows)
}

impl ConversionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SchemaDrift { .. } => ErrorKind::Validation,
            Self::Arrow { .. } | Self::Parquet { .. } => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, time::SystemTime};

    use tributary_resources::{OffsetRange, PartitionId};
    use tributary_schema::{Column, TableIdent, measurement_columns};

    use crate::batcher::FlushReason;

    use super::*;

    fn schema() -> Arc<TableSchema> {
        Arc::new(TableSchema::new(TableIdent::default(), 1, measurement_columns()))
    }

    fn row(offset: u64, value: Datum) -> FlattenedRow {
        FlattenedRow {
            offset,
            ingested_at: SystemTime::UNIX_EPOCH,
            schema_version: 1,
            values: BTreeMap::from([
                (
                    "measure_name".to_string(),
                    Datum::Utf8(format!("measure_{}", offset % 4)),
                ),
                ("measure_value".to_string(), value),
                ("metadata.customer_id".to_string(), Datum::Utf8("1".to_string())),
                ("metadata.zip_code".to_string(), Datum::Utf8("59103".to_string())),
                (
                    "metadata.something_else".to_string(),
                    Datum::Utf8("value".to_string()),
                ),
            ]),
        }
    }

    fn batch(schema: Arc<TableSchema>, rows: Vec<FlattenedRow>) -> Batch {
        let end = rows.last().map_or(0, |row| row.offset);
        Batch {
            partition: PartitionId::new(0),
            sequence: 0,
            schema,
            rows,
            dead_letters: Vec::new(),
            range: OffsetRange { start: 0, end },
            size_bytes: 0,
            first_ingested_at: SystemTime::UNIX_EPOCH,
            reason: FlushReason::Time,
        }
    }

    #[test]
    fn test_convert_is_deterministic() {
        let schema = schema();
        let rows = (0..100).map(|i| row(i, Datum::Float64(i as f64))).collect();
        let batch = batch(schema.clone(), rows);
        let converter = FormatConverter::new(ConverterOptions::default());

        let first = converter.convert(&batch, &schema).unwrap();
        let second = converter.convert(&batch, &schema).unwrap();

        assert_eq!(first.data, second.data);
        assert_eq!(first.num_rows, 100);
    }

    #[test]
    fn test_row_groups_and_metadata() {
        let schema = schema();
        let rows = (0..10).map(|i| row(i, Datum::Float64(1.0))).collect();
        let batch = batch(schema.clone(), rows);
        let converter =
            FormatConverter::new(ConverterOptions::default().with_max_row_group_size(4));

        let block = converter.convert(&batch, &schema).unwrap();
        assert_eq!(
            block.row_groups,
            vec![
                RowGroupInfo { num_rows: 4, first_offset: 0, last_offset: 3 },
                RowGroupInfo { num_rows: 4, first_offset: 4, last_offset: 7 },
                RowGroupInfo { num_rows: 2, first_offset: 8, last_offset: 9 },
            ]
        );

        let contents = read_block(block.data).unwrap();
        assert_eq!(contents.num_row_groups, 3);
        assert!(
            contents
                .metadata
                .contains(&(METADATA_OFFSET_RANGE.to_string(), Some("0-9".to_string())))
        );
        assert!(
            contents
                .metadata
                .contains(&(METADATA_SCHEMA_VERSION.to_string(), Some("1".to_string())))
        );
    }

    #[test]
    fn test_any_invalid_row_is_fatal_by_default() {
        let strict = Arc::new(TableSchema::new(
            TableIdent::default(),
            2,
            vec![
                Column::new("measure_name", ColumnType::Utf8, false),
                Column::new("measure_value", ColumnType::Float64, false),
                Column::new("metadata.customer_id", ColumnType::Utf8, true),
                Column::new("metadata.zip_code", ColumnType::Utf8, true),
                Column::new("metadata.something_else", ColumnType::Utf8, true),
            ],
        ));
        let rows = vec![row(0, Datum::Float64(1.0)), row(1, Datum::Null)];
        let batch = batch(strict.clone(), rows);

        let err = FormatConverter::new(ConverterOptions::default())
            .convert(&batch, &strict)
            .unwrap_err();
        assert!(matches!(err, ConversionError::SchemaDrift { rejected: 1, total: 2, .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);

        let block = FormatConverter::new(
            ConverterOptions::default().with_max_invalid_row_ratio(0.5),
        )
        .convert(&batch, &strict)
        .unwrap();
        assert_eq!(block.num_rows, 1);
        assert_eq!(block.rejected.len(), 1);
        assert_eq!(block.rejected[0].row.offset, 1);
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let schema = schema();
        let rows = vec![row(0, Datum::Utf8("oops".to_string()))];
        let err = FormatConverter::new(ConverterOptions::default())
            .convert(&batch(schema.clone(), rows), &schema)
            .unwrap_err();
        assert!(matches!(err, ConversionError::SchemaDrift { .. }));
    }

    #[test]
    fn test_read_block_rows() {
        let schema = schema();
        let rows = vec![row(0, Datum::Float64(2.5)), row(1, Datum::Null)];
        let block = FormatConverter::new(ConverterOptions::default())
            .convert(&batch(schema.clone(), rows), &schema)
            .unwrap();

        let rows = read_block_rows(block.data).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["measure_value"], 2.5);
        assert_eq!(rows[0]["metadata.zip_code"], "59103");
        // Nulls are omitted by the json writer.
        assert!(!rows[1].contains_key("measure_value"));
    }
}
