use std::{io::Write, path::PathBuf};

use bytes::Bytes;
use clap::Args;
use serde_json::Value;
use snafu::ResultExt;
use tributary_ingestor_core::{read_block, read_block_rows};

use crate::error::{ConversionSnafu, IoSnafu, JsonSnafu, Result};

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Path of the parquet block.
    path: PathBuf,
    /// Print the block metadata to stderr.
    #[arg(long)]
    metadata: bool,
    /// Stop after this many rows.
    #[arg(long)]
    limit: Option<usize>,
}

impl InspectArgs {
    pub fn run(self) -> Result<()> {
        let data = Bytes::from(std::fs::read(&self.path).context(IoSnafu {})?);

        if self.metadata {
            let contents = read_block(data.clone()).context(ConversionSnafu {})?;
            let num_rows: usize = contents.batches.iter().map(|b| b.num_rows()).sum();
            eprintln!("rows: {num_rows}");
            eprintln!("row groups: {}", contents.num_row_groups);
            for (key, value) in &contents.metadata {
                eprintln!("{key}: {}", value.as_deref().unwrap_or(""));
            }
        }

        let rows = read_block_rows(data).context(ConversionSnafu {})?;
        let limit = self.limit.unwrap_or(rows.len());

        let mut out = std::io::stdout().lock();
        for row in rows.into_iter().take(limit) {
            serde_json::to_writer(&mut out, &Value::Object(row)).context(JsonSnafu {})?;
            out.write_all(b"\n").context(IoSnafu {})?;
        }
        out.flush().context(IoSnafu {})
    }
}
