use std::io::Write;

use clap::Args;
use snafu::ResultExt;
use tributary_ingestor_core::RecordGenerator;

use crate::error::{IoSnafu, JsonSnafu, Result};

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Number of records.
    #[arg(long, short = 'n', default_value_t = 10)]
    count: usize,
    /// Seed, for reproducible output.
    #[arg(long)]
    seed: Option<u64>,
}

impl GenerateArgs {
    pub fn run(self) -> Result<()> {
        let generator = match self.seed {
            Some(seed) => RecordGenerator::seeded(seed),
            None => RecordGenerator::new(),
        };

        let mut out = std::io::stdout().lock();
        for record in generator.take(self.count) {
            serde_json::to_writer(&mut out, &record).context(JsonSnafu {})?;
            out.write_all(b"\n").context(IoSnafu {})?;
        }
        out.flush().context(IoSnafu {})
    }
}
