//! A producer of synthetic measurement records.
//!
//! The generator emits records shaped like the metrics of a small fleet of
//! customers. The producer appends them to the ingestion channel and backs off
//! while the channel is full.

use std::{sync::Arc, time::Duration};

use rand::{Rng, SeedableRng, rngs::StdRng};
use snafu::ResultExt;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tributary_channel::{AppendInfo, ChannelRecord, IngestionChannel};
use tributary_resources::Record;

use crate::error::{ChannelSnafu, IngestorError, Result};

pub const MEASURE_NAMES: [&str; 4] = ["measure_0", "measure_1", "measure_2", "measure_3"];

/// Customer ids and their zip codes.
pub const CUSTOMERS: [(&str, &str); 5] = [
    ("0", "55111"),
    ("1", "59103"),
    ("2", "80808"),
    ("3", "19022"),
    ("4", "49494"),
];

/// Generates random measurement records.
pub struct RecordGenerator {
    rng: StdRng,
}

#[derive(Debug, Clone)]
pub struct ProducerOptions {
    /// Time between two rounds of records.
    pub interval: Duration,
    /// Records sent every round.
    pub records_per_interval: usize,
    /// First delay after the channel rejected a record.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

/// Appends records to an ingestion channel.
pub struct Producer {
    channel: Arc<dyn IngestionChannel>,
    options: ProducerOptions,
}

impl RecordGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// A generator producing the same records for the same seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn next_record(&mut self) -> Record {
        let measure_name = MEASURE_NAMES[self.rng.random_range(0..MEASURE_NAMES.len())];
        let measure_value = self.rng.random::<f64>() * 100.0;
        let (customer_id, zip_code) = CUSTOMERS[self.rng.random_range(0..CUSTOMERS.len())];

        Record::new(measure_name, measure_value)
            .with_metadata("customer_id", customer_id)
            .with_metadata("zip_code", zip_code)
            .with_metadata("something_else", "value")
    }
}

impl Default for RecordGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for RecordGenerator {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        Some(self.next_record())
    }
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            records_per_interval: 1,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl ProducerOptions {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_records_per_interval(mut self, records_per_interval: usize) -> Self {
        self.records_per_interval = records_per_interval;
        self
    }

    pub fn with_backoff(mut self, initial_backoff: Duration, max_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self.max_backoff = max_backoff;
        self
    }
}

impl Producer {
    pub fn new(channel: Arc<dyn IngestionChannel>, options: ProducerOptions) -> Self {
        Self { channel, options }
    }

    /// Appends a record once.
    ///
    /// Records are keyed by customer so that a keyed channel keeps the
    /// records of a customer in order.
    pub fn try_send(&self, record: &Record) -> Result<AppendInfo> {
        let payload = record.to_json().map_err(|err| IngestorError::Encode {
            message: err.to_string(),
        })?;

        let mut channel_record = ChannelRecord::new(payload);
        if let Some(customer_id) = record.metadata.get("customer_id") {
            channel_record = channel_record.with_partition_key(customer_id.clone());
        }

        self.channel
            .append(channel_record)
            .context(ChannelSnafu {
                message: "failed to append record",
            })
    }

    /// Appends a record, backing off while the channel is full.
    ///
    /// Returns `None` if `ct` is cancelled before the record was accepted.
    pub async fn send(&self, record: &Record, ct: &CancellationToken) -> Result<Option<AppendInfo>> {
        let mut backoff = self.options.initial_backoff;

        loop {
            match self.try_send(record) {
                Ok(info) => return Ok(Some(info)),
                Err(IngestorError::Channel { source, .. }) if source.is_channel_full() => {
                    debug!(?backoff, %source, "channel full, backing off");
                }
                Err(err) => return Err(err),
            }

            tokio::select! {
                _ = ct.cancelled() => return Ok(None),
                _ = tokio::time::sleep(backoff) => {}
            }

            backoff = (backoff * 2).min(self.options.max_backoff);
        }
    }

    /// Sends `records_per_interval` records every interval until `ct` is
    /// cancelled or `records` is exhausted.
    ///
    /// Returns the number of records accepted by the channel.
    pub async fn run(
        &self,
        records: impl Iterator<Item = Record>,
        ct: CancellationToken,
    ) -> Result<u64> {
        let mut records = records.peekable();
        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut num_sent = 0;

        info!(
            interval = ?self.options.interval,
            records_per_interval = self.options.records_per_interval,
            "producer started"
        );

        'outer: while records.peek().is_some() {
            tokio::select! {
                _ = ct.cancelled() => break,
                _ = ticker.tick() => {}
            }

            for record in records.by_ref().take(self.options.records_per_interval) {
                match self.send(&record, &ct).await? {
                    Some(info) => {
                        num_sent += 1;
                        debug!(
                            partition = %info.partition,
                            offset = info.offset,
                            measure_name = %record.measure_name,
                            "record sent"
                        );
                    }
                    None => {
                        warn!("producer cancelled while the channel was full");
                        break 'outer;
                    }
                }
            }
        }

        info!(num_sent, "producer stopped");

        Ok(num_sent)
    }
}
