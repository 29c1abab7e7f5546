use tributary_observability::{Counter, KeyValue, meter};
use tributary_resources::PartitionId;

use crate::dead_letter::DeadLetterCategory;

#[derive(Clone)]
pub struct PipelineMetrics {
    pub rows_transformed: Counter<u64>,
    pub records_dead_lettered: Counter<u64>,
    pub flush_attempts: Counter<u64>,
    pub batches_committed: Counter<u64>,
    pub batches_quarantined: Counter<u64>,
    pub rows_written: Counter<u64>,
    pub bytes_written: Counter<u64>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        let meter = meter("tributary_pipeline");
        Self {
            rows_transformed: meter
                .u64_counter("tributary.pipeline.rows_transformed")
                .with_unit("{row}")
                .with_description("records transformed into rows")
                .build(),
            records_dead_lettered: meter
                .u64_counter("tributary.pipeline.records_dead_lettered")
                .with_unit("{record}")
                .with_description("records written to the dead-letter store")
                .build(),
            flush_attempts: meter
                .u64_counter("tributary.pipeline.flush_attempts")
                .with_description("batch flush attempts, including retries")
                .build(),
            batches_committed: meter
                .u64_counter("tributary.pipeline.batches_committed")
                .with_description("batches committed to the durable sink")
                .build(),
            batches_quarantined: meter
                .u64_counter("tributary.pipeline.batches_quarantined")
                .with_description("batches quarantined after exhausting retries")
                .build(),
            rows_written: meter
                .u64_counter("tributary.pipeline.rows_written")
                .with_unit("{row}")
                .with_description("rows written to committed blocks")
                .build(),
            bytes_written: meter
                .u64_counter("tributary.pipeline.bytes_written")
                .with_unit("By")
                .with_description("bytes of committed blocks")
                .build(),
        }
    }
}

pub fn partition_attributes(partition: PartitionId) -> [KeyValue; 1] {
    [KeyValue::new("partition", partition.id() as i64)]
}

pub fn dead_letter_attributes(partition: PartitionId, category: DeadLetterCategory) -> [KeyValue; 2] {
    [
        KeyValue::new("partition", partition.id() as i64),
        KeyValue::new("category", category.prefix()),
    ]
}
