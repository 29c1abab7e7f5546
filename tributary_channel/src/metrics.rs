use tributary_observability::{Counter, KeyValue, meter};
use tributary_resources::PartitionId;

#[derive(Clone)]
pub struct ChannelMetrics {
    records_appended: Counter<u64>,
    bytes_appended: Counter<u64>,
    records_rejected: Counter<u64>,
}

impl ChannelMetrics {
    pub fn new() -> Self {
        let meter = meter("tributary_channel");
        Self {
            records_appended: meter
                .u64_counter("tributary.channel.records_appended")
                .with_description("Number of records appended to the channel")
                .build(),
            bytes_appended: meter
                .u64_counter("tributary.channel.bytes_appended")
                .with_description("Payload bytes appended to the channel")
                .with_unit("By")
                .build(),
            records_rejected: meter
                .u64_counter("tributary.channel.records_rejected")
                .with_description("Number of appends rejected because the partition was full")
                .build(),
        }
    }

    pub fn record_appended(&self, partition: PartitionId, size_bytes: u64) {
        let attributes = [KeyValue::new("partition", partition.id() as i64)];
        self.records_appended.add(1, &attributes);
        self.bytes_appended.add(size_bytes, &attributes);
    }

    pub fn record_rejected(&self, partition: PartitionId) {
        self.records_rejected
            .add(1, &[KeyValue::new("partition", partition.id() as i64)]);
    }
}

impl Default for ChannelMetrics {
    fn default() -> Self {
        Self::new()
    }
}
