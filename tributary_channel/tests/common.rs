use std::sync::Arc;

use tributary_channel::{ChannelRecord, InMemoryChannel};
use tributary_resources::ChannelOptions;

pub fn channel(options: ChannelOptions) -> Arc<InMemoryChannel> {
    Arc::new(InMemoryChannel::new(options))
}

pub fn record(value: usize) -> ChannelRecord {
    ChannelRecord::new(format!("{{\"measure_name\":\"measure_0\",\"measure_value\":{value}}}"))
}
