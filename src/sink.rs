//! External record-consumer seam (spec §6 `Sink`). File writers and network
//! publishers are out of scope (spec Non-goals); this trait is the boundary
//! a real one would implement against.

use crate::error::CoreResult;
use crate::trigger::DataRecord;
use parking_lot::Mutex;

pub trait Sink: Send + Sync {
    fn on_records(&self, channel_index: usize, records: &[DataRecord]) -> CoreResult<()>;
}

/// In-memory sink used by tests and the demo binary: just accumulates
/// everything it's handed, per channel.
#[derive(Default)]
pub struct MemorySink {
    by_channel: Mutex<std::collections::HashMap<usize, Vec<DataRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, channel_index: usize) -> usize {
        self.by_channel
            .lock()
            .get(&channel_index)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

impl Sink for MemorySink {
    fn on_records(&self, channel_index: usize, records: &[DataRecord]) -> CoreResult<()> {
        self.by_channel
            .lock()
            .entry(channel_index)
            .or_default()
            .extend(records.iter().cloned());
        Ok(())
    }
}
