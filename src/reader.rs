use crate::prelude::*;
use crate::transport::{RawReading, TransportSession};

/// The contiguous block of registers covering every mapped channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRange {
    pub start: u16,
    pub count: u16,
}

impl ReadRange {
    pub fn for_map(channel_map: &ChannelMap) -> Self {
        let start = channel_map.min_address();
        // ChannelMap::new caps the span at MAX_READ_COUNT, so this fits
        let count = channel_map.max_address() - start + 1;
        Self { start, count }
    }
}

#[derive(Debug, Clone)]
pub struct RegisterReader {
    range: ReadRange,
}

impl RegisterReader {
    pub fn new(channel_map: &ChannelMap) -> Self {
        let range = ReadRange::for_map(channel_map);
        debug!(
            "register block is {} registers from address {}",
            range.count, range.start
        );
        Self { range }
    }

    pub fn range(&self) -> ReadRange {
        self.range
    }

    pub async fn read(&self, session: TransportSession) -> Result<RawReading, ReadFailure> {
        session.read(self.range.start, self.range.count).await
    }
}
