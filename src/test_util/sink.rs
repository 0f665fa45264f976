use std::sync::Mutex;

use async_trait::async_trait;

use crate::snac::Snac;
use crate::transport::SnacSink;
use crate::util::lock::MutexExt;

/// Keeps every SNAC it is asked to transmit, in order
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Snac>>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<Snac> {
        self.sent.locked().clone()
    }

    pub fn request_ids(&self) -> Vec<u32> {
        self.sent.locked().iter()
            .map(|s| s.header.request_id)
            .collect()
    }
}

#[async_trait]
impl SnacSink for RecordingSink {
    async fn transmit(&self, snac: Snac) {
        self.sent.locked().push(snac);
    }
}
