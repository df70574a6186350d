//! Input record sources
//!
//! A [`RecordSource`] hands out raw records in per-partition order and is
//! told when a record has been fully processed, so it can mark the record's
//! offset as safe to commit.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use crate::error::{ProcessorError, Result};

/// A raw record as read from the input topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Next record, or `None` once the source is exhausted
    ///
    /// Must be cancel safe: a dropped call loses no record.
    async fn recv(&self) -> Result<Option<SourceRecord>>;

    /// Mark `record` as processed
    fn ack(&self, record: &SourceRecord) -> Result<()>;
}

/// Finite source backed by a queue, for tests and replays of captured data
pub struct InMemorySource {
    topic: String,
    queue: Mutex<VecDeque<SourceRecord>>,
    next_offsets: Mutex<HashMap<i32, i64>>,
    acked: Mutex<Vec<(i32, i64)>>,
}

impl InMemorySource {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            queue: Mutex::new(VecDeque::new()),
            next_offsets: Mutex::new(HashMap::new()),
            acked: Mutex::new(Vec::new()),
        }
    }

    /// Queue a raw payload on `partition`; returns its offset
    pub fn push(&self, partition: i32, payload: impl Into<Vec<u8>>) -> i64 {
        let offset = {
            let mut offsets = self.next_offsets.lock();
            let next = offsets.entry(partition).or_insert(0);
            let offset = *next;
            *next += 1;
            offset
        };

        self.queue.lock().push_back(SourceRecord {
            topic: self.topic.clone(),
            partition,
            offset,
            key: None,
            payload: Some(payload.into()),
        });
        offset
    }

    /// Queue a JSON-encoded value on `partition`; returns its offset
    pub fn push_json<T: Serialize>(&self, partition: i32, value: &T) -> Result<i64> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| ProcessorError::Serialization(e.to_string()))?;
        Ok(self.push(partition, bytes))
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// `(partition, offset)` pairs in the order they were acknowledged
    pub fn acked(&self) -> Vec<(i32, i64)> {
        self.acked.lock().clone()
    }
}

#[async_trait]
impl RecordSource for InMemorySource {
    async fn recv(&self) -> Result<Option<SourceRecord>> {
        Ok(self.queue.lock().pop_front())
    }

    fn ack(&self, record: &SourceRecord) -> Result<()> {
        self.acked.lock().push((record.partition, record.offset));
        Ok(())
    }
}
