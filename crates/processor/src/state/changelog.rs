//! Changelog trait and in-memory implementation
//!
//! The changelog is the durable half of the materialized table. Every table
//! write is appended as a [`DerivedRecord`] keyed by its `group_id`; a record
//! without a payload (a tombstone) removes the key. Replaying every
//! partition from its earliest offset, in log order, rebuilds the table.
//!
//! ## Partitioning
//!
//! A key always lands in the same changelog partition
//! ([`partition_for`]), so the order of a key's writes is the order of its
//! partition's log.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;
use transit_types::DerivedRecord;

use crate::error::ChangelogError;

/// Value of one changelog entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangelogPayload {
    /// Table write: `group_id -> category`
    Record(DerivedRecord),
    /// Key removed
    Tombstone { group_id: i64 },
    /// Entry that could not be decoded; skipped on replay
    Corrupt { reason: String },
}

/// One entry read back from the changelog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogEntry {
    pub partition: i32,
    pub offset: i64,
    pub payload: ChangelogPayload,
}

/// Append-only, partitioned log backing the materialized table
///
/// ## Example
///
/// ```rust,no_run
/// use processor::state::{Changelog, InMemoryChangelog};
/// use transit_types::{Category, DerivedRecord};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let changelog = InMemoryChangelog::new("stations_transformed", 1);
///     let record = DerivedRecord {
///         group_id: 40900,
///         entity_name: "Austin".to_string(),
///         order: 1,
///         category: Some(Category::CategoryA),
///     };
///
///     let offset = changelog.append(0, &record).await?;
///     let entries = changelog.replay(0).await?;
///     assert_eq!(entries[0].offset, offset);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait Changelog: Send + Sync {
    /// Name of the changelog topic
    fn topic(&self) -> &str;

    /// Number of partitions; always at least 1
    fn partitions(&self) -> i32;

    /// Append a record and wait until it is acknowledged
    ///
    /// Returns the offset assigned to the record.
    async fn append(&self, partition: i32, record: &DerivedRecord) -> Result<i64, ChangelogError>;

    /// Every entry of a partition from its earliest offset to its current end
    async fn replay(&self, partition: i32) -> Result<Vec<ChangelogEntry>, ChangelogError>;

    /// Wait for buffered appends to be delivered
    async fn flush(&self, timeout: Duration) -> Result<(), ChangelogError>;
}

/// Changelog partition owning `group_id`
pub fn partition_for(group_id: i64, partitions: i32) -> i32 {
    group_id.rem_euclid(i64::from(partitions.max(1))) as i32
}

/// Message key of a changelog entry
pub fn encode_key(group_id: i64) -> String {
    group_id.to_string()
}

/// Decode one changelog message
///
/// Undecodable messages become [`ChangelogPayload::Corrupt`] rather than
/// errors so a single bad entry cannot block recovery.
pub fn decode_entry(
    partition: i32,
    offset: i64,
    key: Option<&[u8]>,
    payload: Option<&[u8]>,
) -> ChangelogEntry {
    let payload = match payload {
        Some(bytes) => match serde_json::from_slice::<DerivedRecord>(bytes) {
            Ok(record) => ChangelogPayload::Record(record),
            Err(e) => ChangelogPayload::Corrupt {
                reason: format!("undecodable payload: {}", e),
            },
        },
        None => match key.and_then(decode_key) {
            Some(group_id) => ChangelogPayload::Tombstone { group_id },
            None => ChangelogPayload::Corrupt {
                reason: "tombstone without a numeric key".to_string(),
            },
        },
    };

    ChangelogEntry {
        partition,
        offset,
        payload,
    }
}

fn decode_key(key: &[u8]) -> Option<i64> {
    std::str::from_utf8(key).ok()?.trim().parse().ok()
}

/// Changelog kept in process memory
///
/// Used by tests and by anything that needs table semantics without a
/// broker. Entries can be seeded directly to exercise replay edge cases.
pub struct InMemoryChangelog {
    topic: String,
    logs: RwLock<Vec<Vec<ChangelogEntry>>>,
    unavailable: AtomicBool,
}

impl InMemoryChangelog {
    pub fn new(topic: impl Into<String>, partitions: i32) -> Self {
        let partitions = partitions.max(1) as usize;
        Self {
            topic: topic.into(),
            logs: RwLock::new(vec![Vec::new(); partitions]),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every following append fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Append a tombstone for `group_id`
    pub fn push_tombstone(&self, partition: i32, group_id: i64) -> i64 {
        self.push(partition, ChangelogPayload::Tombstone { group_id })
    }

    /// Append an entry that fails to decode
    pub fn push_corrupt(&self, partition: i32, reason: impl Into<String>) -> i64 {
        self.push(
            partition,
            ChangelogPayload::Corrupt {
                reason: reason.into(),
            },
        )
    }

    /// Number of entries in a partition
    pub fn len(&self, partition: i32) -> usize {
        self.logs
            .read()
            .get(partition as usize)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// All entries of all partitions, partition by partition
    pub fn entries(&self) -> Vec<ChangelogEntry> {
        self.logs.read().iter().flatten().cloned().collect()
    }

    fn push(&self, partition: i32, payload: ChangelogPayload) -> i64 {
        let mut logs = self.logs.write();
        let index = (partition.max(0) as usize).min(logs.len() - 1);
        let log = &mut logs[index];
        let offset = log.len() as i64;
        log.push(ChangelogEntry {
            partition: index as i32,
            offset,
            payload,
        });
        offset
    }

    fn check_partition(&self, partition: i32) -> Result<usize, String> {
        let partitions = self.logs.read().len();
        if partition < 0 || partition as usize >= partitions {
            return Err(format!(
                "partition {} out of range, topic has {}",
                partition, partitions
            ));
        }
        Ok(partition as usize)
    }
}

#[async_trait]
impl Changelog for InMemoryChangelog {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partitions(&self) -> i32 {
        self.logs.read().len() as i32
    }

    async fn append(&self, partition: i32, record: &DerivedRecord) -> Result<i64, ChangelogError> {
        let append_error = |message: String| ChangelogError::Append {
            topic: self.topic.clone(),
            partition,
            message,
        };

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(append_error("changelog unavailable".to_string()));
        }
        self.check_partition(partition).map_err(append_error)?;

        let offset = self.push(partition, ChangelogPayload::Record(record.clone()));
        debug!(topic = %self.topic, partition, offset, group_id = record.group_id, "Changelog append");
        Ok(offset)
    }

    async fn replay(&self, partition: i32) -> Result<Vec<ChangelogEntry>, ChangelogError> {
        let index = self
            .check_partition(partition)
            .map_err(|message| ChangelogError::Replay {
                topic: self.topic.clone(),
                partition,
                message,
            })?;

        Ok(self.logs.read()[index].clone())
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), ChangelogError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transit_types::Category;

    fn record(group_id: i64, category: Option<Category>) -> DerivedRecord {
        DerivedRecord {
            group_id,
            entity_name: format!("station-{}", group_id),
            order: 1,
            category,
        }
    }

    #[test]
    fn test_partition_for_is_stable_and_in_range() {
        assert_eq!(partition_for(40900, 1), 0);
        assert_eq!(partition_for(7, 3), 1);
        assert_eq!(partition_for(-7, 3), 2);
        assert_eq!(partition_for(7, 0), 0);
    }

    #[test]
    fn test_decode_record() {
        let bytes = serde_json::to_vec(&record(40900, Some(Category::CategoryA))).unwrap();
        let entry = decode_entry(0, 5, Some(b"40900"), Some(&bytes));

        assert_eq!(entry.offset, 5);
        assert_eq!(
            entry.payload,
            ChangelogPayload::Record(record(40900, Some(Category::CategoryA)))
        );
    }

    #[test]
    fn test_decode_tombstone_and_corrupt() {
        assert_eq!(
            decode_entry(0, 0, Some(b"41000"), None).payload,
            ChangelogPayload::Tombstone { group_id: 41000 }
        );
        assert!(matches!(
            decode_entry(0, 1, Some(b"not-a-number"), None).payload,
            ChangelogPayload::Corrupt { .. }
        ));
        assert!(matches!(
            decode_entry(0, 2, Some(b"41000"), Some(b"{\"group_id\":")).payload,
            ChangelogPayload::Corrupt { .. }
        ));
    }

    #[tokio::test]
    async fn test_append_assigns_sequential_offsets_per_partition() {
        let changelog = InMemoryChangelog::new("out", 2);

        assert_eq!(changelog.append(0, &record(1, None)).await.unwrap(), 0);
        assert_eq!(changelog.append(1, &record(2, None)).await.unwrap(), 0);
        assert_eq!(changelog.append(0, &record(3, None)).await.unwrap(), 1);

        let replayed = changelog.replay(0).await.unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[1].payload, ChangelogPayload::Record(record(3, None)));
    }

    #[tokio::test]
    async fn test_append_rejects_unknown_partition() {
        let changelog = InMemoryChangelog::new("out", 1);

        let err = changelog.append(3, &record(1, None)).await.unwrap_err();
        assert!(matches!(err, ChangelogError::Append { partition: 3, .. }));
        assert!(changelog.replay(3).await.is_err());
    }

    #[tokio::test]
    async fn test_unavailable_changelog_fails_appends() {
        let changelog = InMemoryChangelog::new("out", 1);
        changelog.set_unavailable(true);

        assert!(changelog.append(0, &record(1, None)).await.is_err());
        assert_eq!(changelog.len(0), 0);

        changelog.set_unavailable(false);
        assert!(changelog.append(0, &record(1, None)).await.is_ok());
    }
}
