//! Materialized table `group_id -> category`
//!
//! Writes go to the changelog first; the in-memory entry is only updated
//! once the append was acknowledged. A stored `None` category is a present
//! entry, distinct from a missing key.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use transit_types::{Category, DerivedRecord};

use super::changelog::{partition_for, Changelog, ChangelogPayload};
use crate::error::ChangelogError;

/// Current value of one key and where it was logged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub category: Option<Category>,
    pub changelog_partition: i32,
    pub offset: i64,
}

/// Outcome of a changelog replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub partitions: i32,
    pub entries_replayed: u64,
    pub tombstones: u64,
    pub corrupt: u64,
    /// Keys present after recovery
    pub keys: usize,
}

pub struct MaterializedTable {
    changelog: Arc<dyn Changelog>,
    entries: DashMap<i64, TableEntry>,
}

impl MaterializedTable {
    pub fn new(changelog: Arc<dyn Changelog>) -> Self {
        Self {
            changelog,
            entries: DashMap::new(),
        }
    }

    pub fn changelog(&self) -> Arc<dyn Changelog> {
        self.changelog.clone()
    }

    /// Log `record` and make it the key's current value
    ///
    /// The entry is only visible after the changelog acknowledged it. When
    /// two writers race on one key, the entry with the higher offset wins,
    /// which is also what a replay of the log produces.
    pub async fn put(&self, record: &DerivedRecord) -> Result<TableEntry, ChangelogError> {
        let partition = partition_for(record.group_id, self.changelog.partitions());
        let offset = self.changelog.append(partition, record).await?;

        let entry = TableEntry {
            category: record.category,
            changelog_partition: partition,
            offset,
        };
        self.apply(record.group_id, entry.clone());

        debug!(group_id = record.group_id, partition, offset, "Table updated");
        Ok(entry)
    }

    pub fn get(&self, group_id: i64) -> Option<TableEntry> {
        self.entries.get(&group_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, group_id: i64) -> bool {
        self.entries.contains_key(&group_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ordered copy of `group_id -> category`
    pub fn snapshot(&self) -> BTreeMap<i64, Option<Category>> {
        self.entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().category))
            .collect()
    }

    /// Rebuild the table by replaying every changelog partition
    ///
    /// Existing entries are discarded first. Within a partition entries are
    /// applied in log order, last value per key wins; corrupt entries are
    /// skipped and counted.
    pub async fn recover(&self) -> Result<RecoveryStats, ChangelogError> {
        self.entries.clear();

        let partitions = self.changelog.partitions();
        let mut stats = RecoveryStats {
            partitions,
            ..Default::default()
        };

        for partition in 0..partitions {
            let entries = self.changelog.replay(partition).await?;
            debug!(partition, entries = entries.len(), "Replaying changelog partition");

            for entry in entries {
                stats.entries_replayed += 1;
                match entry.payload {
                    ChangelogPayload::Record(record) => {
                        self.entries.insert(
                            record.group_id,
                            TableEntry {
                                category: record.category,
                                changelog_partition: entry.partition,
                                offset: entry.offset,
                            },
                        );
                    }
                    ChangelogPayload::Tombstone { group_id } => {
                        stats.tombstones += 1;
                        self.entries.remove(&group_id);
                    }
                    ChangelogPayload::Corrupt { reason } => {
                        stats.corrupt += 1;
                        warn!(
                            topic = self.changelog.topic(),
                            partition = entry.partition,
                            offset = entry.offset,
                            "Skipping corrupt changelog entry: {}",
                            reason
                        );
                    }
                }
            }
        }

        stats.keys = self.entries.len();
        info!(
            topic = self.changelog.topic(),
            partitions,
            entries = stats.entries_replayed,
            keys = stats.keys,
            corrupt = stats.corrupt,
            "Table recovered from changelog"
        );
        Ok(stats)
    }

    fn apply(&self, group_id: i64, entry: TableEntry) {
        match self.entries.entry(group_id) {
            Entry::Occupied(mut current) => {
                let stale = current.get().changelog_partition == entry.changelog_partition
                    && current.get().offset > entry.offset;
                if !stale {
                    current.insert(entry);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
    }
}
