//! Stream transformation agent
//!
//! Consumes raw entity records, derives each record's category, writes
//! `group_id -> category` to the materialized table and emits the derived
//! record. Because the output topic is the table's changelog, the table
//! write and the emission are a single append.
//!
//! Each input partition is handled by its own task fed through a bounded
//! channel. A task finishes record N (table write acknowledged, offset
//! stored) before it starts record N+1; partitions run concurrently.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use transit_types::{DerivedRecord, RawEntityRecord};

use crate::config::AgentConfig;
use crate::error::{ProcessorError, Result, TransformError};
use crate::source::{RecordSource, SourceRecord};
use crate::state::{MaterializedTable, RecoveryStats, TableEntry};

/// Counters for one input partition
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PartitionStats {
    pub consumed: u64,
    pub emitted: u64,
    pub malformed: u64,
    pub last_offset: Option<i64>,
    pub last_processed_at: Option<DateTime<Utc>>,
}

impl PartitionStats {
    fn mark(&mut self, offset: i64) {
        self.consumed += 1;
        self.last_offset = Some(offset);
        self.last_processed_at = Some(Utc::now());
    }
}

/// Snapshot of the agent's counters
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AgentStats {
    pub partitions: BTreeMap<i32, PartitionStats>,
}

impl AgentStats {
    pub fn consumed(&self) -> u64 {
        self.partitions.values().map(|p| p.consumed).sum()
    }

    pub fn emitted(&self) -> u64 {
        self.partitions.values().map(|p| p.emitted).sum()
    }

    pub fn malformed(&self) -> u64 {
        self.partitions.values().map(|p| p.malformed).sum()
    }
}

/// What happened to one input record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Table updated and derived record emitted
    Emitted {
        record: DerivedRecord,
        entry: TableEntry,
    },
    /// Record could not be transformed; nothing was written
    Skipped(TransformError),
}

struct AgentCore {
    table: Arc<MaterializedTable>,
    stats: DashMap<i32, PartitionStats>,
}

impl AgentCore {
    async fn process(&self, record: &SourceRecord) -> Result<ProcessOutcome> {
        let derived = match StreamAgent::transform(record) {
            Ok(derived) => derived,
            Err(e) => {
                warn!(
                    partition = record.partition,
                    offset = record.offset,
                    "Skipping malformed record: {}",
                    e
                );
                self.update_stats(record.partition, |stats| {
                    stats.mark(record.offset);
                    stats.malformed += 1;
                });
                return Ok(ProcessOutcome::Skipped(e));
            }
        };

        let entry = self.table.put(&derived).await?;

        self.update_stats(record.partition, |stats| {
            stats.mark(record.offset);
            stats.emitted += 1;
        });
        debug!(
            partition = record.partition,
            offset = record.offset,
            group_id = derived.group_id,
            category = ?derived.category,
            "Record transformed"
        );

        Ok(ProcessOutcome::Emitted {
            record: derived,
            entry,
        })
    }

    fn update_stats(&self, partition: i32, update: impl FnOnce(&mut PartitionStats)) {
        let mut stats = self.stats.entry(partition).or_default();
        update(stats.value_mut());
    }
}

async fn run_partition(
    partition: i32,
    core: Arc<AgentCore>,
    source: Arc<dyn RecordSource>,
    mut receiver: mpsc::Receiver<SourceRecord>,
) -> Result<()> {
    debug!(partition, "Partition task started");

    while let Some(record) = receiver.recv().await {
        core.process(&record).await?;
        source.ack(&record)?;
    }

    debug!(partition, "Partition task finished");
    Ok(())
}

pub struct StreamAgent {
    config: AgentConfig,
    core: Arc<AgentCore>,
}

impl StreamAgent {
    pub fn new(config: AgentConfig, table: Arc<MaterializedTable>) -> Result<Self> {
        config.validate()?;

        let changelog_partitions = table.changelog().partitions();
        if changelog_partitions != config.output_partitions {
            warn!(
                configured = config.output_partitions,
                actual = changelog_partitions,
                "Changelog partition count differs from configuration"
            );
        }

        Ok(Self {
            config,
            core: Arc::new(AgentCore {
                table,
                stats: DashMap::new(),
            }),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn table(&self) -> Arc<MaterializedTable> {
        self.core.table.clone()
    }

    /// Rebuild the table from its changelog; call before [`run`](Self::run)
    pub async fn recover(&self) -> Result<RecoveryStats> {
        Ok(self.core.table.recover().await?)
    }

    /// Derive the output record for one input record
    pub fn transform(record: &SourceRecord) -> std::result::Result<DerivedRecord, TransformError> {
        let malformed = |reason: String| TransformError::Malformed {
            partition: record.partition,
            offset: record.offset,
            reason,
        };

        let payload = match record.payload.as_deref() {
            Some(payload) if !payload.is_empty() => payload,
            _ => return Err(malformed("empty payload".to_string())),
        };

        let raw: RawEntityRecord =
            serde_json::from_slice(payload).map_err(|e| malformed(e.to_string()))?;

        Ok(DerivedRecord::from(&raw))
    }

    /// Transform one record, update the table and emit
    ///
    /// Malformed records are counted and reported as
    /// [`ProcessOutcome::Skipped`]; only changelog failures are errors.
    pub async fn process(&self, record: &SourceRecord) -> Result<ProcessOutcome> {
        self.core.process(record).await
    }

    pub fn stats(&self) -> AgentStats {
        AgentStats {
            partitions: self
                .core
                .stats
                .iter()
                .map(|entry| (*entry.key(), entry.value().clone()))
                .collect(),
        }
    }

    /// Consume `source` until it is exhausted or `shutdown` completes
    ///
    /// Records are dispatched to one task per partition. A partition task
    /// that fails stops dispatch as soon as it finishes. On return every
    /// task has drained its queue and the changelog has been flushed. The
    /// first partition, source or flush failure is returned.
    pub async fn run<F>(&self, source: Arc<dyn RecordSource>, shutdown: F) -> Result<AgentStats>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut senders: HashMap<i32, mpsc::Sender<SourceRecord>> = HashMap::new();
        let mut tasks: JoinSet<(i32, Result<()>)> = JoinSet::new();

        info!(
            input = %self.config.input_topic,
            output = %self.config.output_topic,
            "Stream agent started"
        );

        let dispatched: Result<()> = loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested, draining partition tasks");
                    break Ok(());
                }
                Some(joined) = tasks.join_next() => {
                    if let Err(e) = partition_result(joined) {
                        break Err(e);
                    }
                }
                next = source.recv() => match next {
                    Ok(Some(record)) => {
                        let partition = record.partition;
                        let sender = senders.entry(partition).or_insert_with(|| {
                            self.spawn_worker(partition, source.clone(), &mut tasks)
                        });

                        // A full queue must not hold off shutdown
                        tokio::select! {
                            biased;

                            _ = &mut shutdown => {
                                info!(partition, "Shutdown requested before record was queued");
                                break Ok(());
                            }
                            sent = sender.send(record) => {
                                if sent.is_err() {
                                    // The task's own result is picked up by the join branch
                                    debug!(partition, "Partition task already stopped");
                                }
                            }
                        }
                    }
                    Ok(None) => {
                        info!("Source exhausted");
                        break Ok(());
                    }
                    Err(e) => {
                        error!("Source failed: {}", e);
                        break Err(e);
                    }
                }
            }
        };

        let mut failure = dispatched.err();

        senders.clear();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = partition_result(joined) {
                failure = failure.or(Some(e));
            }
        }

        if let Err(e) = self
            .core
            .table
            .changelog()
            .flush(self.config.flush_timeout())
            .await
        {
            error!("Failed to flush output: {}", e);
            failure = failure.or(Some(e.into()));
        }

        if let Some(e) = failure {
            return Err(e);
        }

        let stats = self.stats();
        info!(
            consumed = stats.consumed(),
            emitted = stats.emitted(),
            malformed = stats.malformed(),
            "Stream agent stopped"
        );
        Ok(stats)
    }

    fn spawn_worker(
        &self,
        partition: i32,
        source: Arc<dyn RecordSource>,
        tasks: &mut JoinSet<(i32, Result<()>)>,
    ) -> mpsc::Sender<SourceRecord> {
        let (sender, receiver) = mpsc::channel(self.config.channel_capacity);
        let core = self.core.clone();
        tasks.spawn(async move {
            let result = run_partition(partition, core, source, receiver).await;
            (partition, result)
        });
        sender
    }
}

/// Log a finished partition task and surface its failure
fn partition_result(joined: std::result::Result<(i32, Result<()>), JoinError>) -> Result<()> {
    match joined {
        Ok((_, Ok(()))) => Ok(()),
        Ok((partition, Err(e))) => {
            error!(partition, "Partition task failed: {}", e);
            Err(e)
        }
        Err(e) => {
            error!("Partition task aborted: {}", e);
            Err(ProcessorError::Execution(format!("partition task: {}", e)))
        }
    }
}
