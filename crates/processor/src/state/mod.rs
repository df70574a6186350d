//! Materialized table state
//!
//! The table maps `group_id` to the category of the last record processed
//! for it. It is held in memory and made durable by a [`Changelog`]: the
//! compacted output topic in production, [`InMemoryChangelog`] in tests.
//!
//! ```rust,no_run
//! use processor::state::{InMemoryChangelog, MaterializedTable};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let table = MaterializedTable::new(Arc::new(InMemoryChangelog::new("out", 1)));
//!     let stats = table.recover().await?;
//!     println!("recovered {} keys", stats.keys);
//!     Ok(())
//! }
//! ```

pub mod changelog;
pub mod table;

pub use changelog::{
    decode_entry, encode_key, partition_for, Changelog, ChangelogEntry, ChangelogPayload,
    InMemoryChangelog,
};
pub use table::{MaterializedTable, RecoveryStats, TableEntry};
