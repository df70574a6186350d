//! Core types and data models for the transit stations stream
//!
//! This crate provides the record shapes exchanged over the broker and the
//! topic descriptions shared by every publishing and processing component.

pub mod records;
pub mod topics;

pub use records::{Category, DerivedRecord, RawEntityRecord, CATEGORY_PRECEDENCE};
pub use topics::{TopicSpec, TopicSpecError, DEFAULT_DELETE_RETENTION_MS, DEFAULT_FILE_DELETE_DELAY_MS};
