//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside the store.
//!
//! # Tasks
//! - Log Compaction: Rewrites disk-resident table logs at configured intervals

mod compaction;

pub use compaction::spawn_compaction_task;
