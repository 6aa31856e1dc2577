//! Cron scheduling and sync job execution.
//!
//! The scheduler persists job definitions (they survive restarts), fires
//! them through a bounded worker pool, coalesces missed runs, honors a
//! one-hour misfire grace, and never runs the same job concurrently with
//! itself. The worker owns the full sync algorithm: credential injection,
//! connector construction, watermark seeding, the batch loop with
//! between-batch cancellation, per-claim rules evaluation, and terminal
//! bookkeeping on the job and its connector.

#![deny(missing_docs)]

pub mod scheduler;
pub mod worker;

pub use scheduler::{ScheduledJobView, SyncScheduler};
pub use worker::SyncWorker;
