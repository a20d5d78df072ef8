//! Folio decode scheduler
//!
//! Priority decode queue, worker pool, and a coalescing scheduler that writes
//! decoded pages into the shared page cache.
//!
//! On-demand decodes (the page being shown) run before prefetch decodes, and
//! each physical page has at most one decode in flight. Closing a document
//! cancels its session token; any decode that completes afterwards is
//! discarded instead of reaching the cache.

mod cancel;
mod priority;
mod scheduler;
mod worker;

pub use cancel::CancellationToken;
pub use priority::{DecodeJob, DecodePriority, DecodeQueue, JobId};
pub use scheduler::{
    DecodeEvent, DecodeListener, DecodeOutcome, DecodeScheduler, PendingDecode, SchedulerOptions,
    SchedulerStats, SubmitKind,
};
pub use worker::{JobExecutor, WorkerPool, WorkerPoolConfig};
