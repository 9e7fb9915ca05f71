//! Client side of the job endpoints: a cache of job records that tolerates
//! optimistic starts, stale responses and resource switches.

mod api;
mod cache;
mod synchronizer;

pub use api::{ApiError, HttpJobsApi, JobsApi};
pub use cache::{CacheEntry, Freshness, JobCache, MergeDecision};
pub use synchronizer::{JobSynchronizer, SyncError, SyncPhase, SyncSettings, TrackedJob};
