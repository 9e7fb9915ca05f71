//! Client-side job cache with explicit optimistic entries.

use crate::job_store::{JobStage, JobStatus};
use crate::jobs::JobStatusInfo;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Set locally when a start was requested; not yet confirmed by a poll.
    Optimistic { applied_at: Instant },
    /// Last written from a status poll.
    Confirmed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub info: JobStatusInfo,
    pub freshness: Freshness,
    /// Confirmed info the optimistic entry replaced, restored on a failed start.
    previous: Option<JobStatusInfo>,
}

impl CacheEntry {
    pub fn is_optimistic(&self) -> bool {
        matches!(self.freshness, Freshness::Optimistic { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    Applied,
    /// A conflicting poll arrived inside the grace window and was dropped.
    KeptOptimistic,
}

pub struct JobCache {
    entries: HashMap<String, CacheEntry>,
    grace: Duration,
}

impl JobCache {
    pub fn new(grace: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            grace,
        }
    }

    pub fn get(&self, resource_id: &str) -> Option<&CacheEntry> {
        self.entries.get(resource_id)
    }

    pub fn remove(&mut self, resource_id: &str) -> Option<CacheEntry> {
        self.entries.remove(resource_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Marks the job as processing before the server has answered.
    pub fn apply_optimistic(&mut self, resource_id: &str, now: Instant) -> &CacheEntry {
        let previous = match self.entries.remove(resource_id) {
            Some(entry) if entry.is_optimistic() => entry.previous,
            Some(entry) => Some(entry.info),
            None => None,
        };
        let info = JobStatusInfo {
            status: JobStatus::Processing,
            progress: 0.0,
            stage: Some(JobStage::Queued.as_str().to_string()),
            output_count: 0,
            started_at: None,
            completed_at: None,
            error: None,
            id: resource_id.to_string(),
        };
        self.entries.entry(resource_id.to_string()).or_insert(CacheEntry {
            info,
            freshness: Freshness::Optimistic { applied_at: now },
            previous,
        })
    }

    /// Stores the start response.
    ///
    /// An optimistic entry takes the response but stays optimistic until a
    /// poll confirms it. If a poll already replaced the optimistic entry, the
    /// response is newer than anything but a `processing` poll result and is
    /// stored as confirmed.
    pub fn apply_start_response(&mut self, resource_id: &str, info: JobStatusInfo) {
        match self.entries.get_mut(resource_id) {
            Some(entry) if entry.is_optimistic() => entry.info = info,
            Some(entry) if entry.info.status == JobStatus::Processing => {}
            _ => {
                self.entries.insert(
                    resource_id.to_string(),
                    CacheEntry {
                        info,
                        freshness: Freshness::Confirmed,
                        previous: None,
                    },
                );
            }
        }
    }

    /// Undoes an optimistic entry after the start request failed.
    pub fn revert_optimistic(&mut self, resource_id: &str) {
        let Some(entry) = self.entries.remove(resource_id) else {
            return;
        };
        if !entry.is_optimistic() {
            self.entries.insert(resource_id.to_string(), entry);
            return;
        }
        if let Some(previous) = entry.previous {
            self.entries.insert(
                resource_id.to_string(),
                CacheEntry {
                    info: previous,
                    freshness: Freshness::Confirmed,
                    previous: None,
                },
            );
        }
    }

    /// Merges a poll result.
    ///
    /// Inside the grace window an optimistic entry wins over anything that is
    /// not `processing`; after it the server always wins.
    pub fn merge_poll(
        &mut self,
        resource_id: &str,
        info: JobStatusInfo,
        now: Instant,
    ) -> MergeDecision {
        if let Some(entry) = self.entries.get(resource_id) {
            if let Freshness::Optimistic { applied_at } = entry.freshness {
                let within_grace = now.saturating_duration_since(applied_at) < self.grace;
                if within_grace && info.status != JobStatus::Processing {
                    return MergeDecision::KeptOptimistic;
                }
            }
        }

        self.entries.insert(
            resource_id.to_string(),
            CacheEntry {
                info,
                freshness: Freshness::Confirmed,
                previous: None,
            },
        );
        MergeDecision::Applied
    }
}
