//! Worker pool and slot accounting.
//!
//! Workers are not OS threads; they are concurrency slots the dispatch
//! loop fills with execution tasks. Each worker declares how many jobs it
//! runs at once and may carry surface/location filters that gate
//! assignment (pinning is a deployment hint, not the default).

use crate::queue::JobFilter;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Declared shape of one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker id, unique within the pool.
    pub id: String,

    /// Jobs this worker runs concurrently.
    pub max_concurrent_jobs: usize,

    /// Surfaces this worker accepts; `None` means any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surfaces: Option<Vec<String>>,

    /// Locations this worker accepts; `None` means any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<String>>,
}

impl WorkerConfig {
    /// An unfiltered worker.
    pub fn new(id: impl Into<String>, max_concurrent_jobs: usize) -> Self {
        Self {
            id: id.into(),
            max_concurrent_jobs: max_concurrent_jobs.max(1),
            surfaces: None,
            locations: None,
        }
    }
}

/// A worker and its live slot count.
#[derive(Debug, Clone)]
pub struct Worker {
    config: WorkerConfig,
    active: Arc<AtomicUsize>,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Filter for the queue scan.
    pub fn filter(&self) -> JobFilter {
        JobFilter {
            surfaces: self.config.surfaces.clone(),
            locations: self.config.locations.clone(),
        }
    }

    /// Jobs currently running on this worker.
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether the worker can take another job.
    pub fn has_capacity(&self) -> bool {
        self.active_jobs() < self.config.max_concurrent_jobs
    }

    /// Claim a slot. The returned guard releases it on drop.
    pub fn claim(&self) -> WorkerSlot {
        self.active.fetch_add(1, Ordering::SeqCst);
        WorkerSlot {
            active: self.active.clone(),
        }
    }
}

/// RAII slot guard; releasing is dropping.
pub struct WorkerSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fixed-size set of workers.
#[derive(Debug, Clone, Default)]
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Build a pool of `count` identical unfiltered workers.
    pub fn uniform(count: usize, max_concurrent_jobs: usize) -> Self {
        let workers = (0..count.max(1))
            .map(|i| Worker::new(WorkerConfig::new(format!("worker-{i}"), max_concurrent_jobs)))
            .collect();
        Self { workers }
    }

    /// Build a pool from explicit worker configs.
    pub fn from_configs(configs: Vec<WorkerConfig>) -> Self {
        Self {
            workers: configs.into_iter().map(Worker::new).collect(),
        }
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Total jobs currently running across the pool.
    pub fn active_jobs(&self) -> usize {
        self.workers.iter().map(Worker::active_jobs).sum()
    }

    /// Workers that can take another job right now.
    pub fn idle_workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.iter().filter(|w| w.has_capacity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_release_on_drop() {
        let worker = Worker::new(WorkerConfig::new("w1", 2));
        assert!(worker.has_capacity());

        let a = worker.claim();
        let b = worker.claim();
        assert_eq!(worker.active_jobs(), 2);
        assert!(!worker.has_capacity());

        drop(a);
        assert!(worker.has_capacity());
        drop(b);
        assert_eq!(worker.active_jobs(), 0);
    }

    #[test]
    fn uniform_pool_has_distinct_ids() {
        let pool = WorkerPool::uniform(3, 1);
        let ids: Vec<&str> = pool.workers().iter().map(Worker::id).collect();
        assert_eq!(ids, vec!["worker-0", "worker-1", "worker-2"]);
    }

    #[test]
    fn zero_counts_are_clamped() {
        let pool = WorkerPool::uniform(0, 1);
        assert_eq!(pool.workers().len(), 1);
        let config = WorkerConfig::new("w", 0);
        assert_eq!(config.max_concurrent_jobs, 1);
    }

    #[test]
    fn idle_workers_reflect_capacity() {
        let pool = WorkerPool::uniform(2, 1);
        let _slot = pool.workers()[0].claim();
        let idle: Vec<&str> = pool.idle_workers().map(Worker::id).collect();
        assert_eq!(idle, vec!["worker-1"]);
    }
}
