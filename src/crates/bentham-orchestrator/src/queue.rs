//! The priority job queue.
//!
//! Ordering precedence: study priority (critical dispatched first), then
//! insertion sequence. Because jobs are enqueued in the frozen expansion
//! order (grouped by surface, then location), the sequence tiebreak
//! preserves that grouping, which concentrates credential and session
//! reuse. Entries carry an earliest-execution time for retries; dispatch
//! removes a job before a worker touches it, so no two workers ever hold
//! the same cell.

use bentham_core::job::Job;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

struct QueuedJob {
    job: Job,
    seq: u64,
    not_before: Option<Instant>,
}

impl QueuedJob {
    fn is_due(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |at| at <= now)
    }
}

// BinaryHeap is a max-heap; invert so the lowest (rank, seq) pops first.
impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        let mine = (self.job.priority.rank(), self.seq);
        let theirs = (other.job.priority.rank(), other.seq);
        theirs.cmp(&mine)
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

/// Constraints a worker places on the jobs it accepts.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Surfaces the worker accepts; `None` means any.
    pub surfaces: Option<Vec<String>>,

    /// Locations the worker accepts; `None` means any.
    pub locations: Option<Vec<String>>,
}

impl JobFilter {
    fn accepts(&self, job: &Job) -> bool {
        let surface_ok = self
            .surfaces
            .as_ref()
            .map_or(true, |s| s.iter().any(|id| id == &job.cell.surface_id));
        let location_ok = self
            .locations
            .as_ref()
            .map_or(true, |l| l.iter().any(|id| id == &job.cell.location_id));
        surface_ok && location_ok
    }
}

/// Priority queue of pending jobs.
///
/// Not internally synchronized; the orchestrator guards it with a mutex.
#[derive(Default)]
pub struct JobQueue {
    heap: BinaryHeap<QueuedJob>,
    next_seq: u64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a job, eligible immediately.
    pub fn push(&mut self, job: Job) {
        self.push_at(job, None);
    }

    /// Enqueue a job that must not run before `not_before`.
    pub fn push_delayed(&mut self, job: Job, not_before: Instant) {
        self.push_at(job, Some(not_before));
    }

    fn push_at(&mut self, job: Job, not_before: Option<Instant>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedJob {
            job,
            seq,
            not_before,
        });
    }

    /// Remove and return the highest-priority job that is due, matches the
    /// worker's filter, and belongs to a dispatchable study.
    ///
    /// Skipped entries go back into the heap untouched.
    pub fn pop_eligible<F>(&mut self, now: Instant, filter: &JobFilter, study_ok: F) -> Option<Job>
    where
        F: Fn(&str) -> bool,
    {
        let mut skipped = Vec::new();
        let mut found = None;

        while let Some(entry) = self.heap.pop() {
            if entry.is_due(now) && filter.accepts(&entry.job) && study_ok(&entry.job.study_id) {
                found = Some(entry.job);
                break;
            }
            skipped.push(entry);
        }

        for entry in skipped {
            self.heap.push(entry);
        }
        found
    }

    /// Remove every queued job of a study, returning them.
    pub fn drain_study(&mut self, study_id: &str) -> Vec<Job> {
        let entries: Vec<QueuedJob> = self.heap.drain().collect();
        let mut removed = Vec::new();
        for entry in entries {
            if entry.job.study_id == study_id {
                removed.push(entry.job);
            } else {
                self.heap.push(entry);
            }
        }
        removed
    }

    /// Whether a study still has queued jobs.
    pub fn has_study_jobs(&self, study_id: &str) -> bool {
        self.heap.iter().any(|entry| entry.job.study_id == study_id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bentham_core::cell::CellKey;
    use bentham_core::study::{EvidenceLevel, SessionIsolation, StudyPriority};
    use std::time::Duration;

    fn job(study: &str, surface: &str, location: &str, priority: StudyPriority) -> Job {
        Job::new(
            study,
            "tenant-1",
            CellKey::new(0, surface, location),
            priority,
            "q",
            EvidenceLevel::Metadata,
            SessionIsolation::Shared,
            Duration::from_secs(30),
        )
    }

    fn any() -> JobFilter {
        JobFilter::default()
    }

    #[test]
    fn critical_dispatches_before_normal() {
        let mut queue = JobQueue::new();
        queue.push(job("s1", "a", "x", StudyPriority::Normal));
        queue.push(job("s2", "a", "x", StudyPriority::Critical));
        queue.push(job("s3", "a", "x", StudyPriority::Low));

        let now = Instant::now();
        let first = queue.pop_eligible(now, &any(), |_| true).unwrap();
        assert_eq!(first.study_id, "s2");
        let second = queue.pop_eligible(now, &any(), |_| true).unwrap();
        assert_eq!(second.study_id, "s1");
        let third = queue.pop_eligible(now, &any(), |_| true).unwrap();
        assert_eq!(third.study_id, "s3");
    }

    #[test]
    fn insertion_order_breaks_ties() {
        let mut queue = JobQueue::new();
        for surface in ["a", "a", "b"] {
            queue.push(job("s1", surface, "x", StudyPriority::Normal));
        }
        let now = Instant::now();
        let surfaces: Vec<String> = (0..3)
            .map(|_| {
                queue
                    .pop_eligible(now, &any(), |_| true)
                    .unwrap()
                    .cell
                    .surface_id
            })
            .collect();
        assert_eq!(surfaces, vec!["a", "a", "b"]);
    }

    #[test]
    fn delayed_jobs_wait_for_eligibility() {
        let mut queue = JobQueue::new();
        let now = Instant::now();
        queue.push_delayed(
            job("s1", "a", "x", StudyPriority::Critical),
            now + Duration::from_secs(60),
        );
        queue.push(job("s2", "a", "x", StudyPriority::Low));

        // The delayed critical job is skipped over, not lost.
        let picked = queue.pop_eligible(now, &any(), |_| true).unwrap();
        assert_eq!(picked.study_id, "s2");
        assert_eq!(queue.len(), 1);

        let later = now + Duration::from_secs(120);
        let picked = queue.pop_eligible(later, &any(), |_| true).unwrap();
        assert_eq!(picked.study_id, "s1");
    }

    #[test]
    fn filters_gate_assignment() {
        let mut queue = JobQueue::new();
        queue.push(job("s1", "openai", "us-east", StudyPriority::Normal));
        queue.push(job("s1", "serp", "eu-west", StudyPriority::Normal));

        let filter = JobFilter {
            surfaces: Some(vec!["serp".to_string()]),
            locations: None,
        };
        let now = Instant::now();
        let picked = queue.pop_eligible(now, &filter, |_| true).unwrap();
        assert_eq!(picked.cell.surface_id, "serp");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn paused_studies_are_skipped() {
        let mut queue = JobQueue::new();
        queue.push(job("paused", "a", "x", StudyPriority::Critical));
        queue.push(job("running", "a", "x", StudyPriority::Low));

        let now = Instant::now();
        let picked = queue
            .pop_eligible(now, &any(), |study| study == "running")
            .unwrap();
        assert_eq!(picked.study_id, "running");
        assert!(queue.has_study_jobs("paused"));
    }

    #[test]
    fn drain_study_removes_only_that_study() {
        let mut queue = JobQueue::new();
        queue.push(job("s1", "a", "x", StudyPriority::Normal));
        queue.push(job("s2", "a", "x", StudyPriority::Normal));
        queue.push(job("s1", "b", "x", StudyPriority::Normal));

        let removed = queue.drain_study("s1");
        assert_eq!(removed.len(), 2);
        assert_eq!(queue.len(), 1);
        assert!(!queue.has_study_jobs("s1"));
        assert!(queue.has_study_jobs("s2"));
    }
}
