//! Priority queue core: the ordered set of pending, dependency-gated
//! job identifiers.
//!
//! This structure is a derived, rebuildable index over the job record
//! store. It holds identifiers only, never job state, and is rebuilt
//! from the store's pending jobs on process start.

use std::cmp::Reverse;
use std::collections::HashSet;

use chrono::{DateTime, Utc};

use taxhub_core::types::id::JobId;
use taxhub_entity::job::JobPriority;

#[derive(Debug, Clone)]
struct QueueEntry {
    job_id: JobId,
    priority: JobPriority,
    created_at: DateTime<Utc>,
    /// Insertion sequence, the stable tie-break for equal
    /// priority and timestamp.
    seq: u64,
    /// Dependency jobs not yet completed. The entry is not eligible
    /// for dispatch until this set is empty.
    waiting_on: HashSet<JobId>,
}

impl QueueEntry {
    /// Dequeue order: priority descending, then creation time
    /// ascending (FIFO), then insertion order.
    fn sort_key(&self) -> (Reverse<u8>, DateTime<Utc>, u64) {
        (Reverse(self.priority.numeric()), self.created_at, self.seq)
    }
}

/// An entry popped for dispatch.
///
/// Carries the ordering fields so a claim that fails on the store side
/// can re-admit the job at its original position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyJob {
    /// The popped job.
    pub job_id: JobId,
    /// Priority at enqueue time.
    pub priority: JobPriority,
    /// Creation time used for FIFO ordering.
    pub created_at: DateTime<Utc>,
}

/// In-memory ordering structure over pending job identifiers.
///
/// Not thread-safe by itself; the job service owns it behind a mutex.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    entries: Vec<QueueEntry>,
    next_seq: u64,
}

impl PriorityQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job at the position that preserves the ordering
    /// invariant. Blocked dependencies are passed as `waiting_on`.
    pub fn enqueue(
        &mut self,
        job_id: JobId,
        priority: JobPriority,
        created_at: DateTime<Utc>,
        waiting_on: HashSet<JobId>,
    ) {
        let entry = QueueEntry {
            job_id,
            priority,
            created_at,
            seq: self.next_seq,
            waiting_on,
        };
        self.next_seq += 1;

        let key = entry.sort_key();
        let idx = self.entries.partition_point(|e| e.sort_key() <= key);
        self.entries.insert(idx, entry);
    }

    /// Remove and return the highest-priority, oldest eligible entry.
    ///
    /// Entries still waiting on dependencies are skipped and left in
    /// place. Returns `None` when no entry is eligible; callers must
    /// not busy-loop on a queue holding only blocked jobs.
    pub fn dequeue(&mut self) -> Option<ReadyJob> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.waiting_on.is_empty())?;
        let entry = self.entries.remove(idx);
        Some(ReadyJob {
            job_id: entry.job_id,
            priority: entry.priority,
            created_at: entry.created_at,
        })
    }

    /// Mark a dependency as completed for every waiting entry.
    /// Returns the number of entries that became eligible.
    pub fn resolve_dependency(&mut self, completed: JobId) -> usize {
        let mut unblocked = 0;
        for entry in &mut self.entries {
            if entry.waiting_on.remove(&completed) && entry.waiting_on.is_empty() {
                unblocked += 1;
            }
        }
        unblocked
    }

    /// Remove a specific job (cancellation). No-op if absent.
    pub fn remove(&mut self, job_id: JobId) -> bool {
        match self.entries.iter().position(|e| e.job_id == job_id) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Whether the job is queued.
    pub fn contains(&self, job_id: JobId) -> bool {
        self.entries.iter().any(|e| e.job_id == job_id)
    }

    /// Total queued entries, blocked ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries currently gated on an incomplete dependency.
    pub fn blocked_len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !e.waiting_on.is_empty())
            .count()
    }
}
