//! Priority-ordered decode job queue
//!
//! On-demand decodes (the page the reader is looking at) run before
//! prefetch decodes. Within a priority level jobs run FIFO.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Decode priority levels
///
/// Higher values are executed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DecodePriority {
    /// Neighbouring pages decoded ahead of the reader
    Prefetch = 0,

    /// The page currently requested for display
    OnDemand = 1,
}

/// Unique job identifier
pub type JobId = u64;

/// A queued decode of one physical page.
#[derive(Debug, Clone)]
pub struct DecodeJob {
    pub id: JobId,
    pub physical_index: u32,
    pub priority: DecodePriority,

    /// Insertion order (used for FIFO within same priority)
    insertion_order: u64,
}

impl PartialEq for DecodeJob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DecodeJob {}

impl PartialOrd for DecodeJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DecodeJob {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // BinaryHeap is a max heap: earlier insertion must compare greater.
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            other => other,
        }
    }
}

struct QueueState {
    heap: BinaryHeap<DecodeJob>,
    next_job_id: JobId,
    insertion_counter: u64,
    closed: bool,
}

/// Thread-safe decode queue that workers block on.
pub struct DecodeQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl DecodeQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_job_id: 1,
                insertion_counter: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a decode. Returns `None` once the queue is closed.
    pub fn push(&self, physical_index: u32, priority: DecodePriority) -> Option<JobId> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }

        let id = state.next_job_id;
        state.next_job_id += 1;
        let insertion_order = state.insertion_counter;
        state.insertion_counter += 1;

        state.heap.push(DecodeJob { id, physical_index, priority, insertion_order });
        drop(state);

        self.available.notify_one();
        Some(id)
    }

    /// Raise the priority of a queued job for `physical_index`.
    ///
    /// Returns `true` if a queued job was upgraded. Running or absent jobs
    /// are left alone.
    pub fn upgrade(&self, physical_index: u32, priority: DecodePriority) -> bool {
        let mut state = self.lock();

        let needs_upgrade = state
            .heap
            .iter()
            .any(|job| job.physical_index == physical_index && job.priority < priority);
        if !needs_upgrade {
            return false;
        }

        let jobs = std::mem::take(&mut state.heap).into_vec();
        state.heap = jobs
            .into_iter()
            .map(|mut job| {
                if job.physical_index == physical_index && job.priority < priority {
                    job.priority = priority;
                }
                job
            })
            .collect();
        true
    }

    /// Pop the highest priority job without waiting
    pub fn pop(&self) -> Option<DecodeJob> {
        self.lock().heap.pop()
    }

    /// Pop the highest priority job, waiting up to `timeout` for one.
    ///
    /// Returns `None` on timeout or once the queue is closed.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<DecodeJob> {
        let state = self.lock();
        let (mut state, _) = self
            .available
            .wait_timeout_while(state, timeout, |state| state.heap.is_empty() && !state.closed)
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if state.closed {
            return None;
        }
        state.heap.pop()
    }

    /// Remove and return every queued job.
    pub fn drain(&self) -> Vec<DecodeJob> {
        let mut state = self.lock();
        std::mem::take(&mut state.heap).into_sorted_vec()
    }

    /// Refuse further pushes and wake every waiting worker.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn contains(&self, physical_index: u32) -> bool {
        self.lock().heap.iter().any(|job| job.physical_index == physical_index)
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }
}

impl Default for DecodeQueue {
    fn default() -> Self {
        Self::new()
    }
}
