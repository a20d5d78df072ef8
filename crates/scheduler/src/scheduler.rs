//! Coalescing decode scheduler
//!
//! Owns the decode queue and worker pool for one open document. At most one
//! decode per physical page is in flight; repeated submissions share the
//! pending result. Completions are written to the shared page cache unless
//! the session token has been cancelled in the meantime.

use crate::cancel::CancellationToken;
use crate::priority::{DecodeJob, DecodePriority, DecodeQueue};
use crate::worker::{JobExecutor, WorkerPool, WorkerPoolConfig};
use folio_cache::{DecodedPage, SharedPageCache};
use folio_source::{DocumentSource, SourceError};
use std::any::Any;
use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Final result of one submitted decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The page is resident in the cache.
    Ready,
    /// The source could not produce the page.
    Failed(String),
    /// The session ended before the decode completed.
    Cancelled,
}

/// How a submission was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitKind {
    /// Already resident; nothing was queued.
    Cached,
    /// Joined a decode already queued or running.
    Coalesced,
    /// A new decode was queued.
    Queued,
    /// Previously failed; refused until the failure is cleared.
    Failed,
    /// Out of range, or the session is already cancelled.
    Rejected,
}

/// Notifications delivered from worker threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    Ready { physical_index: u32 },
    Failed { physical_index: u32, reason: String },
}

pub type DecodeListener = Arc<dyn Fn(DecodeEvent) + Send + Sync>;

/// Scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Decodes queued (coalesced submissions not included)
    pub submitted: u64,
    /// Submissions that joined an existing decode
    pub coalesced: u64,
    /// Decodes written to the cache
    pub decoded: u64,
    /// Decodes that failed at the source
    pub failed: u64,
    /// Pending decodes dropped by `cancel_all`
    pub cancelled: u64,
    /// Completions thrown away because the session had ended
    pub discarded: u64,
}

#[derive(Default)]
struct DecodeSlot {
    outcome: Mutex<Option<DecodeOutcome>>,
    done: Condvar,
}

impl DecodeSlot {
    fn finished(outcome: DecodeOutcome) -> Arc<Self> {
        Arc::new(Self { outcome: Mutex::new(Some(outcome)), done: Condvar::new() })
    }

    fn lock(&self) -> MutexGuard<'_, Option<DecodeOutcome>> {
        self.outcome.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// First outcome wins.
    fn finish(&self, outcome: DecodeOutcome) {
        let mut slot = self.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
        drop(slot);
        self.done.notify_all();
    }
}

/// Handle to a submitted decode.
///
/// Cloning the handle is not needed to share a result: every submission for
/// the same page while a decode is pending receives a handle on the same
/// outcome.
pub struct PendingDecode {
    physical_index: u32,
    kind: SubmitKind,
    slot: Arc<DecodeSlot>,
}

impl PendingDecode {
    pub fn physical_index(&self) -> u32 {
        self.physical_index
    }

    pub fn kind(&self) -> SubmitKind {
        self.kind
    }

    /// The outcome, if the decode has finished.
    pub fn outcome(&self) -> Option<DecodeOutcome> {
        self.slot.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Block until the decode finishes.
    pub fn wait(&self) -> DecodeOutcome {
        let slot = self.slot.lock();
        let slot = self
            .slot
            .done
            .wait_while(slot, |outcome| outcome.is_none())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.clone().unwrap_or(DecodeOutcome::Cancelled)
    }

    /// Block for at most `timeout`. Returns `None` if still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<DecodeOutcome> {
        let slot = self.slot.lock();
        let (slot, _) = self
            .slot
            .done
            .wait_timeout_while(slot, timeout, |outcome| outcome.is_none())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.clone()
    }
}

impl std::fmt::Debug for PendingDecode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingDecode")
            .field("physical_index", &self.physical_index)
            .field("kind", &self.kind)
            .field("outcome", &self.outcome())
            .finish()
    }
}

/// Options for [`DecodeScheduler::new`].
#[derive(Clone, Default)]
pub struct SchedulerOptions {
    /// Generation stamped on the session token.
    pub generation: u64,
    pub workers: WorkerPoolConfig,
    pub listener: Option<DecodeListener>,
}

struct SchedulerState {
    in_flight: HashMap<u32, Arc<DecodeSlot>>,
    failed: HashMap<u32, String>,
    stats: SchedulerStats,
}

struct Shared {
    source: Arc<dyn DocumentSource>,
    cache: SharedPageCache,
    queue: Arc<DecodeQueue>,
    token: CancellationToken,
    state: Mutex<SchedulerState>,
    listener: Option<DecodeListener>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, event: DecodeEvent) {
        if let Some(listener) = &self.listener {
            listener(event);
        }
    }

    /// Runs on a worker thread.
    fn execute(&self, job: &DecodeJob) {
        let index = job.physical_index;

        if self.token.is_cancelled() {
            if let Some(slot) = self.state().in_flight.remove(&index) {
                slot.finish(DecodeOutcome::Cancelled);
            }
            return;
        }

        // A panicking source fails its page instead of taking the worker down.
        let decoded = panic::catch_unwind(AssertUnwindSafe(|| self.source.decode_page(index)))
            .unwrap_or_else(|payload| {
                Err(SourceError::DecodeFailed { index, reason: panic_reason(payload.as_ref()) })
            });

        // Lock order: cache, then scheduler state.
        let mut cache = self.cache.lock();
        let mut state = self.state();
        let slot = state.in_flight.remove(&index);

        if self.token.is_cancelled() {
            state.stats.discarded += 1;
            drop(state);
            drop(cache);
            tracing::debug!(
                page = index,
                generation = self.token.generation(),
                "discarding decode for closed document"
            );
            if let Some(slot) = slot {
                slot.finish(DecodeOutcome::Cancelled);
            }
            return;
        }

        match decoded {
            Ok(image) => {
                cache.put(DecodedPage::new(index, image));
                state.stats.decoded += 1;
                drop(state);
                drop(cache);

                if let Some(slot) = slot {
                    slot.finish(DecodeOutcome::Ready);
                }
                self.notify(DecodeEvent::Ready { physical_index: index });
            }
            Err(err) => {
                let reason = err.to_string();
                state.failed.insert(index, reason.clone());
                state.stats.failed += 1;
                drop(state);
                drop(cache);

                tracing::warn!(page = index, error = %err, "page decode failed");
                if let Some(slot) = slot {
                    slot.finish(DecodeOutcome::Failed(reason.clone()));
                }
                self.notify(DecodeEvent::Failed { physical_index: index, reason });
            }
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic");
    format!("decoder panicked: {message}")
}

/// Decode scheduler for one open document.
///
/// # Example
///
/// ```no_run
/// use folio_cache::SharedPageCache;
/// use folio_scheduler::{DecodePriority, DecodeOutcome, DecodeScheduler, SchedulerOptions};
/// use folio_source::{open_source, OpenSource};
///
/// let source = open_source(OpenSource::Path("comic.cbz".into())).unwrap();
/// let cache = SharedPageCache::new(50);
/// let scheduler = DecodeScheduler::new(source, cache.clone(), SchedulerOptions::default()).unwrap();
///
/// let pending = scheduler.submit(0, DecodePriority::OnDemand);
/// if pending.wait() == DecodeOutcome::Ready {
///     cache.with_page(0, |page| println!("{}x{}", page.width(), page.height()));
/// }
/// ```
pub struct DecodeScheduler {
    shared: Arc<Shared>,
    pool: Option<WorkerPool>,
}

impl DecodeScheduler {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        cache: SharedPageCache,
        options: SchedulerOptions,
    ) -> io::Result<Self> {
        let queue = Arc::new(DecodeQueue::new());
        let shared = Arc::new(Shared {
            source,
            cache,
            queue: queue.clone(),
            token: CancellationToken::new(options.generation),
            state: Mutex::new(SchedulerState {
                in_flight: HashMap::new(),
                failed: HashMap::new(),
                stats: SchedulerStats::default(),
            }),
            listener: options.listener,
        });

        let worker_shared = shared.clone();
        let executor: JobExecutor = Arc::new(move |job: &DecodeJob| worker_shared.execute(job));
        let pool = WorkerPool::new(queue, executor, options.workers)?;

        Ok(Self { shared, pool: Some(pool) })
    }

    /// Request a decode of `physical_index`.
    ///
    /// Never decodes the same page twice concurrently: a page already queued
    /// or running is coalesced, with its priority raised if needed.
    pub fn submit(&self, physical_index: u32, priority: DecodePriority) -> PendingDecode {
        let finished = |kind, outcome| PendingDecode {
            physical_index,
            kind,
            slot: DecodeSlot::finished(outcome),
        };

        let page_count = self.shared.source.page_count();
        if physical_index >= page_count {
            return finished(
                SubmitKind::Rejected,
                DecodeOutcome::Failed(format!(
                    "page {physical_index} out of range ({page_count} pages)"
                )),
            );
        }
        if self.shared.token.is_cancelled() {
            return finished(SubmitKind::Rejected, DecodeOutcome::Cancelled);
        }

        let cache = self.shared.cache.lock();
        if cache.contains(physical_index) {
            return finished(SubmitKind::Cached, DecodeOutcome::Ready);
        }

        let mut state = self.shared.state();
        if let Some(reason) = state.failed.get(&physical_index) {
            return finished(SubmitKind::Failed, DecodeOutcome::Failed(reason.clone()));
        }

        if let Some(slot) = state.in_flight.get(&physical_index) {
            let slot = slot.clone();
            state.stats.coalesced += 1;
            self.shared.queue.upgrade(physical_index, priority);
            return PendingDecode { physical_index, kind: SubmitKind::Coalesced, slot };
        }

        if self.shared.queue.push(physical_index, priority).is_none() {
            return finished(SubmitKind::Rejected, DecodeOutcome::Cancelled);
        }

        let slot = Arc::new(DecodeSlot::default());
        state.in_flight.insert(physical_index, slot.clone());
        state.stats.submitted += 1;
        drop(state);
        drop(cache);

        tracing::trace!(page = physical_index, ?priority, "queued page decode");
        PendingDecode { physical_index, kind: SubmitKind::Queued, slot }
    }

    /// Forget a recorded failure so the page can be decoded again.
    pub fn clear_failure(&self, physical_index: u32) -> bool {
        self.shared.state().failed.remove(&physical_index).is_some()
    }

    pub fn failure(&self, physical_index: u32) -> Option<String> {
        self.shared.state().failed.get(&physical_index).cloned()
    }

    pub fn is_failed(&self, physical_index: u32) -> bool {
        self.shared.state().failed.contains_key(&physical_index)
    }

    /// Physical indices that have failed, ascending.
    pub fn failed_indices(&self) -> Vec<u32> {
        let mut indices: Vec<u32> = self.shared.state().failed.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    pub fn is_pending(&self, physical_index: u32) -> bool {
        self.shared.state().in_flight.contains_key(&physical_index)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state().in_flight.len()
    }

    /// End the session: cancel the token, drop queued work, and resolve
    /// every pending handle as cancelled.
    ///
    /// Decodes already running finish on their worker but their results
    /// are discarded. Returns the number of pending decodes dropped.
    pub fn cancel_all(&self) -> usize {
        self.shared.token.cancel();
        self.shared.queue.drain();

        let slots: Vec<Arc<DecodeSlot>> = {
            let mut state = self.shared.state();
            let slots: Vec<_> = state.in_flight.drain().map(|(_, slot)| slot).collect();
            state.stats.cancelled += slots.len() as u64;
            slots
        };

        for slot in &slots {
            slot.finish(DecodeOutcome::Cancelled);
        }

        tracing::debug!(
            generation = self.shared.token.generation(),
            cancelled = slots.len(),
            "cancelled pending decodes"
        );
        slots.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    pub fn generation(&self) -> u64 {
        self.shared.token.generation()
    }

    pub fn token(&self) -> CancellationToken {
        self.shared.token.clone()
    }

    pub fn source(&self) -> &Arc<dyn DocumentSource> {
        &self.shared.source
    }

    pub fn cache(&self) -> &SharedPageCache {
        &self.shared.cache
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.state().stats
    }

    /// Stop the workers and wait for them to exit.
    pub fn shutdown(mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }

    /// Stop the workers without waiting.
    pub fn shutdown_nowait(mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown_nowait();
        }
    }
}

impl Drop for DecodeScheduler {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown_nowait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_source::{PageEntry, RgbaImage, SourceError, SourceFormat};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    /// Source whose decodes can be held open and counted.
    struct FakeSource {
        entries: Vec<PageEntry>,
        decodes: AtomicUsize,
        broken: Vec<u32>,
        panicking: Vec<u32>,
        gate: Mutex<bool>,
        opened: Condvar,
    }

    impl FakeSource {
        fn new(pages: u32) -> Self {
            Self {
                entries: (0..pages)
                    .map(|index| PageEntry {
                        physical_index: index,
                        name: format!("{index:03}.png"),
                        size_hint: 64,
                    })
                    .collect(),
                decodes: AtomicUsize::new(0),
                broken: Vec::new(),
                panicking: Vec::new(),
                gate: Mutex::new(true),
                opened: Condvar::new(),
            }
        }

        fn with_broken(mut self, broken: &[u32]) -> Self {
            self.broken = broken.to_vec();
            self
        }

        fn with_panicking(mut self, panicking: &[u32]) -> Self {
            self.panicking = panicking.to_vec();
            self
        }

        fn closed_gate(self) -> Self {
            *self.gate.lock().unwrap() = false;
            self
        }

        fn open_gate(&self) {
            *self.gate.lock().unwrap() = true;
            self.opened.notify_all();
        }

        fn decodes(&self) -> usize {
            self.decodes.load(Ordering::SeqCst)
        }
    }

    impl DocumentSource for FakeSource {
        fn format(&self) -> SourceFormat {
            SourceFormat::Archive
        }

        fn entries(&self) -> &[PageEntry] {
            &self.entries
        }

        fn decode_page(&self, physical_index: u32) -> Result<RgbaImage, SourceError> {
            self.decodes.fetch_add(1, Ordering::SeqCst);
            let gate = self.gate.lock().unwrap();
            drop(self.opened.wait_while(gate, |open| !*open).unwrap());

            if self.panicking.contains(&physical_index) {
                panic!("entry {physical_index} is malformed");
            }

            if self.broken.contains(&physical_index) {
                return Err(SourceError::DecodeFailed {
                    index: physical_index,
                    reason: "bad image data".to_owned(),
                });
            }
            Ok(RgbaImage::new(4, 4))
        }

        fn close(&self) {}
    }

    fn scheduler_for(source: Arc<FakeSource>, workers: usize) -> (DecodeScheduler, SharedPageCache) {
        let cache = SharedPageCache::new(8);
        let options = SchedulerOptions {
            generation: 1,
            workers: WorkerPoolConfig::new(workers).with_poll_interval(Duration::from_millis(10)),
            listener: None,
        };
        let scheduler = DecodeScheduler::new(source, cache.clone(), options).unwrap();
        (scheduler, cache)
    }

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn decoded_page_lands_in_cache() {
        let source = Arc::new(FakeSource::new(3));
        let (scheduler, cache) = scheduler_for(source.clone(), 1);

        let pending = scheduler.submit(1, DecodePriority::OnDemand);
        assert_eq!(pending.kind(), SubmitKind::Queued);
        assert_eq!(pending.wait(), DecodeOutcome::Ready);

        assert!(cache.contains(1));
        assert_eq!(scheduler.stats().decoded, 1);
        assert!(!scheduler.is_pending(1));
        scheduler.shutdown();
    }

    #[test]
    fn resident_page_is_not_decoded_again() {
        let source = Arc::new(FakeSource::new(2));
        let (scheduler, _cache) = scheduler_for(source.clone(), 1);

        scheduler.submit(0, DecodePriority::OnDemand).wait();
        let again = scheduler.submit(0, DecodePriority::OnDemand);

        assert_eq!(again.kind(), SubmitKind::Cached);
        assert_eq!(again.outcome(), Some(DecodeOutcome::Ready));
        assert_eq!(source.decodes(), 1);
        scheduler.shutdown();
    }

    #[test]
    fn concurrent_requests_share_one_decode() {
        let source = Arc::new(FakeSource::new(4).closed_gate());
        let (scheduler, cache) = scheduler_for(source.clone(), 4);
        let scheduler = Arc::new(scheduler);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scheduler = scheduler.clone();
                thread::spawn(move || scheduler.submit(2, DecodePriority::OnDemand))
            })
            .collect();
        let pending: Vec<PendingDecode> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        source.open_gate();
        for handle in &pending {
            assert_eq!(handle.wait(), DecodeOutcome::Ready);
        }

        assert_eq!(source.decodes(), 1);
        assert_eq!(pending.iter().filter(|p| p.kind() == SubmitKind::Queued).count(), 1);
        assert_eq!(scheduler.stats().coalesced, 7);
        assert!(cache.contains(2));
    }

    #[test]
    fn coalesced_prefetch_is_upgraded() {
        let source = Arc::new(FakeSource::new(10).closed_gate());
        let (scheduler, _cache) = scheduler_for(source.clone(), 1);

        // Occupy the single worker so the rest stay queued.
        scheduler.submit(0, DecodePriority::OnDemand);
        assert!(wait_until(Duration::from_secs(5), || source.decodes() == 1));

        scheduler.submit(5, DecodePriority::Prefetch);
        scheduler.submit(6, DecodePriority::Prefetch);
        let upgraded = scheduler.submit(6, DecodePriority::OnDemand);
        assert_eq!(upgraded.kind(), SubmitKind::Coalesced);
        assert!(scheduler.shared.queue.contains(6));

        let next = scheduler.shared.queue.pop().unwrap();
        assert_eq!(next.physical_index, 6);
        assert_eq!(next.priority, DecodePriority::OnDemand);

        source.open_gate();
        scheduler.cancel_all();
    }

    #[test]
    fn failed_page_is_not_retried_until_cleared() {
        let source = Arc::new(FakeSource::new(3).with_broken(&[1]));
        let (scheduler, cache) = scheduler_for(source.clone(), 1);

        let first = scheduler.submit(1, DecodePriority::OnDemand);
        assert!(matches!(first.wait(), DecodeOutcome::Failed(reason) if reason.contains("bad image")));
        assert!(scheduler.is_failed(1));
        assert!(!cache.contains(1));

        let again = scheduler.submit(1, DecodePriority::Prefetch);
        assert_eq!(again.kind(), SubmitKind::Failed);
        assert_eq!(source.decodes(), 1);

        assert!(scheduler.clear_failure(1));
        let retried = scheduler.submit(1, DecodePriority::OnDemand);
        assert_eq!(retried.kind(), SubmitKind::Queued);
        retried.wait();
        assert_eq!(source.decodes(), 2);
        assert_eq!(scheduler.failed_indices(), vec![1]);
        scheduler.shutdown();
    }

    #[test]
    fn panicking_decode_fails_its_page_and_keeps_the_worker() {
        let source = Arc::new(FakeSource::new(3).with_panicking(&[0]));
        let (scheduler, cache) = scheduler_for(source.clone(), 1);

        let bad = scheduler.submit(0, DecodePriority::OnDemand);
        assert!(matches!(
            bad.wait_timeout(Duration::from_secs(5)),
            Some(DecodeOutcome::Failed(reason)) if reason.contains("malformed")
        ));
        assert!(!scheduler.is_pending(0));
        assert!(scheduler.is_failed(0));

        // The single worker survived and still serves the rest of the document.
        let good = scheduler.submit(1, DecodePriority::OnDemand);
        assert_eq!(good.wait_timeout(Duration::from_secs(5)), Some(DecodeOutcome::Ready));
        assert!(cache.contains(1));
        assert_eq!(scheduler.pending_count(), 0);
        assert_eq!(scheduler.stats().failed, 1);
        scheduler.shutdown();
    }

    #[test]
    fn out_of_range_is_rejected() {
        let source = Arc::new(FakeSource::new(2));
        let (scheduler, _cache) = scheduler_for(source.clone(), 1);

        let pending = scheduler.submit(2, DecodePriority::OnDemand);
        assert_eq!(pending.kind(), SubmitKind::Rejected);
        assert!(matches!(pending.outcome(), Some(DecodeOutcome::Failed(_))));
        assert_eq!(source.decodes(), 0);
        scheduler.shutdown();
    }

    #[test]
    fn completion_after_cancel_is_discarded() {
        let source = Arc::new(FakeSource::new(3).closed_gate());
        let (scheduler, cache) = scheduler_for(source.clone(), 1);

        let running = scheduler.submit(0, DecodePriority::OnDemand);
        assert!(wait_until(Duration::from_secs(5), || source.decodes() == 1));
        let queued = scheduler.submit(1, DecodePriority::Prefetch);

        assert_eq!(scheduler.cancel_all(), 2);
        assert_eq!(running.outcome(), Some(DecodeOutcome::Cancelled));
        assert_eq!(queued.outcome(), Some(DecodeOutcome::Cancelled));

        source.open_gate();
        assert!(wait_until(Duration::from_secs(5), || scheduler.stats().discarded == 1));

        assert!(cache.is_empty());
        assert_eq!(source.decodes(), 1);
        assert_eq!(
            scheduler.submit(2, DecodePriority::OnDemand).kind(),
            SubmitKind::Rejected
        );
        scheduler.shutdown();
    }

    #[test]
    fn listener_receives_ready_and_failed() {
        let source = Arc::new(FakeSource::new(3).with_broken(&[2]));
        let cache = SharedPageCache::new(8);
        let events = Arc::new(Mutex::new(Vec::<DecodeEvent>::new()));
        let sink = events.clone();

        let options = SchedulerOptions {
            generation: 7,
            workers: WorkerPoolConfig::new(1).with_poll_interval(Duration::from_millis(10)),
            listener: Some(Arc::new(move |event: DecodeEvent| sink.lock().unwrap().push(event))),
        };
        let scheduler = DecodeScheduler::new(source, cache, options).unwrap();
        assert_eq!(scheduler.generation(), 7);

        scheduler.submit(0, DecodePriority::OnDemand).wait();
        scheduler.submit(2, DecodePriority::OnDemand).wait();
        scheduler.shutdown();

        let events = events.lock().unwrap();
        assert_eq!(events[0], DecodeEvent::Ready { physical_index: 0 });
        assert!(matches!(&events[1], DecodeEvent::Failed { physical_index: 2, .. }));
    }

    #[test]
    fn wait_timeout_reports_pending() {
        let source = Arc::new(FakeSource::new(1).closed_gate());
        let (scheduler, _cache) = scheduler_for(source.clone(), 1);

        let pending = scheduler.submit(0, DecodePriority::OnDemand);
        assert_eq!(pending.wait_timeout(Duration::from_millis(20)), None);
        assert!(!pending.is_finished());

        source.open_gate();
        assert_eq!(pending.wait_timeout(Duration::from_secs(5)), Some(DecodeOutcome::Ready));
        scheduler.shutdown();
    }
}
