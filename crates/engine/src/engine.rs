//! The reader engine: one open document, its page cache, decode workers,
//! and the synchronized viewport position.
//!
//! The engine is driven from a single interactive thread. Opening and
//! decoding run in the background; their results are picked up by
//! [`ReaderEngine::tick`] and reported through [`ReaderEngine::drain_events`].

use crate::config::ReaderConfig;
use crate::error::ReaderError;
use crate::mapping::{to_logical, to_physical, IndexMapper, ReadingDirection};
use crate::prefetch::Prefetcher;
use crate::sync::{SyncUpdate, ViewMode, ViewportSynchronizer};
use folio_cache::{CacheStats, DecodedPage, SharedPageCache};
use folio_scheduler::{
    DecodeEvent, DecodeOutcome, DecodePriority, DecodeScheduler, PendingDecode, SchedulerOptions,
    SchedulerStats, WorkerPoolConfig,
};
use folio_source::{DefaultOpener, DocumentSource, OpenSource, SourceError, SourceOpener};
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Undrained events kept before the oldest are dropped.
pub const MAX_PENDING_EVENTS: usize = 1024;

/// Identity of an opened document.
///
/// Two opens with the same identity refer to the same document, whatever
/// bytes are handed over the second time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&Path> for DocumentId {
    fn from(value: &Path) -> Self {
        Self(value.display().to_string())
    }
}

/// Document state as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadingState {
    /// Nothing has been opened yet.
    Idle,
    Loading,
    Ready,
    Error(ReaderError),
    /// The last document was closed.
    Closed,
}

impl LoadingState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn error(&self) -> Option<&ReaderError> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }
}

/// Notifications for the UI, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    StateChanged(LoadingState),
    /// The authoritative logical page changed.
    PositionChanged { logical: u32 },
    /// A page finished decoding and can be rendered.
    PageReady { logical: u32 },
    /// A page could not be decoded. `error` carries the logical index.
    PageFailed { logical: u32, error: ReaderError },
    /// Move the pager to this physical index.
    ScrollPaged { physical: u32 },
    /// Move the continuous list to this physical index.
    ScrollContinuous { physical: u32 },
}

type OpenResult = Result<Arc<dyn DocumentSource>, SourceError>;

struct Opening {
    generation: u64,
    receiver: Receiver<OpenResult>,
    deadline: Instant,
    initial_logical: u32,
}

struct Session {
    source: Arc<dyn DocumentSource>,
    scheduler: DecodeScheduler,
    decode_events: Receiver<DecodeEvent>,
    /// Decodes of the opening window; the document is ready once all resolve.
    first_window: Vec<PendingDecode>,
}

pub struct ReaderEngine {
    config: ReaderConfig,
    opener: Arc<dyn SourceOpener>,
    cache: SharedPageCache,
    prefetcher: Prefetcher,
    sync: ViewportSynchronizer,
    direction: ReadingDirection,
    mode: ViewMode,
    generation: u64,
    document: Option<DocumentId>,
    state: LoadingState,
    opening: Option<Opening>,
    session: Option<Session>,
    /// Bounded at [`MAX_PENDING_EVENTS`]; the host is expected to call
    /// [`drain_events`](Self::drain_events) every frame.
    events: VecDeque<EngineEvent>,
}

impl ReaderEngine {
    /// Engine using the built-in archive and PDF sources.
    pub fn new(config: ReaderConfig) -> Self {
        let opener = Arc::new(DefaultOpener::new(config.pdf_render_scale));
        Self::with_opener(config, opener)
    }

    pub fn with_opener(config: ReaderConfig, opener: Arc<dyn SourceOpener>) -> Self {
        let radius = config.effective_prefetch_pages();
        if radius != config.prefetch_pages {
            tracing::warn!(
                configured = config.prefetch_pages,
                radius,
                capacity = config.max_cached_pages,
                "prefetch window shrunk to fit the page cache"
            );
        }

        Self {
            cache: SharedPageCache::new(config.max_cached_pages),
            prefetcher: Prefetcher::new(radius),
            sync: ViewportSynchronizer::new(config.debounce),
            direction: ReadingDirection::default(),
            mode: ViewMode::default(),
            generation: 0,
            document: None,
            state: LoadingState::Idle,
            opening: None,
            session: None,
            events: VecDeque::new(),
            config,
            opener,
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Start opening a document on a background thread.
    ///
    /// `initial_logical` is the persisted reading position; it is clamped
    /// once the page count is known. Re-opening the identity that is already
    /// loading or ready does nothing and returns `false`. Any other open
    /// tears the previous document down first.
    pub fn open(
        &mut self,
        id: impl Into<DocumentId>,
        source: impl Into<OpenSource>,
        initial_logical: u32,
    ) -> bool {
        let id = id.into();
        if self.document.as_ref() == Some(&id)
            && matches!(self.state, LoadingState::Loading | LoadingState::Ready)
        {
            tracing::debug!(document = %id, "document already open");
            return false;
        }

        self.teardown();
        self.generation += 1;
        let generation = self.generation;

        let (sender, receiver) = mpsc::channel();
        let opener = self.opener.clone();
        let raw = source.into();
        let spawned = thread::Builder::new()
            .name(format!("folio-open-{generation}"))
            .spawn(move || {
                let result = opener.open(raw);
                // Nobody is listening any more: release what was opened.
                if let Err(mpsc::SendError(Ok(source))) = sender.send(result) {
                    source.close();
                }
            });

        tracing::info!(document = %id, generation, "opening document");
        self.document = Some(id);
        self.sync.begin_loading();
        self.set_state(LoadingState::Loading);

        match spawned {
            Ok(_) => {
                self.opening = Some(Opening {
                    generation,
                    receiver,
                    deadline: Instant::now() + self.config.load_timeout,
                    initial_logical,
                });
            }
            Err(err) => {
                self.fail(ReaderError::SourceUnavailable(format!(
                    "cannot start open thread: {err}"
                )));
            }
        }
        true
    }

    /// Advance background work: finish or time out a pending open, collect
    /// decode completions, and commit a settled viewport observation.
    pub fn tick(&mut self, now: Instant) {
        self.poll_open(now);
        self.pump_decode_events();
        self.poll_first_window();
        if let Some(update) = self.sync.poll(now) {
            self.apply(update, false);
        }
    }

    /// Earliest instant at which [`tick`](Self::tick) has time-based work.
    pub fn next_wakeup(&self) -> Option<Instant> {
        let open_deadline = self.opening.as_ref().map(|opening| opening.deadline);
        match (open_deadline, self.sync.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn poll_open(&mut self, now: Instant) {
        let Some(opening) = self.opening.take() else {
            return;
        };

        match opening.receiver.try_recv() {
            Ok(Ok(source)) => {
                self.finish_open(opening.generation, source, opening.initial_logical)
            }
            Ok(Err(err)) => self.fail(err.into()),
            Err(TryRecvError::Empty) if now >= opening.deadline => {
                self.fail(ReaderError::LoadTimeout(self.config.load_timeout));
            }
            Err(TryRecvError::Empty) => self.opening = Some(opening),
            Err(TryRecvError::Disconnected) => {
                self.fail(ReaderError::SourceUnavailable(
                    "open thread exited without a result".to_string(),
                ));
            }
        }
    }

    fn finish_open(&mut self, generation: u64, source: Arc<dyn DocumentSource>, initial: u32) {
        if generation != self.generation {
            source.close();
            return;
        }

        let total = source.page_count();
        if total == 0 {
            source.close();
            self.fail(ReaderError::SourceUnavailable("document has no pages".to_string()));
            return;
        }

        let (sender, decode_events) = mpsc::channel();
        let sender = Mutex::new(sender);
        let options = SchedulerOptions {
            generation,
            workers: WorkerPoolConfig::new(self.config.decode_workers),
            listener: Some(Arc::new(move |event: DecodeEvent| {
                if let Ok(sender) = sender.lock() {
                    let _ = sender.send(event);
                }
            })),
        };

        let scheduler = match DecodeScheduler::new(source.clone(), self.cache.clone(), options) {
            Ok(scheduler) => scheduler,
            Err(err) => {
                source.close();
                self.fail(ReaderError::SourceUnavailable(format!(
                    "cannot start decode workers: {err}"
                )));
                return;
            }
        };

        tracing::debug!(
            pages = total,
            format = source.format().as_str(),
            generation,
            "page count known, decoding first window"
        );
        self.session =
            Some(Session { source, scheduler, decode_events, first_window: Vec::new() });

        // The load timer is already gone; the state stays Loading until the
        // first window has been decoded.
        if let Some(update) = self.sync.ready(total, initial, self.direction, self.mode) {
            let first_window = self.apply(update, true);
            if let Some(session) = &mut self.session {
                session.first_window = first_window;
            }
        }
        self.poll_first_window();
    }

    fn poll_first_window(&mut self) {
        if self.state != LoadingState::Loading {
            return;
        }
        let Some(session) = &mut self.session else {
            return;
        };
        if !session.first_window.iter().all(PendingDecode::is_finished) {
            return;
        }
        session.first_window.clear();

        tracing::info!(
            pages = self.sync.total(),
            generation = self.generation,
            "document ready"
        );
        self.set_state(LoadingState::Ready);
    }

    fn fail(&mut self, error: ReaderError) {
        if error.is_terminal() {
            tracing::error!(generation = self.generation, error = %error, "document failed");
        } else {
            tracing::warn!(generation = self.generation, error = %error, "document failed");
        }
        self.opening = None;
        self.sync.fail(error.clone());
        self.set_state(LoadingState::Error(error));
    }

    fn set_state(&mut self, state: LoadingState) {
        if self.state != state {
            self.state = state.clone();
            self.push_event(EngineEvent::StateChanged(state));
        }
    }

    fn push_event(&mut self, event: EngineEvent) {
        if self.events.len() >= MAX_PENDING_EVENTS {
            self.events.pop_front();
            tracing::debug!(capacity = MAX_PENDING_EVENTS, "event queue full, dropping oldest");
        }
        self.events.push_back(event);
    }

    /// Emit the UI side of a synchronizer update and warm the window.
    /// Returns the decodes submitted.
    fn apply(&mut self, update: SyncUpdate, force_prefetch: bool) -> Vec<PendingDecode> {
        if update.logical_changed {
            self.push_event(EngineEvent::PositionChanged { logical: update.logical });
        }
        if let Some(physical) = update.paged {
            self.push_event(EngineEvent::ScrollPaged { physical });
        }
        if let Some(physical) = update.continuous {
            self.push_event(EngineEvent::ScrollContinuous { physical });
        }
        if update.logical_changed || force_prefetch {
            self.prefetch()
        } else {
            Vec::new()
        }
    }

    fn prefetch(&self) -> Vec<PendingDecode> {
        match &self.session {
            Some(session) => self.prefetcher.schedule(
                self.sync.logical(),
                self.sync.total(),
                self.direction,
                &session.scheduler,
            ),
            None => Vec::new(),
        }
    }

    fn pump_decode_events(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        let received: Vec<DecodeEvent> = session.decode_events.try_iter().collect();
        let mapper = IndexMapper::new(self.sync.total(), self.direction);

        for event in received {
            let event = match event {
                DecodeEvent::Ready { physical_index } => {
                    EngineEvent::PageReady { logical: mapper.to_logical(physical_index) }
                }
                DecodeEvent::Failed { physical_index, reason } => {
                    let logical = mapper.to_logical(physical_index);
                    EngineEvent::PageFailed {
                        logical,
                        error: ReaderError::DecodeFailed { index: logical, reason },
                    }
                }
            };
            self.push_event(event);
        }
    }

    /// Jump to a logical page.
    ///
    /// Applied immediately. A page whose earlier decode failed is retried.
    /// Returns `false` if no document is ready.
    pub fn request_page(&mut self, logical: u32) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        if !self.sync.is_ready() {
            return false;
        }

        let total = self.sync.total();
        let physical = to_physical(logical, total, self.direction);
        if session.scheduler.clear_failure(physical) {
            tracing::debug!(logical, physical, "retrying failed page on request");
        }

        match self.sync.request_page(logical) {
            Some(update) => {
                self.apply(update, true);
                true
            }
            None => false,
        }
    }

    /// Change reading direction. The logical page is kept; both views move
    /// to its new physical index.
    pub fn set_reading_direction(&mut self, direction: ReadingDirection) {
        if direction == self.direction {
            return;
        }
        self.direction = direction;
        if let Some(update) = self.sync.set_direction(direction) {
            self.apply(update, true);
        }
    }

    pub fn reading_direction(&self) -> ReadingDirection {
        self.direction
    }

    pub fn set_display_mode(&mut self, mode: ViewMode) {
        self.mode = mode;
        if let Some(update) = self.sync.set_mode(mode) {
            self.apply(update, false);
        }
    }

    pub fn display_mode(&self) -> ViewMode {
        self.mode
    }

    /// Report the pager's position. Committed after the debounce period.
    pub fn observe_paged(&mut self, physical: u32, now: Instant) -> bool {
        self.sync.observe(ViewMode::Paged, physical, now)
    }

    /// Report the continuous list's position. Committed after the debounce
    /// period.
    pub fn observe_continuous(&mut self, physical: u32, now: Instant) -> bool {
        self.sync.observe(ViewMode::Continuous, physical, now)
    }

    /// Render a decoded page if it is resident.
    ///
    /// Never decodes and never waits for a decode. The page reference is
    /// only valid inside `render`.
    pub fn on_page_available<R>(
        &self,
        logical: u32,
        render: impl FnOnce(&DecodedPage) -> R,
    ) -> Option<R> {
        if !self.state.is_ready() || logical >= self.sync.total() {
            return None;
        }
        let physical = to_physical(logical, self.sync.total(), self.direction);
        self.cache.with_page(physical, render)
    }

    /// Events since the last call.
    ///
    /// Hosts should drain every frame. At most [`MAX_PENDING_EVENTS`] are
    /// kept; older ones are dropped first.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.pump_decode_events();
        self.events.drain(..).collect()
    }

    pub fn current_logical_page(&self) -> u32 {
        self.sync.logical()
    }

    /// Page count of the ready document, 0 otherwise.
    pub fn total_pages(&self) -> u32 {
        if self.state.is_ready() {
            self.sync.total()
        } else {
            0
        }
    }

    pub fn loading_state(&self) -> &LoadingState {
        &self.state
    }

    pub fn paged_position(&self) -> Option<u32> {
        self.state.is_ready().then(|| self.sync.paged_position())
    }

    pub fn continuous_position(&self) -> Option<u32> {
        self.state.is_ready().then(|| self.sync.continuous_position())
    }

    pub fn document_id(&self) -> Option<&DocumentId> {
        self.document.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Logical pages whose last decode failed, ascending.
    pub fn failed_pages(&self) -> Vec<u32> {
        let Some(session) = &self.session else {
            return Vec::new();
        };
        let total = self.sync.total();
        let mut pages: Vec<u32> = session
            .scheduler
            .failed_indices()
            .into_iter()
            .map(|physical| to_logical(physical, total, self.direction))
            .collect();
        pages.sort_unstable();
        pages
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn scheduler_stats(&self) -> Option<SchedulerStats> {
        self.session.as_ref().map(|session| session.scheduler.stats())
    }

    /// Block until the pending open resolves or `timeout` passes.
    pub fn wait_for_load(&mut self, timeout: Duration) -> &LoadingState {
        let started = Instant::now();
        loop {
            self.tick(Instant::now());
            if self.state != LoadingState::Loading || started.elapsed() >= timeout {
                break;
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
        &self.state
    }

    /// Block until `logical` is decoded, for callers that choose to wait.
    ///
    /// Returns `Ok(false)` if nothing is ready or the timeout passed first.
    pub fn wait_for_page(&mut self, logical: u32, timeout: Duration) -> Result<bool, ReaderError> {
        if let LoadingState::Error(error) = &self.state {
            return Err(error.clone());
        }
        let Some(session) = &self.session else {
            return Ok(false);
        };
        let total = self.sync.total();
        if logical >= total {
            return Ok(false);
        }

        let physical = to_physical(logical, total, self.direction);
        let pending = session.scheduler.submit(physical, DecodePriority::OnDemand);
        let outcome = pending.wait_timeout(timeout);
        self.pump_decode_events();

        match outcome {
            Some(DecodeOutcome::Ready) => Ok(true),
            Some(DecodeOutcome::Failed(reason)) => {
                Err(ReaderError::DecodeFailed { index: logical, reason })
            }
            Some(DecodeOutcome::Cancelled) => Err(ReaderError::Cancelled),
            None => Ok(false),
        }
    }

    /// Block until no decode is pending or `timeout` passes, ticking the
    /// engine meanwhile. Returns `true` if the engine went idle.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let started = Instant::now();
        loop {
            self.tick(Instant::now());
            let pending = self
                .session
                .as_ref()
                .map_or(0, |session| session.scheduler.pending_count());
            if pending == 0 {
                self.pump_decode_events();
                return true;
            }
            if started.elapsed() >= timeout {
                return false;
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Tear the current document down: cancel decodes, release every cached
    /// page, close the source.
    pub fn close(&mut self) {
        if self.document.is_none() && self.session.is_none() && self.opening.is_none() {
            return;
        }

        self.teardown();
        if let Some(document) = self.document.take() {
            tracing::info!(document = %document, "document closed");
        }
        self.sync.dispose();
        self.set_state(LoadingState::Closed);
    }

    fn teardown(&mut self) {
        self.opening = None;

        let Some(Session { source, scheduler, .. }) = self.session.take() else {
            self.cache.clear();
            return;
        };

        // The session token is cancelled before the cache is emptied, so a
        // decode finishing in between cannot repopulate it.
        let cancelled = scheduler.cancel_all();
        self.cache.clear();
        source.close();
        scheduler.shutdown_nowait();

        tracing::debug!(generation = self.generation, cancelled, "document session torn down");
    }
}

impl Drop for ReaderEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}
