//! Viewport synchronization.
//!
//! The reader has two views of the same document: a pager showing one page
//! at a time and a continuous scrolling list. Both report positions as
//! physical indices. This module keeps one authoritative logical page and
//! derives both view positions from it, so a change in one view is
//! mirrored to the other without the mirror write echoing back.
//!
//! The synchronizer is a plain state machine. Time is passed in, and every
//! change is returned as a [`SyncUpdate`] for the caller to apply.

use crate::error::ReaderError;
use crate::mapping::{to_logical, to_physical, ReadingDirection};
use std::time::{Duration, Instant};

/// Which view is currently shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ViewMode {
    #[default]
    Paged,
    Continuous,
}

/// Lifecycle of the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPhase {
    Uninitialized,
    Loading,
    Ready,
    Disposed,
    Failed(ReaderError),
}

/// Result of a committed position change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncUpdate {
    /// Authoritative logical page after the change
    pub logical: u32,
    /// True if `logical` differs from the previous logical page
    pub logical_changed: bool,
    /// New pager position to apply, if the pager must move
    pub paged: Option<u32>,
    /// New list position to apply, if the list must move
    pub continuous: Option<u32>,
}

impl SyncUpdate {
    pub fn has_writes(&self) -> bool {
        self.paged.is_some() || self.continuous.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingObservation {
    view: ViewMode,
    physical: u32,
    at: Instant,
}

#[derive(Debug, Clone)]
pub struct ViewportSynchronizer {
    phase: SyncPhase,
    debounce: Duration,
    total: u32,
    direction: ReadingDirection,
    mode: ViewMode,
    logical: u32,
    paged: u32,
    continuous: u32,
    pending: Option<PendingObservation>,
}

impl ViewportSynchronizer {
    pub fn new(debounce: Duration) -> Self {
        Self {
            phase: SyncPhase::Uninitialized,
            debounce,
            total: 0,
            direction: ReadingDirection::default(),
            mode: ViewMode::default(),
            logical: 0,
            paged: 0,
            continuous: 0,
            pending: None,
        }
    }

    pub fn phase(&self) -> &SyncPhase {
        &self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == SyncPhase::Ready
    }

    pub fn logical(&self) -> u32 {
        self.logical
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn direction(&self) -> ReadingDirection {
        self.direction
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn paged_position(&self) -> u32 {
        self.paged
    }

    pub fn continuous_position(&self) -> u32 {
        self.continuous
    }

    /// Position of the view that is currently shown.
    pub fn authoritative_position(&self) -> u32 {
        match self.mode {
            ViewMode::Paged => self.paged,
            ViewMode::Continuous => self.continuous,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// When the pending observation settles, if there is one.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.map(|pending| pending.at + self.debounce)
    }

    /// A new document is being opened. Valid from any phase.
    pub fn begin_loading(&mut self) {
        self.phase = SyncPhase::Loading;
        self.total = 0;
        self.logical = 0;
        self.paged = 0;
        self.continuous = 0;
        self.pending = None;
    }

    /// The page count is known. Commits the initial position, clamped to the
    /// document, and positions both views on it.
    pub fn ready(
        &mut self,
        total: u32,
        initial_logical: u32,
        direction: ReadingDirection,
        mode: ViewMode,
    ) -> Option<SyncUpdate> {
        if self.phase != SyncPhase::Loading {
            return None;
        }

        self.phase = SyncPhase::Ready;
        self.total = total;
        self.direction = direction;
        self.mode = mode;
        self.logical = initial_logical.min(total.saturating_sub(1));

        let physical = self.physical_of(self.logical);
        self.paged = physical;
        self.continuous = physical;

        Some(SyncUpdate {
            logical: self.logical,
            logical_changed: true,
            paged: Some(physical),
            continuous: Some(physical),
        })
    }

    /// Terminal failure of the current open.
    pub fn fail(&mut self, error: ReaderError) {
        self.phase = SyncPhase::Failed(error);
        self.pending = None;
    }

    pub fn dispose(&mut self) {
        self.phase = SyncPhase::Disposed;
        self.pending = None;
    }

    /// Record a position reported by one of the views.
    ///
    /// Nothing is committed until the position has been quiet for the
    /// debounce period; see [`poll`](Self::poll). Returns `false` if the
    /// observation was ignored.
    pub fn observe(&mut self, view: ViewMode, physical: u32, now: Instant) -> bool {
        if !self.is_ready() || self.total == 0 {
            return false;
        }

        let physical = physical.min(self.total - 1);
        if self.pending.is_none() && physical == self.position_of(view) {
            // Echo of a position this synchronizer wrote.
            return false;
        }

        self.pending = Some(PendingObservation { view, physical, at: now });
        true
    }

    /// Commit the pending observation once it has settled.
    pub fn poll(&mut self, now: Instant) -> Option<SyncUpdate> {
        let pending = self.pending?;
        if now.saturating_duration_since(pending.at) < self.debounce {
            return None;
        }
        self.pending = None;

        if !self.is_ready() {
            return None;
        }

        self.set_position_of(pending.view, pending.physical);

        let logical = to_logical(pending.physical, self.total, self.direction);
        if logical == self.logical {
            return None;
        }
        self.logical = logical;

        let mut update = SyncUpdate { logical, logical_changed: true, paged: None, continuous: None };
        // Mirror into the other view only if it is not already there.
        match pending.view {
            ViewMode::Paged if self.continuous != pending.physical => {
                self.continuous = pending.physical;
                update.continuous = Some(pending.physical);
            }
            ViewMode::Continuous if self.paged != pending.physical => {
                self.paged = pending.physical;
                update.paged = Some(pending.physical);
            }
            _ => {}
        }

        Some(update)
    }

    /// Explicit jump. Applied immediately and discards any pending
    /// observation.
    pub fn request_page(&mut self, logical: u32) -> Option<SyncUpdate> {
        if !self.is_ready() {
            return None;
        }

        self.pending = None;
        let logical = logical.min(self.total.saturating_sub(1));
        let logical_changed = logical != self.logical;
        self.logical = logical;

        Some(self.align_views(logical_changed))
    }

    /// Change reading direction, keeping the logical page.
    pub fn set_direction(&mut self, direction: ReadingDirection) -> Option<SyncUpdate> {
        self.direction = direction;
        if !self.is_ready() {
            return None;
        }

        self.pending = None;
        Some(self.align_views(false))
    }

    /// Switch the shown view, keeping the logical page.
    pub fn set_mode(&mut self, mode: ViewMode) -> Option<SyncUpdate> {
        self.mode = mode;
        if !self.is_ready() {
            return None;
        }

        self.pending = None;
        Some(self.align_views(false))
    }

    fn physical_of(&self, logical: u32) -> u32 {
        to_physical(logical, self.total, self.direction)
    }

    fn position_of(&self, view: ViewMode) -> u32 {
        match view {
            ViewMode::Paged => self.paged,
            ViewMode::Continuous => self.continuous,
        }
    }

    fn set_position_of(&mut self, view: ViewMode, physical: u32) {
        match view {
            ViewMode::Paged => self.paged = physical,
            ViewMode::Continuous => self.continuous = physical,
        }
    }

    /// Move both views onto the current logical page, writing only the ones
    /// that differ.
    fn align_views(&mut self, logical_changed: bool) -> SyncUpdate {
        let physical = self.physical_of(self.logical);
        let mut update = SyncUpdate {
            logical: self.logical,
            logical_changed,
            paged: None,
            continuous: None,
        };

        if self.paged != physical {
            self.paged = physical;
            update.paged = Some(physical);
        }
        if self.continuous != physical {
            self.continuous = physical;
            update.continuous = Some(physical);
        }

        update
    }
}
