//! Prefetch window around the current page.

use crate::mapping::{to_physical, ReadingDirection};
use folio_scheduler::{DecodePriority, DecodeScheduler, PendingDecode};

/// Decides which physical pages to warm around the reader's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefetcher {
    radius: u32,
}

impl Prefetcher {
    pub fn new(radius: u32) -> Self {
        Self { radius }
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    /// Physical indices within `radius` of the current page, nearest first.
    ///
    /// The current page comes first, then alternating neighbours at growing
    /// distance. Indices outside the document are dropped.
    pub fn window(&self, current_logical: u32, total: u32, direction: ReadingDirection) -> Vec<u32> {
        if total == 0 {
            return Vec::new();
        }

        let center = to_physical(current_logical, total, direction);
        let last = total - 1;
        let mut pages = vec![center];

        for offset in 1..=self.radius {
            if let Some(lower) = center.checked_sub(offset) {
                pages.push(lower);
            }
            if let Some(upper) = center.checked_add(offset).filter(|&upper| upper <= last) {
                pages.push(upper);
            }
        }

        pages
    }

    /// Submit every page of the window that is not already resident,
    /// in flight, or known to fail.
    ///
    /// The current page is submitted at on-demand priority, neighbours at
    /// prefetch priority. Returns handles for the submissions made.
    pub fn schedule(
        &self,
        current_logical: u32,
        total: u32,
        direction: ReadingDirection,
        scheduler: &DecodeScheduler,
    ) -> Vec<PendingDecode> {
        let window = self.window(current_logical, total, direction);
        let center = window.first().copied();
        let mut submitted = Vec::new();

        for physical_index in window {
            if scheduler.cache().contains(physical_index)
                || scheduler.is_pending(physical_index)
                || scheduler.is_failed(physical_index)
            {
                continue;
            }

            let priority = if Some(physical_index) == center {
                DecodePriority::OnDemand
            } else {
                DecodePriority::Prefetch
            };
            submitted.push(scheduler.submit(physical_index, priority));
        }

        tracing::trace!(
            logical = current_logical,
            submitted = submitted.len(),
            "scheduled prefetch window"
        );
        submitted
    }
}

impl Default for Prefetcher {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_PREFETCH_PAGES)
    }
}
