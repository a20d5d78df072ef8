//! Folio reader engine
//!
//! Keeps a bounded working set of decoded pages for one open comic archive
//! or PDF, decodes ahead of the reader, and keeps the paged and continuous
//! views on the same logical page in either reading direction.
//!
//! # Example
//!
//! ```no_run
//! use folio_engine::{EngineEvent, LoadingState, ReaderConfig, ReaderEngine};
//! use std::path::Path;
//! use std::time::{Duration, Instant};
//!
//! let path = Path::new("volume-01.cbz");
//! let mut engine = ReaderEngine::new(ReaderConfig::default());
//! engine.open(path, path.to_path_buf(), 0);
//!
//! if engine.wait_for_load(Duration::from_secs(10)) == &LoadingState::Ready {
//!     engine.request_page(4);
//!     engine.tick(Instant::now());
//!     for event in engine.drain_events() {
//!         if let EngineEvent::PageReady { logical } = event {
//!             engine.on_page_available(logical, |page| println!("{}x{}", page.width(), page.height()));
//!         }
//!     }
//! }
//! ```

mod config;
mod engine;
mod error;
mod mapping;
mod prefetch;
mod sync;

#[cfg(test)]
mod test_support;

pub use config::{ReaderConfig, DEFAULT_DEBOUNCE, DEFAULT_LOAD_TIMEOUT, DEFAULT_PREFETCH_PAGES};
pub use engine::{DocumentId, EngineEvent, LoadingState, ReaderEngine, MAX_PENDING_EVENTS};
pub use error::{ConfigError, ReaderError};
pub use mapping::{to_logical, to_physical, IndexMapper, ReadingDirection};
pub use prefetch::Prefetcher;
pub use sync::{SyncPhase, SyncUpdate, ViewMode, ViewportSynchronizer};

pub use folio_cache::{CacheStats, DecodedPage};
pub use folio_scheduler::SchedulerStats;
pub use folio_source::{OpenSource, SourceFormat};
