//! Folio Page Cache Library
//!
//! Bounded, access-ordered storage for decoded page rasters. Every page is
//! owned by exactly one cache slot and released exactly once, when it is
//! evicted, overwritten, or cleared with the rest of the document.

pub mod page;
pub mod page_cache;

pub use page::{DecodedPage, ReleaseHook};
pub use page_cache::{CacheStats, PageCache, SharedPageCache, DEFAULT_MAX_CACHED_PAGES};
