//! Session cancellation tokens
//!
//! Every open document gets one token, stamped with the document's
//! generation. Decode jobs carry a clone; a completion whose token has been
//! cancelled is discarded instead of being written to the page cache.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Liveness token tied to one document generation.
///
/// Clones share the cancellation flag. Cancellation is one-way: a new
/// document gets a new token rather than reviving an old one.
///
/// # Example
///
/// ```
/// use folio_scheduler::CancellationToken;
///
/// let token = CancellationToken::new(3);
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// assert!(!worker_token.is_live_for(3));
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    generation: u64,
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a live token for a document generation
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancel this token
    ///
    /// All clones observe the cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// True while uncancelled and still stamped with `generation`.
    pub fn is_live_for(&self, generation: u64) -> bool {
        self.generation == generation && !self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_starts_live() {
        let token = CancellationToken::new(1);
        assert!(!token.is_cancelled());
        assert!(token.is_live_for(1));
        assert_eq!(token.generation(), 1);
    }

    #[test]
    fn test_clone_observes_cancel() {
        let token1 = CancellationToken::new(1);
        let token2 = token1.clone();

        token1.cancel();
        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());
    }

    #[test]
    fn test_cancel_idempotent() {
        let token = CancellationToken::new(1);

        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_generation_mismatch_is_not_live() {
        let token = CancellationToken::new(4);
        assert!(!token.is_live_for(5));
    }

    #[test]
    fn test_independent_tokens() {
        let old = CancellationToken::new(1);
        let new = CancellationToken::new(2);

        old.cancel();
        assert!(!new.is_cancelled());
    }
}
