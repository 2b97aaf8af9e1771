//! Structural modification hooks.
//!
//! Splits and merges are the tree's only structural modification operations
//! (SMOs). An [`SmoObserver`] sees each one bracketed by a begin/committed
//! pair; a write-ahead log plugs in here. The tree guarantees the new
//! sibling page is fully written before `split_committed` fires and the
//! absorbed page is freed before `merge_committed` fires.

use crate::types::PageId;

/// Callback surface for structural modifications.
///
/// Callbacks run while the tree still holds exclusive latches on every page
/// involved, so implementations must not re-enter the tree.
pub trait SmoObserver: Send + Sync + 'static {
    /// A split of `page` into itself and `new_sibling` is about to start.
    fn begin_split(&self, page: PageId, new_sibling: PageId) {
        let _ = (page, new_sibling);
    }

    /// The split of `page` is durable in the page cache and its separator is
    /// installed in `parent` (0 when a new root was created instead).
    fn split_committed(&self, page: PageId, new_sibling: PageId, parent: PageId) {
        let _ = (page, new_sibling, parent);
    }

    /// `absorbed` is about to be merged into `survivor`.
    fn begin_merge(&self, survivor: PageId, absorbed: PageId) {
        let _ = (survivor, absorbed);
    }

    /// The merge finished; `absorbed` has been returned to the page cache.
    fn merge_committed(&self, survivor: PageId, absorbed: PageId, parent: PageId) {
        let _ = (survivor, absorbed, parent);
    }
}

/// Observer that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl SmoObserver for NoopObserver {}
