#![forbid(unsafe_code)]

//! Per-page latching for the tree's crabbing discipline.
//!
//! Every page gets an independent reader/writer latch from [`LatchTable`];
//! the root pointer lives in its own [`RootCell`] because it changes
//! identity on height changes. Writers collect exclusive latches in a
//! [`WriteSet`] on the way down and release the whole ancestor prefix the
//! moment the descent reaches a node that cannot split or merge.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{
    ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};

use crate::types::PageId;

/// Shared (read) latch on one page. Owned, so it can outlive the table call.
pub type SharedLatch = ArcRwLockReadGuard<RawRwLock, ()>;

/// Exclusive (write) latch on one page.
pub type ExclusiveLatch = ArcRwLockWriteGuard<RawRwLock, ()>;

/// Hands out one reader/writer latch per page id.
///
/// Entries are created on first use and kept for the life of the table, so a
/// recycled page id keeps a single latch identity; the map is bounded by the
/// peak page count of the tree.
#[derive(Default)]
pub struct LatchTable {
    cells: Mutex<HashMap<u64, Arc<RwLock<()>>>>,
}

impl LatchTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, id: PageId) -> Arc<RwLock<()>> {
        let mut cells = self.cells.lock();
        Arc::clone(cells.entry(id.0).or_default())
    }

    /// Acquires the shared latch for `id`, blocking until granted.
    pub fn shared(&self, id: PageId) -> SharedLatch {
        self.cell(id).read_arc()
    }

    /// Acquires the exclusive latch for `id`, blocking until granted.
    pub fn exclusive(&self, id: PageId) -> ExclusiveLatch {
        self.cell(id).write_arc()
    }
}

/// The tree's root pointer behind its own latch.
///
/// Readers pin the current root id with [`RootCell::read`] just long enough
/// to latch the root page (crabbing starts here); writers hold
/// [`RootCell::write`] until the descent proves the root cannot change.
pub struct RootCell {
    cell: RwLock<PageId>,
}

impl RootCell {
    /// Creates a cell pointing at `root`.
    pub fn new(root: PageId) -> Self {
        Self {
            cell: RwLock::new(root),
        }
    }

    /// Shared access to the root id.
    pub fn read(&self) -> RwLockReadGuard<'_, PageId> {
        self.cell.read()
    }

    /// Exclusive access to the root id.
    pub fn write(&self) -> RwLockWriteGuard<'_, PageId> {
        self.cell.write()
    }

    /// Momentary unlatched snapshot, for diagnostics only.
    pub fn get(&self) -> PageId {
        *self.cell.read()
    }
}

/// Exclusive latches held by one write operation, in descent order.
pub struct WriteSet<'a> {
    root_guard: Option<RwLockWriteGuard<'a, PageId>>,
    latches: VecDeque<(PageId, ExclusiveLatch)>,
}

impl<'a> WriteSet<'a> {
    /// Starts a write descent holding the root cell exclusively.
    pub fn new(root_guard: RwLockWriteGuard<'a, PageId>) -> Self {
        Self {
            root_guard: Some(root_guard),
            latches: VecDeque::new(),
        }
    }

    /// Records a freshly acquired page latch at the bottom of the path.
    pub fn push(&mut self, id: PageId, latch: ExclusiveLatch) {
        self.latches.push_back((id, latch));
    }

    /// Releases everything above the most recently latched page.
    ///
    /// Called when the descent reaches a safe node: no ancestor can be
    /// touched by the coming mutation, so their latches (and the root cell)
    /// are surrendered.
    pub fn release_ancestors(&mut self) {
        self.root_guard = None;
        while self.latches.len() > 1 {
            self.latches.pop_front();
        }
    }

    /// Releases every held latch, deepest page first.
    pub fn release_all(&mut self) {
        while self.latches.pop_back().is_some() {}
        self.root_guard = None;
    }

    /// Drops the latch for one specific page (used when latches must be
    /// reacquired in page order to pair with a left sibling).
    pub fn drop_latch(&mut self, id: PageId) {
        self.latches.retain(|(held, _)| *held != id);
    }

    /// True while the root cell is still held exclusively.
    pub fn holds_root(&self) -> bool {
        self.root_guard.is_some()
    }

    /// Points the tree at a new root page. Panics if the root cell was
    /// already released, which would be a balancer bug.
    pub fn set_root(&mut self, root: PageId) {
        let guard = self
            .root_guard
            .as_mut()
            .expect("root cell released before root change");
        **guard = root;
    }

    /// Number of page latches currently held.
    pub fn held(&self) -> usize {
        self.latches.len()
    }
}

impl Drop for WriteSet<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}
