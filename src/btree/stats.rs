//! Operation counters for one tree.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated by the tree's hot paths.
///
/// Counters are relaxed atomics; a [`snapshot`](TreeStats::snapshot) is not
/// a consistent cut across all of them and is meant for monitoring only.
#[derive(Debug, Default)]
pub struct TreeStats {
    lookups: AtomicU64,
    insertions: AtomicU64,
    updates: AtomicU64,
    deletions: AtomicU64,
    splits: AtomicU64,
    merges: AtomicU64,
    rotations: AtomicU64,
    height_changes: AtomicU64,
}

/// Point-in-time copy of [`TreeStats`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TreeStatsSnapshot {
    /// `get` and scan-start descents.
    pub lookups: u64,
    /// New keys written.
    pub insertions: u64,
    /// Existing keys overwritten.
    pub updates: u64,
    /// Keys removed.
    pub deletions: u64,
    /// Leaf and internal splits.
    pub splits: u64,
    /// Sibling merges.
    pub merges: u64,
    /// Borrow rotations.
    pub rotations: u64,
    /// Root promotions and demotions.
    pub height_changes: u64,
}

impl TreeStats {
    pub(crate) fn record_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insertion(&self) {
        self.insertions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deletion(&self) {
        self.deletions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_split(&self) {
        self.splits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_merge(&self) {
        self.merges.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rotation(&self) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_height_change(&self) {
        self.height_changes.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    pub fn snapshot(&self) -> TreeStatsSnapshot {
        TreeStatsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletions: self.deletions.load(Ordering::Relaxed),
            splits: self.splits.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            height_changes: self.height_changes.load(Ordering::Relaxed),
        }
    }

    /// Emits the current counters as a `tracing` event.
    pub fn emit_tracing(&self) {
        let snap = self.snapshot();
        tracing::debug!(
            target: "shale::btree::stats",
            lookups = snap.lookups,
            insertions = snap.insertions,
            updates = snap.updates,
            deletions = snap.deletions,
            splits = snap.splits,
            merges = snap.merges,
            rotations = snap.rotations,
            height_changes = snap.height_changes,
            "tree stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_into_snapshot() {
        let stats = TreeStats::default();
        stats.record_lookup();
        stats.record_lookup();
        stats.record_split();
        stats.record_height_change();
        let snap = stats.snapshot();
        assert_eq!(snap.lookups, 2);
        assert_eq!(snap.splits, 1);
        assert_eq!(snap.height_changes, 1);
        assert_eq!(snap.merges, 0);
    }
}
