//! The tree handle: open/create, point lookups, scans, and metadata.
//!
//! Mutations live in the balancing module; this file owns the descent
//! plumbing shared by all operations.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::latch::{LatchTable, RootCell, SharedLatch};
use crate::pager::PageCache;
use crate::types::{PageId, Result, ShaleError};

use super::codec::{decode_node, derive_order, encode_node};
use super::codecs::{KeyCodec, ValCodec};
use super::cursor::RangeScan;
use super::node::Node;
use super::smo::{NoopObserver, SmoObserver};
use super::stats::{TreeStats, TreeStatsSnapshot};

/// Tuning knobs for a tree.
#[derive(Clone, Debug)]
pub struct TreeOptions {
    /// Explicit order (max keys per leaf). `None` derives the largest order
    /// the page size can hold at the configured key/value limits.
    pub order: Option<usize>,
    /// Longest accepted encoded key.
    pub max_key_len: usize,
    /// Longest accepted encoded value.
    pub max_value_len: usize,
    /// Allow borrowing from a sibling when a merge does not fit. Disabling
    /// this runs merge-only rebalancing and makes the occupancy floor
    /// best-effort.
    pub allow_redistribution: bool,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            order: None,
            max_key_len: 64,
            max_value_len: 256,
            allow_redistribution: true,
        }
    }
}

/// One level of a write descent: the page, its decoded image, and the child
/// slot the descent took out of it.
///
/// `is_root` is recorded at latch time; the root cannot change identity
/// while its page latch is held, so the flag stays valid even after the
/// root cell itself has been released.
pub(crate) struct PathEntry {
    pub(crate) id: PageId,
    pub(crate) node: Node,
    pub(crate) slot: usize,
    pub(crate) is_root: bool,
}

/// A disk-resident B+Tree over a [`PageCache`].
///
/// Keys and values are fixed-limit byte strings produced by the codec
/// traits; all comparisons happen on encoded bytes. Concurrent readers and
/// writers coordinate through per-page latch crabbing; the handle itself is
/// `Send + Sync` and is shared behind an `Arc` by callers that want
/// multi-threaded access.
pub struct BTree<K: KeyCodec, V: ValCodec> {
    pub(crate) cache: Arc<dyn PageCache>,
    pub(crate) latches: LatchTable,
    pub(crate) root: RootCell,
    pub(crate) order: usize,
    pub(crate) options: TreeOptions,
    pub(crate) stats: TreeStats,
    pub(crate) observer: Box<dyn SmoObserver>,
    pub(crate) height: AtomicU32,
    pub(crate) key_count: AtomicU64,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: KeyCodec, V: ValCodec> BTree<K, V> {
    /// Opens the tree recorded in `cache`, creating an empty one (a single
    /// empty leaf) if the cache has no root yet.
    pub fn open_or_create(cache: Arc<dyn PageCache>, options: TreeOptions) -> Result<Self> {
        Self::open_or_create_with(cache, options, Box::new(NoopObserver))
    }

    /// Like [`open_or_create`](Self::open_or_create) with a structural
    /// modification observer wired in.
    pub fn open_or_create_with(
        cache: Arc<dyn PageCache>,
        options: TreeOptions,
        observer: Box<dyn SmoObserver>,
    ) -> Result<Self> {
        let derived = derive_order(cache.page_size(), options.max_key_len, options.max_value_len)?;
        let order = match options.order {
            Some(order) if order < 2 => return Err(ShaleError::Invalid("order below 2")),
            Some(order) if order > derived => {
                return Err(ShaleError::Invalid("order exceeds page capacity"))
            }
            Some(order) => order,
            None => derived,
        };

        let root_id = match cache.root_hint()? {
            Some(id) => id,
            None => {
                let id = cache.allocate()?;
                let image = encode_node(&Node::new_leaf(), cache.page_size())?;
                cache.write(id, &image)?;
                cache.set_root_hint(id)?;
                id
            }
        };

        let tree = Self {
            cache,
            latches: LatchTable::new(),
            root: RootCell::new(root_id),
            order,
            options,
            stats: TreeStats::default(),
            observer,
            height: AtomicU32::new(1),
            key_count: AtomicU64::new(0),
            _marker: PhantomData,
        };
        tree.recover_metadata(root_id)?;
        Ok(tree)
    }

    /// Height and key count are not persisted; rebuild them by walking the
    /// leftmost spine and then the leaf chain.
    fn recover_metadata(&self, root_id: PageId) -> Result<()> {
        let mut height = 1u32;
        let mut node = self.load_node(root_id)?;
        while !node.is_leaf() {
            height += 1;
            node = self.load_node(node.children[0])?;
        }
        let mut keys = node.keys.len() as u64;
        let mut next = node.next_leaf;
        while let Some(id) = next {
            let leaf = self.load_node(id)?;
            keys += leaf.keys.len() as u64;
            next = leaf.next_leaf;
        }
        self.height.store(height, Ordering::Relaxed);
        self.key_count.store(keys, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn load_node(&self, id: PageId) -> Result<Node> {
        decode_node(&self.cache.fetch(id)?)
    }

    pub(crate) fn store_node(&self, id: PageId, node: &Node) -> Result<()> {
        let image = encode_node(node, self.cache.page_size())?;
        self.cache.write(id, &image)
    }

    /// Maximum keys per leaf (the tree's order).
    pub fn order(&self) -> usize {
        self.order
    }

    /// Levels from root to leaf, inclusive. An empty tree has height 1.
    pub fn height(&self) -> u32 {
        self.height.load(Ordering::Relaxed)
    }

    /// Number of live keys.
    pub fn key_count(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Operation counters.
    pub fn stats(&self) -> &TreeStats {
        &self.stats
    }

    /// Copies the current operation counters.
    pub fn stats_snapshot(&self) -> TreeStatsSnapshot {
        self.stats.snapshot()
    }

    /// Flushes the page cache.
    pub fn sync(&self) -> Result<()> {
        self.cache.sync()
    }

    /// Read-crabs from the root to the leaf responsible for `key`, returning
    /// the leaf's latch, id, and decoded image.
    pub(crate) fn descend_read(&self, key: &[u8]) -> Result<(SharedLatch, PageId, Node)> {
        let (mut latch, mut id) = {
            let root_guard = self.root.read();
            let id = *root_guard;
            (self.latches.shared(id), id)
        };
        let mut node = self.load_node(id)?;
        while !node.is_leaf() {
            let child = node.children[node.child_index(key)];
            let child_latch = self.latches.shared(child);
            latch = child_latch;
            id = child;
            node = self.load_node(id)?;
        }
        Ok((latch, id, node))
    }

    /// Point lookup.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.stats.record_lookup();
        let encoded = key.encode_key();
        let (_latch, _id, leaf) = self.descend_read(&encoded)?;
        match leaf.search_key(&encoded) {
            Ok(slot) => Ok(Some(V::decode_value(&leaf.values[slot])?)),
            Err(_) => Ok(None),
        }
    }

    /// Lazy ordered scan over `lo..=hi`.
    pub fn range_scan(&self, lo: &K, hi: &K) -> Result<RangeScan<'_, K, V>> {
        self.stats.record_lookup();
        RangeScan::start(self, lo.encode_key(), hi.encode_key())
    }

    /// Walks the whole tree checking structural invariants: key order,
    /// separator bounds, occupancy floors, uniform leaf depth, and leaf
    /// chain consistency. Test and debugging aid; takes no latches.
    pub fn check_invariants(&self) -> Result<()> {
        let root_id = self.root.get();
        let mut leaves = Vec::new();
        self.check_subtree(root_id, root_id, None, None, &mut leaves, 1)?;

        // Leaf chain must list exactly the leaves in key order.
        let mut chained = Vec::new();
        let mut id = Some(leaves[0].0);
        let mut prev: Option<PageId> = None;
        while let Some(cur) = id {
            let node = self.load_node(cur)?;
            if node.prev_leaf != prev {
                return Err(ShaleError::Corruption("leaf chain prev link broken"));
            }
            chained.push(cur);
            prev = Some(cur);
            id = node.next_leaf;
        }
        let expected: Vec<PageId> = leaves.iter().map(|(id, _)| *id).collect();
        if chained != expected {
            return Err(ShaleError::Corruption("leaf chain disagrees with tree order"));
        }
        Ok(())
    }

    fn check_subtree(
        &self,
        id: PageId,
        root_id: PageId,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        leaves: &mut Vec<(PageId, u32)>,
        depth: u32,
    ) -> Result<()> {
        let node = self.load_node(id)?;
        let is_root = id == root_id;
        for pair in node.keys.windows(2) {
            if pair[0] >= pair[1] {
                return Err(ShaleError::Corruption("keys out of order"));
            }
        }
        for key in &node.keys {
            if lower.is_some_and(|lo| key.as_slice() < lo) {
                return Err(ShaleError::Corruption("key below subtree lower bound"));
            }
            if upper.is_some_and(|hi| key.as_slice() >= hi) {
                return Err(ShaleError::Corruption("key at or above subtree upper bound"));
            }
        }
        if node.is_overflowing(self.order) {
            return Err(ShaleError::Corruption("node above capacity"));
        }
        if self.options.allow_redistribution && node.is_underflowing(self.order, is_root) {
            return Err(ShaleError::Corruption("node below occupancy floor"));
        }
        if node.is_leaf() {
            if let Some(&(_, first_depth)) = leaves.first() {
                if depth != first_depth {
                    return Err(ShaleError::Corruption("leaves at unequal depth"));
                }
            }
            leaves.push((id, depth));
            return Ok(());
        }
        if is_root && node.children.len() < 2 {
            return Err(ShaleError::Corruption("internal root with a single child"));
        }
        for (i, child) in node.children.iter().enumerate() {
            let lo = if i == 0 { lower } else { Some(node.keys[i - 1].as_slice()) };
            let hi = if i == node.keys.len() {
                upper
            } else {
                Some(node.keys[i].as_slice())
            };
            self.check_subtree(*child, root_id, lo, hi, leaves, depth + 1)?;
        }
        Ok(())
    }
}
