//! Write path: latch-crabbing descents, splits, merges, and borrows.
//!
//! All structural changes follow the same shape: mutate decoded node images
//! in memory under exclusive latches, write new sibling pages before the
//! parent pointer that makes them reachable, and release latches bottom-up
//! when the operation unwinds. Latches are only ever acquired top-down and
//! left-to-right; pairing with a left sibling drops the target's latch and
//! reacquires the pair in page order under the exclusively held parent.

use std::sync::atomic::Ordering;

use smallvec::SmallVec;
use tracing::trace;

use crate::latch::WriteSet;
use crate::types::{PageId, Result, ShaleError};

use super::codecs::{KeyCodec, ValCodec};
use super::node::Node;
use super::tree::{BTree, PathEntry};

#[derive(Clone, Copy, Eq, PartialEq)]
enum WriteMode {
    Insert,
    Delete,
}

type Path = SmallVec<[PathEntry; 8]>;

fn fits_merged(left: &Node, right: &Node, order: usize) -> bool {
    if left.is_leaf() {
        left.keys.len() + right.keys.len() <= order
    } else {
        left.children.len() + right.children.len() <= order + 1
    }
}

fn has_slack(node: &Node, order: usize) -> bool {
    if node.is_leaf() {
        node.keys.len() > Node::min_leaf_keys(order)
    } else {
        node.children.len() > Node::min_internal_children(order)
    }
}

impl<K: KeyCodec, V: ValCodec> BTree<K, V> {
    /// Inserts or overwrites `key`.
    pub fn put(&self, key: &K, value: &V) -> Result<()> {
        let encoded_key = key.encode_key();
        if encoded_key.len() > self.options.max_key_len {
            return Err(ShaleError::Invalid("key exceeds configured maximum length"));
        }
        let encoded_value = value.encode_value();
        if encoded_value.len() > self.options.max_value_len {
            return Err(ShaleError::Invalid("value exceeds configured maximum length"));
        }

        let (ws, mut path) = self.descend_write(&encoded_key, WriteMode::Insert)?;
        let Some(leaf) = path.last_mut() else {
            return Err(ShaleError::Corruption("empty write descent"));
        };
        match leaf.node.search_key(&encoded_key) {
            Ok(slot) => {
                leaf.node.values[slot] = encoded_value;
                self.store_node(leaf.id, &leaf.node)?;
                self.stats.record_update();
                return Ok(());
            }
            Err(slot) => {
                leaf.node
                    .insert_leaf_at(slot, encoded_key, encoded_value, self.order)?;
                self.stats.record_insertion();
                self.key_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        if !leaf.node.is_overflowing(self.order) {
            return self.store_node(leaf.id, &leaf.node);
        }
        self.split_upwards(ws, path)
    }

    /// Removes `key`. Returns `false` (still success) when it was absent.
    pub fn delete(&self, key: &K) -> Result<bool> {
        let encoded_key = key.encode_key();
        let (ws, mut path) = self.descend_write(&encoded_key, WriteMode::Delete)?;
        let path_len = path.len();
        let Some(leaf) = path.last_mut() else {
            return Err(ShaleError::Corruption("empty write descent"));
        };
        let slot = match leaf.node.search_key(&encoded_key) {
            Err(_) => return Ok(false),
            Ok(slot) => slot,
        };
        leaf.node.remove_leaf_at(slot);
        self.stats.record_deletion();
        self.key_count.fetch_sub(1, Ordering::Relaxed);

        if path_len == 1 || !leaf.node.is_underflowing(self.order, false) {
            // Root leaves may hold anything down to zero keys.
            self.store_node(leaf.id, &leaf.node)?;
            return Ok(true);
        }
        self.rebalance_upwards(ws, path)?;
        Ok(true)
    }

    /// Crabs from the root to the leaf for `key` under exclusive latches,
    /// releasing the ancestor prefix whenever the newly latched node is safe
    /// for `mode`.
    fn descend_write(&self, key: &[u8], mode: WriteMode) -> Result<(WriteSet<'_>, Path)> {
        let root_guard = self.root.write();
        let root_id = *root_guard;
        let mut ws = WriteSet::new(root_guard);
        let mut path = Path::new();
        let mut id = root_id;
        loop {
            ws.push(id, self.latches.exclusive(id));
            let node = self.load_node(id)?;
            let safe = match mode {
                WriteMode::Insert => node.safe_for_insert(self.order),
                WriteMode::Delete => node.safe_for_delete(self.order, id == root_id),
            };
            let is_leaf = node.is_leaf();
            let slot = if is_leaf { 0 } else { node.child_index(key) };
            path.push(PathEntry {
                id,
                node,
                slot,
                is_root: id == root_id,
            });
            if safe {
                ws.release_ancestors();
                path.drain(..path.len() - 1);
            }
            if is_leaf {
                return Ok((ws, path));
            }
            let Some(entry) = path.last() else {
                return Err(ShaleError::Corruption("empty write descent"));
            };
            id = entry.node.children[slot];
        }
    }

    /// Splits the overflowing tail of `path`, propagating separators upward
    /// and growing a new root if the split reaches the top.
    fn split_upwards(&self, mut ws: WriteSet<'_>, mut path: Path) -> Result<()> {
        // Splits whose separator landed in a parent that itself overflowed;
        // their committed events fire once that parent is finally written.
        let mut deferred: SmallVec<[(PageId, PageId, PageId); 4]> = SmallVec::new();
        loop {
            let Some(mut cur) = path.pop() else {
                return Err(ShaleError::Corruption("split ran past the root"));
            };
            let right_id = self.cache.allocate()?;
            let _right_latch = self.latches.exclusive(right_id);
            self.observer.begin_split(cur.id, right_id);

            let (separator, right) = if cur.node.is_leaf() {
                let (separator, mut right) = cur.node.split_leaf()?;
                right.prev_leaf = Some(cur.id);
                right.next_leaf = cur.node.next_leaf;
                if let Some(next_id) = cur.node.next_leaf {
                    let _next_latch = self.latches.exclusive(next_id);
                    let mut next = self.load_node(next_id)?;
                    next.prev_leaf = Some(right_id);
                    self.store_node(next_id, &next)?;
                }
                cur.node.next_leaf = Some(right_id);
                (separator, right)
            } else {
                cur.node.split_internal()?
            };
            // New sibling is durable before anything points at it.
            self.store_node(right_id, &right)?;
            self.store_node(cur.id, &cur.node)?;
            self.stats.record_split();
            trace!(
                target: "shale::btree::split",
                page = cur.id.0,
                sibling = right_id.0,
                leaf = right.is_leaf(),
                "node split"
            );

            match path.last_mut() {
                None => {
                    // The root itself split; grow a level.
                    let new_root_id = self.cache.allocate()?;
                    let mut new_root = Node::new_internal(cur.id);
                    new_root.keys.push(separator);
                    new_root.children.push(right_id);
                    self.store_node(new_root_id, &new_root)?;
                    ws.set_root(new_root_id);
                    self.cache.set_root_hint(new_root_id)?;
                    self.height.fetch_add(1, Ordering::Relaxed);
                    self.stats.record_height_change();
                    for (left, right, parent) in deferred.drain(..) {
                        self.observer.split_committed(left, right, parent);
                    }
                    self.observer.split_committed(cur.id, right_id, PageId::META);
                    return Ok(());
                }
                Some(parent) => {
                    parent
                        .node
                        .insert_separator_at(parent.slot, separator, right_id, self.order)?;
                    if parent.node.is_overflowing(self.order) {
                        deferred.push((cur.id, right_id, parent.id));
                        continue;
                    }
                    self.store_node(parent.id, &parent.node)?;
                    for (left, right, parent) in deferred.drain(..) {
                        self.observer.split_committed(left, right, parent);
                    }
                    self.observer.split_committed(cur.id, right_id, parent.id);
                    return Ok(());
                }
            }
        }
    }

    /// Restores the occupancy floor after a removal, merging first and
    /// borrowing only when neither sibling fits a merge. The last `path`
    /// entry is the underflowing node; its in-memory image is current and
    /// unwritten.
    fn rebalance_upwards(&self, mut ws: WriteSet<'_>, mut path: Path) -> Result<()> {
        let Some(mut cur) = path.pop() else {
            return Err(ShaleError::Corruption("rebalance ran past the root"));
        };
        let Some(parent) = path.last_mut() else {
            return Err(ShaleError::Corruption("underflow without latched parent"));
        };
        let slot = parent.slot;
        let has_right = slot < parent.node.keys.len();
        let has_left = slot > 0;
        let parent_is_root = parent.is_root;

        // Merge with the right sibling.
        if has_right {
            let right_id = parent.node.children[slot + 1];
            let right_latch = self.latches.exclusive(right_id);
            let right = self.load_node(right_id)?;
            if fits_merged(&cur.node, &right, self.order) {
                self.observer.begin_merge(cur.id, right_id);
                let separator = if cur.node.is_leaf() {
                    None
                } else {
                    Some(parent.node.keys[slot].clone())
                };
                let right_next = right.next_leaf;
                let mut merged = cur.node;
                merged.merge_from_right(separator, right)?;
                if merged.is_leaf() {
                    if let Some(next_id) = right_next {
                        let _next_latch = self.latches.exclusive(next_id);
                        let mut next = self.load_node(next_id)?;
                        next.prev_leaf = Some(cur.id);
                        self.store_node(next_id, &next)?;
                    }
                }
                parent.node.remove_separator(slot);
                self.store_node(cur.id, &merged)?;
                self.cache.free(right_id)?;
                drop(right_latch);
                self.stats.record_merge();
                trace!(
                    target: "shale::btree::merge",
                    survivor = cur.id.0,
                    absorbed = right_id.0,
                    "nodes merged"
                );
                return self.finish_merge(ws, path, cur.id, right_id, parent_is_root);
            }
        }

        // Merge into the left sibling. Reacquire (left, target) in page
        // order under the latched parent to keep acquisition left-to-right.
        if has_left {
            let left_id = parent.node.children[slot - 1];
            ws.drop_latch(cur.id);
            let left_latch = self.latches.exclusive(left_id);
            ws.push(cur.id, self.latches.exclusive(cur.id));
            let mut left = self.load_node(left_id)?;
            if fits_merged(&left, &cur.node, self.order) {
                self.observer.begin_merge(left_id, cur.id);
                let separator = if cur.node.is_leaf() {
                    None
                } else {
                    Some(parent.node.keys[slot - 1].clone())
                };
                let cur_next = cur.node.next_leaf;
                let is_leaf = cur.node.is_leaf();
                left.merge_from_right(separator, cur.node)?;
                if is_leaf {
                    if let Some(next_id) = cur_next {
                        let _next_latch = self.latches.exclusive(next_id);
                        let mut next = self.load_node(next_id)?;
                        next.prev_leaf = Some(left_id);
                        self.store_node(next_id, &next)?;
                    }
                }
                parent.node.remove_separator(slot - 1);
                self.store_node(left_id, &left)?;
                self.cache.free(cur.id)?;
                drop(left_latch);
                self.stats.record_merge();
                trace!(
                    target: "shale::btree::merge",
                    survivor = left_id.0,
                    absorbed = cur.id.0,
                    "nodes merged"
                );
                return self.finish_merge(ws, path, left_id, cur.id, parent_is_root);
            }
            if self.options.allow_redistribution && has_slack(&left, self.order) {
                return self.borrow_from_left(parent, &mut cur, &mut left, left_id, slot);
            }
            drop(left_latch);
        }

        if self.options.allow_redistribution && has_right {
            let right_id = parent.node.children[slot + 1];
            let _right_latch = self.latches.exclusive(right_id);
            let mut right = self.load_node(right_id)?;
            if has_slack(&right, self.order) {
                return self.borrow_from_right(parent, &mut cur, &mut right, right_id, slot);
            }
        }

        // Merge-only mode with no sibling that fits: accept the underflow
        // and stop.
        self.store_node(cur.id, &cur.node)
    }

    /// Writes (or shrinks) the parent after a merge, fires the committed
    /// event, and decides whether the underflow cascades.
    fn finish_merge(
        &self,
        mut ws: WriteSet<'_>,
        mut path: Path,
        survivor: PageId,
        absorbed: PageId,
        parent_is_root: bool,
    ) -> Result<()> {
        let Some(parent) = path.last_mut() else {
            return Err(ShaleError::Corruption("merge without latched parent"));
        };
        if parent_is_root && parent.node.keys.is_empty() {
            // The root lost its last separator; its single child becomes
            // the new root.
            let child = parent.node.children[0];
            let old_root = parent.id;
            self.cache.free(old_root)?;
            ws.set_root(child);
            self.cache.set_root_hint(child)?;
            self.height.fetch_sub(1, Ordering::Relaxed);
            self.stats.record_height_change();
            self.observer.merge_committed(survivor, absorbed, old_root);
            trace!(
                target: "shale::btree::merge",
                old_root = old_root.0,
                new_root = child.0,
                "root demoted"
            );
            return Ok(());
        }
        self.store_node(parent.id, &parent.node)?;
        self.observer.merge_committed(survivor, absorbed, parent.id);
        if !parent_is_root && parent.node.is_underflowing(self.order, false) {
            return self.rebalance_upwards(ws, path);
        }
        Ok(())
    }

    fn borrow_from_right(
        &self,
        parent: &mut PathEntry,
        cur: &mut PathEntry,
        right: &mut Node,
        right_id: PageId,
        slot: usize,
    ) -> Result<()> {
        if cur.node.is_leaf() {
            let (key, value) = right.remove_leaf_at(0);
            parent.node.keys[slot] = right.keys[0].clone();
            cur.node.keys.push(key);
            cur.node.values.push(value);
        } else {
            let moved_child = right.children.remove(0);
            cur.node.keys.push(parent.node.keys[slot].clone());
            cur.node.children.push(moved_child);
            parent.node.keys[slot] = right.keys.remove(0);
        }
        self.store_node(cur.id, &cur.node)?;
        self.store_node(right_id, right)?;
        self.store_node(parent.id, &parent.node)?;
        self.stats.record_rotation();
        trace!(
            target: "shale::btree::merge",
            page = cur.id.0,
            donor = right_id.0,
            "entry borrowed"
        );
        Ok(())
    }

    fn borrow_from_left(
        &self,
        parent: &mut PathEntry,
        cur: &mut PathEntry,
        left: &mut Node,
        left_id: PageId,
        slot: usize,
    ) -> Result<()> {
        if cur.node.is_leaf() {
            let last = left.keys.len() - 1;
            let (key, value) = left.remove_leaf_at(last);
            parent.node.keys[slot - 1] = key.clone();
            cur.node.keys.insert(0, key);
            cur.node.values.insert(0, value);
        } else {
            let Some(moved_child) = left.children.pop() else {
                return Err(ShaleError::Corruption("borrow from childless node"));
            };
            let Some(new_separator) = left.keys.pop() else {
                return Err(ShaleError::Corruption("borrow from keyless node"));
            };
            cur.node
                .keys
                .insert(0, parent.node.keys[slot - 1].clone());
            cur.node.children.insert(0, moved_child);
            parent.node.keys[slot - 1] = new_separator;
        }
        self.store_node(left_id, left)?;
        self.store_node(cur.id, &cur.node)?;
        self.store_node(parent.id, &parent.node)?;
        self.stats.record_rotation();
        trace!(
            target: "shale::btree::merge",
            page = cur.id.0,
            donor = left_id.0,
            "entry borrowed"
        );
        Ok(())
    }
}
