//! Lazy ordered scans over the leaf chain.

use crate::latch::SharedLatch;
use crate::types::Result;

use super::codecs::{KeyCodec, ValCodec};
use super::node::Node;
use super::tree::BTree;

/// Forward scan over an inclusive key range.
///
/// The scan holds a shared latch on its current leaf and crabs to the next
/// leaf before releasing it, so sibling pointers are never followed into a
/// page a concurrent merge just freed. Entries written behind the scan
/// position by concurrent writers are not revisited; the scan sees each key
/// at most once in ascending order.
///
/// The latch is held between `next_entry` calls. Writing to the tree from
/// the thread that owns an open scan can self-deadlock; finish or drop the
/// scan first.
pub struct RangeScan<'t, K: KeyCodec, V: ValCodec> {
    tree: &'t BTree<K, V>,
    latch: Option<SharedLatch>,
    leaf: Node,
    slot: usize,
    hi: Vec<u8>,
    done: bool,
}

impl<'t, K: KeyCodec, V: ValCodec> RangeScan<'t, K, V> {
    pub(crate) fn start(tree: &'t BTree<K, V>, lo: Vec<u8>, hi: Vec<u8>) -> Result<Self> {
        let (latch, _id, leaf) = tree.descend_read(&lo)?;
        let slot = match leaf.search_key(&lo) {
            Ok(slot) | Err(slot) => slot,
        };
        let done = lo > hi;
        Ok(Self {
            tree,
            latch: Some(latch),
            leaf,
            slot,
            hi,
            done,
        })
    }

    /// Returns the next entry in the range, or `None` once exhausted.
    pub fn next_entry(&mut self) -> Result<Option<(K, V)>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if self.slot < self.leaf.keys.len() {
                let key = &self.leaf.keys[self.slot];
                if key.as_slice() > self.hi.as_slice() {
                    self.finish();
                    return Ok(None);
                }
                let entry = (
                    K::decode_key(key)?,
                    V::decode_value(&self.leaf.values[self.slot])?,
                );
                self.slot += 1;
                return Ok(Some(entry));
            }
            match self.leaf.next_leaf {
                None => {
                    self.finish();
                    return Ok(None);
                }
                Some(next) => {
                    // Crab: latch the successor before releasing the current
                    // leaf.
                    let next_latch = self.tree.latches.shared(next);
                    let next_leaf = self.tree.load_node(next)?;
                    self.latch = Some(next_latch);
                    self.leaf = next_leaf;
                    self.slot = 0;
                }
            }
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.latch = None;
    }
}

impl<K: KeyCodec, V: ValCodec> Iterator for RangeScan<'_, K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}
