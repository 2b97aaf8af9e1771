use crate::types::{PageId, Result, ShaleError};

/// Logical kind of a tree node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeKind {
    /// Leaf node holding keys and their values.
    Leaf = 1,
    /// Internal node holding separator keys and child pointers.
    Internal = 2,
}

impl NodeKind {
    /// Parses the on-page kind tag.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Leaf),
            2 => Ok(Self::Internal),
            _ => Err(ShaleError::Corruption("unknown node kind")),
        }
    }
}

/// In-memory content of one page: sorted keys plus either values (leaf) or
/// child pointers (internal).
///
/// Keys are order-preserving encoded bytes; comparisons are plain byte
/// comparisons. A node may transiently hold one entry more than the order
/// while a split is in flight; it is never encoded in that state.
#[derive(Clone, Debug)]
pub struct Node {
    /// Leaf or internal.
    pub kind: NodeKind,
    /// Strictly increasing, duplicate-free keys.
    pub keys: Vec<Vec<u8>>,
    /// Leaf only: `values[i]` belongs to `keys[i]`.
    pub values: Vec<Vec<u8>>,
    /// Internal only: `children.len() == keys.len() + 1`.
    pub children: Vec<PageId>,
    /// Leaf only: left neighbour in key order.
    pub prev_leaf: Option<PageId>,
    /// Leaf only: right neighbour in key order.
    pub next_leaf: Option<PageId>,
}

impl Node {
    /// Creates an empty leaf.
    pub fn new_leaf() -> Self {
        Self {
            kind: NodeKind::Leaf,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
            prev_leaf: None,
            next_leaf: None,
        }
    }

    /// Creates an internal node with a single child and no separators yet.
    pub fn new_internal(first_child: PageId) -> Self {
        Self {
            kind: NodeKind::Internal,
            keys: Vec::new(),
            values: Vec::new(),
            children: vec![first_child],
            prev_leaf: None,
            next_leaf: None,
        }
    }

    /// Returns true for leaf nodes.
    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    /// Minimum keys a non-root leaf must hold: `⌈N/2⌉`.
    pub fn min_leaf_keys(order: usize) -> usize {
        (order + 1) / 2
    }

    /// Minimum children a non-root internal node must hold: `⌈(N+1)/2⌉`.
    pub fn min_internal_children(order: usize) -> usize {
        (order + 2) / 2
    }

    /// Binary search within this node's keys: `Ok(slot)` on a hit,
    /// `Err(insertion point)` on a miss.
    pub fn search_key(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        self.keys.binary_search_by(|probe| probe.as_slice().cmp(key))
    }

    /// Child index for `key` per the separator rule
    /// `keys[i-1] <= k < keys[i]`.
    pub fn child_index(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|probe| probe.as_slice() <= key)
    }

    /// Inserts a leaf entry at `index`, shifting later entries right.
    /// The caller must have verified room; a leaf already holding more than
    /// `order` keys is a balancer bug.
    pub fn insert_leaf_at(
        &mut self,
        index: usize,
        key: Vec<u8>,
        value: Vec<u8>,
        order: usize,
    ) -> Result<()> {
        if self.keys.len() > order {
            return Err(ShaleError::Capacity("insert into overflowing leaf"));
        }
        self.keys.insert(index, key);
        self.values.insert(index, value);
        Ok(())
    }

    /// Inserts a separator and the child to its right at `index`.
    pub fn insert_separator_at(
        &mut self,
        index: usize,
        key: Vec<u8>,
        right_child: PageId,
        order: usize,
    ) -> Result<()> {
        if self.children.len() > order + 1 {
            return Err(ShaleError::Capacity("insert into overflowing internal node"));
        }
        self.keys.insert(index, key);
        self.children.insert(index + 1, right_child);
        Ok(())
    }

    /// Removes the leaf entry at `index`.
    pub fn remove_leaf_at(&mut self, index: usize) -> (Vec<u8>, Vec<u8>) {
        (self.keys.remove(index), self.values.remove(index))
    }

    /// Removes separator `index` and the child to its right.
    pub fn remove_separator(&mut self, index: usize) -> (Vec<u8>, PageId) {
        let key = self.keys.remove(index);
        let child = self.children.remove(index + 1);
        (key, child)
    }

    /// True once the node holds more than the order allows.
    pub fn is_overflowing(&self, order: usize) -> bool {
        match self.kind {
            NodeKind::Leaf => self.keys.len() > order,
            NodeKind::Internal => self.children.len() > order + 1,
        }
    }

    /// True once a non-root node drops below the occupancy floor.
    pub fn is_underflowing(&self, order: usize, is_root: bool) -> bool {
        if is_root {
            return false;
        }
        match self.kind {
            NodeKind::Leaf => self.keys.len() < Self::min_leaf_keys(order),
            NodeKind::Internal => self.children.len() < Self::min_internal_children(order),
        }
    }

    /// A node is safe for an insert descent if one more entry cannot
    /// overflow it.
    pub fn safe_for_insert(&self, order: usize) -> bool {
        match self.kind {
            NodeKind::Leaf => self.keys.len() < order,
            NodeKind::Internal => self.children.len() < order + 1,
        }
    }

    /// A node is safe for a delete descent if losing one entry cannot make
    /// it underflow (or, for the root, trigger a shrink).
    pub fn safe_for_delete(&self, order: usize, is_root: bool) -> bool {
        if is_root {
            // The root shrinks only when an internal root drops to one child.
            return self.is_leaf() || self.keys.len() >= 2;
        }
        match self.kind {
            NodeKind::Leaf => self.keys.len() > Self::min_leaf_keys(order),
            NodeKind::Internal => self.children.len() > Self::min_internal_children(order),
        }
    }

    /// Splits an overflowing leaf; the upper `⌈(N+1)/2⌉` entries move to the
    /// returned right sibling and the right sibling's first key comes back
    /// as the separator to promote. The record behind the separator stays in
    /// the right leaf.
    pub fn split_leaf(&mut self) -> Result<(Vec<u8>, Node)> {
        if self.keys.len() < 2 {
            return Err(ShaleError::Corruption("split of leaf with fewer than 2 keys"));
        }
        let split_at = self.keys.len() / 2;
        let mut right = Node::new_leaf();
        right.keys = self.keys.split_off(split_at);
        right.values = self.values.split_off(split_at);
        let separator = right.keys[0].clone();
        Ok((separator, right))
    }

    /// Splits an overflowing internal node around its middle key, which is
    /// promoted to the parent and kept in neither half.
    pub fn split_internal(&mut self) -> Result<(Vec<u8>, Node)> {
        if self.keys.len() < 3 {
            return Err(ShaleError::Corruption(
                "split of internal node with fewer than 3 keys",
            ));
        }
        let mid = self.keys.len() / 2;
        let mut upper_keys = self.keys.split_off(mid);
        let promoted = upper_keys.remove(0);
        let upper_children = self.children.split_off(mid + 1);
        let mut right = Node::new_internal(upper_children[0]);
        right.keys = upper_keys;
        right.children = upper_children;
        Ok((promoted, right))
    }

    /// Absorbs `right` into this node. Internal merges pull the parent's
    /// separator down between the two halves; leaf merges adopt the right
    /// sibling's forward pointer.
    pub fn merge_from_right(&mut self, separator: Option<Vec<u8>>, right: Node) -> Result<()> {
        if self.kind != right.kind {
            return Err(ShaleError::Corruption("merge of mismatched node kinds"));
        }
        match self.kind {
            NodeKind::Leaf => {
                self.keys.extend(right.keys);
                self.values.extend(right.values);
                self.next_leaf = right.next_leaf;
            }
            NodeKind::Internal => {
                let separator =
                    separator.ok_or(ShaleError::Corruption("internal merge without separator"))?;
                self.keys.push(separator);
                self.keys.extend(right.keys);
                self.children.extend(right.children);
            }
        }
        Ok(())
    }
}
