//! On-page node layout.
//!
//! Every node page starts with a fixed 24-byte header:
//!
//! ```text
//! [0]      kind        1 = leaf, 2 = internal
//! [1]      flags       reserved, zero
//! [2..4]   nkeys       u16 big-endian
//! [4..8]   crc slot    zeroed here, stamped by the page cache
//! [8..16]  next leaf   u64 big-endian, 0 = none
//! [16..24] prev leaf   u64 big-endian, 0 = none
//! ```
//!
//! Leaf payload: `nkeys` entries of `klen u16 | vlen u32 | key | value`.
//! Internal payload: `child0 u64` then `nkeys` entries of
//! `klen u16 | key | child u64`. Trailing bytes are zero fill.

use crate::types::{PageId, Result, ShaleError};

use super::node::{Node, NodeKind};

/// Size of the fixed node header.
pub const NODE_HDR_LEN: usize = 24;

const KIND_OFFSET: usize = 0;
const NKEYS_OFFSET: usize = 2;
const NEXT_OFFSET: usize = 8;
const PREV_OFFSET: usize = 16;

/// Per-entry overhead of a leaf record (klen + vlen).
const LEAF_ENTRY_OVERHEAD: usize = 6;
/// Per-entry overhead of an internal record (klen + child pointer).
const INTERNAL_ENTRY_OVERHEAD: usize = 10;

/// Largest order that both node kinds can hold at full occupancy with
/// worst-case key and value lengths, or `Invalid` if even order 2 does not
/// fit the page.
pub fn derive_order(page_size: usize, max_key_len: usize, max_value_len: usize) -> Result<usize> {
    if page_size <= NODE_HDR_LEN + 8 {
        return Err(ShaleError::Invalid("page size below node header"));
    }
    let leaf_cap = (page_size - NODE_HDR_LEN) / (LEAF_ENTRY_OVERHEAD + max_key_len + max_value_len);
    let internal_cap = (page_size - NODE_HDR_LEN - 8) / (INTERNAL_ENTRY_OVERHEAD + max_key_len);
    let order = leaf_cap.min(internal_cap);
    if order < 2 {
        return Err(ShaleError::Invalid(
            "page size too small for configured key and value lengths",
        ));
    }
    Ok(order)
}

/// Serializes `node` into a fresh page image of `page_size` bytes.
pub fn encode_node(node: &Node, page_size: usize) -> Result<Vec<u8>> {
    let mut image = vec![0u8; page_size];
    image[KIND_OFFSET] = node.kind as u8;
    let nkeys =
        u16::try_from(node.keys.len()).map_err(|_| ShaleError::Capacity("node key count"))?;
    image[NKEYS_OFFSET..NKEYS_OFFSET + 2].copy_from_slice(&nkeys.to_be_bytes());
    image[NEXT_OFFSET..NEXT_OFFSET + 8]
        .copy_from_slice(&node.next_leaf.map_or(0, |id| id.0).to_be_bytes());
    image[PREV_OFFSET..PREV_OFFSET + 8]
        .copy_from_slice(&node.prev_leaf.map_or(0, |id| id.0).to_be_bytes());

    let mut cursor = NODE_HDR_LEN;
    match node.kind {
        NodeKind::Leaf => {
            if node.values.len() != node.keys.len() {
                return Err(ShaleError::Corruption("leaf key/value count mismatch"));
            }
            for (key, value) in node.keys.iter().zip(&node.values) {
                let klen = u16::try_from(key.len())
                    .map_err(|_| ShaleError::Capacity("key length"))?;
                let vlen = u32::try_from(value.len())
                    .map_err(|_| ShaleError::Capacity("value length"))?;
                let entry_len = LEAF_ENTRY_OVERHEAD + key.len() + value.len();
                if cursor + entry_len > page_size {
                    return Err(ShaleError::Capacity("leaf image exceeds page"));
                }
                image[cursor..cursor + 2].copy_from_slice(&klen.to_be_bytes());
                image[cursor + 2..cursor + 6].copy_from_slice(&vlen.to_be_bytes());
                cursor += 6;
                image[cursor..cursor + key.len()].copy_from_slice(key);
                cursor += key.len();
                image[cursor..cursor + value.len()].copy_from_slice(value);
                cursor += value.len();
            }
        }
        NodeKind::Internal => {
            if node.children.len() != node.keys.len() + 1 {
                return Err(ShaleError::Corruption("internal child count mismatch"));
            }
            if cursor + 8 > page_size {
                return Err(ShaleError::Capacity("internal image exceeds page"));
            }
            image[cursor..cursor + 8].copy_from_slice(&node.children[0].0.to_be_bytes());
            cursor += 8;
            for (key, child) in node.keys.iter().zip(node.children.iter().skip(1)) {
                let klen = u16::try_from(key.len())
                    .map_err(|_| ShaleError::Capacity("key length"))?;
                let entry_len = INTERNAL_ENTRY_OVERHEAD + key.len();
                if cursor + entry_len > page_size {
                    return Err(ShaleError::Capacity("internal image exceeds page"));
                }
                image[cursor..cursor + 2].copy_from_slice(&klen.to_be_bytes());
                cursor += 2;
                image[cursor..cursor + key.len()].copy_from_slice(key);
                cursor += key.len();
                image[cursor..cursor + 8].copy_from_slice(&child.0.to_be_bytes());
                cursor += 8;
            }
        }
    }
    Ok(image)
}

/// Deserializes a page image back into a node, validating structure and key
/// ordering along the way.
pub fn decode_node(image: &[u8]) -> Result<Node> {
    if image.len() < NODE_HDR_LEN {
        return Err(ShaleError::Corruption("node page below header size"));
    }
    let kind = NodeKind::from_u8(image[KIND_OFFSET])?;
    let nkeys = u16::from_be_bytes([image[NKEYS_OFFSET], image[NKEYS_OFFSET + 1]]) as usize;
    let next = read_u64(image, NEXT_OFFSET)?;
    let prev = read_u64(image, PREV_OFFSET)?;

    let mut reader = ByteReader {
        image,
        cursor: NODE_HDR_LEN,
    };
    let mut node = match kind {
        NodeKind::Leaf => {
            let mut node = Node::new_leaf();
            for _ in 0..nkeys {
                let klen = reader.take_u16()? as usize;
                let vlen = reader.take_u32()? as usize;
                node.keys.push(reader.take_bytes(klen)?.to_vec());
                node.values.push(reader.take_bytes(vlen)?.to_vec());
            }
            node.next_leaf = if next == 0 { None } else { Some(PageId(next)) };
            node.prev_leaf = if prev == 0 { None } else { Some(PageId(prev)) };
            node
        }
        NodeKind::Internal => {
            if nkeys == 0 {
                return Err(ShaleError::Corruption("internal node without separators"));
            }
            let mut node = Node::new_internal(PageId(reader.take_u64()?));
            for _ in 0..nkeys {
                let klen = reader.take_u16()? as usize;
                node.keys.push(reader.take_bytes(klen)?.to_vec());
                node.children.push(PageId(reader.take_u64()?));
            }
            node
        }
    };
    for pair in node.keys.windows(2) {
        if pair[0] >= pair[1] {
            return Err(ShaleError::Corruption("node keys out of order"));
        }
    }
    if node.kind == NodeKind::Internal {
        for child in &node.children {
            if !child.is_node() {
                return Err(ShaleError::Corruption("internal child points at meta page"));
            }
        }
    }
    // Normalize: internal nodes carry no sibling links.
    if node.kind == NodeKind::Internal {
        node.next_leaf = None;
        node.prev_leaf = None;
    }
    Ok(node)
}

struct ByteReader<'a> {
    image: &'a [u8],
    cursor: usize,
}

impl<'a> ByteReader<'a> {
    fn take_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .cursor
            .checked_add(len)
            .ok_or(ShaleError::Corruption("node entry length overflow"))?;
        if end > self.image.len() {
            return Err(ShaleError::Corruption("node entry past page end"));
        }
        let bytes = &self.image[self.cursor..end];
        self.cursor = end;
        Ok(bytes)
    }

    fn take_u16(&mut self) -> Result<u16> {
        let bytes = self.take_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn take_u32(&mut self) -> Result<u32> {
        let bytes = self.take_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take_u64(&mut self) -> Result<u64> {
        let bytes = self.take_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(buf))
    }
}

fn read_u64(image: &[u8], offset: usize) -> Result<u64> {
    let bytes = image
        .get(offset..offset + 8)
        .ok_or(ShaleError::Corruption("node header truncated"))?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = 4096;

    #[test]
    fn leaf_round_trips_with_sibling_links() -> Result<()> {
        let mut node = Node::new_leaf();
        node.keys = vec![b"alpha".to_vec(), b"beta".to_vec()];
        node.values = vec![b"1".to_vec(), b"22".to_vec()];
        node.prev_leaf = Some(PageId(4));
        node.next_leaf = Some(PageId(5));
        let image = encode_node(&node, PAGE)?;
        let decoded = decode_node(&image)?;
        assert_eq!(decoded.keys, node.keys);
        assert_eq!(decoded.values, node.values);
        assert_eq!(decoded.prev_leaf, Some(PageId(4)));
        assert_eq!(decoded.next_leaf, Some(PageId(5)));
        Ok(())
    }

    #[test]
    fn empty_leaf_round_trips() -> Result<()> {
        let node = Node::new_leaf();
        let image = encode_node(&node, PAGE)?;
        let decoded = decode_node(&image)?;
        assert!(decoded.is_leaf());
        assert!(decoded.keys.is_empty());
        assert_eq!(decoded.next_leaf, None);
        Ok(())
    }

    #[test]
    fn internal_round_trips() -> Result<()> {
        let mut node = Node::new_internal(PageId(2));
        node.keys = vec![b"m".to_vec()];
        node.children.push(PageId(3));
        let image = encode_node(&node, PAGE)?;
        let decoded = decode_node(&image)?;
        assert_eq!(decoded.kind, NodeKind::Internal);
        assert_eq!(decoded.children, vec![PageId(2), PageId(3)]);
        assert_eq!(decoded.keys, vec![b"m".to_vec()]);
        Ok(())
    }

    #[test]
    fn crc_slot_is_left_zeroed() -> Result<()> {
        let mut node = Node::new_leaf();
        node.keys = vec![b"k".to_vec()];
        node.values = vec![b"v".to_vec()];
        let image = encode_node(&node, PAGE)?;
        assert_eq!(&image[4..8], &[0, 0, 0, 0]);
        Ok(())
    }

    #[test]
    fn unsorted_keys_are_rejected() -> Result<()> {
        let mut node = Node::new_leaf();
        node.keys = vec![b"b".to_vec(), b"a".to_vec()];
        node.values = vec![vec![], vec![]];
        let image = encode_node(&node, PAGE)?;
        let err = decode_node(&image).unwrap_err();
        assert!(matches!(err, ShaleError::Corruption(_)));
        Ok(())
    }

    #[test]
    fn truncated_entry_is_rejected() -> Result<()> {
        let mut node = Node::new_leaf();
        node.keys = vec![b"key".to_vec()];
        node.values = vec![b"value".to_vec()];
        let mut image = encode_node(&node, PAGE)?;
        // Claim a key longer than the page.
        image[NODE_HDR_LEN] = 0xFF;
        image[NODE_HDR_LEN + 1] = 0xFF;
        let err = decode_node(&image).unwrap_err();
        assert!(matches!(err, ShaleError::Corruption(_)));
        Ok(())
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut image = vec![0u8; PAGE];
        image[0] = 9;
        assert!(matches!(
            decode_node(&image).unwrap_err(),
            ShaleError::Corruption(_)
        ));
    }

    #[test]
    fn internal_without_separators_is_rejected() {
        let mut image = vec![0u8; PAGE];
        image[0] = 2;
        assert!(matches!(
            decode_node(&image).unwrap_err(),
            ShaleError::Corruption(_)
        ));
    }

    #[test]
    fn derived_order_fits_both_kinds() -> Result<()> {
        let order = derive_order(4096, 64, 256)?;
        assert!(order >= 2);
        // A full leaf of worst-case entries must encode.
        let mut leaf = Node::new_leaf();
        for i in 0..order {
            let mut key = vec![0u8; 64];
            key[..8].copy_from_slice(&(i as u64).to_be_bytes());
            leaf.keys.push(key);
            leaf.values.push(vec![0u8; 256]);
        }
        encode_node(&leaf, 4096)?;
        // So must a full internal node.
        let mut internal = Node::new_internal(PageId(1));
        for i in 0..order {
            let mut key = vec![0u8; 64];
            key[..8].copy_from_slice(&(i as u64).to_be_bytes());
            internal.keys.push(key);
            internal.children.push(PageId(i as u64 + 2));
        }
        encode_node(&internal, 4096)?;
        Ok(())
    }

    #[test]
    fn tiny_page_is_rejected() {
        assert!(matches!(
            derive_order(64, 64, 256).unwrap_err(),
            ShaleError::Invalid(_)
        ));
    }
}
