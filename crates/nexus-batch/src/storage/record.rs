//! Fixed-size record layouts
//!
//! Every store file is an array of one of these `#[repr(C)]` plain-old-data
//! structs, indexed by record ID. The layouts are the ones the online engine
//! opens, so they must not change shape without bumping
//! [`STORE_FORMAT_VERSION`](crate::storage::STORE_FORMAT_VERSION).
//!
//! A record whose `flags` word is zero is not in use. Growing a file
//! zero-fills it, so positions that were never written read back as free.

use bytemuck::{Pod, Zeroable};

/// Reserved ID meaning "no link"
pub const NULL_ID: u64 = u64::MAX;

/// Record holds live data
pub const FLAG_IN_USE: u32 = 0x01;

/// Dynamic record is the first block of its chain
pub const FLAG_CHAIN_START: u32 = 0x02;

/// Property blocks held by one property record
pub const PROPERTY_BLOCKS_PER_RECORD: usize = 4;

/// Value bytes a property block stores without overflowing
pub const INLINE_CAPACITY: usize = 8;

/// Payload bytes carried by one dynamic record
pub const DYNAMIC_BLOCK_CAPACITY: usize = 96;

/// A fixed-size record that can live in a [`RecordFile`](super::record_file::RecordFile)
pub trait Record: Pod {
    /// On-disk size of the record in bytes
    const SIZE: usize = std::mem::size_of::<Self>();

    /// Raw flag word
    fn flags(&self) -> u32;

    /// Whether the record holds live data
    fn in_use(&self) -> bool {
        self.flags() & FLAG_IN_USE != 0
    }
}

/// Node record in nodes.store (24 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct NodeRecord {
    /// Head of the node's relationship chain
    pub next_rel_id: u64,
    /// Head of the node's property chain
    pub next_prop_id: u64,
    /// Flags (bit 0: in use)
    pub flags: u32,
    _padding: u32,
}

impl NodeRecord {
    /// A new in-use node with no relationships and no properties
    pub fn fresh() -> Self {
        Self {
            next_rel_id: NULL_ID,
            next_prop_id: NULL_ID,
            flags: FLAG_IN_USE,
            _padding: 0,
        }
    }
}

impl Record for NodeRecord {
    fn flags(&self) -> u32 {
        self.flags
    }
}

/// Relationship record in rels.store (64 bytes)
///
/// Each relationship sits in two doubly-linked chains at once: the chain of
/// its first node (`first_prev`/`first_next`) and the chain of its second
/// node (`second_prev`/`second_next`). A self-loop only uses the first pair.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct RelationshipRecord {
    /// Start node ID
    pub first_node: u64,
    /// End node ID
    pub second_node: u64,
    /// Previous relationship in the start node's chain
    pub first_prev: u64,
    /// Next relationship in the start node's chain
    pub first_next: u64,
    /// Previous relationship in the end node's chain
    pub second_prev: u64,
    /// Next relationship in the end node's chain
    pub second_next: u64,
    /// Head of the relationship's property chain
    pub next_prop_id: u64,
    /// Relationship type ID from the catalog
    pub type_id: u32,
    /// Flags (bit 0: in use)
    pub flags: u32,
}

impl RelationshipRecord {
    /// A new in-use relationship that is not linked into any chain yet
    pub fn fresh(first_node: u64, second_node: u64, type_id: u32) -> Self {
        Self {
            first_node,
            second_node,
            first_prev: NULL_ID,
            first_next: NULL_ID,
            second_prev: NULL_ID,
            second_next: NULL_ID,
            next_prop_id: NULL_ID,
            type_id,
            flags: FLAG_IN_USE,
        }
    }

    /// Whether both endpoints are the same node
    pub fn is_self_loop(&self) -> bool {
        self.first_node == self.second_node
    }

    /// `(prev, next)` pointers of the chain belonging to `node_id`
    ///
    /// The first pair wins when both endpoints match, which keeps a
    /// self-loop on a single chain position.
    pub fn chain_for(&self, node_id: u64) -> Option<(u64, u64)> {
        if self.first_node == node_id {
            Some((self.first_prev, self.first_next))
        } else if self.second_node == node_id {
            Some((self.second_prev, self.second_next))
        } else {
            None
        }
    }

    /// Rewrite the `prev` pointer of the chain belonging to `node_id`
    ///
    /// Returns `false` if the relationship does not touch `node_id`.
    pub fn set_prev_for(&mut self, node_id: u64, prev: u64) -> bool {
        if self.first_node == node_id {
            self.first_prev = prev;
            true
        } else if self.second_node == node_id {
            self.second_prev = prev;
            true
        } else {
            false
        }
    }
}

impl Record for RelationshipRecord {
    fn flags(&self) -> u32 {
        self.flags
    }
}

/// Where a property block keeps its value bytes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStorage {
    /// `payload[..inline_len]` holds the value
    Inline = 0,
    /// `payload` holds the head ID of a dynamic record chain
    Dynamic = 1,
}

impl BlockStorage {
    /// Decode the storage byte of a block
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Inline),
            1 => Some(Self::Dynamic),
            _ => None,
        }
    }
}

/// One key/value slot of a property record (16 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PropertyBlock {
    /// Inline value bytes, or little-endian dynamic chain head
    pub payload: [u8; 8],
    /// Property key ID from the catalog
    pub key_id: u32,
    /// [`PropertyType`](super::property::PropertyType) discriminant
    pub type_tag: u8,
    /// Number of meaningful bytes in `payload` for inline values
    pub inline_len: u8,
    /// [`BlockStorage`] discriminant
    pub storage: u8,
    _reserved: u8,
}

impl PropertyBlock {
    /// Block holding `bytes` inline
    ///
    /// `bytes` must not exceed [`INLINE_CAPACITY`].
    pub fn inline(key_id: u32, type_tag: u8, bytes: &[u8]) -> Self {
        let mut payload = [0u8; INLINE_CAPACITY];
        payload[..bytes.len()].copy_from_slice(bytes);
        Self {
            payload,
            key_id,
            type_tag,
            inline_len: bytes.len() as u8,
            storage: BlockStorage::Inline as u8,
            _reserved: 0,
        }
    }

    /// Block pointing at a dynamic record chain
    pub fn dynamic(key_id: u32, type_tag: u8, head_id: u64) -> Self {
        Self {
            payload: head_id.to_le_bytes(),
            key_id,
            type_tag,
            inline_len: 0,
            storage: BlockStorage::Dynamic as u8,
            _reserved: 0,
        }
    }

    /// Head ID of the dynamic chain this block points at
    pub fn dynamic_head(&self) -> u64 {
        u64::from_le_bytes(self.payload)
    }
}

/// Property record in props.store (80 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PropertyRecord {
    /// Property slots; only the first `block_count` are meaningful
    pub blocks: [PropertyBlock; PROPERTY_BLOCKS_PER_RECORD],
    /// Next record of the owner's property chain
    pub next_prop_id: u64,
    /// Flags (bit 0: in use)
    pub flags: u32,
    /// Number of used blocks
    pub block_count: u32,
}

impl PropertyRecord {
    /// A new in-use record holding `blocks`
    ///
    /// `blocks` must not exceed [`PROPERTY_BLOCKS_PER_RECORD`].
    pub fn fresh(blocks: &[PropertyBlock]) -> Self {
        let mut record = Self::zeroed();
        record.blocks[..blocks.len()].copy_from_slice(blocks);
        record.block_count = blocks.len() as u32;
        record.next_prop_id = NULL_ID;
        record.flags = FLAG_IN_USE;
        record
    }

    /// Used blocks of this record
    pub fn used_blocks(&self) -> &[PropertyBlock] {
        let count = (self.block_count as usize).min(PROPERTY_BLOCKS_PER_RECORD);
        &self.blocks[..count]
    }

    /// Whether another block fits
    pub fn has_free_slot(&self) -> bool {
        (self.block_count as usize) < PROPERTY_BLOCKS_PER_RECORD
    }
}

impl Record for PropertyRecord {
    fn flags(&self) -> u32 {
        self.flags
    }
}

/// Block of a dynamic (overflow) chain in strings.store / arrays.store (120 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DynamicRecord {
    /// Next block of the chain
    pub next_block_id: u64,
    /// Total payload length of the chain (head block only)
    pub total_len: u32,
    /// Payload bytes used in this block
    pub data_len: u32,
    /// Flags (bit 0: in use, bit 1: chain start)
    pub flags: u32,
    _padding: u32,
    /// Payload bytes
    pub data: [u8; DYNAMIC_BLOCK_CAPACITY],
}

impl DynamicRecord {
    /// An in-use block carrying `chunk`
    ///
    /// `chunk` must not exceed [`DYNAMIC_BLOCK_CAPACITY`].
    pub fn block(chunk: &[u8], next_block_id: u64) -> Self {
        let mut record = Self::zeroed();
        record.data[..chunk.len()].copy_from_slice(chunk);
        record.data_len = chunk.len() as u32;
        record.next_block_id = next_block_id;
        record.flags = FLAG_IN_USE;
        record
    }

    /// Turn this block into the head of a chain of `total_len` bytes
    pub fn mark_start(&mut self, total_len: u32) {
        self.flags |= FLAG_CHAIN_START;
        self.total_len = total_len;
    }

    /// Whether this block starts a chain
    pub fn is_start(&self) -> bool {
        self.flags & FLAG_CHAIN_START != 0
    }
}

impl Record for DynamicRecord {
    fn flags(&self) -> u32 {
        self.flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes() {
        assert_eq!(NodeRecord::SIZE, 24);
        assert_eq!(RelationshipRecord::SIZE, 64);
        assert_eq!(std::mem::size_of::<PropertyBlock>(), 16);
        assert_eq!(PropertyRecord::SIZE, 80);
        assert_eq!(DynamicRecord::SIZE, 120);
    }

    #[test]
    fn test_zeroed_records_are_not_in_use() {
        assert!(!NodeRecord::zeroed().in_use());
        assert!(!RelationshipRecord::zeroed().in_use());
        assert!(!PropertyRecord::zeroed().in_use());
        assert!(!DynamicRecord::zeroed().in_use());
    }

    #[test]
    fn test_fresh_pointers_are_null() {
        let node = NodeRecord::fresh();
        assert!(node.in_use());
        assert_eq!(node.next_rel_id, NULL_ID);
        assert_eq!(node.next_prop_id, NULL_ID);

        let rel = RelationshipRecord::fresh(1, 2, 0);
        assert_eq!(rel.first_prev, NULL_ID);
        assert_eq!(rel.first_next, NULL_ID);
        assert_eq!(rel.second_prev, NULL_ID);
        assert_eq!(rel.second_next, NULL_ID);
        assert_eq!(rel.next_prop_id, NULL_ID);
    }

    #[test]
    fn test_chain_for_picks_matching_pair() {
        let mut rel = RelationshipRecord::fresh(10, 20, 0);
        rel.first_next = 5;
        rel.second_next = 6;

        assert_eq!(rel.chain_for(10), Some((NULL_ID, 5)));
        assert_eq!(rel.chain_for(20), Some((NULL_ID, 6)));
        assert_eq!(rel.chain_for(30), None);

        assert!(rel.set_prev_for(20, 99));
        assert_eq!(rel.second_prev, 99);
        assert_eq!(rel.first_prev, NULL_ID);
        assert!(!rel.set_prev_for(30, 1));
    }

    #[test]
    fn test_self_loop_uses_first_pair() {
        let mut rel = RelationshipRecord::fresh(7, 7, 0);
        rel.first_next = 3;
        assert!(rel.is_self_loop());
        assert_eq!(rel.chain_for(7), Some((NULL_ID, 3)));

        rel.set_prev_for(7, 4);
        assert_eq!(rel.first_prev, 4);
        assert_eq!(rel.second_prev, NULL_ID);
    }

    #[test]
    fn test_property_block_layouts() {
        let block = PropertyBlock::inline(3, 9, b"abc");
        assert_eq!(block.inline_len, 3);
        assert_eq!(&block.payload[..3], b"abc");
        assert_eq!(BlockStorage::from_u8(block.storage), Some(BlockStorage::Inline));

        let block = PropertyBlock::dynamic(3, 9, 0x0102_0304);
        assert_eq!(block.dynamic_head(), 0x0102_0304);
        assert_eq!(BlockStorage::from_u8(block.storage), Some(BlockStorage::Dynamic));
        assert_eq!(BlockStorage::from_u8(7), None);
    }

    #[test]
    fn test_property_record_slots() {
        let blocks = [PropertyBlock::inline(1, 1, &[1]); 3];
        let mut record = PropertyRecord::fresh(&blocks);
        assert_eq!(record.used_blocks().len(), 3);
        assert!(record.has_free_slot());

        record.blocks[3] = PropertyBlock::inline(2, 1, &[0]);
        record.block_count = 4;
        assert!(!record.has_free_slot());
    }

    #[test]
    fn test_dynamic_block_start_marker() {
        let mut block = DynamicRecord::block(b"hello", NULL_ID);
        assert!(block.in_use());
        assert!(!block.is_start());
        block.mark_start(5);
        assert!(block.is_start());
        assert_eq!(block.total_len, 5);
        assert_eq!(&block.data[..block.data_len as usize], b"hello");
    }
}
