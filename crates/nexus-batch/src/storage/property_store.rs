//! Property chains
//!
//! An owner's properties live in a singly-linked chain of property records,
//! up to four blocks per record. Values that do not fit a block overflow into
//! `strings.store` (strings) or `arrays.store` (every array type).

use super::dynamic::DynamicStore;
use super::id_gen::IdGenerator;
use super::property::{EncodedValue, PropertyType, PropertyValue, decode_value};
use super::record::{
    BlockStorage, INLINE_CAPACITY, NULL_ID, PROPERTY_BLOCKS_PER_RECORD, PropertyBlock,
    PropertyRecord,
};
use super::record_file::RecordFile;
use crate::catalog::KeyId;
use crate::{Error, Result};
use std::collections::HashSet;
use std::path::Path;

/// A value that has been encoded and paired with its key ID, ready to write
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedProperty {
    /// Catalog ID of the key
    pub key_id: KeyId,
    /// Encoded value
    pub encoded: EncodedValue,
}

/// Counters reported by [`PropertyStore::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropertyStoreStats {
    /// Property records written
    pub property_records: u64,
    /// Blocks in strings.store
    pub string_blocks: u64,
    /// Blocks in arrays.store
    pub array_blocks: u64,
    /// Mapped bytes across the three files
    pub mapped_bytes: u64,
}

/// Property records plus the two overflow stores
pub struct PropertyStore {
    records: RecordFile<PropertyRecord>,
    ids: IdGenerator,
    strings: DynamicStore,
    arrays: DynamicStore,
}

impl PropertyStore {
    /// Open props.store, strings.store and arrays.store under `dir`
    pub fn open(dir: &Path, initial_size: usize) -> Result<Self> {
        let records = RecordFile::<PropertyRecord>::open(dir.join("props.store"), initial_size)?;
        let ids = IdGenerator::open(dir.join("props.store.id"), || {
            records.highest_in_use().map_or(0, |id| id + 1)
        })?;
        let strings = DynamicStore::open(dir, "strings.store", initial_size)?;
        let arrays = DynamicStore::open(dir, "arrays.store", initial_size)?;

        Ok(Self {
            records,
            ids,
            strings,
            arrays,
        })
    }

    /// Write `properties` as a new chain and return its head
    ///
    /// An empty list writes nothing and returns [`NULL_ID`].
    pub fn write_chain(&mut self, mut properties: Vec<PreparedProperty>) -> Result<u64> {
        if properties.is_empty() {
            return Ok(NULL_ID);
        }
        properties.sort_by_key(|p| p.key_id);

        let blocks = properties
            .into_iter()
            .map(|p| self.write_block(p))
            .collect::<Result<Vec<_>>>()?;

        let chunks: Vec<&[PropertyBlock]> = blocks.chunks(PROPERTY_BLOCKS_PER_RECORD).collect();
        let mut ids = Vec::with_capacity(chunks.len());
        for _ in 0..chunks.len() {
            ids.push(self.ids.allocate()?);
        }

        for (index, chunk) in chunks.iter().enumerate().rev() {
            let mut record = PropertyRecord::fresh(chunk);
            record.next_prop_id = ids.get(index + 1).copied().unwrap_or(NULL_ID);
            self.records.write(ids[index], &record)?;
        }

        Ok(ids[0])
    }

    /// Set one property on the chain starting at `head`, returning the new head
    ///
    /// An existing block for the key is overwritten in place. Otherwise the
    /// first record with a free slot takes the block, and failing that a new
    /// record is prepended.
    pub fn set_property(&mut self, head: u64, property: PreparedProperty) -> Result<u64> {
        let chain = self.chain_records(head)?;

        let existing = chain.iter().find_map(|(id, record)| {
            record
                .used_blocks()
                .iter()
                .position(|b| b.key_id == property.key_id)
                .map(|slot| (*id, *record, slot))
        });
        let free = chain
            .iter()
            .find(|(_, record)| record.has_free_slot())
            .copied();

        let block = self.write_block(property)?;

        if let Some((id, mut record, slot)) = existing {
            record.blocks[slot] = block;
            self.records.write(id, &record)?;
            return Ok(head);
        }

        if let Some((id, mut record)) = free {
            let slot = record.block_count as usize;
            record.blocks[slot] = block;
            record.block_count += 1;
            self.records.write(id, &record)?;
            return Ok(head);
        }

        let id = self.ids.allocate()?;
        let mut record = PropertyRecord::fresh(&[block]);
        record.next_prop_id = head;
        self.records.write(id, &record)?;
        Ok(id)
    }

    fn write_block(&mut self, property: PreparedProperty) -> Result<PropertyBlock> {
        let PreparedProperty { key_id, encoded } = property;
        Ok(match encoded {
            EncodedValue::Inline { tag, bytes } => PropertyBlock::inline(key_id, tag as u8, &bytes),
            EncodedValue::Overflow { tag, payload } => {
                let head = self.overflow_store_mut(tag).encode(&payload)?;
                PropertyBlock::dynamic(key_id, tag as u8, head)
            }
        })
    }

    /// Decode every property of the chain starting at `head`
    pub fn read_chain(&self, head: u64) -> Result<Vec<(KeyId, PropertyValue)>> {
        let mut seen = HashSet::new();
        let mut properties = Vec::new();

        for (id, record) in self.chain_records(head)? {
            for block in record.used_blocks() {
                if !seen.insert(block.key_id) {
                    return Err(Error::corruption(format!(
                        "key {} appears twice in the property chain at record {}",
                        block.key_id, id
                    )));
                }
                properties.push(self.decode_block(block)?);
            }
        }

        Ok(properties)
    }

    /// Decode a single property block
    pub fn decode_block(&self, block: &PropertyBlock) -> Result<(KeyId, PropertyValue)> {
        let tag = PropertyType::from_u8(block.type_tag)?;
        let storage = BlockStorage::from_u8(block.storage).ok_or_else(|| {
            Error::corruption(format!(
                "property block for key {} has unknown storage kind {}",
                block.key_id, block.storage
            ))
        })?;

        let value = match storage {
            BlockStorage::Inline => {
                let len = block.inline_len as usize;
                if len > INLINE_CAPACITY {
                    return Err(Error::corruption(format!(
                        "inline property for key {} claims {} bytes",
                        block.key_id, len
                    )));
                }
                decode_value(tag, &block.payload[..len])?
            }
            BlockStorage::Dynamic => {
                let bytes = self.overflow_store(tag).decode(block.dynamic_head())?;
                decode_value(tag, &bytes)?
            }
        };

        Ok((block.key_id, value))
    }

    fn chain_records(&self, head: u64) -> Result<Vec<(u64, PropertyRecord)>> {
        let limit = self.ids.high_id();
        let mut records = Vec::new();
        let mut current = head;

        while current != NULL_ID {
            if records.len() as u64 >= limit {
                return Err(Error::corruption(format!(
                    "property chain starting at {} does not terminate",
                    head
                )));
            }
            let record = self.records.get(current).ok_or_else(|| {
                Error::corruption(format!(
                    "property chain starting at {} references record {} which is not in use",
                    head, current
                ))
            })?;
            records.push((current, record));
            current = record.next_prop_id;
        }

        Ok(records)
    }

    fn overflow_store(&self, tag: PropertyType) -> &DynamicStore {
        if tag.is_array() {
            &self.arrays
        } else {
            &self.strings
        }
    }

    fn overflow_store_mut(&mut self, tag: PropertyType) -> &mut DynamicStore {
        if tag.is_array() {
            &mut self.arrays
        } else {
            &mut self.strings
        }
    }

    /// Record counts and mapped sizes
    pub fn stats(&self) -> PropertyStoreStats {
        PropertyStoreStats {
            property_records: self.ids.high_id(),
            string_blocks: self.strings.high_id(),
            array_blocks: self.arrays.high_id(),
            mapped_bytes: (self.records.size() + self.strings.file_size() + self.arrays.file_size())
                as u64,
        }
    }

    /// Trim, sync and close all three files and their id generators
    pub fn close(self) -> Result<()> {
        self.records.close(self.ids.high_id())?;
        self.ids.close()?;
        self.strings.close()?;
        self.arrays.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::property::encode_value;
    use tempfile::TempDir;

    fn prepared(key_id: KeyId, value: impl Into<PropertyValue>) -> PreparedProperty {
        PreparedProperty {
            key_id,
            encoded: encode_value(&value.into()).unwrap(),
        }
    }

    fn store(dir: &TempDir) -> PropertyStore {
        PropertyStore::open(dir.path(), 4096).unwrap()
    }

    #[test]
    fn test_empty_chain() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        assert_eq!(store.write_chain(Vec::new()).unwrap(), NULL_ID);
        assert!(store.read_chain(NULL_ID).unwrap().is_empty());
        assert_eq!(store.stats().property_records, 0);
    }

    #[test]
    fn test_chain_spans_records() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        let props = (0..9u32).map(|k| prepared(k, i64::from(k) * 10)).collect();
        let head = store.write_chain(props).unwrap();

        assert_eq!(store.stats().property_records, 3);
        let read = store.read_chain(head).unwrap();
        assert_eq!(read.len(), 9);
        for (key, value) in read {
            assert_eq!(value, PropertyValue::Long(i64::from(key) * 10));
        }
    }

    #[test]
    fn test_blocks_are_sorted_by_key() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        let head = store
            .write_chain(vec![prepared(7, 1i32), prepared(2, 2i32), prepared(5, 3i32)])
            .unwrap();
        let keys: Vec<KeyId> = store.read_chain(head).unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![2, 5, 7]);
    }

    #[test]
    fn test_overflow_routing() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        let long_string = "a string well past the inline capacity".to_string();
        let shorts = PropertyValue::ShortArray(vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let head = store
            .write_chain(vec![
                prepared(0, long_string.clone()),
                prepared(1, shorts.clone()),
                prepared(2, "tiny"),
            ])
            .unwrap();

        let stats = store.stats();
        assert_eq!(stats.string_blocks, 1);
        assert_eq!(stats.array_blocks, 1);

        let read = store.read_chain(head).unwrap();
        assert_eq!(read[0], (0, PropertyValue::String(long_string)));
        assert_eq!(read[1], (1, shorts));
        assert_eq!(read[2], (2, PropertyValue::from("tiny")));
    }

    #[test]
    fn test_set_property_replaces_in_place() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        let head = store.write_chain(vec![prepared(1, 1i64), prepared(2, 2i64)]).unwrap();
        let new_head = store.set_property(head, prepared(2, "changed")).unwrap();

        assert_eq!(new_head, head);
        let read = store.read_chain(head).unwrap();
        assert_eq!(read, vec![(1, PropertyValue::Long(1)), (2, PropertyValue::from("changed"))]);
    }

    #[test]
    fn test_set_property_fills_free_slot_then_prepends() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        let head = store
            .write_chain((0..3u32).map(|k| prepared(k, true)).collect())
            .unwrap();

        let head = store.set_property(head, prepared(3, false)).unwrap();
        assert_eq!(store.stats().property_records, 1);

        let new_head = store.set_property(head, prepared(4, 'x')).unwrap();
        assert_ne!(new_head, head);
        assert_eq!(store.stats().property_records, 2);
        assert_eq!(store.read_chain(new_head).unwrap().len(), 5);

        let from_null = store.set_property(NULL_ID, prepared(9, 9i8)).unwrap();
        assert_eq!(store.read_chain(from_null).unwrap(), vec![(9, PropertyValue::Byte(9))]);
    }

    #[test]
    fn test_broken_link_is_corruption() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        let head = store
            .write_chain((0..6u32).map(|k| prepared(k, 1i32)).collect())
            .unwrap();
        let mut record = store.records.get(head).unwrap();
        record.next_prop_id = 40;
        store.records.write(head, &record).unwrap();

        assert!(store.read_chain(head).unwrap_err().is_corruption());
    }

    #[test]
    fn test_cycle_is_corruption() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        let head = store.write_chain(vec![prepared(0, 1i32)]).unwrap();
        let mut record = store.records.get(head).unwrap();
        record.next_prop_id = head;
        store.records.write(head, &record).unwrap();

        assert!(store.read_chain(head).unwrap_err().is_corruption());
    }

    #[test]
    fn test_bad_block_tag_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut block = PropertyBlock::inline(1, 0, &[1]);
        assert!(store.decode_block(&block).unwrap_err().is_corruption());

        block.type_tag = PropertyType::Bool as u8;
        block.storage = 9;
        assert!(store.decode_block(&block).unwrap_err().is_corruption());
    }

    #[test]
    fn test_reopen_reads_back() {
        let dir = TempDir::new().unwrap();
        let value = PropertyValue::from(vec!["one", "two", "three"]);
        let head = {
            let mut store = store(&dir);
            let head = store.write_chain(vec![prepared(3, value.clone())]).unwrap();
            store.close().unwrap();
            head
        };

        let store = store(&dir);
        assert_eq!(store.read_chain(head).unwrap(), vec![(3, value)]);
    }
}
