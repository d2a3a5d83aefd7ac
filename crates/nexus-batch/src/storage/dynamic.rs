//! Dynamic record chains for payloads that do not fit a property block
//!
//! A payload is split into [`DYNAMIC_BLOCK_CAPACITY`]-byte blocks linked
//! through `next_block_id`. The head block carries the chain-start flag and
//! the total payload length; an empty payload still takes one block.

use super::id_gen::IdGenerator;
use super::record::{DYNAMIC_BLOCK_CAPACITY, DynamicRecord, NULL_ID};
use super::record_file::RecordFile;
use crate::{Error, Result};
use std::path::Path;

/// Record file plus ID generator for one kind of dynamic record
pub struct DynamicStore {
    name: &'static str,
    records: RecordFile<DynamicRecord>,
    ids: IdGenerator,
}

impl DynamicStore {
    /// Open `<dir>/<name>` and its id file
    pub fn open(dir: &Path, name: &'static str, initial_size: usize) -> Result<Self> {
        let records = RecordFile::<DynamicRecord>::open(dir.join(name), initial_size)?;
        let ids = IdGenerator::open(dir.join(format!("{}.id", name)), || {
            records.highest_in_use().map_or(0, |id| id + 1)
        })?;
        Ok(Self { name, records, ids })
    }

    /// Number of blocks a payload of `len` bytes occupies
    pub fn blocks_for(len: usize) -> usize {
        len.div_ceil(DYNAMIC_BLOCK_CAPACITY).max(1)
    }

    /// Write `payload` as a new chain and return its head ID
    pub fn encode(&mut self, payload: &[u8]) -> Result<u64> {
        let total_len = u32::try_from(payload.len()).map_err(|_| {
            Error::unsupported(format!(
                "payload of {} bytes exceeds the dynamic record limit",
                payload.len()
            ))
        })?;

        let chunks: Vec<&[u8]> = if payload.is_empty() {
            vec![payload]
        } else {
            payload.chunks(DYNAMIC_BLOCK_CAPACITY).collect()
        };

        let mut ids = Vec::with_capacity(chunks.len());
        for _ in 0..chunks.len() {
            ids.push(self.ids.allocate()?);
        }

        // Tail first, so the head never points at an unwritten block
        for (index, chunk) in chunks.iter().enumerate().rev() {
            let next = ids.get(index + 1).copied().unwrap_or(NULL_ID);
            let mut block = DynamicRecord::block(chunk, next);
            if index == 0 {
                block.mark_start(total_len);
            }
            self.records.write(ids[index], &block)?;
        }

        tracing::trace!(store = self.name, head = ids[0], blocks = ids.len(), "wrote dynamic chain");
        Ok(ids[0])
    }

    /// Reassemble the payload of the chain starting at `head_id`
    pub fn decode(&self, head_id: u64) -> Result<Vec<u8>> {
        let head = self.block(head_id, head_id)?;
        if !head.is_start() {
            return Err(Error::corruption(format!(
                "{} block {} is not the start of a chain",
                self.name, head_id
            )));
        }

        let total_len = head.total_len as usize;
        let max_blocks = Self::blocks_for(total_len);
        let mut payload = Vec::with_capacity(total_len);
        let mut current = head;
        let mut visited = 0;

        loop {
            visited += 1;
            if visited > max_blocks {
                return Err(Error::corruption(format!(
                    "{} chain {} has more blocks than its declared length of {} bytes allows",
                    self.name, head_id, total_len
                )));
            }

            let used = current.data_len as usize;
            if used > DYNAMIC_BLOCK_CAPACITY {
                return Err(Error::corruption(format!(
                    "{} chain {} has a block claiming {} bytes",
                    self.name, head_id, used
                )));
            }
            payload.extend_from_slice(&current.data[..used]);

            if current.next_block_id == NULL_ID {
                break;
            }

            let next_id = current.next_block_id;
            current = self.block(head_id, next_id)?;
            if current.is_start() {
                return Err(Error::corruption(format!(
                    "{} chain {} links into another chain at block {}",
                    self.name, head_id, next_id
                )));
            }
        }

        if payload.len() != total_len {
            return Err(Error::corruption(format!(
                "{} chain {} declares {} bytes but holds {}",
                self.name,
                head_id,
                total_len,
                payload.len()
            )));
        }

        Ok(payload)
    }

    fn block(&self, head_id: u64, id: u64) -> Result<DynamicRecord> {
        self.records.get(id).ok_or_else(|| {
            Error::corruption(format!(
                "{} chain {} references block {} which is not in use",
                self.name, head_id, id
            ))
        })
    }

    /// Next block ID (blocks written so far)
    pub fn high_id(&self) -> u64 {
        self.ids.high_id()
    }

    /// Size of the backing file
    pub fn file_size(&self) -> usize {
        self.records.size()
    }

    /// Trim and sync the store, then close its id file
    pub fn close(self) -> Result<()> {
        self.records.close(self.ids.high_id())?;
        self.ids.close()
    }

    #[cfg(test)]
    pub(crate) fn raw_write(&mut self, id: u64, record: &DynamicRecord) -> Result<()> {
        self.records.write(id, record)
    }

    #[cfg(test)]
    pub(crate) fn raw_read(&self, id: u64) -> Option<DynamicRecord> {
        self.records.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> DynamicStore {
        DynamicStore::open(dir.path(), "strings.store", 4096).unwrap()
    }

    #[test]
    fn test_block_counts() {
        assert_eq!(DynamicStore::blocks_for(0), 1);
        assert_eq!(DynamicStore::blocks_for(1), 1);
        assert_eq!(DynamicStore::blocks_for(DYNAMIC_BLOCK_CAPACITY), 1);
        assert_eq!(DynamicStore::blocks_for(DYNAMIC_BLOCK_CAPACITY + 1), 2);
        assert_eq!(DynamicStore::blocks_for(DYNAMIC_BLOCK_CAPACITY * 3), 3);
    }

    #[test]
    fn test_multi_block_chain() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        let payload: Vec<u8> = (0..250u32).map(|i| (i % 251) as u8).collect();
        let head = store.encode(&payload).unwrap();

        assert_eq!(store.high_id(), 3);
        assert_eq!(store.decode(head).unwrap(), payload);

        let first = store.raw_read(head).unwrap();
        assert!(first.is_start());
        assert_eq!(first.total_len, 250);
        let second = store.raw_read(first.next_block_id).unwrap();
        assert!(!second.is_start());
        let third = store.raw_read(second.next_block_id).unwrap();
        assert_eq!(third.next_block_id, NULL_ID);
        assert_eq!(third.data_len as usize, 250 - 2 * DYNAMIC_BLOCK_CAPACITY);
    }

    #[test]
    fn test_empty_payload_takes_one_block() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        let head = store.encode(&[]).unwrap();
        assert_eq!(store.high_id(), 1);
        assert_eq!(store.decode(head).unwrap(), Vec::<u8>::new());

        let block = store.raw_read(head).unwrap();
        assert_eq!(block.total_len, 0);
        assert_eq!(block.data_len, 0);
    }

    #[test]
    fn test_exact_capacity_payload() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        let payload = vec![0xAB; DYNAMIC_BLOCK_CAPACITY];
        let head = store.encode(&payload).unwrap();
        assert_eq!(store.high_id(), 1);
        assert_eq!(store.decode(head).unwrap(), payload);
    }

    #[test]
    fn test_broken_chain_is_corruption() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        let payload = vec![7u8; DYNAMIC_BLOCK_CAPACITY * 2];
        let head = store.encode(&payload).unwrap();

        let mut first = store.raw_read(head).unwrap();
        first.next_block_id = 500;
        store.raw_write(head, &first).unwrap();

        let err = store.decode(head).unwrap_err();
        assert!(err.is_corruption(), "unexpected error: {}", err);
    }

    #[test]
    fn test_length_mismatch_is_corruption() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        let head = store.encode(b"short payload").unwrap();
        let mut block = store.raw_read(head).unwrap();
        block.total_len = 200;
        store.raw_write(head, &block).unwrap();

        assert!(store.decode(head).unwrap_err().is_corruption());
    }

    #[test]
    fn test_non_head_block_is_corruption() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        let head = store.encode(&[1u8; 150]).unwrap();
        let second = store.raw_read(head).unwrap().next_block_id;

        assert!(store.decode(second).unwrap_err().is_corruption());
        assert!(store.decode(NULL_ID).unwrap_err().is_corruption());
    }

    #[test]
    fn test_reopen_continues_ids() {
        let dir = TempDir::new().unwrap();
        let head = {
            let mut store = store(&dir);
            let head = store.encode(&[9u8; 200]).unwrap();
            store.close().unwrap();
            head
        };

        let mut store = store(&dir);
        assert_eq!(store.decode(head).unwrap(), vec![9u8; 200]);
        assert_eq!(store.encode(b"next").unwrap(), 3);
    }
}
