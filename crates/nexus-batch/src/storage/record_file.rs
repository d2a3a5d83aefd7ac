//! Memory-mapped file of fixed-size records
//!
//! Record `id` lives at byte offset `id * R::SIZE`. Writes past the end grow
//! the file (doubling, zero-filled); reads past the end report "no record".

use super::record::Record;
use crate::{Error, Result};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Fixed-size record file backed by a writable memory map
pub struct RecordFile<R: Record> {
    file: File,
    mmap: MmapMut,
    path: PathBuf,
    current_size: usize,
    _record: PhantomData<R>,
}

impl<R: Record> RecordFile<R> {
    /// Create or open a record file, mapping at least `initial_size` bytes
    pub fn open<P: AsRef<Path>>(path: P, initial_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let existing = file.metadata()?.len() as usize;
        if existing % R::SIZE != 0 {
            return Err(Error::storage(format!(
                "{} is {} bytes, not a multiple of the {}-byte record size",
                path.display(),
                existing,
                R::SIZE
            )));
        }

        let current_size = round_up(existing.max(initial_size).max(R::SIZE), R::SIZE);
        if current_size != existing {
            file.set_len(current_size as u64)?;
        }

        // The writer is the only user of this file while the map is alive.
        let mmap = unsafe { MmapOptions::new().len(current_size).map_mut(&file)? };

        Ok(Self {
            file,
            mmap,
            path,
            current_size,
            _record: PhantomData,
        })
    }

    /// Mapped size in bytes
    pub fn size(&self) -> usize {
        self.current_size
    }

    /// Number of record positions currently backed by the file
    pub fn capacity(&self) -> u64 {
        (self.current_size / R::SIZE) as u64
    }

    /// Read the raw record at `id`, in use or not
    ///
    /// Returns `None` when `id` lies beyond the end of the file.
    pub fn read(&self, id: u64) -> Option<R> {
        let offset = offset_of::<R>(id)?;
        let end = offset.checked_add(R::SIZE)?;
        if end > self.current_size {
            return None;
        }
        Some(bytemuck::pod_read_unaligned::<R>(&self.mmap[offset..end]))
    }

    /// Read the record at `id` only if it is in use
    pub fn get(&self, id: u64) -> Option<R> {
        self.read(id).filter(|record| record.in_use())
    }

    /// Write `record` at `id`, growing the file if necessary
    pub fn write(&mut self, id: u64, record: &R) -> Result<()> {
        let offset = offset_of::<R>(id)
            .ok_or_else(|| Error::storage(format!("record id {} is out of range", id)))?;
        let required_size = offset + R::SIZE;

        if required_size > self.current_size {
            let new_size = round_up((self.current_size * 2).max(required_size), R::SIZE);
            self.resize(new_size)?;
        }

        self.mmap[offset..required_size].copy_from_slice(bytemuck::bytes_of(record));
        Ok(())
    }

    /// Highest in-use record ID, scanning backwards from the end
    pub fn highest_in_use(&self) -> Option<u64> {
        (0..self.capacity())
            .rev()
            .find(|&id| self.read(id).is_some_and(|record| record.in_use()))
    }

    /// Flush, trim the file to `high_id` records and sync it
    pub fn close(mut self, high_id: u64) -> Result<()> {
        self.mmap.flush()?;
        drop(std::mem::replace(&mut self.mmap, MmapMut::map_anon(1)?));

        let len = high_id
            .checked_mul(R::SIZE as u64)
            .ok_or_else(|| Error::storage(format!("high id {} overflows file length", high_id)))?;
        self.file.set_len(len)?;
        self.file.sync_all()?;
        Ok(())
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        self.mmap.flush()?;

        // Unmap before changing the file length
        drop(std::mem::replace(&mut self.mmap, MmapMut::map_anon(1)?));

        self.file.set_len(new_size as u64)?;
        self.current_size = new_size;

        self.mmap = unsafe { MmapOptions::new().len(new_size).map_mut(&self.file)? };

        tracing::trace!(path = %self.path.display(), new_size, "grew record file");
        Ok(())
    }
}

fn offset_of<R: Record>(id: u64) -> Option<usize> {
    usize::try_from(id).ok()?.checked_mul(R::SIZE)
}

fn round_up(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::{NodeRecord, RelationshipRecord};
    use tempfile::TempDir;

    fn node_file(dir: &TempDir, initial: usize) -> RecordFile<NodeRecord> {
        RecordFile::open(dir.path().join("nodes.store"), initial).unwrap()
    }

    #[test]
    fn test_write_and_read() {
        let dir = TempDir::new().unwrap();
        let mut file = node_file(&dir, 1024);

        let mut record = NodeRecord::fresh();
        record.next_prop_id = 42;
        file.write(3, &record).unwrap();

        assert_eq!(file.get(3), Some(record));
    }

    #[test]
    fn test_unwritten_positions_are_not_in_use() {
        let dir = TempDir::new().unwrap();
        let mut file = node_file(&dir, 1024);
        file.write(5, &NodeRecord::fresh()).unwrap();

        for id in 0..5 {
            assert!(file.read(id).is_some());
            assert!(file.get(id).is_none(), "record {} should be free", id);
        }
    }

    #[test]
    fn test_read_beyond_capacity() {
        let dir = TempDir::new().unwrap();
        let file = node_file(&dir, 1024);
        assert!(file.read(file.capacity()).is_none());
        assert!(file.read(u64::MAX).is_none());
    }

    #[test]
    fn test_file_growth_zero_fills() {
        let dir = TempDir::new().unwrap();
        let mut file = node_file(&dir, NodeRecord::SIZE * 4);
        assert_eq!(file.capacity(), 4);

        file.write(1000, &NodeRecord::fresh()).unwrap();
        assert!(file.capacity() > 1000);
        assert!(file.get(1000).is_some());
        assert!(file.get(500).is_none());
        assert_eq!(file.size() % NodeRecord::SIZE, 0);
    }

    #[test]
    fn test_highest_in_use() {
        let dir = TempDir::new().unwrap();
        let mut file = node_file(&dir, 1024);
        assert_eq!(file.highest_in_use(), None);

        file.write(2, &NodeRecord::fresh()).unwrap();
        file.write(9, &NodeRecord::fresh()).unwrap();
        assert_eq!(file.highest_in_use(), Some(9));
    }

    #[test]
    fn test_close_trims_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rels.store");
        {
            let mut file: RecordFile<RelationshipRecord> = RecordFile::open(&path, 4096).unwrap();
            file.write(0, &RelationshipRecord::fresh(1, 2, 3)).unwrap();
            file.write(1, &RelationshipRecord::fresh(2, 1, 4)).unwrap();
            file.close(2).unwrap();
        }

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, 2 * RelationshipRecord::SIZE as u64);

        let file: RecordFile<RelationshipRecord> = RecordFile::open(&path, 4096).unwrap();
        let rel = file.get(1).unwrap();
        assert_eq!((rel.first_node, rel.second_node, rel.type_id), (2, 1, 4));
    }

    #[test]
    fn test_rejects_torn_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nodes.store");
        std::fs::write(&path, [0u8; 10]).unwrap();

        let result = RecordFile::<NodeRecord>::open(&path, 1024);
        assert!(matches!(result, Err(Error::Storage(_))));
    }
}
