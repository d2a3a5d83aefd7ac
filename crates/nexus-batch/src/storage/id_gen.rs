//! Per-store ID generators
//!
//! Each record file has a companion `.id` file:
//!
//! ```text
//! byte 0      sticky marker (0 = closed cleanly, 1 = open)
//! bytes 1..9  high id, the next id to hand out (u64 LE)
//! bytes 9..   free ids left by the online engine (u64 LE each)
//! ```
//!
//! The marker is set while a writer owns the store and cleared on a clean
//! close, so a store abandoned mid-load refuses to open again. Batch
//! allocation is strictly increasing; free ids are carried through
//! untouched for the online engine.

use super::record::NULL_ID;
use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const MARKER_CLEAN: u8 = 0;
const MARKER_OPEN: u8 = 1;
const HEADER_SIZE: usize = 9;

/// Monotonic ID allocator for one record kind
#[derive(Debug)]
pub struct IdGenerator {
    path: PathBuf,
    high_id: u64,
    free_ids: Vec<u64>,
}

impl IdGenerator {
    /// Open the id file at `path`, marking it in use
    ///
    /// When the file does not exist, `rebuild` supplies the high id (the
    /// store file is scanned for its highest in-use record).
    pub fn open<P: AsRef<Path>>(path: P, rebuild: impl FnOnce() -> u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let generator = if path.exists() {
            let bytes = std::fs::read(&path)?;
            Self::parse(path, &bytes)?
        } else {
            let high_id = rebuild();
            if high_id > 0 {
                tracing::debug!(path = %path.display(), high_id, "rebuilt id generator from store scan");
            }
            Self {
                path,
                high_id,
                free_ids: Vec::new(),
            }
        };

        generator.persist(MARKER_OPEN)?;
        Ok(generator)
    }

    fn parse(path: PathBuf, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE || (bytes.len() - HEADER_SIZE) % 8 != 0 {
            return Err(Error::corruption(format!(
                "id file {} has invalid length {}",
                path.display(),
                bytes.len()
            )));
        }

        match bytes[0] {
            MARKER_CLEAN => {}
            MARKER_OPEN => {
                return Err(Error::storage(format!(
                    "{} was not closed cleanly; the store must be discarded and rebuilt",
                    path.display()
                )));
            }
            other => {
                return Err(Error::corruption(format!(
                    "id file {} has unknown marker {:#04x}",
                    path.display(),
                    other
                )));
            }
        }

        let high_id = read_u64(&bytes[1..HEADER_SIZE]);
        let free_ids = bytes[HEADER_SIZE..].chunks_exact(8).map(read_u64).collect();

        Ok(Self {
            path,
            high_id,
            free_ids,
        })
    }

    /// Hand out the next ID
    pub fn allocate(&mut self) -> Result<u64> {
        if self.high_id == NULL_ID {
            return Err(Error::storage(format!(
                "id space exhausted for {}",
                self.path.display()
            )));
        }
        let id = self.high_id;
        self.high_id += 1;
        Ok(id)
    }

    /// Highest ID handed out so far
    pub fn highest_allocated(&self) -> Option<u64> {
        self.high_id.checked_sub(1)
    }

    /// Next ID to be handed out (the store's record count)
    pub fn high_id(&self) -> u64 {
        self.high_id
    }

    #[cfg(test)]
    pub(crate) fn free_ids(&self) -> &[u64] {
        &self.free_ids
    }

    /// Write the high-water mark and clear the in-use marker
    pub fn close(self) -> Result<()> {
        self.persist(MARKER_CLEAN)
    }

    fn persist(&self, marker: u8) -> Result<()> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.free_ids.len() * 8);
        bytes.push(marker);
        bytes.extend_from_slice(&self.high_id.to_le_bytes());
        for id in &self.free_ids {
            bytes.extend_from_slice(&id.to_le_bytes());
        }

        let mut file: File = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}
