//! Storage layer - Record stores for nodes, relationships, and properties
//!
//! Linked fixed-size record stores, written directly by the batch writer:
//! - `nodes.store`: fixed-size node records (relationship chain head, property chain head, flags)
//! - `rels.store`: fixed-size relationship records (endpoints, two prev/next pairs, type, property chain head)
//! - `props.store`: property records of four blocks each, chained per owner
//! - `strings.store` / `arrays.store`: dynamic record chains for values that overflow a block
//!
//! Every store has a companion `<store>.id` file holding its high-water mark.
//!
//! # Record Sizes
//!
//! - NodeRecord: 24 bytes (next_rel_id: 8, next_prop_id: 8, flags: 4, padding: 4)
//! - RelationshipRecord: 64 bytes (six ids: 48, next_prop_id: 8, type_id: 4, flags: 4)
//! - PropertyRecord: 80 bytes (4 blocks of 16, next_prop_id: 8, flags: 4, block_count: 4)
//! - DynamicRecord: 120 bytes (next_block_id: 8, total_len: 4, data_len: 4, flags: 4, padding: 4, data: 96)

pub mod chain;
pub mod dynamic;
pub mod id_gen;
pub mod property;
pub mod property_store;
pub mod record;
pub mod record_file;

use crate::config::BatchConfig;
use crate::{Error, Result};
use chain::RelationshipChain;
use id_gen::IdGenerator;
use property_store::PropertyStore;
use record::{NodeRecord, NULL_ID, RelationshipRecord};
use record_file::RecordFile;
use std::path::Path;

/// Version of the on-disk record layouts
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Counts and sizes of an open store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordStoreStats {
    /// Node ids handed out
    pub nodes: u64,
    /// Relationship ids handed out
    pub relationships: u64,
    /// Property records written
    pub property_records: u64,
    /// Blocks in strings.store
    pub string_blocks: u64,
    /// Blocks in arrays.store
    pub array_blocks: u64,
    /// Bytes currently mapped across all record files
    pub mapped_bytes: u64,
}

/// All record files and id generators of one store directory
pub struct RecordStore {
    nodes: RecordFile<NodeRecord>,
    node_ids: IdGenerator,
    rels: RecordFile<RelationshipRecord>,
    rel_ids: IdGenerator,
    properties: PropertyStore,
}

impl RecordStore {
    /// Open or create the record files under `data_dir`
    pub fn open<P: AsRef<Path>>(data_dir: P, config: &BatchConfig) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let initial = config.initial_store_size;

        let nodes = RecordFile::<NodeRecord>::open(data_dir.join("nodes.store"), initial)?;
        let node_ids = IdGenerator::open(data_dir.join("nodes.store.id"), || {
            nodes.highest_in_use().map_or(0, |id| id + 1)
        })?;

        let rels = RecordFile::<RelationshipRecord>::open(data_dir.join("rels.store"), initial)?;
        let rel_ids = IdGenerator::open(data_dir.join("rels.store.id"), || {
            rels.highest_in_use().map_or(0, |id| id + 1)
        })?;

        let properties = PropertyStore::open(&data_dir, initial)?;

        tracing::debug!(
            path = %data_dir.display(),
            node_high_id = node_ids.high_id(),
            rel_high_id = rel_ids.high_id(),
            "opened record store"
        );

        Ok(Self {
            nodes,
            node_ids,
            rels,
            rel_ids,
            properties,
        })
    }

    /// Allocate a new node ID
    pub fn allocate_node_id(&mut self) -> Result<u64> {
        self.node_ids.allocate()
    }

    /// Allocate a new relationship ID
    pub fn allocate_rel_id(&mut self) -> Result<u64> {
        self.rel_ids.allocate()
    }

    /// Read an in-use node record
    pub fn read_node(&self, node_id: u64) -> Result<NodeRecord> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| Error::not_found(format!("node {}", node_id)))
    }

    /// Write a node record
    pub fn write_node(&mut self, node_id: u64, record: &NodeRecord) -> Result<()> {
        self.nodes.write(node_id, record)
    }

    /// Read an in-use relationship record
    pub fn read_rel(&self, rel_id: u64) -> Result<RelationshipRecord> {
        self.rels
            .get(rel_id)
            .ok_or_else(|| Error::not_found(format!("relationship {}", rel_id)))
    }

    /// Write a relationship record
    pub fn write_rel(&mut self, rel_id: u64, record: &RelationshipRecord) -> Result<()> {
        self.rels.write(rel_id, record)
    }

    /// Whether `node_id` names an in-use node
    pub fn node_exists(&self, node_id: u64) -> bool {
        node_id != NULL_ID && self.nodes.get(node_id).is_some()
    }

    /// Splice a relationship into its endpoints' chains
    ///
    /// See [`chain::link_new`]; `record` is written by the caller afterwards.
    pub fn link_relationship(&mut self, rel_id: u64, record: &mut RelationshipRecord) -> Result<()> {
        chain::link_new(&mut self.nodes, &mut self.rels, rel_id, record)
    }

    /// Relationships of `node_id`, newest first
    pub fn relationships(&self, node_id: u64) -> Result<RelationshipChain<'_>> {
        let node = self.read_node(node_id)?;
        Ok(RelationshipChain::new(
            &self.rels,
            node_id,
            node.next_rel_id,
            self.rel_ids.high_id(),
        ))
    }

    /// Property chains and overflow stores
    pub fn properties(&self) -> &PropertyStore {
        &self.properties
    }

    /// Mutable access to the property chains
    pub fn properties_mut(&mut self) -> &mut PropertyStore {
        &mut self.properties
    }

    /// Counts and sizes of every file
    pub fn stats(&self) -> RecordStoreStats {
        let props = self.properties.stats();
        RecordStoreStats {
            nodes: self.node_ids.high_id(),
            relationships: self.rel_ids.high_id(),
            property_records: props.property_records,
            string_blocks: props.string_blocks,
            array_blocks: props.array_blocks,
            mapped_bytes: (self.nodes.size() + self.rels.size()) as u64 + props.mapped_bytes,
        }
    }

    /// Trim every file to its high-water mark, sync it and close the id files clean
    pub fn close(self) -> Result<()> {
        self.nodes.close(self.node_ids.high_id())?;
        self.node_ids.close()?;
        self.rels.close(self.rel_ids.high_id())?;
        self.rel_ids.close()?;
        self.properties.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use record::Record;
    use tempfile::TempDir;

    fn config() -> BatchConfig {
        BatchConfig {
            initial_store_size: 4096,
            ..BatchConfig::default()
        }
    }

    fn create_node(store: &mut RecordStore) -> u64 {
        let id = store.allocate_node_id().unwrap();
        store.write_node(id, &NodeRecord::fresh()).unwrap();
        id
    }

    fn create_rel(store: &mut RecordStore, first: u64, second: u64) -> u64 {
        let id = store.allocate_rel_id().unwrap();
        let mut record = RelationshipRecord::fresh(first, second, 0);
        store.link_relationship(id, &mut record).unwrap();
        store.write_rel(id, &record).unwrap();
        id
    }

    #[test]
    fn test_store_creation() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path(), &config()).unwrap();

        for name in [
            "nodes.store",
            "rels.store",
            "props.store",
            "strings.store",
            "arrays.store",
            "nodes.store.id",
            "rels.store.id",
            "props.store.id",
            "strings.store.id",
            "arrays.store.id",
        ] {
            assert!(dir.path().join(name).exists(), "{} missing", name);
        }
        assert_eq!(store.stats().nodes, 0);
    }

    #[test]
    fn test_missing_records_are_not_found() {
        let dir = TempDir::new().unwrap();
        let mut store = RecordStore::open(dir.path(), &config()).unwrap();
        create_node(&mut store);

        assert!(matches!(store.read_node(1), Err(Error::NotFound(_))));
        assert!(matches!(store.read_rel(0), Err(Error::NotFound(_))));
        assert!(matches!(store.read_node(u64::MAX), Err(Error::NotFound(_))));
        assert!(store.node_exists(0));
        assert!(!store.node_exists(NULL_ID));
    }

    #[test]
    fn test_relationships_iterate_head_first() {
        let dir = TempDir::new().unwrap();
        let mut store = RecordStore::open(dir.path(), &config()).unwrap();
        let a = create_node(&mut store);
        let b = create_node(&mut store);

        let rels: Vec<u64> = (0..5).map(|_| create_rel(&mut store, a, b)).collect();

        let seen: Vec<u64> = store
            .relationships(a)
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        let expected: Vec<u64> = rels.iter().rev().copied().collect();
        assert_eq!(seen, expected);

        assert!(matches!(store.relationships(9), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_close_truncates_and_reopens() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = RecordStore::open(dir.path(), &config()).unwrap();
            let a = create_node(&mut store);
            let b = create_node(&mut store);
            let c = create_node(&mut store);
            create_rel(&mut store, a, b);
            create_rel(&mut store, b, c);
            store.close().unwrap();
        }

        let nodes_len = std::fs::metadata(dir.path().join("nodes.store")).unwrap().len();
        let rels_len = std::fs::metadata(dir.path().join("rels.store")).unwrap().len();
        assert_eq!(nodes_len, 3 * NodeRecord::SIZE as u64);
        assert_eq!(rels_len, 2 * RelationshipRecord::SIZE as u64);

        let mut store = RecordStore::open(dir.path(), &config()).unwrap();
        assert_eq!(store.stats().nodes, 3);
        assert_eq!(store.allocate_node_id().unwrap(), 3);
        assert_eq!(store.read_rel(1).unwrap().first_node, 1);
    }

    #[test]
    fn test_unclean_store_refuses_to_open() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = RecordStore::open(dir.path(), &config()).unwrap();
            create_node(&mut store);
            // Dropped without close
        }

        let result = RecordStore::open(dir.path(), &config());
        assert!(matches!(result, Err(Error::Storage(_))));
    }

    #[test]
    fn test_missing_id_file_is_rebuilt() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = RecordStore::open(dir.path(), &config()).unwrap();
            for _ in 0..4 {
                create_node(&mut store);
            }
            store.close().unwrap();
        }
        std::fs::remove_file(dir.path().join("nodes.store.id")).unwrap();

        let mut store = RecordStore::open(dir.path(), &config()).unwrap();
        assert_eq!(store.allocate_node_id().unwrap(), 4);
    }
}
