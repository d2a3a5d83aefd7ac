//! Batch insertion façade
//!
//! [`BatchInserter`] writes nodes, relationships and properties straight
//! into the record stores. There is no transaction, no WAL and no rollback:
//! each call either fails before touching the stores or leaves them fully
//! updated. The store is only usable by the online engine after
//! [`BatchInserter::shutdown`] has returned `Ok`.
//!
//! # Example
//!
//! ```no_run
//! use nexus_batch::{BatchInserter, Properties, PropertyValue};
//!
//! let mut inserter = BatchInserter::open("./data/graph").unwrap();
//!
//! let mut props = Properties::new();
//! props.insert("name".to_string(), PropertyValue::from("Alice"));
//!
//! let alice = inserter.create_node(&props).unwrap();
//! let bob = inserter.create_node(&Properties::new()).unwrap();
//! inserter.create_relationship(alice, bob, "KNOWS", &Properties::new()).unwrap();
//!
//! inserter.shutdown().unwrap();
//! ```

pub mod graph;

use crate::catalog::{Catalog, KeyId, TypeId};
use crate::config::BatchConfig;
use crate::storage::chain::RelationshipChain;
use crate::storage::property::{EncodedValue, Properties, PropertyValue, encode_value};
use crate::storage::property_store::PreparedProperty;
use crate::storage::record::{NodeRecord, RelationshipRecord};
use crate::storage::{RecordStore, RecordStoreStats};
use crate::{Error, Result};
use std::path::{Path, PathBuf};

pub use graph::{Direction, GraphHandle};

/// A relationship as seen through the batch API
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SimpleRelationship {
    /// Relationship ID
    pub id: u64,
    /// Start (first) node ID
    pub start_node: u64,
    /// End (second) node ID
    pub end_node: u64,
    /// Relationship type ID
    pub type_id: TypeId,
    /// Relationship type name
    pub rel_type: String,
}

impl SimpleRelationship {
    /// The endpoint opposite `node_id`
    pub fn other_node(&self, node_id: u64) -> Option<u64> {
        if self.start_node == node_id {
            Some(self.end_node)
        } else if self.end_node == node_id {
            Some(self.start_node)
        } else {
            None
        }
    }

    fn from_record(catalog: &Catalog, id: u64, record: &RelationshipRecord) -> Result<Self> {
        let rel_type = catalog.get_type_name(record.type_id).ok_or_else(|| {
            Error::corruption(format!(
                "relationship {} has unregistered type {}",
                id, record.type_id
            ))
        })?;
        Ok(Self {
            id,
            start_node: record.first_node,
            end_node: record.second_node,
            type_id: record.type_id,
            rel_type: rel_type.to_string(),
        })
    }
}

/// Lazy traversal of a node's relationships, newest first
pub struct Relationships<'a> {
    chain: RelationshipChain<'a>,
    catalog: &'a Catalog,
}

impl Iterator for Relationships<'_> {
    type Item = Result<SimpleRelationship>;

    fn next(&mut self) -> Option<Self::Item> {
        let catalog = self.catalog;
        self.chain.next().map(|item| {
            item.and_then(|(id, record)| SimpleRelationship::from_record(catalog, id, &record))
        })
    }
}

struct Stores {
    store: RecordStore,
    catalog: Catalog,
}

/// Single-writer bulk loader for a record store directory
///
/// Not `Clone`: exactly one inserter owns a store directory for the whole
/// load, and every mutation takes `&mut self`.
pub struct BatchInserter {
    store_dir: PathBuf,
    config: BatchConfig,
    inner: Option<Stores>,
    created: u64,
}

impl BatchInserter {
    /// Open `store_dir` with the default configuration
    pub fn open<P: AsRef<Path>>(store_dir: P) -> Result<Self> {
        Self::open_with_config(store_dir, BatchConfig::default())
    }

    /// Open `store_dir`, creating the store if it does not exist
    ///
    /// A store left behind by an inserter that never shut down refuses to
    /// open with [`Error::Storage`].
    pub fn open_with_config<P: AsRef<Path>>(store_dir: P, config: BatchConfig) -> Result<Self> {
        config.validate()?;
        let store_dir = store_dir.as_ref().to_path_buf();

        // Catalog first: a record store that fails to open never leaves dirty id files
        let catalog = Catalog::open(store_dir.join("catalog"), config.catalog_map_size)?;
        let store = RecordStore::open(&store_dir, &config)?;

        let stats = store.stats();
        tracing::info!(
            path = %store_dir.display(),
            nodes = stats.nodes,
            relationships = stats.relationships,
            "opened store for batch insertion"
        );

        Ok(Self {
            store_dir,
            config,
            inner: Some(Stores { store, catalog }),
            created: 0,
        })
    }

    /// Configuration the inserter was opened with
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Whether [`shutdown`](Self::shutdown) has completed
    pub fn is_shut_down(&self) -> bool {
        self.inner.is_none()
    }

    fn stores(&self) -> Result<&Stores> {
        self.inner.as_ref().ok_or(Error::Closed)
    }

    /// Create a node with `properties` and return its ID
    pub fn create_node(&mut self, properties: &Properties) -> Result<u64> {
        let Stores { store, catalog } = self.inner.as_mut().ok_or(Error::Closed)?;

        let prepared = prepare_properties(catalog, properties)?;
        let node_id = store.allocate_node_id()?;
        let prop_head = store.properties_mut().write_chain(prepared)?;

        let mut record = NodeRecord::fresh();
        record.next_prop_id = prop_head;
        store.write_node(node_id, &record)?;

        tracing::trace!(node_id, properties = properties.len(), "created node");
        self.record_progress();
        Ok(node_id)
    }

    /// Create a relationship of type `rel_type` from `first` to `second`
    ///
    /// Both nodes must exist. The relationship is spliced into both nodes'
    /// chains and its record is written last.
    pub fn create_relationship(
        &mut self,
        first: u64,
        second: u64,
        rel_type: &str,
        properties: &Properties,
    ) -> Result<u64> {
        let Stores { store, catalog } = self.inner.as_mut().ok_or(Error::Closed)?;

        for node_id in [first, second] {
            if !store.node_exists(node_id) {
                return Err(Error::invalid_reference(format!(
                    "node {} does not exist",
                    node_id
                )));
            }
        }

        let encoded = encode_properties(properties)?;
        let type_id = catalog.get_or_create_type(rel_type)?;
        let prepared = register_keys(catalog, encoded)?;

        let rel_id = store.allocate_rel_id()?;
        let mut record = RelationshipRecord::fresh(first, second, type_id);
        record.next_prop_id = store.properties_mut().write_chain(prepared)?;

        store.link_relationship(rel_id, &mut record)?;
        store.write_rel(rel_id, &record)?;

        tracing::trace!(rel_id, first, second, type_id, "created relationship");
        self.record_progress();
        Ok(rel_id)
    }

    fn record_progress(&mut self) {
        self.created += 1;
        let interval = self.config.progress_interval;
        if interval > 0 && self.created % interval == 0 {
            tracing::info!(entities = self.created, "batch insertion progress");
        }
    }

    /// Look up a relationship by ID
    pub fn get_relationship_by_id(&self, rel_id: u64) -> Result<SimpleRelationship> {
        let stores = self.stores()?;
        let record = stores.store.read_rel(rel_id)?;
        SimpleRelationship::from_record(&stores.catalog, rel_id, &record)
    }

    /// Relationships of `node_id`, most recently created first
    ///
    /// Every call starts a fresh traversal of the current chain.
    pub fn get_relationships(&self, node_id: u64) -> Result<Relationships<'_>> {
        let stores = self.stores()?;
        Ok(Relationships {
            chain: stores.store.relationships(node_id)?,
            catalog: &stores.catalog,
        })
    }

    /// Replace all properties of a node
    ///
    /// The previous property chain is left unreferenced, not reclaimed.
    pub fn set_node_properties(&mut self, node_id: u64, properties: &Properties) -> Result<()> {
        let Stores { store, catalog } = self.inner.as_mut().ok_or(Error::Closed)?;

        let mut record = store.read_node(node_id).map_err(as_invalid_reference)?;
        let prepared = prepare_properties(catalog, properties)?;
        record.next_prop_id = store.properties_mut().write_chain(prepared)?;
        store.write_node(node_id, &record)
    }

    /// Replace all properties of a relationship
    pub fn set_relationship_properties(&mut self, rel_id: u64, properties: &Properties) -> Result<()> {
        let Stores { store, catalog } = self.inner.as_mut().ok_or(Error::Closed)?;

        let mut record = store.read_rel(rel_id).map_err(as_invalid_reference)?;
        let prepared = prepare_properties(catalog, properties)?;
        record.next_prop_id = store.properties_mut().write_chain(prepared)?;
        store.write_rel(rel_id, &record)
    }

    /// Set a single node property, keeping the others
    pub fn set_node_property(
        &mut self,
        node_id: u64,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<()> {
        let Stores { store, catalog } = self.inner.as_mut().ok_or(Error::Closed)?;

        let mut record = store.read_node(node_id).map_err(as_invalid_reference)?;
        let prepared = prepare_single(catalog, key, &value.into())?;
        let head = store
            .properties_mut()
            .set_property(record.next_prop_id, prepared)?;
        if head != record.next_prop_id {
            record.next_prop_id = head;
            store.write_node(node_id, &record)?;
        }
        Ok(())
    }

    /// Set a single relationship property, keeping the others
    pub fn set_relationship_property(
        &mut self,
        rel_id: u64,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<()> {
        let Stores { store, catalog } = self.inner.as_mut().ok_or(Error::Closed)?;

        let mut record = store.read_rel(rel_id).map_err(as_invalid_reference)?;
        let prepared = prepare_single(catalog, key, &value.into())?;
        let head = store
            .properties_mut()
            .set_property(record.next_prop_id, prepared)?;
        if head != record.next_prop_id {
            record.next_prop_id = head;
            store.write_rel(rel_id, &record)?;
        }
        Ok(())
    }

    /// All properties of a node
    pub fn get_node_properties(&self, node_id: u64) -> Result<Properties> {
        let stores = self.stores()?;
        let record = stores.store.read_node(node_id)?;
        stores.read_properties(record.next_prop_id)
    }

    /// All properties of a relationship
    pub fn get_relationship_properties(&self, rel_id: u64) -> Result<Properties> {
        let stores = self.stores()?;
        let record = stores.store.read_rel(rel_id)?;
        stores.read_properties(record.next_prop_id)
    }

    /// Whether `node_id` names an existing node
    pub fn node_exists(&self, node_id: u64) -> Result<bool> {
        Ok(self.stores()?.store.node_exists(node_id))
    }

    /// Catalog ID of a relationship type, if it has been used
    pub fn relationship_type_id(&self, rel_type: &str) -> Result<Option<TypeId>> {
        Ok(self.stores()?.catalog.get_type_id(rel_type))
    }

    /// Raw node record, for integrity checks
    pub fn node_record(&self, node_id: u64) -> Result<NodeRecord> {
        self.stores()?.store.read_node(node_id)
    }

    /// Raw relationship record, for integrity checks
    pub fn relationship_record(&self, rel_id: u64) -> Result<RelationshipRecord> {
        self.stores()?.store.read_rel(rel_id)
    }

    /// Counts and sizes of the store files
    pub fn stats(&self) -> Result<RecordStoreStats> {
        Ok(self.stores()?.store.stats())
    }

    /// Object-style handle over this inserter
    pub fn graph(&mut self) -> GraphHandle<'_> {
        GraphHandle::new(self)
    }

    /// Flush and close every store file
    ///
    /// Record files are trimmed to their high-water marks, id files are
    /// marked clean and the catalog is synced. Any later call returns
    /// [`Error::Closed`]; calling `shutdown` again does nothing.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(Stores { store, catalog }) = self.inner.take() else {
            tracing::warn!(path = %self.store_dir.display(), "batch inserter already shut down");
            return Ok(());
        };

        let stats = store.stats();
        store.close()?;
        catalog.sync()?;
        drop(catalog);

        tracing::info!(
            path = %self.store_dir.display(),
            nodes = stats.nodes,
            relationships = stats.relationships,
            property_records = stats.property_records,
            "batch insertion finished"
        );
        Ok(())
    }
}

impl Drop for BatchInserter {
    fn drop(&mut self) {
        if self.inner.is_some() {
            tracing::warn!(
                path = %self.store_dir.display(),
                "batch inserter dropped without shutdown; the store must be rebuilt"
            );
        }
    }
}

impl Stores {
    fn read_properties(&self, head: u64) -> Result<Properties> {
        self.store
            .properties()
            .read_chain(head)?
            .into_iter()
            .map(|(key_id, value)| Ok((self.key_name(key_id)?.to_string(), value)))
            .collect()
    }

    fn key_name(&self, key_id: KeyId) -> Result<&str> {
        self.catalog
            .get_key_name(key_id)
            .ok_or_else(|| Error::corruption(format!("property key {} is not registered", key_id)))
    }
}

fn encode_properties(properties: &Properties) -> Result<Vec<(&str, EncodedValue)>> {
    properties
        .iter()
        .map(|(key, value)| Ok((key.as_str(), encode_value(value)?)))
        .collect()
}

fn register_keys(
    catalog: &mut Catalog,
    encoded: Vec<(&str, EncodedValue)>,
) -> Result<Vec<PreparedProperty>> {
    if encoded.is_empty() {
        return Ok(Vec::new());
    }

    let names: Vec<&str> = encoded.iter().map(|(key, _)| *key).collect();
    let ids = catalog.batch_get_or_create_keys(&names)?;

    encoded
        .into_iter()
        .map(|(key, encoded)| {
            let key_id = ids
                .get(key)
                .copied()
                .ok_or_else(|| Error::catalog(format!("key '{}' was not registered", key)))?;
            Ok(PreparedProperty { key_id, encoded })
        })
        .collect()
}

/// Encode every value, then register the keys
///
/// Nothing reaches the catalog or the stores if any value fails to encode.
fn prepare_properties(catalog: &mut Catalog, properties: &Properties) -> Result<Vec<PreparedProperty>> {
    let encoded = encode_properties(properties)?;
    register_keys(catalog, encoded)
}

fn prepare_single(catalog: &mut Catalog, key: &str, value: &PropertyValue) -> Result<PreparedProperty> {
    let encoded = encode_value(value)?;
    let key_id = catalog.get_or_create_key(key)?;
    Ok(PreparedProperty { key_id, encoded })
}

fn as_invalid_reference(err: Error) -> Error {
    match err {
        Error::NotFound(what) => Error::invalid_reference(format!("{} does not exist", what)),
        other => other,
    }
}
