//! Catalog module - relationship type and property key registry
//!
//! The catalog keeps bidirectional mappings between:
//! - Types (relationship types) ↔ TypeId
//! - Keys (property keys) ↔ KeyId
//!
//! It is an LMDB environment under `<store>/catalog`, the same registry the
//! online engine reads, so codes handed out during a batch load stay valid
//! afterwards. A metadata entry records the store format the catalog was
//! created for; opening a store written with different record layouts fails.
//!
//! The batch writer is the only user while a load runs, so lookups go
//! through plain in-memory caches and every new name is committed in its
//! own small write transaction.

use crate::storage::STORE_FORMAT_VERSION;
use crate::storage::record::{DynamicRecord, NodeRecord, PropertyRecord, Record, RelationshipRecord};
use crate::{Error, Result};
use heed::types::*;
use heed::{Database, Env, EnvOpenOptions, byteorder};
use std::collections::HashMap;
use std::path::Path;

/// Relationship type ID
pub type TypeId = u32;

/// Property key ID
pub type KeyId = u32;

/// Longest type or key name LMDB accepts as a key, in bytes
pub const MAX_NAME_LEN: usize = 511;

fn check_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::unsupported(format!(
            "{} name '{}' must be 1 to {} bytes, got {}",
            kind,
            name,
            MAX_NAME_LEN,
            name.len()
        )));
    }
    Ok(())
}

/// Metadata stored in catalog
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CatalogMetadata {
    /// Store format version
    pub version: u32,
    /// Size of a node record in bytes
    pub node_record_size: u32,
    /// Size of a relationship record in bytes
    pub relationship_record_size: u32,
    /// Size of a property record in bytes
    pub property_record_size: u32,
    /// Size of a dynamic record in bytes
    pub dynamic_record_size: u32,
}

impl Default for CatalogMetadata {
    fn default() -> Self {
        Self {
            version: STORE_FORMAT_VERSION,
            node_record_size: NodeRecord::SIZE as u32,
            relationship_record_size: RelationshipRecord::SIZE as u32,
            property_record_size: PropertyRecord::SIZE as u32,
            dynamic_record_size: DynamicRecord::SIZE as u32,
        }
    }
}

/// Catalog for managing type/key mappings
pub struct Catalog {
    /// LMDB environment
    env: Env,

    /// Type name → ID mapping
    type_name_to_id: Database<Str, U32<byteorder::NativeEndian>>,
    /// Type ID → name mapping
    type_id_to_name: Database<U32<byteorder::NativeEndian>, Str>,

    /// Key name → ID mapping
    key_name_to_id: Database<Str, U32<byteorder::NativeEndian>>,
    /// Key ID → name mapping
    key_id_to_name: Database<U32<byteorder::NativeEndian>, Str>,

    /// Metadata database (format version, record sizes)
    metadata_db: Database<Str, SerdeBincode<CatalogMetadata>>,

    next_type_id: TypeId,
    next_key_id: KeyId,

    type_name_cache: HashMap<String, TypeId>,
    type_id_cache: HashMap<TypeId, String>,
    key_name_cache: HashMap<String, KeyId>,
    key_id_cache: HashMap<KeyId, String>,
}

impl Catalog {
    /// Open or create the catalog at `path` with an LMDB map of `map_size` bytes
    pub fn open<P: AsRef<Path>>(path: P, map_size: usize) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        // The batch writer owns the store directory for the whole load.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(5)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;

        let type_name_to_id: Database<Str, U32<byteorder::NativeEndian>> =
            env.create_database(&mut wtxn, Some("type_name_to_id"))?;
        let type_id_to_name: Database<U32<byteorder::NativeEndian>, Str> =
            env.create_database(&mut wtxn, Some("type_id_to_name"))?;

        let key_name_to_id: Database<Str, U32<byteorder::NativeEndian>> =
            env.create_database(&mut wtxn, Some("key_name_to_id"))?;
        let key_id_to_name: Database<U32<byteorder::NativeEndian>, Str> =
            env.create_database(&mut wtxn, Some("key_id_to_name"))?;

        let metadata_db: Database<Str, SerdeBincode<CatalogMetadata>> =
            env.create_database(&mut wtxn, Some("metadata"))?;

        let expected = CatalogMetadata::default();
        match metadata_db.get(&wtxn, "main")? {
            Some(found) if found != expected => {
                return Err(Error::storage(format!(
                    "store at {} was written with format {:?}, expected {:?}",
                    path.display(),
                    found,
                    expected
                )));
            }
            Some(_) => {}
            None => {
                metadata_db.put(&mut wtxn, "main", &expected)?;
                tracing::debug!(path = %path.display(), "created catalog");
            }
        }

        wtxn.commit()?;

        let mut type_name_cache = HashMap::new();
        let mut type_id_cache = HashMap::new();
        let mut key_name_cache = HashMap::new();
        let mut key_id_cache = HashMap::new();

        // Warm up caches and counters from existing data
        {
            let rtxn = env.read_txn()?;
            for result in type_name_to_id.iter(&rtxn)? {
                let (name, id) = result?;
                type_name_cache.insert(name.to_string(), id);
                type_id_cache.insert(id, name.to_string());
            }
            for result in key_name_to_id.iter(&rtxn)? {
                let (name, id) = result?;
                key_name_cache.insert(name.to_string(), id);
                key_id_cache.insert(id, name.to_string());
            }
        }

        let next_type_id = type_id_cache.keys().max().map_or(0, |max_id| max_id + 1);
        let next_key_id = key_id_cache.keys().max().map_or(0, |max_id| max_id + 1);

        Ok(Self {
            env,
            type_name_to_id,
            type_id_to_name,
            key_name_to_id,
            key_id_to_name,
            metadata_db,
            next_type_id,
            next_key_id,
            type_name_cache,
            type_id_cache,
            key_name_cache,
            key_id_cache,
        })
    }

    /// Get or create a type ID
    ///
    /// Returns existing ID if type already exists, otherwise creates new ID.
    pub fn get_or_create_type(&mut self, type_name: &str) -> Result<TypeId> {
        if let Some(id) = self.type_name_cache.get(type_name) {
            return Ok(*id);
        }

        check_name("relationship type", type_name)?;

        let id = self.next_type_id;
        let next = id
            .checked_add(1)
            .ok_or_else(|| Error::catalog("relationship type id space exhausted"))?;

        let mut wtxn = self.env.write_txn()?;
        self.type_name_to_id.put(&mut wtxn, type_name, &id)?;
        self.type_id_to_name.put(&mut wtxn, &id, type_name)?;
        wtxn.commit()?;

        self.next_type_id = next;
        self.type_name_cache.insert(type_name.to_string(), id);
        self.type_id_cache.insert(id, type_name.to_string());

        tracing::debug!(type_name, id, "registered relationship type");
        Ok(id)
    }

    /// Get type name by ID
    pub fn get_type_name(&self, id: TypeId) -> Option<&str> {
        self.type_id_cache.get(&id).map(String::as_str)
    }

    /// Get type ID by name (returns None if type doesn't exist)
    pub fn get_type_id(&self, type_name: &str) -> Option<TypeId> {
        self.type_name_cache.get(type_name).copied()
    }

    /// Get or create a key ID
    ///
    /// Returns existing ID if key already exists, otherwise creates new ID.
    pub fn get_or_create_key(&mut self, key: &str) -> Result<KeyId> {
        let ids = self.batch_get_or_create_keys(&[key])?;
        ids.get(key)
            .copied()
            .ok_or_else(|| Error::catalog(format!("key '{}' was not registered", key)))
    }

    /// Get or create multiple keys in a single transaction
    pub fn batch_get_or_create_keys(&mut self, keys: &[&str]) -> Result<HashMap<String, KeyId>> {
        let mut result = HashMap::with_capacity(keys.len());

        // First pass: check cache for existing keys
        let mut keys_to_create = Vec::new();
        for key in keys {
            if let Some(id) = self.key_name_cache.get(*key) {
                result.insert(key.to_string(), *id);
            } else if !keys_to_create.contains(key) {
                keys_to_create.push(*key);
            }
        }

        if keys_to_create.is_empty() {
            return Ok(result);
        }
        for key in &keys_to_create {
            check_name("property key", key)?;
        }

        // Second pass: create missing keys in a single transaction
        let mut next_id = self.next_key_id;
        let mut created = Vec::with_capacity(keys_to_create.len());
        let mut wtxn = self.env.write_txn()?;
        for key in keys_to_create {
            let id = next_id;
            next_id = next_id
                .checked_add(1)
                .ok_or_else(|| Error::catalog("property key id space exhausted"))?;
            self.key_name_to_id.put(&mut wtxn, key, &id)?;
            self.key_id_to_name.put(&mut wtxn, &id, key)?;
            created.push((key, id));
        }
        wtxn.commit()?;

        // Caches only change once the names are durable
        self.next_key_id = next_id;
        for (key, id) in created {
            self.key_name_cache.insert(key.to_string(), id);
            self.key_id_cache.insert(id, key.to_string());
            result.insert(key.to_string(), id);
        }

        Ok(result)
    }

    /// Get key ID by name
    pub fn get_key_id(&self, key: &str) -> Option<KeyId> {
        self.key_name_cache.get(key).copied()
    }

    /// Get key name by ID
    pub fn get_key_name(&self, id: KeyId) -> Option<&str> {
        self.key_id_cache.get(&id).map(String::as_str)
    }

    /// Number of registered relationship types
    pub fn type_count(&self) -> usize {
        self.type_id_cache.len()
    }

    /// Number of registered property keys
    pub fn key_count(&self) -> usize {
        self.key_id_cache.len()
    }

    /// Get current metadata
    pub fn get_metadata(&self) -> Result<CatalogMetadata> {
        let rtxn = self.env.read_txn()?;
        self.metadata_db
            .get(&rtxn, "main")?
            .ok_or_else(|| Error::catalog("Metadata not found"))
    }

    /// Sync environment to disk (fsync)
    pub fn sync(&self) -> Result<()> {
        self.env.force_sync()?;
        Ok(())
    }
}
