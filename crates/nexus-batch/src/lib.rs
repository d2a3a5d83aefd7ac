//! Nexus Batch - bulk loading for Nexus record stores
//!
//! This crate writes nodes, relationships and properties straight into the
//! on-disk record stores, bypassing transactions, the WAL and the page cache
//! used by the online engine:
//! - Fixed-size records in `nodes.store`, `rels.store` and `props.store`
//! - Dynamic record chains for strings and arrays that overflow a property block
//! - Per-node relationship chains threaded through the relationship records
//! - A durable relationship-type and property-key catalog (LMDB)
//!
//! A load is bounded by [`BatchInserter::open`] and [`BatchInserter::shutdown`].
//! A store whose load was interrupted before shutdown must be rebuilt.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │      BatchInserter  /  GraphHandle          │
//! │   (create, link, set/get properties)        │
//! └──────┬──────────────────────────────┬───────┘
//!        │                              │
//! ┌──────┴───────────────────────┐ ┌────┴──────┐
//! │        RecordStore           │ │  Catalog  │
//! │ (nodes, rels, chain linker)  │ │  (LMDB)   │
//! └──────┬───────────────────────┘ └───────────┘
//!        │
//! ┌──────┴──────────────────────────────────────┐
//! │            PropertyStore                    │
//! │  (property chains, strings/arrays overflow) │
//! └──────┬──────────────────────────────────────┘
//!        │
//! ┌──────┴──────────────────────────────────────┐
//! │   RecordFile<R> + IdGenerator (per store)   │
//! └─────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod catalog;
pub mod config;
pub mod error;
pub mod storage;

pub use batch::{BatchInserter, Direction, GraphHandle, Relationships, SimpleRelationship};
pub use catalog::{KeyId, TypeId};
pub use config::BatchConfig;
pub use error::{Error, Result};
pub use storage::RecordStoreStats;
pub use storage::property::{Properties, PropertyType, PropertyValue, properties_from_json};
pub use storage::record::NULL_ID;
