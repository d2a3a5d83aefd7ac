//! Object-style graph handle over a batch inserter
//!
//! [`GraphHandle`] borrows the inserter mutably, so calls through the handle
//! and direct batch calls can never interleave on different views of the
//! store: whatever one writes, the other reads back.

use super::{BatchInserter, SimpleRelationship};
use crate::storage::property::{Properties, PropertyValue};
use crate::{Error, Result};

/// Which relationships of a node to visit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The node is the start node
    Outgoing,
    /// The node is the end node
    Incoming,
    /// Either endpoint
    Both,
}

impl Direction {
    /// Whether `rel` runs in this direction as seen from `node_id`
    ///
    /// A self-loop matches every direction.
    pub fn matches(self, rel: &SimpleRelationship, node_id: u64) -> bool {
        match self {
            Direction::Outgoing => rel.start_node == node_id,
            Direction::Incoming => rel.end_node == node_id,
            Direction::Both => rel.start_node == node_id || rel.end_node == node_id,
        }
    }
}

/// Graph API bound to an in-progress batch load
pub struct GraphHandle<'a> {
    inserter: &'a mut BatchInserter,
}

impl<'a> GraphHandle<'a> {
    pub(super) fn new(inserter: &'a mut BatchInserter) -> Self {
        Self { inserter }
    }

    /// Create a node without properties
    pub fn create_node(&mut self) -> Result<u64> {
        self.inserter.create_node(&Properties::new())
    }

    /// Create a relationship of type `rel_type` from `start` to `end`
    pub fn create_relationship_to(&mut self, start: u64, end: u64, rel_type: &str) -> Result<u64> {
        self.inserter
            .create_relationship(start, end, rel_type, &Properties::new())
    }

    /// Set one property on a node
    pub fn set_node_property(
        &mut self,
        node_id: u64,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<()> {
        self.inserter.set_node_property(node_id, key, value)
    }

    /// Set one property on a relationship
    pub fn set_relationship_property(
        &mut self,
        rel_id: u64,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<()> {
        self.inserter.set_relationship_property(rel_id, key, value)
    }

    /// One property of a node
    pub fn node_property(&self, node_id: u64, key: &str) -> Result<Option<PropertyValue>> {
        Ok(self.inserter.get_node_properties(node_id)?.remove(key))
    }

    /// One property of a relationship
    pub fn relationship_property(&self, rel_id: u64, key: &str) -> Result<Option<PropertyValue>> {
        Ok(self.inserter.get_relationship_properties(rel_id)?.remove(key))
    }

    /// All properties of a node
    pub fn node_properties(&self, node_id: u64) -> Result<Properties> {
        self.inserter.get_node_properties(node_id)
    }

    /// All properties of a relationship
    pub fn relationship_properties(&self, rel_id: u64) -> Result<Properties> {
        self.inserter.get_relationship_properties(rel_id)
    }

    /// Look up a relationship by ID
    pub fn relationship(&self, rel_id: u64) -> Result<SimpleRelationship> {
        self.inserter.get_relationship_by_id(rel_id)
    }

    /// Relationships of `node_id` in `direction`, optionally of one type only
    pub fn relationships(
        &self,
        node_id: u64,
        direction: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<SimpleRelationship>> {
        let type_id = match rel_type {
            Some(name) => match self.inserter.relationship_type_id(name)? {
                Some(id) => Some(id),
                // A type never used cannot match, but the node must still exist
                None => {
                    self.inserter.node_record(node_id)?;
                    return Ok(Vec::new());
                }
            },
            None => None,
        };

        let mut matching = Vec::new();
        for rel in self.inserter.get_relationships(node_id)? {
            let rel = rel?;
            if type_id.is_none_or(|id| rel.type_id == id) && direction.matches(&rel, node_id) {
                matching.push(rel);
            }
        }
        Ok(matching)
    }

    /// The only relationship of `rel_type` in `direction`, if any
    ///
    /// More than one match is [`Error::AmbiguousRelationship`].
    pub fn single_relationship(
        &self,
        node_id: u64,
        rel_type: &str,
        direction: Direction,
    ) -> Result<Option<SimpleRelationship>> {
        let mut matching = self
            .relationships(node_id, direction, Some(rel_type))?
            .into_iter();
        match (matching.next(), matching.next()) {
            (Some(first), Some(second)) => Err(Error::AmbiguousRelationship(format!(
                "node {} has relationships {} and {} of type {} ({:?})",
                node_id, first.id, second.id, rel_type, direction
            ))),
            (first, _) => Ok(first),
        }
    }

    /// Shut the underlying inserter down
    pub fn shutdown(self) -> Result<()> {
        self.inserter.shutdown()
    }
}
