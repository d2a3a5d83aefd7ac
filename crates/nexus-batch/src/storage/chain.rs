//! Relationship chains
//!
//! Every node heads a doubly-linked list of its relationships, threaded
//! through the relationship records themselves. A new relationship is
//! spliced in at the head of both endpoint chains, so insertion is O(1)
//! whatever the node's degree and traversal sees the newest first.

use super::record::{NULL_ID, NodeRecord, RelationshipRecord};
use super::record_file::RecordFile;
use crate::{Error, Result};

/// Splice `record` (to be stored as `rel_id`) into both endpoint chains
///
/// The endpoint nodes and the previous chain heads are rewritten here.
/// `record` only has its pointers filled in; the caller writes it afterwards
/// so that nothing on disk references it before both nodes point at it.
pub fn link_new(
    nodes: &mut RecordFile<NodeRecord>,
    rels: &mut RecordFile<RelationshipRecord>,
    rel_id: u64,
    record: &mut RelationshipRecord,
) -> Result<()> {
    let first_next = splice_head(nodes, rels, record.first_node, rel_id)?;
    record.first_prev = NULL_ID;
    record.first_next = first_next;

    // A self-loop sits in its node's chain once, through the first pair
    if !record.is_self_loop() {
        let second_next = splice_head(nodes, rels, record.second_node, rel_id)?;
        record.second_prev = NULL_ID;
        record.second_next = second_next;
    }

    Ok(())
}

/// Make `rel_id` the head of `node_id`'s chain and return the old head
fn splice_head(
    nodes: &mut RecordFile<NodeRecord>,
    rels: &mut RecordFile<RelationshipRecord>,
    node_id: u64,
    rel_id: u64,
) -> Result<u64> {
    let mut node = nodes
        .get(node_id)
        .ok_or_else(|| Error::invalid_reference(format!("node {} does not exist", node_id)))?;

    let old_head = node.next_rel_id;
    if old_head != NULL_ID {
        let mut head = rels.get(old_head).ok_or_else(|| {
            Error::corruption(format!(
                "node {} chain head {} is not in use",
                node_id, old_head
            ))
        })?;
        if !head.set_prev_for(node_id, rel_id) {
            return Err(Error::corruption(format!(
                "node {} chain head {} does not belong to the node",
                node_id, old_head
            )));
        }
        rels.write(old_head, &head)?;
    }

    node.next_rel_id = rel_id;
    nodes.write(node_id, &node)?;
    Ok(old_head)
}

/// Traversal of one node's relationship chain, head first
///
/// Each step checks that the record is in use, touches the node, and that
/// its `prev` pointer names the record visited before it. The walk stops
/// with a corruption error after more steps than there are relationships.
pub struct RelationshipChain<'a> {
    rels: &'a RecordFile<RelationshipRecord>,
    node_id: u64,
    next: u64,
    prev: u64,
    remaining: u64,
    failed: bool,
}

impl<'a> RelationshipChain<'a> {
    /// Walk the chain of `node_id` starting at `head`, visiting at most `limit` records
    pub fn new(rels: &'a RecordFile<RelationshipRecord>, node_id: u64, head: u64, limit: u64) -> Self {
        Self {
            rels,
            node_id,
            next: head,
            prev: NULL_ID,
            remaining: limit,
            failed: false,
        }
    }

    fn step(&mut self) -> Result<(u64, RelationshipRecord)> {
        let id = self.next;
        if self.remaining == 0 {
            return Err(Error::corruption(format!(
                "relationship chain of node {} does not terminate",
                self.node_id
            )));
        }
        self.remaining -= 1;

        let record = self.rels.get(id).ok_or_else(|| {
            Error::corruption(format!(
                "relationship chain of node {} references relationship {} which is not in use",
                self.node_id, id
            ))
        })?;

        let (prev, next) = record.chain_for(self.node_id).ok_or_else(|| {
            Error::corruption(format!(
                "relationship {} in the chain of node {} does not touch it",
                id, self.node_id
            ))
        })?;

        if prev != self.prev {
            return Err(Error::corruption(format!(
                "relationship {} points back to {} instead of {} in the chain of node {}",
                id, prev, self.prev, self.node_id
            )));
        }

        self.prev = id;
        self.next = next;
        Ok((id, record))
    }
}

impl Iterator for RelationshipChain<'_> {
    type Item = Result<(u64, RelationshipRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next == NULL_ID {
            return None;
        }
        let item = self.step();
        self.failed = item.is_err();
        Some(item)
    }
}
