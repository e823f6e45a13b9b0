//! Compact connection-id allocation.
//!
//! The reconciliation engine indexes peers by a small integer so that
//! availability fits in one 64-bit word. This map hands out those integers
//! for the lifetime of a session: slot 0 is reserved for the local node,
//! slots 1..63 are assigned to connected peers and recycled on disconnect.

use std::sync::Mutex;

use tracing::debug;

use crate::node_id::NodeId;

/// Connection id of this node's own view.
pub const LOCAL_ID: u32 = 0;
/// Hard ceiling on simultaneous peers, local slot included. Widening this
/// requires widening the availability bitset and the per-peer arrays too.
pub const MAX_PEERS: u32 = 64;

#[derive(Debug, Default)]
pub struct ConnectionMap {
    slots: Mutex<Vec<Option<NodeId>>>,
}

impl ConnectionMap {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(vec![None; MAX_PEERS as usize]),
        }
    }

    /// The connection id assigned to `node`, if any.
    pub fn id_for(&self, node: &NodeId) -> Option<u32> {
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .position(|s| s.as_ref() == Some(node))
            .map(|i| i as u32)
    }

    /// The node occupying connection id `id`, if any.
    pub fn node_for(&self, id: u32) -> Option<NodeId> {
        let slots = self.slots.lock().unwrap();
        slots.get(id as usize).copied().flatten()
    }

    /// Assign the lowest free connection id to `node`, or return the one it
    /// already holds. Returns `None` when all 63 peer slots are taken.
    pub fn assign(&self, node: &NodeId) -> Option<u32> {
        let mut slots = self.slots.lock().unwrap();
        if let Some(i) = slots.iter().position(|s| s.as_ref() == Some(node)) {
            return Some(i as u32);
        }
        // Slot 0 belongs to the local node.
        let free = slots.iter().skip(1).position(|s| s.is_none())? + 1;
        slots[free] = Some(*node);
        debug!(node = %node, id = free, "assigned connection id");
        Some(free as u32)
    }

    /// Release the slot held by `node`, if any.
    pub fn clear(&self, node: &NodeId) {
        let mut slots = self.slots.lock().unwrap();
        for (i, slot) in slots.iter_mut().enumerate().skip(1) {
            if slot.as_ref() == Some(node) {
                debug!(node = %node, id = i, "released connection id");
                *slot = None;
            }
        }
    }
}
