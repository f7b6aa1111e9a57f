use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

use crate::domain::entities::NodePool;

/// A pool present before and after an update
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodePoolUpdate {
    pub pool: NodePool,
    pub previous_size: u32,
}

impl NodePoolUpdate {
    /// Indices of the nodes to add when the pool grows
    pub fn nodes_to_add(&self) -> Option<RangeInclusive<u32>> {
        (self.pool.size > self.previous_size).then(|| self.previous_size + 1..=self.pool.size)
    }

    /// Indices beyond the new size, scheduled for deletion when the pool shrinks
    pub fn nodes_to_remove(&self) -> Option<RangeInclusive<u32>> {
        (self.pool.size < self.previous_size).then(|| self.pool.size + 1..=self.previous_size)
    }

    pub fn is_resized(&self) -> bool {
        self.pool.size != self.previous_size
    }
}

/// Partition of an update request against the persisted pools
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodePoolDiff {
    pub to_create: Vec<NodePool>,
    pub to_update: Vec<NodePoolUpdate>,
    /// Persisted pools absent from the request
    pub to_delete: Vec<NodePool>,
}

pub fn diff_node_pools(existing: &[NodePool], incoming: &[NodePool]) -> NodePoolDiff {
    let mut diff = NodePoolDiff::default();

    for pool in incoming {
        match existing.iter().find(|p| p.name == pool.name) {
            Some(previous) => diff.to_update.push(NodePoolUpdate {
                pool: pool.clone(),
                previous_size: previous.size,
            }),
            None => diff.to_create.push(pool.clone()),
        }
    }

    diff.to_delete = existing
        .iter()
        .filter(|p| !incoming.iter().any(|i| i.name == p.name))
        .cloned()
        .collect();

    diff
}
