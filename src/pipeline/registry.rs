// Node registry — which nodes have already been queued for classification.
//
// Marks are stamped with the current epoch. A rescan bumps the epoch, which
// invalidates every mark at once without walking the map.

use std::collections::HashMap;

use crate::dom::NodeId;

#[derive(Debug, Default)]
pub struct NodeRegistry {
    marks: HashMap<NodeId, u64>,
    epoch: u64,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_processed(&self, id: NodeId) -> bool {
        self.marks.get(&id) == Some(&self.epoch)
    }

    /// Mark `id` processed. Returns false if it already was.
    pub fn mark_processed(&mut self, id: NodeId) -> bool {
        self.marks.insert(id, self.epoch) != Some(self.epoch)
    }

    /// Forget every mark (explicit rescan).
    pub fn clear(&mut self) {
        self.epoch += 1;
        // Stale entries are harmless, but don't let them pile up forever.
        if self.marks.len() > 4096 {
            self.marks.clear();
        }
    }

    /// Number of nodes marked in the current epoch.
    pub fn processed_count(&self) -> usize {
        self.marks.values().filter(|e| **e == self.epoch).count()
    }
}
