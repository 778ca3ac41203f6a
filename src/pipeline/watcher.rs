// Mutation watcher — feeds newly inserted content back into the scanner.
//
// The surface records every insertion. Draining those records and scanning
// each added subtree gives the same discovery path as the initial scan, and
// the registry makes the two producers safe to overlap.

use tracing::debug;

use super::registry::NodeRegistry;
use super::scanner::{BatchItem, Scanner};
use crate::dom::ContentSurface;

#[derive(Debug, Default)]
pub struct MutationWatcher {
    /// Mutation batches observed since creation.
    observed: u64,
}

/// Result of draining the mutation log once.
#[derive(Debug, Default)]
pub struct WatchReport {
    /// Number of mutation records drained.
    pub records: usize,
    pub items: Vec<BatchItem>,
}

impl MutationWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// Drain pending mutation records and discover candidates under every
    /// added node that is still in the document.
    pub fn collect(
        &mut self,
        surface: &mut impl ContentSurface,
        scanner: &Scanner,
        registry: &mut NodeRegistry,
    ) -> WatchReport {
        let records = surface.take_mutations();
        if records.is_empty() {
            return WatchReport::default();
        }
        self.observed += 1;

        let mut items = Vec::new();
        for record in &records {
            for added in &record.added {
                // Inserted then removed before we looked: nothing to scan.
                if !surface.is_attached(*added) {
                    continue;
                }
                items.extend(scanner.discover(&*surface, *added, registry));
            }
        }

        debug!(
            records = records.len(),
            candidates = items.len(),
            "Mutation batch scanned"
        );

        WatchReport {
            records: records.len(),
            items,
        }
    }

    /// Drain and drop pending records (protection is off).
    pub fn discard(&mut self, surface: &mut impl ContentSurface) {
        surface.take_mutations();
    }
}
