//! Capacity aggregation over local nodes

use std::collections::BTreeSet;

use tracing::warn;

use crate::cluster::{
    Node, Quantity, ResourceQuantities, RESOURCE_CPU, RESOURCE_MEMORY, RESOURCE_PODS,
};

/// Resource kinds summed into a snapshot
pub const AGGREGATED_RESOURCES: [&str; 3] = [RESOURCE_CPU, RESOURCE_MEMORY, RESOURCE_PODS];

/// Allocatable totals across the local nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacitySnapshot {
    totals: ResourceQuantities,
}

impl Default for CapacitySnapshot {
    fn default() -> Self {
        let totals = AGGREGATED_RESOURCES
            .iter()
            .map(|r| (r.to_string(), Quantity::ZERO))
            .collect();
        Self { totals }
    }
}

impl CapacitySnapshot {
    pub fn get(&self, resource: &str) -> Quantity {
        self.totals.get(resource).copied().unwrap_or(Quantity::ZERO)
    }

    pub fn cpu(&self) -> Quantity {
        self.get(RESOURCE_CPU)
    }

    pub fn memory(&self) -> Quantity {
        self.get(RESOURCE_MEMORY)
    }

    pub fn pods(&self) -> Quantity {
        self.get(RESOURCE_PODS)
    }

    /// Resource kinds present in the snapshot
    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.totals.keys().map(String::as_str)
    }

    pub fn as_quantities(&self) -> &ResourceQuantities {
        &self.totals
    }

    fn add(&mut self, resource: &str, amount: Quantity) {
        let total = self.totals.entry(resource.to_string()).or_default();
        match total.checked_add(&amount) {
            Some(sum) => *total = sum,
            None => warn!("Total {} overflowed, keeping previous value", resource),
        }
    }
}

/// Image references seen on the local nodes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSet {
    names: BTreeSet<String>,
}

impl ImageSet {
    pub fn insert(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ImageSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Sum allocatable CPU, memory and pod slots, and collect image names
///
/// Nodes injected by peers must already be filtered out by the caller. An
/// empty node list yields a zero snapshot. Negative allocatable values are
/// not added, so totals never go below zero.
pub fn aggregate(nodes: &[Node]) -> (CapacitySnapshot, ImageSet) {
    let mut snapshot = CapacitySnapshot::default();
    let mut images = ImageSet::default();

    for node in nodes {
        for resource in AGGREGATED_RESOURCES {
            let amount = node.allocatable(resource);
            if amount.is_negative() {
                warn!(
                    "Node {} reports negative allocatable {} ({}), ignoring",
                    node.metadata.name, resource, amount
                );
                continue;
            }
            snapshot.add(resource, amount);
        }

        for image in &node.status.images {
            for name in &image.names {
                images.insert(name.clone());
            }
        }
    }

    (snapshot, images)
}
