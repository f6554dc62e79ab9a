//! Price computation
//!
//! Pricing is a pure function of one cycle's snapshot and image set.
//! Prices are expressed as quantities so they can be published in the same
//! resource-list shape as the availability.

use std::collections::BTreeMap;

use crate::cluster::{
    Quantity, QuantityFormat, ResourceQuantities, RESOURCE_CPU, RESOURCE_MEMORY, RESOURCE_PODS,
};

use super::aggregator::{CapacitySnapshot, ImageSet};

/// Price per resource kind and per image reference
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceList {
    entries: BTreeMap<String, Quantity>,
}

impl PriceList {
    pub fn get(&self, key: &str) -> Option<Quantity> {
        self.entries.get(key).copied()
    }

    pub fn insert(&mut self, key: impl Into<String>, price: Quantity) {
        self.entries.insert(key.into(), price);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_quantities(self) -> ResourceQuantities {
        self.entries
    }
}

/// A pricing policy
///
/// Implementations must be deterministic and free of side effects.
pub trait PricingPolicy: Send + Sync {
    fn price(&self, snapshot: &CapacitySnapshot, images: &ImageSet) -> PriceList;
}

/// Fixed unit prices
#[derive(Debug, Clone)]
pub struct BaselinePricing {
    /// Price per resource kind; kinds missing here are priced at zero
    pub resource_prices: BTreeMap<String, Quantity>,

    /// Price of every distinct image
    pub image_price: Quantity,
}

impl Default for BaselinePricing {
    fn default() -> Self {
        let mut resource_prices = BTreeMap::new();
        resource_prices.insert(
            RESOURCE_CPU.to_string(),
            Quantity::from_units(1, QuantityFormat::DecimalSI),
        );
        resource_prices.insert(
            RESOURCE_MEMORY.to_string(),
            Quantity::from_units(2 * 1024 * 1024 * 1024, QuantityFormat::BinarySI),
        );
        resource_prices.insert(RESOURCE_PODS.to_string(), Quantity::ZERO);

        Self {
            resource_prices,
            image_price: Quantity::from_units(5, QuantityFormat::DecimalSI),
        }
    }
}

impl PricingPolicy for BaselinePricing {
    fn price(&self, snapshot: &CapacitySnapshot, images: &ImageSet) -> PriceList {
        let mut prices = PriceList::default();

        for resource in snapshot.resources() {
            let unit = self
                .resource_prices
                .get(resource)
                .copied()
                .unwrap_or(Quantity::ZERO);
            prices.insert(resource, unit);
        }

        for image in images.iter() {
            prices.insert(image, self.image_price);
        }

        prices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::aggregator::aggregate;
    use crate::cluster::Node;

    fn inputs() -> (CapacitySnapshot, ImageSet) {
        aggregate(&[Node::new("a")
            .with_resources(8, 16, 110)
            .with_image("app:v1", 1)
            .with_image("db:5", 1)])
    }

    #[test]
    fn test_every_resource_and_image_is_priced() {
        let (snapshot, images) = inputs();
        let prices = BaselinePricing::default().price(&snapshot, &images);

        for resource in snapshot.resources() {
            assert!(prices.get(resource).is_some(), "missing price for {}", resource);
        }
        for image in images.iter() {
            assert!(prices.get(image).is_some(), "missing price for {}", image);
        }
        assert_eq!(prices.len(), 5);
    }

    #[test]
    fn test_baseline_values() {
        let (snapshot, images) = inputs();
        let prices = BaselinePricing::default().price(&snapshot, &images);

        assert_eq!(prices.get(RESOURCE_CPU).unwrap().value(), 1);
        assert_eq!(prices.get(RESOURCE_MEMORY).unwrap().to_string(), "2Gi");
        assert_eq!(prices.get("app:v1").unwrap().value(), 5);
    }

    #[test]
    fn test_price_is_deterministic() {
        let (snapshot, images) = inputs();
        let policy = BaselinePricing::default();
        assert_eq!(policy.price(&snapshot, &images), policy.price(&snapshot, &images));
    }

    #[test]
    fn test_empty_inputs_still_price_resource_kinds() {
        let (snapshot, images) = aggregate(&[]);
        let prices = BaselinePricing::default().price(&snapshot, &images);
        assert_eq!(prices.len(), 3);
    }
}
