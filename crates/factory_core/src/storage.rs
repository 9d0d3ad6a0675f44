//! Storage ledger: per-resource quantities with volume and weight caps.
//!
//! Inputs are released (withdrawn) at task start; output space is only
//! checked at completion — see the dispatch and completion phases.

use crate::{Quantity, ResourceId, ResourceTable};
use serde::{Deserialize, Serialize};

/// Why a reserve was refused. These become `BlockedResources` causes or
/// `StorageFull` events, never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreRejection {
    VolumeExceeded,
    WeightExceeded,
}

impl StoreRejection {
    pub fn label(self) -> &'static str {
        match self {
            StoreRejection::VolumeExceeded => "volume exceeded",
            StoreRejection::WeightExceeded => "weight exceeded",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageLedger {
    /// Indexed by `ResourceId`.
    quantities: Vec<Quantity>,
    volume_m3: f64,
    weight_t: f64,
    max_volume_m3: f64,
    max_weight_t: f64,
    /// With limits disabled every reserve succeeds; totals still tracked.
    limits_enabled: bool,
}

/// Volume and weight occupied by `qty` units of a resource.
/// Software is mass-less and volume-less.
fn footprint(resources: &ResourceTable, resource: ResourceId, qty: Quantity) -> (f64, f64) {
    let def = resources.def(resource);
    if def.software {
        return (0.0, 0.0);
    }
    let volume = qty * def.volume_per_unit_m3;
    let weight = volume * def.density_t_per_m3;
    (volume, weight)
}

impl StorageLedger {
    pub fn new(
        resource_count: usize,
        max_volume_m3: f64,
        max_weight_t: f64,
        limits_enabled: bool,
    ) -> Self {
        Self {
            quantities: vec![0.0; resource_count],
            volume_m3: 0.0,
            weight_t: 0.0,
            max_volume_m3,
            max_weight_t,
            limits_enabled,
        }
    }

    pub fn quantity(&self, resource: ResourceId) -> Quantity {
        self.quantities[resource.0 as usize]
    }

    pub fn volume_m3(&self) -> f64 {
        self.volume_m3
    }

    pub fn weight_t(&self) -> f64 {
        self.weight_t
    }

    pub fn max_volume_m3(&self) -> f64 {
        self.max_volume_m3
    }

    pub fn max_weight_t(&self) -> f64 {
        self.max_weight_t
    }

    /// Non-mutating capacity check for `qty` more units of `resource`.
    pub fn can_store(
        &self,
        resources: &ResourceTable,
        resource: ResourceId,
        qty: Quantity,
    ) -> Result<(), StoreRejection> {
        if !self.limits_enabled {
            return Ok(());
        }
        let (volume, weight) = footprint(resources, resource, qty);
        if self.volume_m3 + volume > self.max_volume_m3 {
            return Err(StoreRejection::VolumeExceeded);
        }
        if self.weight_t + weight > self.max_weight_t {
            return Err(StoreRejection::WeightExceeded);
        }
        Ok(())
    }

    /// Add `qty` units if volume and weight stay within caps; updates the
    /// ledger immediately on success.
    pub fn reserve(
        &mut self,
        resources: &ResourceTable,
        resource: ResourceId,
        qty: Quantity,
    ) -> Result<(), StoreRejection> {
        self.can_store(resources, resource, qty)?;
        self.add_unchecked(resources, resource, qty);
        Ok(())
    }

    /// Remove `qty` units; rejects if the ledger would go negative.
    pub fn release(
        &mut self,
        resources: &ResourceTable,
        resource: ResourceId,
        qty: Quantity,
    ) -> Result<(), Quantity> {
        let on_hand = self.quantities[resource.0 as usize];
        if on_hand < qty {
            return Err(on_hand);
        }
        let (volume, weight) = footprint(resources, resource, qty);
        self.quantities[resource.0 as usize] = on_hand - qty;
        self.volume_m3 = (self.volume_m3 - volume).max(0.0);
        self.weight_t = (self.weight_t - weight).max(0.0);
        Ok(())
    }

    /// Unconditional add used for input refunds when a module fails mid-task.
    /// The material physically came out of this store, so it always fits back.
    pub fn refund(&mut self, resources: &ResourceTable, resource: ResourceId, qty: Quantity) {
        self.add_unchecked(resources, resource, qty);
    }

    fn add_unchecked(&mut self, resources: &ResourceTable, resource: ResourceId, qty: Quantity) {
        let (volume, weight) = footprint(resources, resource, qty);
        self.quantities[resource.0 as usize] += qty;
        self.volume_m3 += volume;
        self.weight_t += weight;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResourceDef;

    fn table() -> ResourceTable {
        ResourceTable::new(vec![
            ResourceDef {
                name: "steel".to_string(),
                density_t_per_m3: 8.0,
                storage_temp_c: 25.0,
                contamination_sensitivity: 0.1,
                hazardous: false,
                recyclable: true,
                volume_per_unit_m3: 0.125, // 1 t per unit
                software: false,
            },
            ResourceDef {
                name: "plc_program".to_string(),
                density_t_per_m3: 0.0,
                storage_temp_c: 25.0,
                contamination_sensitivity: 0.0,
                hazardous: false,
                recyclable: false,
                volume_per_unit_m3: 0.0,
                software: true,
            },
        ])
    }

    #[test]
    fn reserve_updates_quantity_and_totals() {
        let resources = table();
        let mut ledger = StorageLedger::new(2, 100.0, 100.0, true);
        ledger.reserve(&resources, ResourceId(0), 10.0).unwrap();
        assert!((ledger.quantity(ResourceId(0)) - 10.0).abs() < 1e-9);
        assert!((ledger.volume_m3() - 1.25).abs() < 1e-9);
        assert!((ledger.weight_t() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn reserve_rejects_volume_overflow() {
        let resources = table();
        let mut ledger = StorageLedger::new(2, 1.0, 1000.0, true);
        let result = ledger.reserve(&resources, ResourceId(0), 10.0);
        assert_eq!(result, Err(StoreRejection::VolumeExceeded));
        assert_eq!(ledger.quantity(ResourceId(0)), 0.0, "rejected reserve must not mutate");
    }

    #[test]
    fn reserve_rejects_weight_overflow() {
        let resources = table();
        let mut ledger = StorageLedger::new(2, 1000.0, 5.0, true);
        let result = ledger.reserve(&resources, ResourceId(0), 10.0);
        assert_eq!(result, Err(StoreRejection::WeightExceeded));
    }

    #[test]
    fn release_rejects_negative_balance() {
        let resources = table();
        let mut ledger = StorageLedger::new(2, 100.0, 100.0, true);
        ledger.reserve(&resources, ResourceId(0), 3.0).unwrap();
        let result = ledger.release(&resources, ResourceId(0), 5.0);
        assert_eq!(result, Err(3.0));
        assert!((ledger.quantity(ResourceId(0)) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn software_occupies_no_space() {
        let resources = table();
        let mut ledger = StorageLedger::new(2, 0.001, 0.001, true);
        ledger.reserve(&resources, ResourceId(1), 1.0).unwrap();
        assert_eq!(ledger.volume_m3(), 0.0);
        assert_eq!(ledger.weight_t(), 0.0);
    }

    #[test]
    fn disabled_limits_accept_everything() {
        let resources = table();
        let mut ledger = StorageLedger::new(2, 0.0, 0.0, false);
        ledger.reserve(&resources, ResourceId(0), 1e9).unwrap();
        assert!(ledger.quantity(ResourceId(0)) > 0.0);
    }
}
