//! Periodic snapshot metrics computed from `FactoryState`.
//!
//! `compute_metrics` samples current state for the hourly time series in the
//! output log. No state mutation, no IO. Maps are `BTreeMap` so serialised
//! output is byte-stable across runs.

use crate::{FactoryContent, FactoryState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bump when fields are added/removed/reordered.
const METRICS_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub metrics_version: u32,
    pub tick: u64,
    pub time_hours: f64,

    // Energy
    pub battery_kwh: f64,
    pub total_generated_kwh: f64,
    pub total_consumed_kwh: f64,
    pub total_loss_kwh: f64,

    // Storage
    pub storage_volume_m3: f64,
    pub storage_weight_t: f64,
    /// Non-zero on-hand quantities by resource name.
    pub resources_on_hand: BTreeMap<String, f64>,

    // Tasks
    pub queued_tasks: usize,
    pub active_tasks: usize,
    pub completed_tasks: usize,
    /// Blocked-task counts keyed by cause label.
    pub blocked_tasks: BTreeMap<String, usize>,

    // Modules
    pub module_counts: BTreeMap<String, u32>,
    pub modules_failed: u32,
    pub avg_module_wear: f64,

    // Subsystem readings
    pub thermal_load_kw: f64,
    pub active_transports: u32,
}

#[allow(clippy::cast_precision_loss)]
pub fn compute_metrics(state: &FactoryState, content: &FactoryContent) -> MetricsSnapshot {
    let mut resources_on_hand = BTreeMap::new();
    for id in content.resources.ids() {
        let qty = state.storage.quantity(id);
        if qty > 0.0 {
            resources_on_hand.insert(content.resources.name(id).to_string(), qty);
        }
    }

    let mut blocked_tasks = BTreeMap::new();
    for (cause, count) in state.tasks.blocked_by_cause() {
        blocked_tasks.insert(cause.label().to_string(), count);
    }

    let mut module_counts = BTreeMap::new();
    let mut modules_failed = 0u32;
    let mut wear_sum = 0.0;
    let mut instance_count = 0u32;
    for module_type in content.module_types.ids() {
        let instances = state.modules.instances(module_type);
        module_counts.insert(
            content.module_types.name(module_type).to_string(),
            instances.len() as u32,
        );
        for instance in instances {
            wear_sum += instance.wear;
            instance_count += 1;
            if matches!(instance.operational, crate::modules::OpState::Failed { .. }) {
                modules_failed += 1;
            }
        }
    }
    let avg_module_wear = if instance_count > 0 {
        wear_sum / f64::from(instance_count)
    } else {
        0.0
    };

    MetricsSnapshot {
        metrics_version: METRICS_VERSION,
        tick: state.tick,
        time_hours: state.time_hours,
        battery_kwh: state.energy.battery_kwh,
        total_generated_kwh: state.energy.total_generated_kwh,
        total_consumed_kwh: state.energy.total_consumed_kwh,
        total_loss_kwh: state.energy.total_loss_kwh,
        storage_volume_m3: state.storage.volume_m3(),
        storage_weight_t: state.storage.weight_t(),
        resources_on_hand,
        queued_tasks: state.tasks.queued_count(),
        active_tasks: state.tasks.active_count(),
        completed_tasks: state.tasks.completed_count(),
        blocked_tasks,
        module_counts,
        modules_failed,
        avg_module_wear,
        thermal_load_kw: state.readings.thermal_load_kw,
        active_transports: state.readings.active_transports,
    }
}
