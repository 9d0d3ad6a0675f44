//! Module registry and per-instance state machine.
//!
//! Each module type owns a list of instances; an instance is Running,
//! Maintaining, or Failed. Only Running instances provide task slots.
//! Wear accumulates with active runtime and feeds throughput, quality, and
//! the stochastic failure probability.

use crate::{Constants, Features, ModuleTable, ModuleTypeId};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OpState {
    Running,
    Maintaining { until_hours: f64 },
    Failed { until_hours: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInstance {
    pub wear: f64,
    pub hours_since_maintenance: f64,
    pub operational: OpState,
    /// Tasks currently holding a slot on this instance.
    pub active_tasks: u32,
    pub total_runtime_hours: f64,
}

impl ModuleInstance {
    fn new() -> Self {
        Self {
            wear: 0.0,
            hours_since_maintenance: 0.0,
            operational: OpState::Running,
            active_tasks: 0,
            total_runtime_hours: 0.0,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.operational, OpState::Running)
    }
}

/// State transitions surfaced to the engine, which turns them into events
/// and requeues tasks stranded on failed instances.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleTransition {
    Failed {
        module_type: ModuleTypeId,
        instance: usize,
        wear: f64,
    },
    Repaired {
        module_type: ModuleTypeId,
        instance: usize,
    },
    MaintenanceStarted {
        module_type: ModuleTypeId,
        instance: usize,
    },
    MaintenanceCompleted {
        module_type: ModuleTypeId,
        instance: usize,
        wear_after: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleRegistry {
    /// Indexed by `ModuleTypeId`.
    types: Vec<Vec<ModuleInstance>>,
}

impl ModuleRegistry {
    pub fn new(module_type_count: usize) -> Self {
        Self {
            types: vec![Vec::new(); module_type_count],
        }
    }

    pub fn add_instances(&mut self, module_type: ModuleTypeId, count: u32) {
        let list = &mut self.types[module_type.0 as usize];
        for _ in 0..count {
            list.push(ModuleInstance::new());
        }
    }

    pub fn instances(&self, module_type: ModuleTypeId) -> &[ModuleInstance] {
        &self.types[module_type.0 as usize]
    }

    pub fn instance_mut(&mut self, module_type: ModuleTypeId, idx: usize) -> &mut ModuleInstance {
        &mut self.types[module_type.0 as usize][idx]
    }

    pub fn count(&self, module_type: ModuleTypeId) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let n = self.types[module_type.0 as usize].len() as u32;
        n
    }

    pub fn count_running(&self, module_type: ModuleTypeId) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let n = self.types[module_type.0 as usize]
            .iter()
            .filter(|m| m.is_running())
            .count() as u32;
        n
    }

    pub fn active_slots(&self, module_type: ModuleTypeId) -> u32 {
        self.types[module_type.0 as usize]
            .iter()
            .map(|m| m.active_tasks)
            .sum()
    }

    /// Pick a Running instance with a free slot: least worn first, lowest
    /// index on ties, so dispatch is deterministic.
    pub fn find_slot(&self, module_type: ModuleTypeId, parallel_limit: u32) -> Option<usize> {
        self.types[module_type.0 as usize]
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_running() && m.active_tasks < parallel_limit)
            .min_by(|(ai, a), (bi, b)| a.wear.total_cmp(&b.wear).then(ai.cmp(bi)))
            .map(|(idx, _)| idx)
    }

    pub fn reserve_slot(&mut self, module_type: ModuleTypeId, idx: usize) {
        self.types[module_type.0 as usize][idx].active_tasks += 1;
    }

    pub fn release_slot(&mut self, module_type: ModuleTypeId, idx: usize) {
        let instance = &mut self.types[module_type.0 as usize][idx];
        debug_assert!(instance.active_tasks > 0, "releasing an unreserved slot");
        instance.active_tasks = instance.active_tasks.saturating_sub(1);
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Advance every instance by one tick: wear, maintenance entry/exit,
    /// repair exit, stochastic failure. Iteration order is fixed (type id,
    /// then instance index) so RNG consumption is deterministic.
    pub fn tick(
        &mut self,
        now_hours: f64,
        module_types: &ModuleTable,
        constants: &Constants,
        features: &Features,
        rng: &mut impl Rng,
    ) -> Vec<ModuleTransition> {
        let mut transitions = Vec::new();
        if !features.degradation {
            return transitions;
        }
        let dt = constants.dt_hours;

        for type_idx in 0..self.types.len() {
            #[allow(clippy::cast_possible_truncation)]
            let module_type = ModuleTypeId(type_idx as u32);
            let def = module_types.def(module_type);

            for idx in 0..self.types[type_idx].len() {
                let instance = &mut self.types[type_idx][idx];

                match instance.operational {
                    OpState::Maintaining { until_hours } => {
                        if now_hours >= until_hours {
                            instance.wear *= 1.0 - constants.maintenance_wear_recovery;
                            instance.hours_since_maintenance = 0.0;
                            instance.operational = OpState::Running;
                            transitions.push(ModuleTransition::MaintenanceCompleted {
                                module_type,
                                instance: idx,
                                wear_after: instance.wear,
                            });
                        }
                        continue;
                    }
                    OpState::Failed { until_hours } => {
                        if now_hours >= until_hours {
                            instance.wear *= 1.0 - constants.maintenance_wear_recovery;
                            instance.hours_since_maintenance = 0.0;
                            instance.operational = OpState::Running;
                            transitions.push(ModuleTransition::Repaired {
                                module_type,
                                instance: idx,
                            });
                        }
                        continue;
                    }
                    OpState::Running => {}
                }

                let busy = instance.active_tasks > 0;
                if busy {
                    instance.wear =
                        (instance.wear + def.degradation_rate * dt / 1000.0).min(1.0);
                    instance.hours_since_maintenance += dt;
                    instance.total_runtime_hours += dt;
                }

                // Scheduled maintenance waits for the instance to go idle so
                // active tasks are never interrupted by it.
                if features.maintenance
                    && !busy
                    && instance.hours_since_maintenance >= def.maintenance_interval_hours
                {
                    instance.operational = OpState::Maintaining {
                        until_hours: now_hours + constants.maintenance_duration_hours,
                    };
                    transitions.push(ModuleTransition::MaintenanceStarted {
                        module_type,
                        instance: idx,
                    });
                    continue;
                }

                // Stochastic failure, wear-weighted.
                let p_fail =
                    dt / def.mtbf_hours * (1.0 + constants.failure_wear_weight * instance.wear);
                if rng.gen::<f64>() < p_fail {
                    instance.operational = OpState::Failed {
                        until_hours: now_hours + constants.repair_duration_hours,
                    };
                    transitions.push(ModuleTransition::Failed {
                        module_type,
                        instance: idx,
                        wear: instance.wear,
                    });
                }
            }
        }
        transitions
    }
}

// ---------------------------------------------------------------------------
// Wear-derived performance
// ---------------------------------------------------------------------------

/// Throughput multiplier for a worn instance, floored so a worn-out module
/// crawls instead of stalling forever.
pub fn wear_efficiency(wear: f64, constants: &Constants) -> f64 {
    (1.0 - wear).max(constants.min_module_efficiency)
}

/// Effective quality of an instance: base rate derated by wear, floored.
pub fn effective_quality(base_rate: f64, wear: f64, constants: &Constants) -> f64 {
    (base_rate * (1.0 - wear)).max(constants.quality_floor)
}
