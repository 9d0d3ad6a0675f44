//! Type definitions for `factory_core`.
//!
//! All public types, structs, enums, and ID newtypes used by the simulation.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Type aliases
// ---------------------------------------------------------------------------

/// Resource amounts are fractional throughout; integer-looking recipe
/// quantities are parsed into floats at load time.
pub type Quantity = f64;

// ---------------------------------------------------------------------------
// ID newtypes
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(TaskId);
string_id!(EventId);

/// Compact resource key assigned in declaration order at load time.
/// The name lives in the [`ResourceTable`] side table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub u32);

/// Compact module-type key, same scheme as [`ResourceId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleTypeId(pub u32);

// ---------------------------------------------------------------------------
// Resource definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDef {
    pub name: String,
    /// tons per m³ of bulk-stored material.
    pub density_t_per_m3: f64,
    pub storage_temp_c: f64,
    /// 0 = inert, 1 = ruined by any particle.
    pub contamination_sensitivity: f64,
    pub hazardous: bool,
    pub recyclable: bool,
    /// m³ occupied per unit. Zero for software.
    pub volume_per_unit_m3: f64,
    /// Software resources are mass-less, volume-less, and never consumed.
    pub software: bool,
}

/// Immutable side table mapping compact ids to resource definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceTable {
    defs: Vec<ResourceDef>,
    #[serde(skip)]
    index: HashMap<String, ResourceId>,
}

impl ResourceTable {
    /// Build the table, assigning ids in the order given.
    /// Duplicate names are a loader bug and panic here.
    pub fn new(defs: Vec<ResourceDef>) -> Self {
        let mut index = HashMap::with_capacity(defs.len());
        for (i, def) in defs.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let prev = index.insert(def.name.clone(), ResourceId(i as u32));
            assert!(prev.is_none(), "duplicate resource name '{}'", def.name);
        }
        Self { defs, index }
    }

    /// Rebuild the name index after deserialisation.
    pub fn rebuild_index(&mut self) {
        self.index = self
            .defs
            .iter()
            .enumerate()
            .map(|(i, def)| {
                #[allow(clippy::cast_possible_truncation)]
                let id = ResourceId(i as u32);
                (def.name.clone(), id)
            })
            .collect();
    }

    pub fn id(&self, name: &str) -> Option<ResourceId> {
        self.index.get(name).copied()
    }

    pub fn def(&self, id: ResourceId) -> &ResourceDef {
        &self.defs[id.0 as usize]
    }

    pub fn name(&self, id: ResourceId) -> &str {
        &self.defs[id.0 as usize].name
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ResourceId> + '_ {
        #[allow(clippy::cast_possible_truncation)]
        (0..self.defs.len() as u32).map(ResourceId)
    }
}

// ---------------------------------------------------------------------------
// Recipes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub output: ResourceId,
    pub output_quantity: Quantity,
    /// Sorted by resource id so iteration order is deterministic.
    pub inputs: Vec<(ResourceId, Quantity)>,
    pub energy_kwh: f64,
    pub time_hours: f64,
    pub required_module: ModuleTypeId,
    pub parallel_capable: bool,
    pub tolerance_um: Option<f64>,
    pub cleanroom_class: Option<u32>,
    pub software_required: Option<ResourceId>,
    pub waste_products: Vec<(ResourceId, Quantity)>,
}

// ---------------------------------------------------------------------------
// Module types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleTypeDef {
    pub name: String,
    pub max_throughput: f64,
    pub power_idle_kw: f64,
    pub power_active_kw: f64,
    pub mtbf_hours: f64,
    pub maintenance_interval_hours: f64,
    /// Wear accumulated per 1000 hours of active runtime.
    pub degradation_rate: f64,
    pub max_batch_size: Quantity,
    pub min_batch_size: Quantity,
    pub setup_time_hours: f64,
    pub quality_base_rate: f64,
    pub tolerance_capability_um: Option<f64>,
    /// Best cleanroom class this module type can maintain, if any.
    pub cleanroom_capable: Option<u32>,
    /// Slots per instance. ≤ N·P tasks active for N instances.
    pub parallel_limit: u32,
    /// Heat dumped into the hall per active slot, for the thermal subsystem.
    pub heat_output_kw: f64,
}

/// Immutable side table for module types, mirroring [`ResourceTable`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleTable {
    defs: Vec<ModuleTypeDef>,
    #[serde(skip)]
    index: HashMap<String, ModuleTypeId>,
}

impl ModuleTable {
    pub fn new(defs: Vec<ModuleTypeDef>) -> Self {
        let mut index = HashMap::with_capacity(defs.len());
        for (i, def) in defs.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let prev = index.insert(def.name.clone(), ModuleTypeId(i as u32));
            assert!(prev.is_none(), "duplicate module type '{}'", def.name);
        }
        Self { defs, index }
    }

    pub fn rebuild_index(&mut self) {
        self.index = self
            .defs
            .iter()
            .enumerate()
            .map(|(i, def)| {
                #[allow(clippy::cast_possible_truncation)]
                let id = ModuleTypeId(i as u32);
                (def.name.clone(), id)
            })
            .collect();
    }

    pub fn id(&self, name: &str) -> Option<ModuleTypeId> {
        self.index.get(name).copied()
    }

    pub fn def(&self, id: ModuleTypeId) -> &ModuleTypeDef {
        &self.defs[id.0 as usize]
    }

    pub fn name(&self, id: ModuleTypeId) -> &str {
        &self.defs[id.0 as usize].name
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ModuleTypeId> + '_ {
        #[allow(clippy::cast_possible_truncation)]
        (0..self.defs.len() as u32).map(ModuleTypeId)
    }
}

// ---------------------------------------------------------------------------
// Constants and feature toggles
// ---------------------------------------------------------------------------

/// Every engine tunable lives here; nothing in the tick loop hard-codes a
/// number. Defaults match the reference configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constants {
    pub dt_hours: f64,
    pub max_task_starts_per_tick: u32,

    // Energy
    pub solar_capacity_kw: f64,
    pub battery_capacity_kwh: f64,
    pub battery_reserve_fraction: f64,
    pub charge_efficiency: f64,
    pub discharge_efficiency: f64,
    pub peak_sun_hours: f64,
    pub latitude_deg: f64,
    pub average_cloud_cover: f64,

    // Scheduling
    pub parallel_processing_limit: u32,
    /// Factor < 1 speeds repeat production up: `time · factor^k`,
    /// k = completions of the same output / `learning_batch_size`.
    pub learning_curve_factor: f64,
    pub learning_batch_size: u32,
    /// Over-provisioning applied to dependency-task quantities, absorbing
    /// quality losses so chains do not starve by a fraction.
    pub dependency_buffer_factor: f64,

    // Degradation / maintenance
    pub maintenance_duration_hours: f64,
    pub repair_duration_hours: f64,
    /// Fraction of wear removed when maintenance or repair completes.
    pub maintenance_wear_recovery: f64,
    /// `k` in failure probability `dt/mtbf · (1 + k·wear)`.
    pub failure_wear_weight: f64,

    // Quality
    pub quality_floor: f64,
    pub quality_variation: f64,
    /// Wear-derived efficiency never drops below this.
    pub min_module_efficiency: f64,

    // Storage
    pub max_storage_volume_m3: f64,
    pub max_storage_weight_t: f64,

    // Transport
    pub transport_power_kw_per_active: f64,
    pub max_concurrent_transports: u32,
    pub transport_base_hours: f64,

    // Thermal
    pub thermal_dissipation_limit_kw: f64,
    pub cooling_cop: f64,
    pub ambient_temperature_c: f64,

    // Contamination
    pub cleanroom_cleaning_interval_hours: f64,
    /// Particles added per active slot-hour in a cleanroom module.
    pub contamination_particles_per_slot_hour: f64,

    // Waste
    pub waste_recycling_efficiency: f64,

    // Software
    pub initial_software_bug_rate: f64,

    // Bookkeeping
    pub metric_interval_hours: f64,
    pub progress_interval_hours: f64,
    pub max_hours: f64,
    pub max_wall_time_seconds: f64,
    pub event_queue_capacity: usize,
    pub event_history_capacity: usize,
    /// Cumulative drops above this fraction of queue capacity are fatal.
    pub event_drop_fatal_fraction: f64,
    pub log_capacity: usize,
    pub completed_task_log_capacity: usize,
    pub resolver_cache_capacity: usize,
}

impl Default for Constants {
    fn default() -> Self {
        Self {
            dt_hours: 0.1,
            max_task_starts_per_tick: 5,
            solar_capacity_kw: 100.0,
            battery_capacity_kwh: 1000.0,
            battery_reserve_fraction: 0.2,
            charge_efficiency: 0.95,
            discharge_efficiency: 0.95,
            peak_sun_hours: 8.0,
            latitude_deg: 35.0,
            average_cloud_cover: 0.3,
            parallel_processing_limit: 10,
            learning_curve_factor: 0.95,
            learning_batch_size: 10,
            dependency_buffer_factor: 1.1,
            maintenance_duration_hours: 8.0,
            repair_duration_hours: 24.0,
            maintenance_wear_recovery: 0.5,
            failure_wear_weight: 2.0,
            quality_floor: 0.5,
            quality_variation: 0.02,
            min_module_efficiency: 0.3,
            max_storage_volume_m3: 15_000.0,
            max_storage_weight_t: 10_000.0,
            transport_power_kw_per_active: 2.0,
            max_concurrent_transports: 20,
            transport_base_hours: 0.1,
            thermal_dissipation_limit_kw: 500.0,
            cooling_cop: 3.0,
            ambient_temperature_c: 25.0,
            cleanroom_cleaning_interval_hours: 168.0,
            contamination_particles_per_slot_hour: 50.0,
            waste_recycling_efficiency: 0.7,
            initial_software_bug_rate: 0.05,
            metric_interval_hours: 1.0,
            progress_interval_hours: 100.0,
            max_hours: 10_000.0,
            max_wall_time_seconds: 3600.0,
            event_queue_capacity: 10_000,
            event_history_capacity: 1000,
            event_drop_fatal_fraction: 0.1,
            log_capacity: 5000,
            completed_task_log_capacity: 100,
            resolver_cache_capacity: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Features {
    pub degradation: bool,
    pub weather: bool,
    pub maintenance: bool,
    pub storage_limits: bool,
    pub batch_processing: bool,
    pub transport_time: bool,
    pub contamination: bool,
    pub thermal_management: bool,
    pub software_production: bool,
    pub waste_recycling: bool,
    pub quality_control: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            degradation: true,
            weather: true,
            maintenance: true,
            storage_limits: true,
            batch_processing: true,
            transport_time: true,
            contamination: true,
            thermal_management: true,
            software_production: true,
            waste_recycling: true,
            quality_control: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Content — everything immutable after load
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryContent {
    pub spec_name: String,
    pub spec_version: String,
    pub resources: ResourceTable,
    pub recipes: crate::recipes::RecipeRegistry,
    pub module_types: ModuleTable,
    /// Resource → module type produced when a task with that output completes.
    pub module_products: HashMap<ResourceId, ModuleTypeId>,
    /// Replication goal: one of each of these must be produced to terminate.
    pub targets: Vec<ResourceId>,
    pub constants: Constants,
    pub features: Features,
}

impl FactoryContent {
    /// Restore the skipped name indexes after deserialisation.
    pub fn rebuild_indexes(&mut self) {
        self.resources.rebuild_index();
        self.module_types.rebuild_index();
    }
}

// ---------------------------------------------------------------------------
// Task lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockCause {
    Dependencies,
    Module,
    Resources,
    Energy,
}

impl BlockCause {
    pub fn label(self) -> &'static str {
        match self {
            BlockCause::Dependencies => "dependencies",
            BlockCause::Module => "module",
            BlockCause::Resources => "resources",
            BlockCause::Energy => "energy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Queued,
    Active,
    Completed,
    Blocked(BlockCause),
}

/// A slot reservation on one module instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRef {
    pub module_type: ModuleTypeId,
    pub instance: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub output: ResourceId,
    pub quantity: Quantity,
    /// Lower runs sooner. Children inherit parent priority + 1.
    pub priority: u32,
    pub status: TaskStatus,
    pub dependencies: HashSet<TaskId>,
    pub assigned: Option<SlotRef>,
    pub remaining_hours: f64,
    pub duration_hours: f64,
    pub energy_kwh_total: f64,
    pub energy_consumed_kwh: f64,
    /// Output after quality scaling, fixed at dispatch.
    pub expected_output: Quantity,
    pub started_at_hours: Option<f64>,
    pub completed_at_hours: Option<f64>,
}

impl Task {
    pub fn new(id: TaskId, output: ResourceId, quantity: Quantity, priority: u32) -> Self {
        Self {
            id,
            output,
            quantity,
            priority,
            status: TaskStatus::Queued,
            dependencies: HashSet::new(),
            assigned: None,
            remaining_hours: 0.0,
            duration_hours: 0.0,
            energy_kwh_total: 0.0,
            energy_consumed_kwh: 0.0,
            expected_output: 0.0,
            started_at_hours: None,
            completed_at_hours: None,
        }
    }
}

/// Archived record of a finished task, kept in a bounded log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedTaskRecord {
    pub id: TaskId,
    pub output: String,
    pub quantity: Quantity,
    pub actual_output: Quantity,
    pub priority: u32,
    pub started_at_hours: f64,
    pub completed_at_hours: f64,
    pub energy_consumed_kwh: f64,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: EventId,
    pub tick: u64,
    pub time_hours: f64,
    pub event: Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    ResourceProduced {
        resource: ResourceId,
        quantity: Quantity,
        task_id: TaskId,
    },
    ResourceConsumed {
        resource: ResourceId,
        quantity: Quantity,
        task_id: TaskId,
    },
    ModuleCreated {
        module_type: ModuleTypeId,
        count: u32,
    },
    ModuleFailed {
        module_type: ModuleTypeId,
        instance: usize,
        wear: f64,
    },
    ModuleRepaired {
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
    TaskStarted {
        task_id: TaskId,
        output: ResourceId,
        module_type: ModuleTypeId,
        duration_hours: f64,
    },
    TaskCompleted {
        task_id: TaskId,
        output: ResourceId,
        quantity: Quantity,
    },
    TaskBlocked {
        task_id: TaskId,
        cause: BlockCause,
    },
    StorageFull {
        task_id: TaskId,
        resource: ResourceId,
        quantity: Quantity,
    },
    TransportRequested {
        resource: ResourceId,
        quantity: Quantity,
        from: String,
        to: String,
        priority: u32,
    },
    TransportCompleted {
        resource: ResourceId,
        quantity: Quantity,
    },
    EnergyAvailable {
        generated_kw: f64,
        consumed_kw: f64,
        battery_kwh: f64,
    },
    ThermalLimitReached {
        load_kw: f64,
        limit_kw: f64,
    },
    ThermalReport {
        load_kw: f64,
        cooling_kw: f64,
    },
    TransportReport {
        active: u32,
        power_kw: f64,
    },
    ContaminationReport {
        module_type: ModuleTypeId,
        effective_class: u32,
        yield_factor: f64,
    },
    SoftwareDeveloped {
        resource: ResourceId,
        version: u32,
        reliability: f64,
    },
    WasteGenerated {
        resource: ResourceId,
        quantity: Quantity,
    },
    WasteRecycled {
        resource: ResourceId,
        quantity: Quantity,
    },
}

/// Field-less mirror of [`Event`] used for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ResourceProduced,
    ResourceConsumed,
    ModuleCreated,
    ModuleFailed,
    ModuleRepaired,
    MaintenanceStarted,
    MaintenanceCompleted,
    TaskStarted,
    TaskCompleted,
    TaskBlocked,
    StorageFull,
    TransportRequested,
    TransportCompleted,
    EnergyAvailable,
    ThermalLimitReached,
    ThermalReport,
    TransportReport,
    ContaminationReport,
    SoftwareDeveloped,
    WasteGenerated,
    WasteRecycled,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ResourceProduced { .. } => EventKind::ResourceProduced,
            Event::ResourceConsumed { .. } => EventKind::ResourceConsumed,
            Event::ModuleCreated { .. } => EventKind::ModuleCreated,
            Event::ModuleFailed { .. } => EventKind::ModuleFailed,
            Event::ModuleRepaired { .. } => EventKind::ModuleRepaired,
            Event::MaintenanceStarted { .. } => EventKind::MaintenanceStarted,
            Event::MaintenanceCompleted { .. } => EventKind::MaintenanceCompleted,
            Event::TaskStarted { .. } => EventKind::TaskStarted,
            Event::TaskCompleted { .. } => EventKind::TaskCompleted,
            Event::TaskBlocked { .. } => EventKind::TaskBlocked,
            Event::StorageFull { .. } => EventKind::StorageFull,
            Event::TransportRequested { .. } => EventKind::TransportRequested,
            Event::TransportCompleted { .. } => EventKind::TransportCompleted,
            Event::EnergyAvailable { .. } => EventKind::EnergyAvailable,
            Event::ThermalLimitReached { .. } => EventKind::ThermalLimitReached,
            Event::ThermalReport { .. } => EventKind::ThermalReport,
            Event::TransportReport { .. } => EventKind::TransportReport,
            Event::ContaminationReport { .. } => EventKind::ContaminationReport,
            Event::SoftwareDeveloped { .. } => EventKind::SoftwareDeveloped,
            Event::WasteGenerated { .. } => EventKind::WasteGenerated,
            Event::WasteRecycled { .. } => EventKind::WasteRecycled,
        }
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counters {
    pub next_task_id: u64,
    pub next_event_id: u64,
    /// Insertion sequence for heap tie-breaking.
    pub next_queue_seq: u64,
}

/// Allocate the next event envelope. Mirrors the task-id scheme.
pub(crate) fn emit(counters: &mut Counters, tick: u64, time_hours: f64, event: Event) -> EventEnvelope {
    let id = EventId(format!("evt_{:08}", counters.next_event_id));
    counters.next_event_id += 1;
    EventEnvelope {
        id,
        tick,
        time_hours,
        event,
    }
}

// ---------------------------------------------------------------------------
// Subsystem readings folded back into the core each tick
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubsystemReadings {
    pub thermal_load_kw: f64,
    pub cooling_power_kw: f64,
    pub thermal_limit_reached: bool,
    pub transport_power_kw: f64,
    pub active_transports: u32,
    /// Module type → effective cleanroom class achieved right now.
    pub contamination_class: HashMap<ModuleTypeId, u32>,
    /// Module type → contamination yield factor in (0, 1].
    pub contamination_yield: HashMap<ModuleTypeId, f64>,
    /// Multiplier applied to quality of software-dependent recipes.
    pub software_reliability: f64,
}

impl SubsystemReadings {
    pub fn new() -> Self {
        Self {
            software_reliability: 1.0,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Mutable simulation state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryState {
    pub tick: u64,
    pub time_hours: f64,
    pub seed: u64,
    pub storage: crate::storage::StorageLedger,
    pub energy: crate::energy::EnergyState,
    pub modules: crate::modules::ModuleRegistry,
    pub tasks: crate::tasks::TaskQueue,
    pub counters: Counters,
    /// Cumulative production per resource, for termination and learning.
    pub produced_total: Vec<Quantity>,
    pub readings: SubsystemReadings,
    pub log: crate::logbuf::LogBuffer,
    pub metrics: Vec<crate::metrics::MetricsSnapshot>,
    pub last_metric_time: f64,
    pub last_progress_time: f64,
    pub completed_log: VecDeque<CompletedTaskRecord>,
}

impl FactoryState {
    /// Fresh state for the given content: one seed instance of every
    /// declared module type, empty storage, battery at half capacity.
    /// The loader overlays `initial_state` (seed counts, starting
    /// resources, starting battery) on top of this.
    pub fn new(content: &FactoryContent, seed: u64) -> Self {
        let c = &content.constants;
        let mut modules = crate::modules::ModuleRegistry::new(content.module_types.len());
        for module_type in content.module_types.ids() {
            modules.add_instances(module_type, 1);
        }
        Self {
            tick: 0,
            time_hours: 0.0,
            seed,
            storage: crate::storage::StorageLedger::new(
                content.resources.len(),
                c.max_storage_volume_m3,
                c.max_storage_weight_t,
                content.features.storage_limits,
            ),
            energy: crate::energy::EnergyState::new(
                c.solar_capacity_kw,
                c.battery_capacity_kwh,
                c.battery_capacity_kwh * 0.5,
            ),
            modules,
            tasks: crate::tasks::TaskQueue::new(),
            counters: Counters::default(),
            produced_total: vec![0.0; content.resources.len()],
            readings: SubsystemReadings::new(),
            log: crate::logbuf::LogBuffer::new(c.log_capacity),
            metrics: Vec::new(),
            last_metric_time: 0.0,
            last_progress_time: 0.0,
            completed_log: VecDeque::new(),
        }
    }

    pub fn produced(&self, resource: ResourceId) -> Quantity {
        self.produced_total[resource.0 as usize]
    }

    pub fn record_production(&mut self, resource: ResourceId, quantity: Quantity) {
        self.produced_total[resource.0 as usize] += quantity;
    }

    /// Count of completed tasks with the given output, for the learning curve.
    pub fn completions_of(&self, resource: ResourceId) -> u32 {
        self.tasks.completions_of(resource)
    }
}
