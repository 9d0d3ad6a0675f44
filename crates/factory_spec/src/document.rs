//! Raw specification document model.
//!
//! Mirrors the JSON spec format: `metadata`, `resources`, `recipes` (or
//! `recipes_file`), `modules`, `initial_state`, `constraints`, `subsystems`,
//! `profiles`, `subsystem_implementations`, `subsystem_data`,
//! `target_modules`. Every field has a default so partial specs (and
//! inheritance fragments) parse cleanly; range validation happens in the
//! build step where field paths can be attached to errors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Relative or absolute path of a parent spec to inherit from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSpec {
    /// tons/m³
    pub density: f64,
    pub storage_temp: f64,
    pub contamination_sensitivity: f64,
    pub hazardous: bool,
    pub recyclable: bool,
    /// m³ per unit
    pub volume_per_unit: f64,
    pub software: bool,
    pub description: String,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            density: 1.0,
            storage_temp: 25.0,
            contamination_sensitivity: 0.5,
            hazardous: false,
            recyclable: true,
            volume_per_unit: 0.001,
            software: false,
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeSpec {
    pub output: String,
    pub output_quantity: f64,
    #[serde(default)]
    pub inputs: BTreeMap<String, f64>,
    pub energy_kwh: f64,
    pub time_hours: f64,
    pub required_module: String,
    #[serde(default = "default_true")]
    pub parallel_capable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance_um: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanroom_class: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_required: Option<String>,
    #[serde(default)]
    pub waste_products: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleSpec {
    pub max_throughput: f64,
    pub power_consumption_idle: f64,
    pub power_consumption_active: f64,
    pub mtbf_hours: f64,
    pub maintenance_interval: f64,
    pub degradation_rate: f64,
    pub max_batch_size: f64,
    pub min_batch_size: f64,
    pub setup_time: f64,
    pub quality_base_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerance_capability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanroom_capable: Option<u32>,
    /// Slots per instance; the global `parallel_processing_limit` applies
    /// when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_limit: Option<u32>,
    /// Heat dumped per active slot; defaults to half the active draw.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heat_output_kw: Option<f64>,
}

impl Default for ModuleSpec {
    fn default() -> Self {
        Self {
            max_throughput: 100.0,
            power_consumption_idle: 0.5,
            power_consumption_active: 10.0,
            mtbf_hours: 5000.0,
            maintenance_interval: 500.0,
            degradation_rate: 0.02,
            max_batch_size: 100.0,
            min_batch_size: 1.0,
            setup_time: 0.0,
            quality_base_rate: 0.95,
            tolerance_capability: None,
            cleanroom_capable: None,
            parallel_limit: None,
            heat_output_kw: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialState {
    /// Seed instance counts per module type; unlisted types default to 1.
    pub modules: BTreeMap<String, u32>,
    /// Starting inventory by resource name.
    pub resources: BTreeMap<String, f64>,
    /// Starting battery charge; half of capacity when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_kwh: Option<f64>,
}

/// The numeric knobs and feature toggles. Field names follow the external
/// spec format; aliases cover the original configuration's spellings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintsSpec {
    #[serde(alias = "initial_solar_capacity_kw")]
    pub solar_capacity_kw: f64,
    pub battery_capacity_kwh: f64,
    /// Applied to both charge and discharge unless overridden below.
    pub battery_efficiency: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_efficiency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discharge_efficiency: Option<f64>,
    pub battery_reserve_fraction: f64,
    pub peak_sun_hours: f64,
    #[serde(alias = "latitude_deg")]
    pub latitude: f64,
    #[serde(alias = "cloud_cover")]
    pub average_cloud_cover: f64,

    pub parallel_processing_limit: u32,
    pub learning_curve_factor: f64,
    pub learning_batch_size: u32,
    pub dependency_buffer_factor: f64,
    pub max_task_starts_per_tick: u32,
    pub dt_hours: f64,

    pub maintenance_duration_hours: f64,
    pub repair_duration_hours: f64,
    pub maintenance_wear_recovery: f64,
    pub failure_wear_weight: f64,

    pub quality_floor: f64,
    pub quality_variation: f64,
    pub min_module_efficiency: f64,

    pub max_storage_volume_m3: f64,
    #[serde(alias = "max_storage_weight_tons")]
    pub max_storage_weight_t: f64,

    #[serde(alias = "agv_power_kw")]
    pub transport_power_kw_per_active: f64,
    #[serde(alias = "agv_fleet_size")]
    pub max_concurrent_transports: u32,
    pub transport_base_hours: f64,

    pub thermal_dissipation_limit_kw: f64,
    pub cooling_cop: f64,
    pub ambient_temperature: f64,

    pub cleanroom_cleaning_interval_hours: f64,
    pub contamination_particles_per_slot_hour: f64,
    pub waste_recycling_efficiency: f64,
    pub initial_software_bug_rate: f64,

    pub metric_interval_hours: f64,
    pub progress_interval_hours: f64,
    pub max_hours: f64,
    pub max_wall_time_seconds: f64,

    // Feature toggles.
    pub enable_degradation: bool,
    pub enable_weather: bool,
    pub enable_maintenance: bool,
    pub enable_storage_limits: bool,
    pub enable_batch_processing: bool,
    pub enable_transport_time: bool,
    pub enable_contamination: bool,
    pub enable_thermal_management: bool,
    pub enable_software_production: bool,
    pub enable_waste_recycling: bool,
    pub enable_quality_control: bool,
}

impl Default for ConstraintsSpec {
    fn default() -> Self {
        let c = factory_core::Constants::default();
        Self {
            solar_capacity_kw: c.solar_capacity_kw,
            battery_capacity_kwh: c.battery_capacity_kwh,
            battery_efficiency: c.charge_efficiency,
            charge_efficiency: None,
            discharge_efficiency: None,
            battery_reserve_fraction: c.battery_reserve_fraction,
            peak_sun_hours: c.peak_sun_hours,
            latitude: c.latitude_deg,
            average_cloud_cover: c.average_cloud_cover,
            parallel_processing_limit: c.parallel_processing_limit,
            learning_curve_factor: c.learning_curve_factor,
            learning_batch_size: c.learning_batch_size,
            dependency_buffer_factor: c.dependency_buffer_factor,
            max_task_starts_per_tick: c.max_task_starts_per_tick,
            dt_hours: c.dt_hours,
            maintenance_duration_hours: c.maintenance_duration_hours,
            repair_duration_hours: c.repair_duration_hours,
            maintenance_wear_recovery: c.maintenance_wear_recovery,
            failure_wear_weight: c.failure_wear_weight,
            quality_floor: c.quality_floor,
            quality_variation: c.quality_variation,
            min_module_efficiency: c.min_module_efficiency,
            max_storage_volume_m3: c.max_storage_volume_m3,
            max_storage_weight_t: c.max_storage_weight_t,
            transport_power_kw_per_active: c.transport_power_kw_per_active,
            max_concurrent_transports: c.max_concurrent_transports,
            transport_base_hours: c.transport_base_hours,
            thermal_dissipation_limit_kw: c.thermal_dissipation_limit_kw,
            cooling_cop: c.cooling_cop,
            ambient_temperature: c.ambient_temperature_c,
            cleanroom_cleaning_interval_hours: c.cleanroom_cleaning_interval_hours,
            contamination_particles_per_slot_hour: c.contamination_particles_per_slot_hour,
            waste_recycling_efficiency: c.waste_recycling_efficiency,
            initial_software_bug_rate: c.initial_software_bug_rate,
            metric_interval_hours: c.metric_interval_hours,
            progress_interval_hours: c.progress_interval_hours,
            max_hours: c.max_hours,
            max_wall_time_seconds: c.max_wall_time_seconds,
            enable_degradation: true,
            enable_weather: true,
            enable_maintenance: true,
            enable_storage_limits: true,
            enable_batch_processing: true,
            enable_transport_time: true,
            enable_contamination: true,
            enable_thermal_management: true,
            enable_software_production: true,
            enable_waste_recycling: true,
            enable_quality_control: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecDocument {
    pub metadata: Metadata,
    pub resources: BTreeMap<String, ResourceSpec>,
    pub recipes: Vec<RecipeSpec>,
    pub modules: BTreeMap<String, ModuleSpec>,
    pub initial_state: InitialState,
    pub constraints: ConstraintsSpec,
    /// Per-subsystem enable/config blocks, echoed into the report.
    pub subsystems: BTreeMap<String, serde_json::Value>,
    pub profiles: BTreeMap<String, serde_json::Value>,
    /// Subsystem name → implementation tag (used with `--modular`).
    pub subsystem_implementations: BTreeMap<String, String>,
    /// Implementation tag → parameter block.
    pub subsystem_data: BTreeMap<String, serde_json::Value>,
    /// Resource names forming the replication goal; defaults to every
    /// `*_module` resource with a recipe.
    pub target_modules: Vec<String>,
}

fn default_true() -> bool {
    true
}
