//! Compile a parsed spec document into the core's immutable registries,
//! the initial state, and (for `--modular` runs) the subsystem set.
//!
//! All reference and range validation happens here so every failure can
//! carry the offending field path.

use crate::document::{ConstraintsSpec, SpecDocument};
use factory_core::subsystems::{
    ContaminationControl, Orchestrator, SoftwareProduction, ThermalManagement, TransportSystem,
    WasteRecycling,
};
use factory_core::{
    Constants, FactoryContent, FactoryState, Features, ModuleTable, ModuleTypeDef, Recipe,
    Resolver, ResourceDef, ResourceId, ResourceTable, SimulationError,
};
use std::collections::HashMap;

pub const MAX_RESOURCES: usize = 5000;
pub const MAX_RECIPES: usize = 10_000;
pub const MAX_MODULE_TYPES: usize = 1000;

/// Resources named `<type>_module` create an instance of module type
/// `<type>` when produced.
const MODULE_PRODUCT_SUFFIX: &str = "_module";

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> SimulationError {
    SimulationError::InvalidConfiguration {
        field: field.into(),
        reason: reason.into(),
    }
}

fn check_fraction(field: &str, value: f64) -> Result<(), SimulationError> {
    if !(0.0..=1.0).contains(&value) || !value.is_finite() {
        return Err(invalid(field, format!("must be within [0, 1], got {value}")));
    }
    Ok(())
}

fn check_positive(field: &str, value: f64) -> Result<(), SimulationError> {
    if !(value > 0.0) || !value.is_finite() {
        return Err(invalid(field, format!("must be > 0, got {value}")));
    }
    Ok(())
}

fn check_non_negative(field: &str, value: f64) -> Result<(), SimulationError> {
    if value < 0.0 || !value.is_finite() {
        return Err(invalid(field, format!("must be ≥ 0, got {value}")));
    }
    Ok(())
}

fn check_finite(field: &str, value: f64) -> Result<(), SimulationError> {
    if !value.is_finite() {
        return Err(invalid(field, format!("must be finite, got {value}")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Constants and features
// ---------------------------------------------------------------------------

fn build_constants(c: &ConstraintsSpec) -> Result<Constants, SimulationError> {
    check_non_negative("constraints.solar_capacity_kw", c.solar_capacity_kw)?;
    check_positive("constraints.battery_capacity_kwh", c.battery_capacity_kwh)?;
    check_fraction("constraints.battery_efficiency", c.battery_efficiency)?;
    if let Some(eff) = c.charge_efficiency {
        check_fraction("constraints.charge_efficiency", eff)?;
    }
    if let Some(eff) = c.discharge_efficiency {
        check_fraction("constraints.discharge_efficiency", eff)?;
    }
    check_fraction(
        "constraints.battery_reserve_fraction",
        c.battery_reserve_fraction,
    )?;
    check_positive("constraints.peak_sun_hours", c.peak_sun_hours)?;
    check_finite("constraints.latitude", c.latitude)?;
    check_fraction("constraints.average_cloud_cover", c.average_cloud_cover)?;
    if c.parallel_processing_limit < 1 {
        return Err(invalid(
            "constraints.parallel_processing_limit",
            "must be ≥ 1",
        ));
    }
    if !(0.0 < c.learning_curve_factor && c.learning_curve_factor <= 1.0) {
        return Err(invalid(
            "constraints.learning_curve_factor",
            format!("must be within (0, 1], got {}", c.learning_curve_factor),
        ));
    }
    if c.learning_batch_size < 1 {
        return Err(invalid("constraints.learning_batch_size", "must be ≥ 1"));
    }
    check_positive(
        "constraints.dependency_buffer_factor",
        c.dependency_buffer_factor,
    )?;
    if c.max_task_starts_per_tick < 1 {
        return Err(invalid(
            "constraints.max_task_starts_per_tick",
            "must be ≥ 1",
        ));
    }
    check_positive("constraints.dt_hours", c.dt_hours)?;
    check_positive(
        "constraints.maintenance_duration_hours",
        c.maintenance_duration_hours,
    )?;
    check_positive("constraints.repair_duration_hours", c.repair_duration_hours)?;
    check_fraction(
        "constraints.maintenance_wear_recovery",
        c.maintenance_wear_recovery,
    )?;
    check_non_negative("constraints.failure_wear_weight", c.failure_wear_weight)?;
    check_fraction("constraints.quality_floor", c.quality_floor)?;
    check_fraction("constraints.quality_variation", c.quality_variation)?;
    check_fraction("constraints.min_module_efficiency", c.min_module_efficiency)?;
    check_positive("constraints.max_storage_volume_m3", c.max_storage_volume_m3)?;
    check_positive("constraints.max_storage_weight_t", c.max_storage_weight_t)?;
    check_non_negative(
        "constraints.transport_power_kw_per_active",
        c.transport_power_kw_per_active,
    )?;
    check_positive("constraints.transport_base_hours", c.transport_base_hours)?;
    check_positive(
        "constraints.thermal_dissipation_limit_kw",
        c.thermal_dissipation_limit_kw,
    )?;
    check_positive("constraints.cooling_cop", c.cooling_cop)?;
    check_finite("constraints.ambient_temperature", c.ambient_temperature)?;
    check_positive(
        "constraints.cleanroom_cleaning_interval_hours",
        c.cleanroom_cleaning_interval_hours,
    )?;
    check_non_negative(
        "constraints.contamination_particles_per_slot_hour",
        c.contamination_particles_per_slot_hour,
    )?;
    check_fraction(
        "constraints.waste_recycling_efficiency",
        c.waste_recycling_efficiency,
    )?;
    check_fraction(
        "constraints.initial_software_bug_rate",
        c.initial_software_bug_rate,
    )?;
    check_positive("constraints.metric_interval_hours", c.metric_interval_hours)?;
    check_positive(
        "constraints.progress_interval_hours",
        c.progress_interval_hours,
    )?;
    check_positive("constraints.max_hours", c.max_hours)?;
    check_positive("constraints.max_wall_time_seconds", c.max_wall_time_seconds)?;

    Ok(Constants {
        dt_hours: c.dt_hours,
        max_task_starts_per_tick: c.max_task_starts_per_tick,
        solar_capacity_kw: c.solar_capacity_kw,
        battery_capacity_kwh: c.battery_capacity_kwh,
        battery_reserve_fraction: c.battery_reserve_fraction,
        charge_efficiency: c.charge_efficiency.unwrap_or(c.battery_efficiency),
        discharge_efficiency: c.discharge_efficiency.unwrap_or(c.battery_efficiency),
        peak_sun_hours: c.peak_sun_hours,
        latitude_deg: c.latitude,
        average_cloud_cover: c.average_cloud_cover,
        parallel_processing_limit: c.parallel_processing_limit,
        learning_curve_factor: c.learning_curve_factor,
        learning_batch_size: c.learning_batch_size,
        dependency_buffer_factor: c.dependency_buffer_factor,
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
        ambient_temperature_c: c.ambient_temperature,
        cleanroom_cleaning_interval_hours: c.cleanroom_cleaning_interval_hours,
        contamination_particles_per_slot_hour: c.contamination_particles_per_slot_hour,
        waste_recycling_efficiency: c.waste_recycling_efficiency,
        initial_software_bug_rate: c.initial_software_bug_rate,
        metric_interval_hours: c.metric_interval_hours,
        progress_interval_hours: c.progress_interval_hours,
        max_hours: c.max_hours,
        max_wall_time_seconds: c.max_wall_time_seconds,
        ..Constants::default()
    })
}

fn build_features(c: &ConstraintsSpec) -> Features {
    Features {
        degradation: c.enable_degradation,
        weather: c.enable_weather,
        maintenance: c.enable_maintenance,
        storage_limits: c.enable_storage_limits,
        batch_processing: c.enable_batch_processing,
        transport_time: c.enable_transport_time,
        contamination: c.enable_contamination,
        thermal_management: c.enable_thermal_management,
        software_production: c.enable_software_production,
        waste_recycling: c.enable_waste_recycling,
        quality_control: c.enable_quality_control,
    }
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

pub fn build_content(doc: &SpecDocument) -> Result<FactoryContent, SimulationError> {
    if doc.resources.is_empty() {
        return Err(invalid("resources", "at least one resource is required"));
    }
    if doc.resources.len() > MAX_RESOURCES {
        return Err(invalid(
            "resources",
            format!("{} resources exceed the cap of {MAX_RESOURCES}", doc.resources.len()),
        ));
    }
    if doc.recipes.len() > MAX_RECIPES {
        return Err(invalid(
            "recipes",
            format!("{} recipes exceed the cap of {MAX_RECIPES}", doc.recipes.len()),
        ));
    }
    if doc.modules.is_empty() {
        return Err(invalid("modules", "at least one module type is required"));
    }
    if doc.modules.len() > MAX_MODULE_TYPES {
        return Err(invalid(
            "modules",
            format!("{} module types exceed the cap of {MAX_MODULE_TYPES}", doc.modules.len()),
        ));
    }

    let constants = build_constants(&doc.constraints)?;
    let features = build_features(&doc.constraints);

    // Resource table. BTreeMap order makes id assignment deterministic.
    let mut resource_defs = Vec::with_capacity(doc.resources.len());
    for (name, spec) in &doc.resources {
        let field = |leaf: &str| format!("resources.{name}.{leaf}");
        if !spec.software {
            check_positive(&field("density"), spec.density)?;
        }
        check_finite(&field("storage_temp"), spec.storage_temp)?;
        check_fraction(
            &field("contamination_sensitivity"),
            spec.contamination_sensitivity,
        )?;
        check_non_negative(&field("volume_per_unit"), spec.volume_per_unit)?;
        resource_defs.push(ResourceDef {
            name: name.clone(),
            density_t_per_m3: spec.density,
            storage_temp_c: spec.storage_temp,
            contamination_sensitivity: spec.contamination_sensitivity,
            hazardous: spec.hazardous,
            recyclable: spec.recyclable,
            volume_per_unit_m3: spec.volume_per_unit,
            software: spec.software,
        });
    }
    let resources = ResourceTable::new(resource_defs);

    // Module table.
    let mut module_defs = Vec::with_capacity(doc.modules.len());
    for (name, spec) in &doc.modules {
        let field = |leaf: &str| format!("modules.{name}.{leaf}");
        check_positive(&field("max_throughput"), spec.max_throughput)?;
        check_non_negative(&field("power_consumption_idle"), spec.power_consumption_idle)?;
        check_non_negative(
            &field("power_consumption_active"),
            spec.power_consumption_active,
        )?;
        check_positive(&field("mtbf_hours"), spec.mtbf_hours)?;
        check_positive(&field("maintenance_interval"), spec.maintenance_interval)?;
        check_non_negative(&field("degradation_rate"), spec.degradation_rate)?;
        check_positive(&field("max_batch_size"), spec.max_batch_size)?;
        check_positive(&field("min_batch_size"), spec.min_batch_size)?;
        if spec.min_batch_size > spec.max_batch_size {
            return Err(invalid(
                field("min_batch_size"),
                "must not exceed max_batch_size",
            ));
        }
        check_non_negative(&field("setup_time"), spec.setup_time)?;
        check_fraction(&field("quality_base_rate"), spec.quality_base_rate)?;
        let parallel_limit = spec
            .parallel_limit
            .unwrap_or(constants.parallel_processing_limit);
        if parallel_limit < 1 {
            return Err(invalid(field("parallel_limit"), "must be ≥ 1"));
        }
        module_defs.push(ModuleTypeDef {
            name: name.clone(),
            max_throughput: spec.max_throughput,
            power_idle_kw: spec.power_consumption_idle,
            power_active_kw: spec.power_consumption_active,
            mtbf_hours: spec.mtbf_hours,
            maintenance_interval_hours: spec.maintenance_interval,
            degradation_rate: spec.degradation_rate,
            max_batch_size: spec.max_batch_size,
            min_batch_size: spec.min_batch_size,
            setup_time_hours: spec.setup_time,
            quality_base_rate: spec.quality_base_rate,
            tolerance_capability_um: spec.tolerance_capability,
            cleanroom_capable: spec.cleanroom_capable,
            parallel_limit,
            heat_output_kw: spec
                .heat_output_kw
                .unwrap_or(spec.power_consumption_active * 0.5),
        });
    }
    let module_types = ModuleTable::new(module_defs);

    // Recipes: resolve names to ids, reject dangling references.
    let mut recipes = Vec::with_capacity(doc.recipes.len());
    for (idx, spec) in doc.recipes.iter().enumerate() {
        let field = |leaf: &str| format!("recipes[{idx}].{leaf}");
        let output = resources
            .id(&spec.output)
            .ok_or_else(|| invalid(field("output"), format!("unknown resource '{}'", spec.output)))?;
        check_positive(&field("output_quantity"), spec.output_quantity)?;
        check_non_negative(&field("energy_kwh"), spec.energy_kwh)?;
        check_positive(&field("time_hours"), spec.time_hours)?;
        let required_module = module_types.id(&spec.required_module).ok_or_else(|| {
            invalid(
                field("required_module"),
                format!("unknown module type '{}'", spec.required_module),
            )
        })?;
        let mut inputs = Vec::with_capacity(spec.inputs.len());
        for (input_name, qty) in &spec.inputs {
            let input = resources.id(input_name).ok_or_else(|| {
                invalid(
                    format!("recipes[{idx}].inputs.{input_name}"),
                    "unknown resource",
                )
            })?;
            check_non_negative(&format!("recipes[{idx}].inputs.{input_name}"), *qty)?;
            inputs.push((input, *qty));
        }
        inputs.sort_by_key(|&(id, _)| id);
        let software_required = match &spec.software_required {
            Some(name) => Some(resources.id(name).ok_or_else(|| {
                invalid(field("software_required"), format!("unknown resource '{name}'"))
            })?),
            None => None,
        };
        let mut waste_products = Vec::with_capacity(spec.waste_products.len());
        for (waste_name, qty) in &spec.waste_products {
            let waste = resources.id(waste_name).ok_or_else(|| {
                invalid(
                    format!("recipes[{idx}].waste_products.{waste_name}"),
                    "unknown resource",
                )
            })?;
            check_non_negative(&format!("recipes[{idx}].waste_products.{waste_name}"), *qty)?;
            waste_products.push((waste, *qty));
        }
        waste_products.sort_by_key(|&(id, _)| id);

        recipes.push(Recipe {
            output,
            output_quantity: spec.output_quantity,
            inputs,
            energy_kwh: spec.energy_kwh,
            time_hours: spec.time_hours,
            required_module,
            parallel_capable: spec.parallel_capable,
            tolerance_um: spec.tolerance_um,
            cleanroom_class: spec.cleanroom_class,
            software_required,
            waste_products,
        });
    }
    let recipe_registry = factory_core::recipes::RecipeRegistry::new(resources.len(), recipes)
        .map_err(|dup| {
            invalid(
                "recipes",
                format!("duplicate recipe for output '{}'", resources.name(dup)),
            )
        })?;

    // `*_module` resources map onto module types of the same stem.
    let mut module_products: HashMap<ResourceId, factory_core::ModuleTypeId> = HashMap::new();
    for id in resources.ids() {
        let name = resources.name(id);
        if let Some(stem) = name.strip_suffix(MODULE_PRODUCT_SUFFIX) {
            if let Some(module_type) = module_types.id(stem) {
                module_products.insert(id, module_type);
            }
        }
    }

    // Replication targets: explicit list, or every buildable module product.
    let targets: Vec<ResourceId> = if doc.target_modules.is_empty() {
        let mut defaults: Vec<ResourceId> = module_products
            .keys()
            .copied()
            .filter(|&id| recipe_registry.get(id).is_some())
            .collect();
        defaults.sort();
        defaults
    } else {
        let mut listed = Vec::with_capacity(doc.target_modules.len());
        for name in &doc.target_modules {
            let id = resources
                .id(name)
                .ok_or_else(|| invalid("target_modules", format!("unknown resource '{name}'")))?;
            listed.push(id);
        }
        listed
    };

    let content = FactoryContent {
        spec_name: doc.metadata.name.clone(),
        spec_version: doc.metadata.version.clone(),
        resources,
        recipes: recipe_registry,
        module_types,
        module_products,
        targets,
        constants,
        features,
    };

    // Every target must be reachable and the recipe graph acyclic — run the
    // resolver over each target at load time so cycles fail here, not mid-run.
    let mut resolver = Resolver::new(content.constants.resolver_cache_capacity);
    for &target in &content.targets {
        if content.recipes.get(target).is_none() {
            return Err(invalid(
                "target_modules",
                format!(
                    "target '{}' has no recipe",
                    content.resources.name(target)
                ),
            ));
        }
        resolver.total_requirements(&content, target, 1.0)?;
    }
    // Cycles may also lurk off the target paths; expand every recipe once.
    for recipe in content.recipes.iter() {
        resolver.total_requirements(&content, recipe.output, 1.0)?;
    }

    Ok(content)
}

// ---------------------------------------------------------------------------
// Initial state
// ---------------------------------------------------------------------------

pub fn build_state(
    doc: &SpecDocument,
    content: &FactoryContent,
    seed: u64,
) -> Result<FactoryState, SimulationError> {
    for name in doc.initial_state.modules.keys() {
        if content.module_types.id(name).is_none() {
            return Err(invalid(
                format!("initial_state.modules.{name}"),
                "unknown module type",
            ));
        }
    }

    let mut state = FactoryState::new(content, seed);

    // Seed module counts: declared types default to one instance each;
    // explicit counts replace that.
    let mut modules = factory_core::modules::ModuleRegistry::new(content.module_types.len());
    for module_type in content.module_types.ids() {
        let name = content.module_types.name(module_type);
        let count = doc
            .initial_state
            .modules
            .get(name)
            .copied()
            .unwrap_or(1);
        modules.add_instances(module_type, count);
    }
    state.modules = modules;

    for (name, qty) in &doc.initial_state.resources {
        let field = format!("initial_state.resources.{name}");
        let resource = content
            .resources
            .id(name)
            .ok_or_else(|| invalid(field.clone(), "unknown resource"))?;
        check_non_negative(&field, *qty)?;
        state
            .storage
            .reserve(&content.resources, resource, *qty)
            .map_err(|rejection| invalid(field.clone(), rejection.label()))?;
    }

    if let Some(battery) = doc.initial_state.battery_kwh {
        let field = "initial_state.battery_kwh";
        check_non_negative(field, battery)?;
        if battery > content.constants.battery_capacity_kwh {
            return Err(invalid(field, "exceeds battery capacity"));
        }
        state.energy = factory_core::energy::EnergyState::new(
            content.constants.solar_capacity_kw,
            content.constants.battery_capacity_kwh,
            battery,
        );
    }

    Ok(state)
}

// ---------------------------------------------------------------------------
// Modular subsystem instantiation
// ---------------------------------------------------------------------------

/// Build the subsystem set from `subsystem_implementations`, handing each
/// implementation its `subsystem_data` block.
pub fn build_orchestrator(doc: &SpecDocument) -> Result<Orchestrator, SimulationError> {
    let mut orchestrator = Orchestrator::new(true);
    for (name, tag) in &doc.subsystem_implementations {
        let data = doc
            .subsystem_data
            .get(tag)
            .or_else(|| doc.subsystem_data.get(name));
        let f64_field = |leaf: &str| data.and_then(|d| d.get(leaf)).and_then(|v| v.as_f64());
        let u32_field = |leaf: &str| {
            data.and_then(|d| d.get(leaf))
                .and_then(|v| v.as_u64())
                .and_then(|v| u32::try_from(v).ok())
        };
        match tag.as_str() {
            "thermal" => orchestrator.register(Box::new(ThermalManagement::with_overrides(
                f64_field("dissipation_limit_kw"),
                f64_field("cooling_cop"),
            ))),
            "waste_recycling" => orchestrator.register(Box::new(WasteRecycling::new())),
            "software_production" => orchestrator.register(Box::new(SoftwareProduction::new())),
            "contamination" => orchestrator.register(Box::new(ContaminationControl::new())),
            "transport" => orchestrator.register(Box::new(TransportSystem::with_overrides(
                u32_field("fleet_size"),
                f64_field("base_hours"),
            ))),
            other => {
                return Err(invalid(
                    format!("subsystem_implementations.{name}"),
                    format!("unknown implementation tag '{other}'"),
                ))
            }
        }
    }
    Ok(orchestrator)
}
