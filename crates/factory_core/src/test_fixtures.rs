//! Shared test fixtures for factory_core and downstream crates.
//!
//! `base_content()` is a small two-resource factory with an assembly module,
//! fast enough for unit tests. `replication_content()` is a compressed
//! four-module self-replication scenario for integration tests. The other
//! fixtures cover specific shapes (chains, cycles, cleanrooms).

use crate::recipes::RecipeRegistry;
use crate::{
    Constants, Event, EventEnvelope, EventId, FactoryContent, Features, ModuleTable,
    ModuleTypeDef, ModuleTypeId, Quantity, Recipe, ResourceDef, ResourceId, ResourceTable,
    FactoryState,
};
use std::collections::HashMap;

pub fn resource(name: &str) -> ResourceDef {
    ResourceDef {
        name: name.to_string(),
        density_t_per_m3: 2.0,
        storage_temp_c: 25.0,
        contamination_sensitivity: 0.1,
        hazardous: false,
        recyclable: true,
        volume_per_unit_m3: 0.01,
        software: false,
    }
}

pub fn software_resource(name: &str) -> ResourceDef {
    ResourceDef {
        name: name.to_string(),
        density_t_per_m3: 0.0,
        storage_temp_c: 25.0,
        contamination_sensitivity: 0.0,
        hazardous: false,
        recyclable: false,
        volume_per_unit_m3: 0.0,
        software: true,
    }
}

pub fn module_type(name: &str) -> ModuleTypeDef {
    ModuleTypeDef {
        name: name.to_string(),
        max_throughput: 100.0,
        power_idle_kw: 0.5,
        power_active_kw: 10.0,
        // Effectively no failures/maintenance unless a test asks for them.
        mtbf_hours: 1e12,
        maintenance_interval_hours: 1e12,
        degradation_rate: 0.0,
        max_batch_size: 1000.0,
        min_batch_size: 1.0,
        setup_time_hours: 0.0,
        quality_base_rate: 1.0,
        tolerance_capability_um: None,
        cleanroom_capable: None,
        parallel_limit: 2,
        heat_output_kw: 5.0,
    }
}

pub fn recipe(
    output: ResourceId,
    output_quantity: Quantity,
    inputs: Vec<(ResourceId, Quantity)>,
    energy_kwh: f64,
    time_hours: f64,
    required_module: ModuleTypeId,
) -> Recipe {
    Recipe {
        output,
        output_quantity,
        inputs,
        energy_kwh,
        time_hours,
        required_module,
        parallel_capable: true,
        tolerance_um: None,
        cleanroom_class: None,
        software_required: None,
        waste_products: vec![],
    }
}

fn content_from(
    resources: Vec<ResourceDef>,
    module_types: Vec<ModuleTypeDef>,
    recipes: Vec<Recipe>,
    targets: Vec<ResourceId>,
    module_products: HashMap<ResourceId, ModuleTypeId>,
) -> FactoryContent {
    let resources = ResourceTable::new(resources);
    let recipe_registry = RecipeRegistry::new(resources.len(), recipes).expect("fixture recipes");
    FactoryContent {
        spec_name: "test".to_string(),
        spec_version: "0".to_string(),
        recipes: recipe_registry,
        resources,
        module_types: ModuleTable::new(module_types),
        module_products,
        targets,
        constants: test_constants(),
        features: Features::default(),
    }
}

/// Compressed durations, generous storage, deterministic quality.
pub fn test_constants() -> Constants {
    Constants {
        quality_variation: 0.0,
        average_cloud_cover: 0.0,
        ..Constants::default()
    }
}

/// Resources {iron_ore, steel, plc_program}, module {assembly},
/// recipe: 2 iron_ore → 1 steel @ 1 kWh / 1 h on assembly.
pub fn base_content() -> FactoryContent {
    let defs = vec![
        resource("iron_ore"),
        resource("steel"),
        software_resource("plc_program"),
    ];
    let iron_ore = ResourceId(0);
    let steel = ResourceId(1);
    let assembly = ModuleTypeId(0);
    content_from(
        defs,
        vec![module_type("assembly")],
        vec![recipe(steel, 1.0, vec![(iron_ore, 2.0)], 1.0, 1.0, assembly)],
        vec![],
        HashMap::new(),
    )
}

/// alpha (raw leaf) → beta → gamma, all on assembly.
pub fn chain_content() -> FactoryContent {
    let defs = vec![resource("alpha"), resource("beta"), resource("gamma")];
    let alpha = ResourceId(0);
    let beta = ResourceId(1);
    let gamma = ResourceId(2);
    let assembly = ModuleTypeId(0);
    content_from(
        defs,
        vec![module_type("assembly")],
        vec![
            recipe(beta, 1.0, vec![(alpha, 1.0)], 1.0, 1.0, assembly),
            recipe(gamma, 1.0, vec![(beta, 1.0)], 1.0, 1.0, assembly),
        ],
        vec![],
        HashMap::new(),
    )
}

/// ouro_a ← ouro_b ← ouro_a: the canonical recipe cycle.
pub fn cyclic_content() -> FactoryContent {
    let defs = vec![resource("ouro_a"), resource("ouro_b")];
    let a = ResourceId(0);
    let b = ResourceId(1);
    let assembly = ModuleTypeId(0);
    content_from(
        defs,
        vec![module_type("assembly")],
        vec![
            recipe(a, 1.0, vec![(b, 1.0)], 1.0, 1.0, assembly),
            recipe(b, 1.0, vec![(a, 1.0)], 1.0, 1.0, assembly),
        ],
        vec![],
        HashMap::new(),
    )
}

/// Adds a class-100 cleanroom module type and a wafer recipe requiring it.
pub fn cleanroom_content() -> FactoryContent {
    let defs = vec![resource("pure_silicon"), resource("silicon_wafer")];
    let silicon = ResourceId(0);
    let wafer = ResourceId(1);
    let cleanroom = ModuleTypeId(1);
    let mut cleanroom_def = module_type("cleanroom");
    cleanroom_def.cleanroom_capable = Some(100);
    let mut wafer_recipe = recipe(wafer, 1.0, vec![(silicon, 1.0)], 1.0, 0.5, cleanroom);
    wafer_recipe.cleanroom_class = Some(100);
    content_from(
        defs,
        vec![module_type("assembly"), cleanroom_def],
        vec![wafer_recipe],
        vec![],
        HashMap::new(),
    )
}

/// Minimal self-replication scenario: four module types {mining, refining,
/// electronics, assembly} and one `*_module` product resource for each,
/// built from a two-level material chain rooted in mined ore.
pub fn replication_content() -> FactoryContent {
    let defs = vec![
        resource("ore"),              // 0 — mined leaf with an empty-input recipe
        resource("metal"),            // 1
        resource("circuit"),          // 2
        resource("mining_module"),    // 3
        resource("refining_module"),  // 4
        resource("electronics_module"), // 5
        resource("assembly_module"),  // 6
    ];
    let ore = ResourceId(0);
    let metal = ResourceId(1);
    let circuit = ResourceId(2);
    let mining_module = ResourceId(3);
    let refining_module = ResourceId(4);
    let electronics_module = ResourceId(5);
    let assembly_module = ResourceId(6);

    let mining = ModuleTypeId(0);
    let refining = ModuleTypeId(1);
    let electronics = ModuleTypeId(2);
    let assembly = ModuleTypeId(3);

    let recipes = vec![
        // Extraction: no inputs, just time and energy on the mining module.
        recipe(ore, 10.0, vec![], 2.0, 0.5, mining),
        recipe(metal, 5.0, vec![(ore, 10.0)], 3.0, 0.5, refining),
        recipe(circuit, 2.0, vec![(metal, 1.0)], 2.0, 0.5, electronics),
        recipe(
            mining_module,
            1.0,
            vec![(metal, 4.0), (circuit, 1.0)],
            5.0,
            1.0,
            assembly,
        ),
        recipe(
            refining_module,
            1.0,
            vec![(metal, 5.0), (circuit, 1.0)],
            5.0,
            1.0,
            assembly,
        ),
        recipe(
            electronics_module,
            1.0,
            vec![(metal, 2.0), (circuit, 2.0)],
            5.0,
            1.0,
            assembly,
        ),
        recipe(
            assembly_module,
            1.0,
            vec![(metal, 6.0), (circuit, 1.0)],
            6.0,
            1.0,
            assembly,
        ),
    ];

    let module_products = HashMap::from([
        (mining_module, mining),
        (refining_module, refining),
        (electronics_module, electronics),
        (assembly_module, assembly),
    ]);

    let mut content = content_from(
        defs,
        vec![
            module_type("mining"),
            module_type("refining"),
            module_type("electronics"),
            module_type("assembly"),
        ],
        recipes,
        vec![
            mining_module,
            refining_module,
            electronics_module,
            assembly_module,
        ],
        module_products,
    );
    // Plenty of sun and battery so the compressed scenario is not
    // energy-bound; weather off for determinism of completion bounds.
    content.constants.solar_capacity_kw = 500.0;
    content.features.weather = false;
    content
}

/// One seed instance per module type, empty storage, battery at 50%.
pub fn base_state(content: &FactoryContent) -> FactoryState {
    FactoryState::new(content, 42)
}

/// Wrap a bare event for handler tests.
pub fn envelope_for(event: Event) -> EventEnvelope {
    EventEnvelope {
        id: EventId("evt_test".to_string()),
        tick: 0,
        time_hours: 0.0,
        event,
    }
}
