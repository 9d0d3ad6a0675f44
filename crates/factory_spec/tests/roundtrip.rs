//! Loader round-trip and spec-driven end-to-end checks.

use factory_core::engine::{RunLimits, TerminationReason};
use factory_spec::{load_simulation, SpecLoader};
use serde_json::json;
use std::path::PathBuf;

fn write_spec(name: &str, value: &serde_json::Value) -> PathBuf {
    let dir = std::env::temp_dir().join("factory_spec_roundtrip_tests");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

fn replication_spec() -> serde_json::Value {
    json!({
        "metadata": {"name": "minimal_replication", "version": "1"},
        "resources": {
            "ore": {"density": 3.0, "volume_per_unit": 0.01},
            "metal": {"density": 7.8, "volume_per_unit": 0.005},
            "circuit": {"density": 0.5, "volume_per_unit": 0.002},
            "mining_module": {"density": 2.0, "volume_per_unit": 1.0},
            "refining_module": {"density": 2.0, "volume_per_unit": 1.0},
            "electronics_module": {"density": 2.0, "volume_per_unit": 1.0},
            "assembly_module": {"density": 2.0, "volume_per_unit": 1.0}
        },
        "modules": {
            "mining": {"power_consumption_idle": 0.5},
            "refining": {"power_consumption_idle": 0.5},
            "electronics": {"power_consumption_idle": 0.5},
            "assembly": {"power_consumption_idle": 0.5}
        },
        "recipes": [
            {"output": "ore", "output_quantity": 10.0, "inputs": {},
             "energy_kwh": 2.0, "time_hours": 0.5, "required_module": "mining"},
            {"output": "metal", "output_quantity": 5.0, "inputs": {"ore": 10.0},
             "energy_kwh": 3.0, "time_hours": 0.5, "required_module": "refining"},
            {"output": "circuit", "output_quantity": 2.0, "inputs": {"metal": 1.0},
             "energy_kwh": 2.0, "time_hours": 0.5, "required_module": "electronics"},
            {"output": "mining_module", "output_quantity": 1.0,
             "inputs": {"metal": 4.0, "circuit": 1.0},
             "energy_kwh": 5.0, "time_hours": 1.0, "required_module": "assembly"},
            {"output": "refining_module", "output_quantity": 1.0,
             "inputs": {"metal": 5.0, "circuit": 1.0},
             "energy_kwh": 5.0, "time_hours": 1.0, "required_module": "assembly"},
            {"output": "electronics_module", "output_quantity": 1.0,
             "inputs": {"metal": 2.0, "circuit": 2.0},
             "energy_kwh": 5.0, "time_hours": 1.0, "required_module": "assembly"},
            {"output": "assembly_module", "output_quantity": 1.0,
             "inputs": {"metal": 6.0, "circuit": 1.0},
             "energy_kwh": 6.0, "time_hours": 1.0, "required_module": "assembly"}
        ],
        "constraints": {
            "solar_capacity_kw": 500.0,
            "quality_variation": 0.0,
            "enable_weather": false
        },
        "initial_state": {"battery_kwh": 800.0}
    })
}

#[test]
fn resolved_config_round_trips() {
    // Load → serialise the resolved config → load that → same resolved config.
    let path = write_spec("roundtrip_base.json", &replication_spec());
    let loader = SpecLoader::new(&path).unwrap();
    let first = loader.load(&path, None).unwrap();

    let reserialised = write_spec("roundtrip_resolved.json", &first.resolved);
    let second = loader.load(&reserialised, None).unwrap();

    assert_eq!(
        first.resolved, second.resolved,
        "resolved config must survive a serialise/parse cycle"
    );
    assert_eq!(
        serde_json::to_value(&first.document).unwrap(),
        serde_json::to_value(&second.document).unwrap()
    );
}

#[test]
fn spec_driven_factory_replicates() {
    let path = write_spec("e2e_replication.json", &replication_spec());
    let mut sim = load_simulation(&path, None, 42, false).unwrap();
    let report = sim
        .run(RunLimits {
            max_hours: 500.0,
            max_wall_time_seconds: 120.0,
        })
        .unwrap();

    assert_eq!(
        report.final_status.terminated_reason,
        TerminationReason::Replicated,
        "log tail: {:?}",
        report.log.iter().rev().take(5).collect::<Vec<_>>()
    );
    for (name, count) in &report.final_module_counts {
        assert!(*count >= 2, "{name} should have seed + produced instances");
    }
    assert!(
        !report.initial_requirements.is_empty(),
        "report carries the computed raw requirements"
    );
    assert_eq!(report.config["metadata"]["name"], "minimal_replication");
}

#[test]
fn modular_mode_uses_declared_implementations() {
    let mut spec = replication_spec();
    spec["subsystem_implementations"] = json!({
        "thermal": "thermal",
        "transport": "transport"
    });
    spec["subsystem_data"] = json!({
        "transport": {"fleet_size": 3, "base_hours": 0.2}
    });
    let path = write_spec("e2e_modular.json", &spec);
    let mut sim = load_simulation(&path, None, 42, true).unwrap();
    let report = sim
        .run(RunLimits {
            max_hours: 500.0,
            max_wall_time_seconds: 120.0,
        })
        .unwrap();
    assert_eq!(
        report.final_status.terminated_reason,
        TerminationReason::Replicated
    );
    // Fleet of 3 AGVs: the transport reading can never exceed it.
    assert!(report
        .metrics
        .iter()
        .all(|snapshot| snapshot.active_transports <= 3));
}

#[test]
fn inheritance_deeper_than_the_cap_is_rejected() {
    let dir = std::env::temp_dir().join("factory_spec_roundtrip_tests");
    std::fs::create_dir_all(&dir).unwrap();

    // A 12-deep parent chain: chain_00 → chain_01 → … → chain_12.
    let mut previous: Option<std::path::PathBuf> = None;
    for i in (0..=12).rev() {
        let path = dir.join(format!("chain_{i:02}.json"));
        let mut value = json!({"metadata": {"name": format!("chain_{i}")}});
        if let Some(parent) = &previous {
            value["metadata"]["parent"] = json!(parent.to_str().unwrap());
        }
        std::fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();
        previous = Some(path);
    }
    let leaf = previous.expect("chain built");

    let loader = SpecLoader::new(&leaf).unwrap();
    let err = loader.load(&leaf, None).unwrap_err();
    let sim_err = err
        .downcast_ref::<factory_core::SimulationError>()
        .expect("typed error expected");
    assert!(matches!(
        sim_err,
        factory_core::SimulationError::InvalidConfiguration { field, .. }
            if field == "metadata.parent"
    ));
}

#[test]
fn original_field_aliases_are_accepted() {
    let mut spec = replication_spec();
    spec["constraints"] = json!({
        "initial_solar_capacity_kw": 321.0,
        "max_storage_weight_tons": 4321.0,
        "enable_weather": false,
        "quality_variation": 0.0
    });
    let path = write_spec("e2e_aliases.json", &spec);
    let loader = SpecLoader::new(&path).unwrap();
    let resolved = loader.load(&path, None).unwrap();
    let content = factory_spec::build_content(&resolved.document).unwrap();
    assert!((content.constants.solar_capacity_kw - 321.0).abs() < 1e-9);
    assert!((content.constants.max_storage_weight_t - 4321.0).abs() < 1e-9);
}

#[test]
fn profile_changes_the_built_constants() {
    let mut spec = replication_spec();
    spec["profiles"] = json!({
        "overcast": {"constraints": {"average_cloud_cover": 0.9, "enable_weather": true}}
    });
    let path = write_spec("e2e_profiled.json", &spec);

    let loader = SpecLoader::new(&path).unwrap();
    let resolved = loader.load(&path, Some("overcast")).unwrap();
    let content = factory_spec::build_content(&resolved.document).unwrap();
    assert!((content.constants.average_cloud_cover - 0.9).abs() < 1e-9);
    assert!(content.features.weather);
}
