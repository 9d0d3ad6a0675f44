//! factory_spec — loading, validation, and compilation of factory
//! specification documents into the core's registries and initial state.

pub mod build;
pub mod document;
pub mod loader;

pub use build::{build_content, build_orchestrator, build_state};
pub use document::SpecDocument;
pub use loader::{deep_merge, ResolvedSpec, SpecLoader, MAX_INHERITANCE_DEPTH, MAX_SPEC_BYTES};

use anyhow::Result;
use factory_core::Simulation;
use std::path::Path;

/// One-call path from a spec file to a ready simulation: load (with profile
/// applied), validate, build registries and initial state, wire the engine,
/// and attach the resolved config echo for the report.
pub fn load_simulation(
    spec_path: &Path,
    profile: Option<&str>,
    seed: u64,
    modular: bool,
) -> Result<Simulation> {
    let loader = SpecLoader::new(spec_path)?;
    let resolved = loader.load(spec_path, profile)?;
    let content = build_content(&resolved.document)?;
    tracing::info!(
        spec = %spec_path.display(),
        resources = content.resources.len(),
        recipes = content.recipes.len(),
        module_types = content.module_types.len(),
        targets = content.targets.len(),
        "spec loaded"
    );
    let state = build_state(&resolved.document, &content, seed)?;
    let mut sim = Simulation::new(content, state)?.with_config_echo(resolved.resolved.clone());
    if modular && !resolved.document.subsystem_implementations.is_empty() {
        let orchestrator = build_orchestrator(&resolved.document)?;
        sim = sim.with_orchestrator(orchestrator)?;
    }
    Ok(sim)
}
