//! Optional subsystems: thermal, waste recycling, software production,
//! contamination, transport.
//!
//! Subsystems never touch engine state directly. Each tick they receive a
//! shallow read-only context snapshot, return proposal events, and observe
//! the world through bus events routed to `handle_event`. The orchestrator
//! computes a topological layering over declared dependencies once at init;
//! within a layer subsystems may run concurrently, with results folded back
//! in registration order so parallel and sequential execution match.

mod contamination;
mod software;
mod thermal;
mod transport;
mod waste;

pub use contamination::ContaminationControl;
pub use software::SoftwareProduction;
pub use thermal::ThermalManagement;
pub use transport::TransportSystem;
pub use waste::WasteRecycling;

use crate::{
    Event, EventEnvelope, EventKind, FactoryContent, FactoryState, Quantity, SimulationError,
};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

// ---------------------------------------------------------------------------
// Tick context snapshot
// ---------------------------------------------------------------------------

/// Per-module-type activity summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleActivity {
    pub instances: u32,
    pub running: u32,
    pub active_slots: u32,
}

/// Shallow snapshot handed to every subsystem each tick. Quantities are a
/// flat copy of the ledger; nothing here aliases engine state.
#[derive(Debug, Clone)]
pub struct TickContext {
    pub tick: u64,
    pub time_hours: f64,
    pub dt_hours: f64,
    pub storage_quantities: Vec<Quantity>,
    pub module_activity: Vec<ModuleActivity>,
    pub active_task_count: usize,
}

impl TickContext {
    pub fn snapshot(state: &FactoryState, content: &FactoryContent) -> Self {
        let module_activity = content
            .module_types
            .ids()
            .map(|id| ModuleActivity {
                instances: state.modules.count(id),
                running: state.modules.count_running(id),
                active_slots: state.modules.active_slots(id),
            })
            .collect();
        Self {
            tick: state.tick,
            time_hours: state.time_hours,
            dt_hours: content.constants.dt_hours,
            storage_quantities: content
                .resources
                .ids()
                .map(|id| state.storage.quantity(id))
                .collect(),
            module_activity,
            active_task_count: state.tasks.active_count(),
        }
    }
}

// ---------------------------------------------------------------------------
// Subsystem trait
// ---------------------------------------------------------------------------

pub trait Subsystem: Send {
    fn name(&self) -> &'static str;

    /// Names of subsystems whose update must happen before this one's.
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    /// Event kinds this subsystem wants routed to `handle_event`.
    fn subscriptions(&self) -> &'static [EventKind];

    fn handle_event(&mut self, envelope: &EventEnvelope, content: &FactoryContent);

    /// One tick of work against the snapshot. Returned events are published
    /// on the bus and become visible at the next drain.
    fn update(&mut self, ctx: &TickContext, content: &FactoryContent) -> Vec<Event>;
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    /// Topological layers, populated by `init_layers`. Registration order is
    /// preserved within each layer.
    layers: Vec<Vec<Box<dyn Subsystem>>>,
    pending: Vec<Box<dyn Subsystem>>,
    /// Run layer members concurrently when a layer has more than one entry.
    parallel: bool,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("layers", &self.layers.len())
            .field("pending", &self.pending.len())
            .field("parallel", &self.parallel)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(parallel: bool) -> Self {
        Self {
            layers: Vec::new(),
            pending: Vec::new(),
            parallel,
        }
    }

    pub fn register(&mut self, subsystem: Box<dyn Subsystem>) {
        self.pending.push(subsystem);
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty() && self.pending.is_empty()
    }

    /// Kahn layering over declared dependencies. An unknown dependency name
    /// or a dependency cycle is a configuration error.
    pub fn init_layers(&mut self) -> Result<(), SimulationError> {
        let names: HashSet<&'static str> = self.pending.iter().map(|s| s.name()).collect();
        for subsystem in &self.pending {
            for dep in subsystem.dependencies() {
                if !names.contains(dep) {
                    return Err(SimulationError::InvalidConfiguration {
                        field: format!("subsystems.{}", subsystem.name()),
                        reason: format!("depends on unregistered subsystem '{dep}'"),
                    });
                }
            }
        }

        let mut remaining: Vec<Box<dyn Subsystem>> = std::mem::take(&mut self.pending);
        let mut placed: HashSet<&'static str> = HashSet::new();
        while !remaining.is_empty() {
            let ready: Vec<bool> = remaining
                .iter()
                .map(|s| s.dependencies().iter().all(|d| placed.contains(d)))
                .collect();
            if !ready.iter().any(|&r| r) {
                let stuck: Vec<&str> = remaining.iter().map(|s| s.name()).collect();
                return Err(SimulationError::InvalidConfiguration {
                    field: "subsystems".to_string(),
                    reason: format!("dependency cycle among {stuck:?}"),
                });
            }
            let mut layer = Vec::new();
            let mut rest = Vec::new();
            for (subsystem, is_ready) in remaining.into_iter().zip(ready) {
                if is_ready {
                    layer.push(subsystem);
                } else {
                    rest.push(subsystem);
                }
            }
            for subsystem in &layer {
                placed.insert(subsystem.name());
            }
            self.layers.push(layer);
            remaining = rest;
        }
        Ok(())
    }

    /// (name, subscription kinds) for every registered subsystem, in update
    /// order — used to register with the event bus.
    pub fn subscription_table(&self) -> Vec<(&'static str, Vec<EventKind>)> {
        self.layers
            .iter()
            .flat_map(|layer| layer.iter())
            .map(|s| (s.name(), s.subscriptions().to_vec()))
            .collect()
    }

    /// Run one update pass. Layer order is sequential; members of a layer
    /// run concurrently when enabled. Output order is registration order
    /// either way.
    pub fn update_all(&mut self, ctx: &TickContext, content: &FactoryContent) -> Vec<Event> {
        let mut out = Vec::new();
        for layer in &mut self.layers {
            if self.parallel && layer.len() > 1 {
                let results: Vec<Vec<Event>> = layer
                    .par_iter_mut()
                    .map(|subsystem| subsystem.update(ctx, content))
                    .collect();
                for events in results {
                    out.extend(events);
                }
            } else {
                for subsystem in layer.iter_mut() {
                    out.extend(subsystem.update(ctx, content));
                }
            }
        }
        out
    }

    /// Route drained events to subscribed subsystems, honouring the bus's
    /// subscription snapshot (subscriber name → kinds).
    pub fn route_events(
        &mut self,
        envelopes: &[EventEnvelope],
        subscriptions: &[crate::events::Subscription],
        content: &FactoryContent,
    ) {
        let table: HashMap<&str, &HashSet<EventKind>> = subscriptions
            .iter()
            .map(|s| (s.subscriber.as_str(), &s.kinds))
            .collect();
        for envelope in envelopes {
            let kind = envelope.event.kind();
            for layer in &mut self.layers {
                for subsystem in layer.iter_mut() {
                    if table
                        .get(subsystem.name())
                        .is_some_and(|kinds| kinds.contains(&kind))
                    {
                        subsystem.handle_event(envelope, content);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::base_content;

    struct Recorder {
        name: &'static str,
        deps: &'static [&'static str],
        updates: u32,
    }

    impl Subsystem for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }
        fn dependencies(&self) -> &'static [&'static str] {
            self.deps
        }
        fn subscriptions(&self) -> &'static [EventKind] {
            &[]
        }
        fn handle_event(&mut self, _: &EventEnvelope, _: &FactoryContent) {}
        fn update(&mut self, _: &TickContext, _: &FactoryContent) -> Vec<Event> {
            self.updates += 1;
            vec![]
        }
    }

    fn ctx() -> TickContext {
        TickContext {
            tick: 0,
            time_hours: 0.0,
            dt_hours: 0.1,
            storage_quantities: vec![],
            module_activity: vec![],
            active_task_count: 0,
        }
    }

    #[test]
    fn layering_respects_dependencies() {
        let mut orchestrator = Orchestrator::new(false);
        orchestrator.register(Box::new(Recorder {
            name: "b",
            deps: &["a"],
            updates: 0,
        }));
        orchestrator.register(Box::new(Recorder {
            name: "a",
            deps: &[],
            updates: 0,
        }));
        orchestrator.init_layers().unwrap();
        let table = orchestrator.subscription_table();
        assert_eq!(table[0].0, "a", "dependency runs in an earlier layer");
        assert_eq!(table[1].0, "b");
    }

    #[test]
    fn unknown_dependency_is_config_error() {
        let mut orchestrator = Orchestrator::new(false);
        orchestrator.register(Box::new(Recorder {
            name: "b",
            deps: &["ghost"],
            updates: 0,
        }));
        assert!(matches!(
            orchestrator.init_layers(),
            Err(SimulationError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn dependency_cycle_is_config_error() {
        let mut orchestrator = Orchestrator::new(false);
        orchestrator.register(Box::new(Recorder {
            name: "a",
            deps: &["b"],
            updates: 0,
        }));
        orchestrator.register(Box::new(Recorder {
            name: "b",
            deps: &["a"],
            updates: 0,
        }));
        assert!(matches!(
            orchestrator.init_layers(),
            Err(SimulationError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn parallel_and_sequential_order_match() {
        let content = base_content();
        let build = |parallel: bool| {
            let mut orchestrator = Orchestrator::new(parallel);
            orchestrator.register(Box::new(ThermalManagement::new()));
            orchestrator.register(Box::new(WasteRecycling::new()));
            orchestrator.init_layers().unwrap();
            orchestrator
        };
        let mut seq = build(false);
        let mut par = build(true);
        let events_seq = seq.update_all(&ctx(), &content);
        let events_par = par.update_all(&ctx(), &content);
        assert_eq!(
            serde_json::to_string(&events_seq).unwrap(),
            serde_json::to_string(&events_par).unwrap(),
            "parallel layer dispatch must be order-stable"
        );
    }
}
