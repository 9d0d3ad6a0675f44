//! Tick loop orchestration.
//!
//! One tick advances the clock by `dt` through eight phases in fixed order:
//! energy, task advance, completion, rescan, dispatch, module state, metrics,
//! event drain. The loop is single-threaded and deterministic: identical
//! content + seed + limits produce identical state and logs.

use crate::dispatch::dispatch_tasks;
use crate::energy::{generation_kw, weather_factor};
use crate::events::EventBus;
use crate::logbuf::{LogEntry, LogLevel};
use crate::metrics::{compute_metrics, MetricsSnapshot};
use crate::modules::{ModuleTransition, OpState};
use crate::resolver::Resolver;
use crate::subsystems::{
    ContaminationControl, Orchestrator, SoftwareProduction, ThermalManagement, TickContext,
    TransportSystem, WasteRecycling,
};
use crate::{
    emit, BlockCause, CompletedTaskRecord, Event, EventEnvelope, FactoryContent, FactoryState,
    SimulationError, TaskId,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

// ---------------------------------------------------------------------------
// Run limits and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    pub max_hours: f64,
    pub max_wall_time_seconds: f64,
}

impl RunLimits {
    pub fn from_constants(constants: &crate::Constants) -> Self {
        Self {
            max_hours: constants.max_hours,
            max_wall_time_seconds: constants.max_wall_time_seconds,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Every target module type produced at least once.
    Replicated,
    MaxHours,
    WallTime,
    Cancelled,
    /// Nothing queued or active and the blocked set cannot make progress.
    Stalled,
}

impl TerminationReason {
    pub fn label(self) -> &'static str {
        match self {
            TerminationReason::Replicated => "replicated",
            TerminationReason::MaxHours => "max_hours",
            TerminationReason::WallTime => "wall_time",
            TerminationReason::Cancelled => "cancelled",
            TerminationReason::Stalled => "stalled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalStatus {
    pub terminated_reason: TerminationReason,
    pub sim_time_hours: f64,
    pub wall_time_seconds: f64,
}

/// The single structured output document of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub spec_name: String,
    pub spec_version: String,
    pub seed: u64,
    /// Resolved configuration after profile application, echoed verbatim.
    pub config: serde_json::Value,
    /// Raw-material demand for the full replication goal, by resource name.
    pub initial_requirements: BTreeMap<String, f64>,
    pub metrics: Vec<MetricsSnapshot>,
    pub completed_tasks: Vec<CompletedTaskRecord>,
    pub log: Vec<LogEntry>,
    pub final_module_counts: BTreeMap<String, u32>,
    pub event_history: Vec<EventEnvelope>,
    pub final_status: FinalStatus,
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

pub struct Simulation {
    pub content: FactoryContent,
    pub state: FactoryState,
    bus: EventBus,
    orchestrator: Orchestrator,
    resolver: Resolver,
    rng: ChaCha8Rng,
    cancel: Arc<AtomicBool>,
    config_echo: serde_json::Value,
    initial_requirements: BTreeMap<String, f64>,
    goals_seeded: bool,
}

impl Simulation {
    /// Wire up the engine: bus, enabled subsystems (layered), resolver, RNG.
    pub fn new(content: FactoryContent, state: FactoryState) -> Result<Self, SimulationError> {
        let constants = &content.constants;
        let bus = EventBus::new(
            constants.event_queue_capacity,
            constants.event_history_capacity,
            constants.event_drop_fatal_fraction,
        );

        let mut orchestrator = Orchestrator::new(true);
        let features = &content.features;
        if features.thermal_management {
            orchestrator.register(Box::new(ThermalManagement::new()));
        }
        if features.waste_recycling {
            orchestrator.register(Box::new(WasteRecycling::new()));
        }
        if features.software_production {
            orchestrator.register(Box::new(SoftwareProduction::new()));
        }
        if features.contamination {
            orchestrator.register(Box::new(ContaminationControl::new()));
        }
        if features.transport_time {
            orchestrator.register(Box::new(TransportSystem::new()));
        }
        orchestrator.init_layers()?;
        for (name, kinds) in orchestrator.subscription_table() {
            bus.subscribe(name, kinds);
        }

        let rng = ChaCha8Rng::seed_from_u64(state.seed);
        let resolver = Resolver::new(constants.resolver_cache_capacity);
        Ok(Self {
            content,
            state,
            bus,
            orchestrator,
            resolver,
            rng,
            cancel: Arc::new(AtomicBool::new(false)),
            config_echo: serde_json::Value::Null,
            initial_requirements: BTreeMap::new(),
            goals_seeded: false,
        })
    }

    /// Replace an auto-registered subsystem set with a custom one (used by
    /// the loader's `subsystem_implementations` table).
    pub fn with_orchestrator(mut self, orchestrator: Orchestrator) -> Result<Self, SimulationError> {
        self.orchestrator = orchestrator;
        self.orchestrator.init_layers()?;
        for (name, kinds) in self.orchestrator.subscription_table() {
            self.bus.subscribe(name, kinds);
        }
        Ok(self)
    }

    /// Attach the resolved configuration document for the report echo.
    pub fn with_config_echo(mut self, config: serde_json::Value) -> Self {
        self.config_echo = config;
        self
    }

    /// Cooperative cancel flag, checked at the top of every tick.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn initial_requirements(&self) -> &BTreeMap<String, f64> {
        &self.initial_requirements
    }

    /// Expand one goal into tasks at the given root priority.
    pub fn expand_goal(
        &mut self,
        goal: crate::ResourceId,
        quantity: f64,
        priority: u32,
    ) -> Result<Option<TaskId>, SimulationError> {
        self.resolver
            .expand_goal(&self.content, &mut self.state, goal, quantity, priority)
    }

    /// Create the replication goal: one task tree per target module type,
    /// and the aggregate raw-material requirements for the report.
    pub fn seed_replication_goals(&mut self) -> Result<(), SimulationError> {
        if self.goals_seeded {
            return Ok(());
        }
        self.goals_seeded = true;

        let targets = self.content.targets.clone();
        let mut requirements: BTreeMap<String, f64> = BTreeMap::new();
        for &target in &targets {
            let reqs = self
                .resolver
                .total_requirements(&self.content, target, 1.0)?;
            for (raw, qty) in reqs {
                *requirements
                    .entry(self.content.resources.name(raw).to_string())
                    .or_insert(0.0) += qty;
            }
        }
        self.initial_requirements = requirements;

        for &target in &targets {
            self.expand_goal(target, 1.0, 0)?;
            self.state.log.push(
                self.state.time_hours,
                LogLevel::Info,
                format!(
                    "replication goal: {}",
                    self.content.resources.name(target)
                ),
            );
        }
        Ok(())
    }

    fn replicated(&self) -> bool {
        !self.content.targets.is_empty()
            && self
                .content
                .targets
                .iter()
                .all(|&target| self.state.tasks.completions_of(target) >= 1)
    }

    /// True only for an unrecoverable dependency deadlock: nothing queued or
    /// active, and every blocked task waits on dependencies that can no
    /// longer complete. Other causes (module repair, energy recovery,
    /// recycling) may still clear, so they never stall the run.
    fn stalled(&self) -> bool {
        let tasks = &self.state.tasks;
        tasks.queued_count() == 0
            && tasks.active_count() == 0
            && tasks.blocked_count() > 0
            && tasks
                .blocked_by_cause()
                .keys()
                .all(|cause| *cause == BlockCause::Dependencies)
    }

    /// Run to termination. `SimulationTimeout` is terminal but non-fatal:
    /// the partial report is returned with the timeout reason set. Only
    /// fatal errors (overflow, configuration) surface as `Err`.
    pub fn run(&mut self, limits: RunLimits) -> Result<RunReport, SimulationError> {
        let start = Instant::now();
        self.seed_replication_goals()?;

        loop {
            let wall = start.elapsed().as_secs_f64();
            let reason = if self.replicated() {
                Some(TerminationReason::Replicated)
            } else if self.cancel.load(Ordering::Relaxed) {
                Some(TerminationReason::Cancelled)
            } else if self.state.time_hours >= limits.max_hours {
                Some(TerminationReason::MaxHours)
            } else if wall >= limits.max_wall_time_seconds {
                Some(TerminationReason::WallTime)
            } else if self.stalled() {
                Some(TerminationReason::Stalled)
            } else {
                None
            };

            if let Some(reason) = reason {
                return Ok(self.finish(reason, start.elapsed().as_secs_f64()));
            }
            self.tick()?;
        }
    }

    fn finish(&mut self, reason: TerminationReason, wall_seconds: f64) -> RunReport {
        self.state.log.push(
            self.state.time_hours,
            LogLevel::Info,
            format!(
                "simulation finished: {} at {:.1} h ({} tasks completed)",
                reason.label(),
                self.state.time_hours,
                self.state.tasks.completed_count()
            ),
        );
        // Final sample so the series always covers the last tick.
        let snapshot = compute_metrics(&self.state, &self.content);
        self.state.metrics.push(snapshot);

        let mut final_module_counts = BTreeMap::new();
        for module_type in self.content.module_types.ids() {
            final_module_counts.insert(
                self.content.module_types.name(module_type).to_string(),
                self.state.modules.count(module_type),
            );
        }

        RunReport {
            spec_name: self.content.spec_name.clone(),
            spec_version: self.content.spec_version.clone(),
            seed: self.state.seed,
            config: self.config_echo.clone(),
            initial_requirements: self.initial_requirements.clone(),
            metrics: self.state.metrics.clone(),
            completed_tasks: self.state.completed_log.iter().cloned().collect(),
            log: self.state.log.entries().to_vec(),
            final_module_counts,
            event_history: self.bus.history().iter().cloned().collect(),
            final_status: FinalStatus {
                terminated_reason: reason,
                sim_time_hours: self.state.time_hours,
                wall_time_seconds: wall_seconds,
            },
        }
    }

    /// One simulation step. Phases run strictly in contract order.
    pub fn tick(&mut self) -> Result<(), SimulationError> {
        let constants = self.content.constants.clone();
        let dt = constants.dt_hours;
        let mut tick_events: Vec<EventEnvelope> = Vec::new();

        // --- Phase 1: energy generation and consumption -------------------
        let weather = weather_factor(&mut self.rng, &constants, self.content.features.weather);
        let solar_now_kw = generation_kw(
            self.state.time_hours,
            weather,
            &self.state.energy,
            &constants,
        );
        let consumed_kw = self.total_consumption_kw();
        self.state
            .energy
            .apply_tick(solar_now_kw, consumed_kw, &constants);
        let envelope = emit(
            &mut self.state.counters,
            self.state.tick,
            self.state.time_hours,
            Event::EnergyAvailable {
                generated_kw: solar_now_kw,
                consumed_kw,
                battery_kwh: self.state.energy.battery_kwh,
            },
        );
        tick_events.push(envelope);

        // Charge per-task energy to the tasks that made progress.
        for id in self.state.tasks.active_ids() {
            if let Some(task) = self.state.tasks.get_mut(&id) {
                if task.remaining_hours > 0.0 && task.duration_hours > 0.0 {
                    task.energy_consumed_kwh +=
                        task.energy_kwh_total * dt / task.duration_hours;
                }
            }
        }

        // --- Phase 2: advance active tasks ---------------------------------
        for id in self.state.tasks.active_ids() {
            if let Some(task) = self.state.tasks.get_mut(&id) {
                if task.remaining_hours > 0.0 {
                    task.remaining_hours -= dt;
                }
            }
        }

        // --- Phase 3: completion -------------------------------------------
        self.complete_finished_tasks(&mut tick_events);

        // --- Phase 4: rescan blocked tasks ---------------------------------
        {
            let content = &self.content;
            let FactoryState {
                tasks,
                storage,
                modules,
                counters,
                ..
            } = &mut self.state;
            let requeued = tasks.rescan_blocked(counters, |task, cause| {
                let Some(recipe) = content.recipes.get(task.output) else {
                    return false;
                };
                match cause {
                    BlockCause::Module => modules.count_running(recipe.required_module) > 0,
                    BlockCause::Resources => {
                        recipe.inputs.iter().all(|&(input, input_qty)| {
                            let needed = input_qty * task.quantity / recipe.output_quantity;
                            storage.quantity(input) >= needed
                        }) && recipe
                            .software_required
                            .is_none_or(|software| storage.quantity(software) >= 1.0)
                    }
                    // Energy recovers continuously; always worth a retry.
                    BlockCause::Energy => true,
                    BlockCause::Dependencies => false, // handled inside rescan
                }
            });
            for id in &requeued {
                self.state.log.push(
                    self.state.time_hours,
                    LogLevel::Debug,
                    format!("{id} unblocked"),
                );
            }
        }

        // --- Phase 5: dispatch ---------------------------------------------
        dispatch_tasks(
            &self.content,
            &mut self.state,
            solar_now_kw,
            &mut self.rng,
            &mut tick_events,
        );

        // --- Phase 6: module state tick ------------------------------------
        self.tick_modules(&mut tick_events);

        // --- Phase 7: periodic metrics -------------------------------------
        if self.state.time_hours - self.state.last_metric_time
            >= constants.metric_interval_hours
            || self.state.tick == 0
        {
            self.state.last_metric_time = self.state.time_hours;
            let snapshot = compute_metrics(&self.state, &self.content);
            self.state.metrics.push(snapshot);
        }
        if self.state.time_hours - self.state.last_progress_time
            >= constants.progress_interval_hours
        {
            self.state.last_progress_time = self.state.time_hours;
            self.state.log.push(
                self.state.time_hours,
                LogLevel::Info,
                format!(
                    "t={:.1} h: {} active, {} queued, {} blocked, {} completed, battery {:.0} kWh",
                    self.state.time_hours,
                    self.state.tasks.active_count(),
                    self.state.tasks.queued_count(),
                    self.state.tasks.blocked_count(),
                    self.state.tasks.completed_count(),
                    self.state.energy.battery_kwh,
                ),
            );
        }

        // --- Phase 8: subsystem updates and event drain --------------------
        if !self.orchestrator.is_empty() {
            let ctx = TickContext::snapshot(&self.state, &self.content);
            let proposals = self.orchestrator.update_all(&ctx, &self.content);
            for event in proposals {
                let envelope = emit(
                    &mut self.state.counters,
                    self.state.tick,
                    self.state.time_hours,
                    event,
                );
                tick_events.push(envelope);
            }
        }
        for envelope in tick_events {
            self.bus.publish(envelope);
        }
        self.bus.check_overflow()?;
        let drained = self.bus.drain();
        self.fold_readings(&drained);
        let subscriptions = self.bus.snapshot_subscriptions();
        self.orchestrator
            .route_events(&drained, &subscriptions, &self.content);

        self.state.tick += 1;
        self.state.time_hours += dt;
        Ok(())
    }

    /// Idle draw of every non-failed module, cooling and transport overhead,
    /// plus the pro-rated energy of tasks still making progress.
    fn total_consumption_kw(&self) -> f64 {
        let mut kw = 0.0;
        for module_type in self.content.module_types.ids() {
            let idle = self.content.module_types.def(module_type).power_idle_kw;
            for instance in self.state.modules.instances(module_type) {
                kw += match instance.operational {
                    OpState::Failed { .. } => 0.0,
                    OpState::Maintaining { .. } => 0.5 * idle,
                    OpState::Running => idle,
                };
            }
        }
        kw += self.state.readings.cooling_power_kw;
        kw += self.state.readings.transport_power_kw;
        for id in self.state.tasks.active_ids() {
            if let Some(task) = self.state.tasks.get(&id) {
                if task.remaining_hours > 0.0 && task.duration_hours > 0.0 {
                    kw += task.energy_kwh_total / task.duration_hours;
                }
            }
        }
        kw
    }

    fn complete_finished_tasks(&mut self, tick_events: &mut Vec<EventEnvelope>) {
        let constants = &self.content.constants;
        for id in self.state.tasks.active_ids() {
            let Some(task) = self.state.tasks.get(&id) else {
                continue;
            };
            if task.remaining_hours > 0.0 {
                continue;
            }
            let output = task.output;
            let quantity = task.quantity;
            let expected = task.expected_output;
            let slot = task.assigned;

            // Output space is only checked now. A full store leaves the task
            // active at zero progress until space opens up.
            if let Err(rejection) =
                self.state
                    .storage
                    .reserve(&self.content.resources, output, expected)
            {
                let envelope = emit(
                    &mut self.state.counters,
                    self.state.tick,
                    self.state.time_hours,
                    Event::StorageFull {
                        task_id: id.clone(),
                        resource: output,
                        quantity: expected,
                    },
                );
                tick_events.push(envelope);
                self.state.log.push(
                    self.state.time_hours,
                    LogLevel::Warn,
                    format!(
                        "{} completion held: {} for {:.3} {}",
                        id,
                        rejection.label(),
                        expected,
                        self.content.resources.name(output)
                    ),
                );
                continue;
            }

            self.state.record_production(output, expected);
            let envelope = emit(
                &mut self.state.counters,
                self.state.tick,
                self.state.time_hours,
                Event::ResourceProduced {
                    resource: output,
                    quantity: expected,
                    task_id: id.clone(),
                },
            );
            tick_events.push(envelope);

            // Waste streams go to the recycling subsystem, not storage.
            if let Some(recipe) = self.content.recipes.get(output) {
                for &(waste, waste_qty) in &recipe.waste_products {
                    let amount = waste_qty * quantity / recipe.output_quantity;
                    let envelope = emit(
                        &mut self.state.counters,
                        self.state.tick,
                        self.state.time_hours,
                        Event::WasteGenerated {
                            resource: waste,
                            quantity: amount,
                        },
                    );
                    tick_events.push(envelope);
                }
            }

            // A module-product output grows the fleet by output_quantity.
            if let Some(&module_type) = self.content.module_products.get(&output) {
                let recipe = self
                    .content
                    .recipes
                    .get(output)
                    .expect("module products have recipes");
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let count = recipe.output_quantity.round().max(1.0) as u32;
                self.state.modules.add_instances(module_type, count);
                let envelope = emit(
                    &mut self.state.counters,
                    self.state.tick,
                    self.state.time_hours,
                    Event::ModuleCreated { module_type, count },
                );
                tick_events.push(envelope);
                self.state.log.push(
                    self.state.time_hours,
                    LogLevel::Info,
                    format!(
                        "new module online: {} x{}",
                        self.content.module_types.name(module_type),
                        count
                    ),
                );
            }

            if let Some(slot) = slot {
                self.state
                    .modules
                    .release_slot(slot.module_type, slot.instance);
            }

            let done = self.state.tasks.complete(&id, self.state.time_hours);
            let envelope = emit(
                &mut self.state.counters,
                self.state.tick,
                self.state.time_hours,
                Event::TaskCompleted {
                    task_id: id.clone(),
                    output,
                    quantity: expected,
                },
            );
            tick_events.push(envelope);
            self.state.log.push(
                self.state.time_hours,
                LogLevel::Info,
                format!(
                    "completed {}: {:.3} {}",
                    id,
                    expected,
                    self.content.resources.name(output)
                ),
            );

            self.state.completed_log.push_back(CompletedTaskRecord {
                id: done.id.clone(),
                output: self.content.resources.name(output).to_string(),
                quantity: done.quantity,
                actual_output: expected,
                priority: done.priority,
                started_at_hours: done.started_at_hours.unwrap_or(0.0),
                completed_at_hours: self.state.time_hours,
                energy_consumed_kwh: done.energy_consumed_kwh,
            });
            while self.state.completed_log.len() > constants.completed_task_log_capacity {
                self.state.completed_log.pop_front();
            }
        }
    }

    fn tick_modules(&mut self, tick_events: &mut Vec<EventEnvelope>) {
        let transitions = self.state.modules.tick(
            self.state.time_hours,
            &self.content.module_types,
            &self.content.constants,
            &self.content.features,
            &mut self.rng,
        );

        for transition in transitions {
            match transition {
                ModuleTransition::Failed {
                    module_type,
                    instance,
                    wear,
                } => {
                    let envelope = emit(
                        &mut self.state.counters,
                        self.state.tick,
                        self.state.time_hours,
                        Event::ModuleFailed {
                            module_type,
                            instance,
                            wear,
                        },
                    );
                    tick_events.push(envelope);
                    self.state.log.push(
                        self.state.time_hours,
                        LogLevel::Error,
                        format!(
                            "module failed: {}[{}] at wear {:.3}",
                            self.content.module_types.name(module_type),
                            instance,
                            wear
                        ),
                    );
                    self.abort_tasks_on(module_type, instance);
                }
                ModuleTransition::Repaired {
                    module_type,
                    instance,
                } => {
                    let envelope = emit(
                        &mut self.state.counters,
                        self.state.tick,
                        self.state.time_hours,
                        Event::ModuleRepaired {
                            module_type,
                            instance,
                        },
                    );
                    tick_events.push(envelope);
                    self.state.log.push(
                        self.state.time_hours,
                        LogLevel::Info,
                        format!(
                            "module repaired: {}[{}]",
                            self.content.module_types.name(module_type),
                            instance
                        ),
                    );
                }
                ModuleTransition::MaintenanceStarted {
                    module_type,
                    instance,
                } => {
                    let envelope = emit(
                        &mut self.state.counters,
                        self.state.tick,
                        self.state.time_hours,
                        Event::MaintenanceStarted {
                            module_type,
                            instance,
                        },
                    );
                    tick_events.push(envelope);
                    self.state.log.push(
                        self.state.time_hours,
                        LogLevel::Debug,
                        format!(
                            "maintenance started: {}[{}]",
                            self.content.module_types.name(module_type),
                            instance
                        ),
                    );
                }
                ModuleTransition::MaintenanceCompleted {
                    module_type,
                    instance,
                    wear_after,
                } => {
                    let envelope = emit(
                        &mut self.state.counters,
                        self.state.tick,
                        self.state.time_hours,
                        Event::MaintenanceCompleted {
                            module_type,
                            instance,
                            wear_after,
                        },
                    );
                    tick_events.push(envelope);
                    self.state.log.push(
                        self.state.time_hours,
                        LogLevel::Debug,
                        format!(
                            "maintenance completed: {}[{}] wear {:.3}",
                            self.content.module_types.name(module_type),
                            instance,
                            wear_after
                        ),
                    );
                }
            }
        }
    }

    /// Tasks running on a failed instance go back to the queue at their
    /// original priority, inputs refunded.
    fn abort_tasks_on(&mut self, module_type: crate::ModuleTypeId, instance: usize) {
        let stranded: Vec<TaskId> = self
            .state
            .tasks
            .active_ids()
            .into_iter()
            .filter(|id| {
                self.state.tasks.get(id).is_some_and(|task| {
                    task.assigned
                        .is_some_and(|s| s.module_type == module_type && s.instance == instance)
                })
            })
            .collect();

        for id in stranded {
            let (output, quantity) = {
                let task = self.state.tasks.get(&id).expect("stranded task exists");
                (task.output, task.quantity)
            };
            if let Some(recipe) = self.content.recipes.get(output) {
                let recipe = recipe.clone();
                for &(input, input_qty) in &recipe.inputs {
                    let refund = input_qty * quantity / recipe.output_quantity;
                    self.state
                        .storage
                        .refund(&self.content.resources, input, refund);
                }
            }
            self.state.modules.release_slot(module_type, instance);
            self.state.tasks.requeue(&id, &mut self.state.counters);
            self.state.log.push(
                self.state.time_hours,
                LogLevel::Warn,
                format!("{id} returned to queue after module failure, inputs refunded"),
            );
        }
    }

    /// Fold reading-type events (the subsystems' proposals) back into the
    /// state consulted by dispatch and the energy phase next tick.
    fn fold_readings(&mut self, drained: &[EventEnvelope]) {
        for envelope in drained {
            match &envelope.event {
                Event::ThermalReport {
                    load_kw,
                    cooling_kw,
                } => {
                    self.state.readings.thermal_load_kw = *load_kw;
                    self.state.readings.cooling_power_kw = *cooling_kw;
                    self.state.readings.thermal_limit_reached = false;
                }
                Event::ThermalLimitReached { load_kw, limit_kw } => {
                    self.state.readings.thermal_limit_reached = true;
                    self.state.log.push(
                        self.state.time_hours,
                        LogLevel::Warn,
                        format!("thermal limit reached: {load_kw:.1} kW > {limit_kw:.1} kW"),
                    );
                }
                Event::TransportReport { active, power_kw } => {
                    self.state.readings.active_transports = *active;
                    self.state.readings.transport_power_kw = *power_kw;
                }
                Event::ContaminationReport {
                    module_type,
                    effective_class,
                    yield_factor,
                } => {
                    self.state
                        .readings
                        .contamination_class
                        .insert(*module_type, *effective_class);
                    self.state
                        .readings
                        .contamination_yield
                        .insert(*module_type, *yield_factor);
                }
                Event::SoftwareDeveloped { reliability, .. } => {
                    self.state.readings.software_reliability = *reliability;
                }
                Event::WasteRecycled { resource, quantity } => {
                    // Recovered material re-enters storage if it fits.
                    if self
                        .state
                        .storage
                        .reserve(&self.content.resources, *resource, *quantity)
                        .is_err()
                    {
                        self.state.log.push(
                            self.state.time_hours,
                            LogLevel::Warn,
                            format!(
                                "recycled {:.3} {} discarded: storage full",
                                quantity,
                                self.content.resources.name(*resource)
                            ),
                        );
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{base_content, base_state, replication_content};

    fn sim_with_goal(qty_ore: f64) -> (Simulation, crate::ResourceId) {
        let content = base_content();
        let mut state = base_state(&content);
        let ore = content.resources.id("iron_ore").unwrap();
        state.storage.reserve(&content.resources, ore, qty_ore).unwrap();
        let steel = content.resources.id("steel").unwrap();
        let mut sim = Simulation::new(content, state).unwrap();
        sim.expand_goal(steel, 1.0, 0).unwrap().unwrap();
        (sim, steel)
    }

    #[test]
    fn single_task_completes_on_schedule() {
        let (mut sim, steel) = sim_with_goal(10.0);
        // Recipe takes 1.0 h at dt 0.1: started on tick 0, done by t≈1.1.
        for _ in 0..12 {
            sim.tick().unwrap();
        }
        assert_eq!(sim.state.tasks.completed_count(), 1);
        assert!((sim.state.storage.quantity(steel) - 1.0).abs() < 1e-9);
        let ore = sim.content.resources.id("iron_ore").unwrap();
        assert!((sim.state.storage.quantity(ore) - 8.0).abs() < 1e-9);

        let completions = sim
            .bus()
            .history()
            .iter()
            .filter(|e| matches!(e.event, Event::TaskCompleted { .. }))
            .count();
        assert_eq!(completions, 1, "exactly one TaskCompleted event");
    }

    #[test]
    fn energy_conservation_holds_each_tick() {
        let (mut sim, _) = sim_with_goal(10.0);
        for _ in 0..200 {
            sim.tick().unwrap();
            let energy = &sim.state.energy;
            let scale = energy.total_generated_kwh.abs().max(1.0);
            assert!(
                energy.conservation_residual_kwh().abs() <= 1e-6 * scale,
                "conservation violated at tick {}",
                sim.state.tick
            );
            assert!(energy.battery_kwh >= 0.0);
            assert!(energy.battery_kwh <= energy.battery_capacity_kwh);
        }
    }

    #[test]
    fn task_partition_invariant_holds() {
        let (mut sim, _) = sim_with_goal(10.0);
        for _ in 0..50 {
            sim.tick().unwrap();
            assert!(sim.state.tasks.partition_is_consistent());
        }
    }

    #[test]
    fn run_terminates_with_max_hours_on_unreachable_goal() {
        let content = base_content();
        let mut state = base_state(&content);
        // No ore at all: the steel task blocks on resources forever.
        let steel = content.resources.id("steel").unwrap();
        state.energy = crate::energy::EnergyState::new(0.0, 1000.0, 0.0);
        let mut sim = Simulation::new(content, state).unwrap();
        sim.expand_goal(steel, 1.0, 0).unwrap();

        let report = sim
            .run(RunLimits {
                max_hours: 5.0,
                max_wall_time_seconds: 60.0,
            })
            .unwrap();
        assert_eq!(
            report.final_status.terminated_reason,
            TerminationReason::MaxHours
        );
        assert_eq!(sim.state.tasks.completed_count(), 0);
    }

    #[test]
    fn wall_clock_timeout_yields_partial_report() {
        let content = replication_content();
        let state = base_state(&content);
        let mut sim = Simulation::new(content, state).unwrap();
        let report = sim
            .run(RunLimits {
                max_hours: 1e9,
                max_wall_time_seconds: 0.0,
            })
            .unwrap();
        assert_eq!(
            report.final_status.terminated_reason,
            TerminationReason::WallTime
        );
        assert!(!report.log.is_empty(), "partial log is still written");
    }

    #[test]
    fn cancel_flag_stops_the_run() {
        let content = replication_content();
        let state = base_state(&content);
        let mut sim = Simulation::new(content, state).unwrap();
        sim.cancel_handle().store(true, Ordering::Relaxed);
        let report = sim
            .run(RunLimits {
                max_hours: 1e9,
                max_wall_time_seconds: 60.0,
            })
            .unwrap();
        assert_eq!(
            report.final_status.terminated_reason,
            TerminationReason::Cancelled
        );
    }

    #[test]
    fn identical_seeds_produce_identical_logs() {
        let run = |seed: u64| -> String {
            let content = replication_content();
            let state = crate::FactoryState::new(&content, seed);
            let mut sim = Simulation::new(content, state).unwrap();
            let report = sim
                .run(RunLimits {
                    max_hours: 300.0,
                    max_wall_time_seconds: 120.0,
                })
                .unwrap();
            // Wall-clock fields are excluded from the comparison.
            serde_json::to_string(&(
                &report.metrics,
                &report.completed_tasks,
                &report.log,
                &report.final_module_counts,
                &report.final_status.terminated_reason,
                report.final_status.sim_time_hours.to_bits(),
            ))
            .unwrap()
        };
        assert_eq!(run(42), run(42), "same seed must be bit-identical");
    }
}
