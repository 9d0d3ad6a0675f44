//! Dispatch engine: pulls ready tasks off the queue and starts up to K per
//! tick, checking every precondition in a fixed order. The first failed
//! check tags the task with its blocking cause and parks it.

use crate::logbuf::LogLevel;
use crate::modules::{effective_quality, wear_efficiency};
use crate::{
    emit, BlockCause, Event, EventEnvelope, FactoryContent, FactoryState, Quantity, Recipe,
    SlotRef, TaskId,
};
use rand::Rng;

struct StartParams {
    slot: SlotRef,
    duration_hours: f64,
    energy_kwh_total: f64,
    instance_wear: f64,
}

/// Start up to `max_task_starts_per_tick` tasks. Returns how many started.
pub(crate) fn dispatch_tasks(
    content: &FactoryContent,
    state: &mut FactoryState,
    solar_now_kw: f64,
    rng: &mut impl Rng,
    events: &mut Vec<EventEnvelope>,
) -> u32 {
    let mut started = 0u32;
    while started < content.constants.max_task_starts_per_tick {
        let Some(id) = state.tasks.pop_ready() else {
            break;
        };
        let (output, quantity) = {
            let task = state.tasks.get(&id).expect("popped task exists");
            (task.output, task.quantity)
        };
        let Some(recipe) = content.recipes.get(output) else {
            // Resolver never queues recipe-less outputs; guard anyway.
            state.tasks.block(&id, BlockCause::Resources);
            continue;
        };
        let recipe = recipe.clone();

        match evaluate(content, state, &recipe, quantity, solar_now_kw) {
            Ok(params) => {
                start_task(content, state, &id, &recipe, quantity, params, rng, events);
                started += 1;
            }
            Err(cause) => {
                state.tasks.block(&id, cause);
                let envelope = emit(
                    &mut state.counters,
                    state.tick,
                    state.time_hours,
                    Event::TaskBlocked {
                        task_id: id.clone(),
                        cause,
                    },
                );
                events.push(envelope);
                state.log.push(
                    state.time_hours,
                    LogLevel::Debug,
                    format!("{} blocked: {}", id, cause.label()),
                );
            }
        }
    }
    started
}

/// Precondition checks, in contract order:
/// 1. module type running (tolerance capability included),
/// 2. free slot,
/// 3. inputs on hand,
/// 4. energy fundable,
/// 5. cleanroom class,
/// 6. software present.
fn evaluate(
    content: &FactoryContent,
    state: &FactoryState,
    recipe: &Recipe,
    quantity: Quantity,
    solar_now_kw: f64,
) -> Result<StartParams, BlockCause> {
    let constants = &content.constants;
    let module_type = recipe.required_module;
    let def = content.module_types.def(module_type);

    // 1. At least one Running instance that can hold the tolerance.
    if state.modules.count_running(module_type) == 0 {
        return Err(BlockCause::Module);
    }
    if let Some(required_um) = recipe.tolerance_um {
        match def.tolerance_capability_um {
            Some(capability) if capability <= required_um => {}
            _ => return Err(BlockCause::Module),
        }
    }

    // 2. Free slot.
    let effective_limit = if recipe.parallel_capable {
        def.parallel_limit.min(constants.parallel_processing_limit)
    } else {
        1
    };
    let Some(instance) = state.modules.find_slot(module_type, effective_limit) else {
        return Err(BlockCause::Module);
    };

    // 3. Inputs present in full quantity.
    for &(input, input_qty) in &recipe.inputs {
        let needed = input_qty * quantity / recipe.output_quantity;
        if state.storage.quantity(input) < needed {
            return Err(BlockCause::Resources);
        }
    }

    // 4. Energy: projected average power within solar + dispatchable battery.
    let instance_wear = state.modules.instances(module_type)[instance].wear;
    let duration_hours = production_duration(content, state, recipe, quantity, instance_wear);
    let energy_kwh_total = recipe.energy_kwh * quantity / recipe.output_quantity;
    let avg_power_kw = energy_kwh_total / duration_hours.max(constants.dt_hours);
    if avg_power_kw > state.energy.available_power_kw(solar_now_kw, constants) {
        return Err(BlockCause::Energy);
    }

    // 5. Cleanroom class, against the contamination subsystem's reading.
    if content.features.contamination {
        if let Some(required_class) = recipe.cleanroom_class {
            match def.cleanroom_capable {
                Some(capability) if capability <= required_class => {}
                _ => return Err(BlockCause::Module),
            }
            if let Some(&current) = state.readings.contamination_class.get(&module_type) {
                if current > required_class {
                    return Err(BlockCause::Module);
                }
            }
        }
    }

    // 6. Software present (≥ 1 unit, reusable, never consumed).
    if let Some(software) = recipe.software_required {
        if state.storage.quantity(software) < 1.0 {
            return Err(BlockCause::Resources);
        }
    }

    Ok(StartParams {
        slot: SlotRef {
            module_type,
            instance,
        },
        duration_hours,
        energy_kwh_total,
        instance_wear,
    })
}

/// Task duration: recipe time scaled by quantity, sped up by parallel
/// instances and the learning curve, slowed by wear and sequential batches.
fn production_duration(
    content: &FactoryContent,
    state: &FactoryState,
    recipe: &Recipe,
    quantity: Quantity,
    instance_wear: f64,
) -> f64 {
    let constants = &content.constants;
    let def = content.module_types.def(recipe.required_module);

    let base = recipe.time_hours * quantity / recipe.output_quantity;

    let effective_limit = if recipe.parallel_capable {
        def.parallel_limit.min(constants.parallel_processing_limit)
    } else {
        1
    };
    let speedup = state
        .modules
        .count_running(recipe.required_module)
        .min(effective_limit)
        .max(1);

    let completions = state.completions_of(recipe.output);
    let k = completions / constants.learning_batch_size;
    let learning = constants.learning_curve_factor.powi(k as i32);

    let mut duration =
        base * learning / f64::from(speedup) / wear_efficiency(instance_wear, constants);

    if content.features.batch_processing && def.max_batch_size > 0.0 {
        let batches = (quantity / def.max_batch_size).ceil().max(1.0);
        duration += def.setup_time_hours * (batches - 1.0);
    }
    duration + def.setup_time_hours
}

#[allow(clippy::too_many_arguments)]
fn start_task(
    content: &FactoryContent,
    state: &mut FactoryState,
    id: &TaskId,
    recipe: &Recipe,
    quantity: Quantity,
    params: StartParams,
    rng: &mut impl Rng,
    events: &mut Vec<EventEnvelope>,
) {
    let constants = &content.constants;

    // Inputs are consumed at start, not over time.
    for &(input, input_qty) in &recipe.inputs {
        let needed = input_qty * quantity / recipe.output_quantity;
        state
            .storage
            .release(&content.resources, input, needed)
            .expect("inputs checked before start");
        let envelope = emit(
            &mut state.counters,
            state.tick,
            state.time_hours,
            Event::ResourceConsumed {
                resource: input,
                quantity: needed,
                task_id: id.clone(),
            },
        );
        events.push(envelope);
    }

    state
        .modules
        .reserve_slot(params.slot.module_type, params.slot.instance);

    let quality = if content.features.quality_control {
        let def = content.module_types.def(recipe.required_module);
        let mut q = effective_quality(def.quality_base_rate, params.instance_wear, constants);
        if content.features.contamination && recipe.cleanroom_class.is_some() {
            q *= state
                .readings
                .contamination_yield
                .get(&params.slot.module_type)
                .copied()
                .unwrap_or(1.0);
        }
        if content.features.software_production && recipe.software_required.is_some() {
            q *= state.readings.software_reliability;
        }
        if constants.quality_variation > 0.0 {
            q *= rng.gen_range(1.0 - constants.quality_variation..=1.0 + constants.quality_variation);
        }
        q.clamp(constants.quality_floor, 1.0)
    } else {
        1.0
    };
    let expected_output = quantity * quality;

    state.tasks.activate(
        id,
        params.slot,
        params.duration_hours,
        params.energy_kwh_total,
        expected_output,
        state.time_hours,
    );
    let envelope = emit(
        &mut state.counters,
        state.tick,
        state.time_hours,
        Event::TaskStarted {
            task_id: id.clone(),
            output: recipe.output,
            module_type: params.slot.module_type,
            duration_hours: params.duration_hours,
        },
    );
    events.push(envelope);
    state.log.push(
        state.time_hours,
        LogLevel::Info,
        format!(
            "started {} on {} (eta {:.2} h, yield {:.3})",
            id,
            content.module_types.name(params.slot.module_type),
            state.time_hours + params.duration_hours,
            expected_output,
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::EnergyState;
    use crate::tasks::TaskQueue;
    use crate::test_fixtures::{base_content, base_state};
    use crate::{Task, TaskStatus};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn queue_steel_task(content: &FactoryContent, state: &mut FactoryState, qty: f64) -> TaskId {
        let steel = content.resources.id("steel").unwrap();
        let id = TaskQueue::next_task_id(&mut state.counters, "steel");
        let task = Task::new(id.clone(), steel, qty, 0);
        state.tasks.enqueue(task, &mut state.counters);
        id
    }

    fn seed_ore(content: &FactoryContent, state: &mut FactoryState, qty: f64) {
        let ore = content.resources.id("iron_ore").unwrap();
        state.storage.reserve(&content.resources, ore, qty).unwrap();
    }

    #[test]
    fn start_consumes_inputs_and_reserves_slot() {
        let content = base_content();
        let mut state = base_state(&content);
        seed_ore(&content, &mut state, 10.0);
        let id = queue_steel_task(&content, &mut state, 1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut events = Vec::new();

        let started = dispatch_tasks(&content, &mut state, 0.0, &mut rng, &mut events);
        assert_eq!(started, 1);

        let ore = content.resources.id("iron_ore").unwrap();
        assert!((state.storage.quantity(ore) - 8.0).abs() < 1e-9, "2 ore consumed");
        assert_eq!(state.tasks.get(&id).unwrap().status, TaskStatus::Active);
        assert_eq!(state.modules.active_slots(crate::ModuleTypeId(0)), 1);
        assert!(events
            .iter()
            .any(|e| matches!(e.event, Event::TaskStarted { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e.event, Event::ResourceConsumed { .. })));
    }

    #[test]
    fn missing_inputs_block_with_resources_cause() {
        let content = base_content();
        let mut state = base_state(&content);
        let id = queue_steel_task(&content, &mut state, 1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut events = Vec::new();

        let started = dispatch_tasks(&content, &mut state, 0.0, &mut rng, &mut events);
        assert_eq!(started, 0);
        assert_eq!(state.tasks.blocked_cause(&id), Some(BlockCause::Resources));
        assert!(events
            .iter()
            .any(|e| matches!(e.event, Event::TaskBlocked { cause: BlockCause::Resources, .. })));
    }

    #[test]
    fn no_running_instance_blocks_with_module_cause() {
        let content = base_content();
        let mut state = base_state(&content);
        seed_ore(&content, &mut state, 10.0);
        // Fail the only assembly instance.
        state
            .modules
            .instance_mut(crate::ModuleTypeId(0), 0)
            .operational = crate::modules::OpState::Failed { until_hours: 1e9 };
        let id = queue_steel_task(&content, &mut state, 1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut events = Vec::new();

        dispatch_tasks(&content, &mut state, 0.0, &mut rng, &mut events);
        assert_eq!(state.tasks.blocked_cause(&id), Some(BlockCause::Module));
    }

    #[test]
    fn drained_battery_blocks_with_energy_cause() {
        let content = base_content();
        let mut state = base_state(&content);
        seed_ore(&content, &mut state, 10.0);
        state.energy = EnergyState::new(0.0, content.constants.battery_capacity_kwh, 0.0);
        let id = queue_steel_task(&content, &mut state, 1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut events = Vec::new();

        dispatch_tasks(&content, &mut state, 0.0, &mut rng, &mut events);
        assert_eq!(state.tasks.blocked_cause(&id), Some(BlockCause::Energy));
    }

    #[test]
    fn start_limit_caps_dispatches_per_tick() {
        let content = base_content();
        let mut state = base_state(&content);
        seed_ore(&content, &mut state, 1000.0);
        // Raise slot capacity so the limit is the binding constraint.
        state.modules.add_instances(crate::ModuleTypeId(0), 9);
        for _ in 0..10 {
            queue_steel_task(&content, &mut state, 1.0);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut events = Vec::new();

        let started = dispatch_tasks(&content, &mut state, 0.0, &mut rng, &mut events);
        assert_eq!(
            started, content.constants.max_task_starts_per_tick,
            "per-tick surge guard"
        );
        assert_eq!(state.tasks.queued_count(), 5);
    }

    #[test]
    fn full_slots_block_with_module_cause() {
        let content = base_content();
        let mut state = base_state(&content);
        seed_ore(&content, &mut state, 1000.0);
        // parallel_limit is 2 in the fixture: third task finds no slot.
        for _ in 0..3 {
            queue_steel_task(&content, &mut state, 1.0);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut events = Vec::new();

        let started = dispatch_tasks(&content, &mut state, 0.0, &mut rng, &mut events);
        assert_eq!(started, 2);
        let blocked = state.tasks.blocked_by_cause();
        assert_eq!(blocked.get(&BlockCause::Module), Some(&1));
    }

    #[test]
    fn missing_software_blocks_with_resources_cause() {
        let mut content = base_content();
        let software = content.resources.id("plc_program").unwrap();
        // Rebuild the steel recipe with a software requirement.
        let steel = content.resources.id("steel").unwrap();
        let iron_ore = content.resources.id("iron_ore").unwrap();
        let mut recipe = crate::test_fixtures::recipe(
            steel,
            1.0,
            vec![(iron_ore, 2.0)],
            1.0,
            1.0,
            crate::ModuleTypeId(0),
        );
        recipe.software_required = Some(software);
        content.recipes =
            crate::recipes::RecipeRegistry::new(content.resources.len(), vec![recipe]).unwrap();

        let mut state = base_state(&content);
        seed_ore(&content, &mut state, 10.0);
        let id = queue_steel_task(&content, &mut state, 1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut events = Vec::new();

        dispatch_tasks(&content, &mut state, 0.0, &mut rng, &mut events);
        assert_eq!(state.tasks.blocked_cause(&id), Some(BlockCause::Resources));

        // With the software present (≥ 1, not consumed) the task starts.
        state
            .storage
            .reserve(&content.resources, software, 1.0)
            .unwrap();
        state.tasks.requeue(&id, &mut state.counters);
        let started = dispatch_tasks(&content, &mut state, 0.0, &mut rng, &mut events);
        assert_eq!(started, 1);
        assert!(
            (state.storage.quantity(software) - 1.0).abs() < 1e-9,
            "software is reusable, not consumed"
        );
    }

    #[test]
    fn learning_curve_shortens_repeat_runs() {
        let content = base_content();
        let mut state = base_state(&content);
        let steel = content.resources.id("steel").unwrap();
        let recipe = content.recipes.get(steel).unwrap();

        let before = production_duration(&content, &state, recipe, 1.0, 0.0);
        // Simulate ten prior completions of the same output.
        for _ in 0..10 {
            let id = TaskQueue::next_task_id(&mut state.counters, "steel");
            let task = Task::new(id.clone(), steel, 1.0, 0);
            state.tasks.enqueue(task, &mut state.counters);
            state.tasks.pop_ready();
            state.tasks.activate(
                &id,
                SlotRef {
                    module_type: crate::ModuleTypeId(0),
                    instance: 0,
                },
                1.0,
                1.0,
                1.0,
                0.0,
            );
            state.tasks.complete(&id, 0.0);
        }
        let after = production_duration(&content, &state, recipe, 1.0, 0.0);
        assert!(
            after < before,
            "ten completions must apply the learning factor ({after} !< {before})"
        );
        assert!((after / before - content.constants.learning_curve_factor).abs() < 1e-9);
    }
}
