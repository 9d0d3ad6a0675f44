//! Requirements resolver: recursive recipe expansion with cycle detection.
//!
//! Two entry points:
//! - [`Resolver::total_requirements`] — pure aggregate raw-material demand
//!   for a goal, memoised in a bounded LRU cache.
//! - [`Resolver::expand_goal`] — emits a dependency-ordered set of tasks
//!   into the queue, creating child tasks only for input deficits after
//!   consulting the storage ledger.

use crate::logbuf::LogLevel;
use crate::lru::LruCache;
use crate::tasks::TaskQueue;
use crate::{
    FactoryContent, FactoryState, Quantity, ResourceId, SimulationError, Task, TaskId,
};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Cache key quantisation: 3 decimal places.
fn quantise(qty: Quantity) -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    let q = (qty * 1000.0).round() as i64;
    q
}

pub struct Resolver {
    cache: LruCache<(ResourceId, i64), BTreeMap<ResourceId, Quantity>>,
}

impl Resolver {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            cache: LruCache::new(cache_capacity),
        }
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache.hits()
    }

    /// Total raw-material demand (resources with no recipe) to produce
    /// `qty` of `goal`, ignoring current inventory.
    ///
    /// Fails with [`SimulationError::CircularDependency`] if the recipe graph
    /// reaches a resource already on the recursion path.
    pub fn total_requirements(
        &mut self,
        content: &FactoryContent,
        goal: ResourceId,
        qty: Quantity,
    ) -> Result<BTreeMap<ResourceId, Quantity>, SimulationError> {
        let mut path = Vec::new();
        let mut on_path = HashSet::new();
        self.requirements_inner(content, goal, qty, &mut path, &mut on_path)
    }

    fn requirements_inner(
        &mut self,
        content: &FactoryContent,
        resource: ResourceId,
        qty: Quantity,
        path: &mut Vec<ResourceId>,
        on_path: &mut HashSet<ResourceId>,
    ) -> Result<BTreeMap<ResourceId, Quantity>, SimulationError> {
        if on_path.contains(&resource) {
            return Err(cycle_error(content, path, resource));
        }

        let key = (resource, quantise(qty));
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }

        let Some(recipe) = content.recipes.get(resource) else {
            // Leaf: raw material to be mined or seeded.
            return Ok(BTreeMap::from([(resource, qty)]));
        };
        let recipe = recipe.clone();

        path.push(resource);
        on_path.insert(resource);

        let mut totals: BTreeMap<ResourceId, Quantity> = BTreeMap::new();
        for &(input, input_qty) in &recipe.inputs {
            let needed = input_qty * qty / recipe.output_quantity;
            let sub = self.requirements_inner(content, input, needed, path, on_path)?;
            for (raw, amount) in sub {
                *totals.entry(raw).or_insert(0.0) += amount;
            }
        }

        on_path.remove(&resource);
        path.pop();

        self.cache.put(key, totals.clone());
        Ok(totals)
    }

    /// Expand a goal into tasks. Returns the root task id, or `None` when
    /// the goal has no recipe (logged, not fatal — the caller decides).
    ///
    /// Child tasks are created per input only for the deficit against the
    /// current ledger, at `priority + 1`; software dependencies at
    /// `priority + 2`. Dependency edges carry the created child ids.
    pub fn expand_goal(
        &mut self,
        content: &FactoryContent,
        state: &mut FactoryState,
        goal: ResourceId,
        qty: Quantity,
        priority: u32,
    ) -> Result<Option<TaskId>, SimulationError> {
        let mut path = Vec::new();
        let mut on_path = HashSet::new();
        let mut software_tasks = HashMap::new();
        self.expand_inner(
            content,
            state,
            goal,
            qty,
            priority,
            &mut path,
            &mut on_path,
            &mut software_tasks,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_inner(
        &mut self,
        content: &FactoryContent,
        state: &mut FactoryState,
        resource: ResourceId,
        qty: Quantity,
        priority: u32,
        path: &mut Vec<ResourceId>,
        on_path: &mut HashSet<ResourceId>,
        software_tasks: &mut HashMap<ResourceId, TaskId>,
    ) -> Result<Option<TaskId>, SimulationError> {
        if on_path.contains(&resource) {
            return Err(cycle_error(content, path, resource));
        }

        let Some(recipe) = content.recipes.get(resource) else {
            state.log.push(
                state.time_hours,
                LogLevel::Warn,
                format!(
                    "no recipe for '{}' — treating as unmined raw material",
                    content.resources.name(resource)
                ),
            );
            return Ok(None);
        };
        let recipe = recipe.clone();

        path.push(resource);
        on_path.insert(resource);

        let id = TaskQueue::next_task_id(&mut state.counters, content.resources.name(resource));
        let mut task = Task::new(id.clone(), resource, qty, priority);

        let buffer = content.constants.dependency_buffer_factor;
        for &(input, input_qty) in &recipe.inputs {
            let needed = input_qty * qty / recipe.output_quantity;
            let available = state.storage.quantity(input);
            if available >= needed {
                continue;
            }
            let deficit = (needed - available) * buffer;
            if let Some(dep) = self.expand_inner(
                content,
                state,
                input,
                deficit,
                priority + 1,
                path,
                on_path,
                software_tasks,
            )? {
                task.dependencies.insert(dep);
            }
        }

        if let Some(software) = recipe.software_required {
            if state.storage.quantity(software) < 1.0 {
                // One development task per software resource per expansion.
                if let Some(existing) = software_tasks.get(&software) {
                    task.dependencies.insert(existing.clone());
                } else if let Some(dep) = self.expand_inner(
                    content,
                    state,
                    software,
                    1.0,
                    priority + 2,
                    path,
                    on_path,
                    software_tasks,
                )? {
                    software_tasks.insert(software, dep.clone());
                    task.dependencies.insert(dep);
                }
            }
        }

        on_path.remove(&resource);
        path.pop();

        state.log.push(
            state.time_hours,
            LogLevel::Debug,
            format!(
                "created {} for {:.3} {} (priority {})",
                id,
                qty,
                content.resources.name(resource),
                priority
            ),
        );
        state.tasks.enqueue(task, &mut state.counters);
        Ok(Some(id))
    }
}

fn cycle_error(
    content: &FactoryContent,
    path: &[ResourceId],
    repeat: ResourceId,
) -> SimulationError {
    let mut names: Vec<String> = path
        .iter()
        .map(|r| content.resources.name(*r).to_string())
        .collect();
    names.push(content.resources.name(repeat).to_string());
    SimulationError::CircularDependency { path: names }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{base_content, base_state, chain_content};

    #[test]
    fn leaf_resource_is_its_own_requirement() {
        let content = base_content();
        let mut resolver = Resolver::new(16);
        let ore = content.resources.id("iron_ore").unwrap();
        let reqs = resolver.total_requirements(&content, ore, 5.0).unwrap();
        assert_eq!(reqs.len(), 1);
        assert!((reqs[&ore] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn requirements_scale_through_the_chain() {
        let content = chain_content();
        let mut resolver = Resolver::new(16);
        let c = content.resources.id("gamma").unwrap();
        let a = content.resources.id("alpha").unwrap();
        // gamma ← 1 beta, beta ← 1 alpha: 1 gamma needs 1 alpha.
        let reqs = resolver.total_requirements(&content, c, 1.0).unwrap();
        assert_eq!(reqs.len(), 1);
        assert!((reqs[&a] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn repeated_query_hits_the_cache() {
        let content = chain_content();
        let mut resolver = Resolver::new(16);
        let c = content.resources.id("gamma").unwrap();
        resolver.total_requirements(&content, c, 1.0).unwrap();
        let hits_before = resolver.cache_hits();
        resolver.total_requirements(&content, c, 1.0).unwrap();
        assert!(resolver.cache_hits() > hits_before);
    }

    #[test]
    fn expand_creates_dependency_chain_with_incremented_priorities() {
        let content = chain_content();
        let mut state = base_state(&content);
        // No alpha or beta on hand: full chain expands.
        let mut resolver = Resolver::new(16);
        let gamma = content.resources.id("gamma").unwrap();
        let root = resolver
            .expand_goal(&content, &mut state, gamma, 1.0, 0)
            .unwrap()
            .expect("gamma has a recipe");

        let root_task = state.tasks.get(&root).unwrap();
        assert_eq!(root_task.priority, 0);
        assert_eq!(root_task.dependencies.len(), 1);

        let beta_id = root_task.dependencies.iter().next().unwrap().clone();
        let beta_task = state.tasks.get(&beta_id).unwrap();
        assert_eq!(beta_task.priority, 1);
    }

    #[test]
    fn expand_skips_inputs_covered_by_storage() {
        let content = chain_content();
        let mut state = base_state(&content);
        let beta = content.resources.id("beta").unwrap();
        state
            .storage
            .reserve(&content.resources, beta, 10.0)
            .unwrap();

        let mut resolver = Resolver::new(16);
        let gamma = content.resources.id("gamma").unwrap();
        let root = resolver
            .expand_goal(&content, &mut state, gamma, 1.0, 0)
            .unwrap()
            .unwrap();
        assert!(
            state.tasks.get(&root).unwrap().dependencies.is_empty(),
            "beta on hand — no dependency task expected"
        );
    }

    #[test]
    fn cycle_is_fatal_with_full_path() {
        let content = crate::test_fixtures::cyclic_content();
        let mut resolver = Resolver::new(16);
        let a = content.resources.id("ouro_a").unwrap();
        let err = resolver.total_requirements(&content, a, 1.0).unwrap_err();
        match err {
            SimulationError::CircularDependency { path } => {
                assert_eq!(path.first().map(String::as_str), Some("ouro_a"));
                assert_eq!(path.last().map(String::as_str), Some("ouro_a"));
                assert!(path.len() >= 3, "path should show the loop: {path:?}");
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn expand_detects_cycles_too() {
        let content = crate::test_fixtures::cyclic_content();
        let mut state = base_state(&content);
        let mut resolver = Resolver::new(16);
        let a = content.resources.id("ouro_a").unwrap();
        let err = resolver
            .expand_goal(&content, &mut state, a, 1.0, 0)
            .unwrap_err();
        assert!(matches!(err, SimulationError::CircularDependency { .. }));
    }
}
