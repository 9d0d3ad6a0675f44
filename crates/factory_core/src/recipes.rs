//! Immutable recipe registry: output resource → recipe.

use crate::{Recipe, ResourceId};
use serde::{Deserialize, Serialize};

/// Built once by the loader. At most one recipe per output resource;
/// duplicates are rejected at build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeRegistry {
    /// Indexed by `ResourceId`; `None` for resources with no recipe (raw
    /// materials that can only be seeded or mined).
    by_output: Vec<Option<Recipe>>,
}

impl RecipeRegistry {
    /// `resource_count` sizes the table; recipes land at their output's slot.
    ///
    /// Returns the name-free duplicate output on conflict so the loader can
    /// attach the resource name to the error.
    pub fn new(resource_count: usize, recipes: Vec<Recipe>) -> Result<Self, ResourceId> {
        let mut by_output: Vec<Option<Recipe>> = vec![None; resource_count];
        for recipe in recipes {
            let slot = &mut by_output[recipe.output.0 as usize];
            if slot.is_some() {
                return Err(recipe.output);
            }
            *slot = Some(recipe);
        }
        Ok(Self { by_output })
    }

    pub fn get(&self, resource: ResourceId) -> Option<&Recipe> {
        self.by_output
            .get(resource.0 as usize)
            .and_then(|slot| slot.as_ref())
    }

    pub fn len(&self) -> usize {
        self.by_output.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Recipe> {
        self.by_output.iter().filter_map(|slot| slot.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModuleTypeId;

    fn recipe(output: u32) -> Recipe {
        Recipe {
            output: ResourceId(output),
            output_quantity: 1.0,
            inputs: vec![],
            energy_kwh: 1.0,
            time_hours: 1.0,
            required_module: ModuleTypeId(0),
            parallel_capable: true,
            tolerance_um: None,
            cleanroom_class: None,
            software_required: None,
            waste_products: vec![],
        }
    }

    #[test]
    fn get_finds_recipe_by_output() {
        let registry = RecipeRegistry::new(3, vec![recipe(1)]).unwrap();
        assert!(registry.get(ResourceId(1)).is_some());
        assert!(registry.get(ResourceId(0)).is_none());
        assert!(registry.get(ResourceId(2)).is_none());
    }

    #[test]
    fn duplicate_output_rejected() {
        let result = RecipeRegistry::new(2, vec![recipe(0), recipe(0)]);
        assert_eq!(result.err(), Some(ResourceId(0)));
    }

    #[test]
    fn out_of_table_lookup_is_none() {
        let registry = RecipeRegistry::new(1, vec![]).unwrap();
        assert!(registry.get(ResourceId(99)).is_none());
    }
}
