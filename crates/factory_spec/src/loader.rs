//! Spec file loading: allow-listed paths, size caps, `recipes_file`
//! indirection, parent inheritance with depth and cycle guards, and named
//! profile application via deep merge.
//!
//! Parsing is `serde_json` only — a safe, non-executing loader with no
//! code paths into the document.

use crate::document::SpecDocument;
use anyhow::{Context, Result};
use factory_core::SimulationError;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Spec files larger than this are refused before parsing.
pub const MAX_SPEC_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum `metadata.parent` chain length.
pub const MAX_INHERITANCE_DEPTH: u32 = 10;

/// A fully resolved spec: the typed document plus the merged JSON value it
/// was built from (the value is what gets echoed into the run report, and
/// what round-trips through `load_value`).
#[derive(Debug, Clone)]
pub struct ResolvedSpec {
    pub document: SpecDocument,
    pub resolved: Value,
}

pub struct SpecLoader {
    allowed_roots: Vec<PathBuf>,
    max_bytes: u64,
}

impl SpecLoader {
    /// Reads are confined to the spec's own directory, the working
    /// directory, and /tmp.
    pub fn new(spec_path: &Path) -> Result<Self> {
        let mut allowed_roots = Vec::new();
        if let Some(dir) = spec_path.parent() {
            if let Ok(dir) = dir.canonicalize() {
                allowed_roots.push(dir);
            }
        }
        if let Ok(cwd) = std::env::current_dir() {
            if let Ok(cwd) = cwd.canonicalize() {
                allowed_roots.push(cwd);
            }
        }
        allowed_roots.push(PathBuf::from("/tmp"));
        Ok(Self {
            allowed_roots,
            max_bytes: MAX_SPEC_BYTES,
        })
    }

    /// Lower the size cap (tests).
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn load(&self, path: &Path, profile: Option<&str>) -> Result<ResolvedSpec> {
        let mut visited = HashSet::new();
        let mut value = self.load_value_recursive(path, 0, &mut visited)?;
        if let Some(profile) = profile {
            apply_profile(&mut value, profile)?;
        }
        let document: SpecDocument = serde_json::from_value(value.clone()).map_err(|err| {
            SimulationError::InvalidConfiguration {
                field: path.display().to_string(),
                reason: err.to_string(),
            }
        })?;
        Ok(ResolvedSpec {
            document,
            resolved: value,
        })
    }

    /// Build directly from an already-resolved value (round-trip path).
    pub fn load_value(&self, value: Value, profile: Option<&str>) -> Result<ResolvedSpec> {
        let mut value = value;
        if let Some(profile) = profile {
            apply_profile(&mut value, profile)?;
        }
        let document: SpecDocument = serde_json::from_value(value.clone())
            .map_err(|err| SimulationError::InvalidConfiguration {
                field: "<value>".to_string(),
                reason: err.to_string(),
            })?;
        Ok(ResolvedSpec {
            document,
            resolved: value,
        })
    }

    fn load_value_recursive(
        &self,
        path: &Path,
        depth: u32,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<Value> {
        if depth > MAX_INHERITANCE_DEPTH {
            return Err(SimulationError::InvalidConfiguration {
                field: "metadata.parent".to_string(),
                reason: format!("inheritance deeper than {MAX_INHERITANCE_DEPTH} levels"),
            }
            .into());
        }

        let canonical = self.check_path(path)?;
        if !visited.insert(canonical.clone()) {
            return Err(SimulationError::InvalidConfiguration {
                field: "metadata.parent".to_string(),
                reason: format!("inheritance cycle through {}", canonical.display()),
            }
            .into());
        }

        let mut value = self.read_json(&canonical)?;

        // External recipe list, resolved relative to this file.
        if let Some(recipes_file) = value
            .get("recipes_file")
            .and_then(Value::as_str)
            .map(str::to_string)
        {
            let recipes_path = resolve_relative(&canonical, &recipes_file);
            let recipes_canonical = self.check_path(&recipes_path)?;
            let recipes_value = self.read_json(&recipes_canonical)?;
            let recipes = recipes_value
                .get("recipes")
                .cloned()
                .unwrap_or(recipes_value);
            let object = value.as_object_mut().expect("spec root is an object");
            object.remove("recipes_file");
            object.insert("recipes".to_string(), recipes);
        }

        // Parent inheritance: child overrides parent, deep-merged.
        let parent = value
            .pointer("/metadata/parent")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(parent) = parent {
            let parent_path = resolve_relative(&canonical, &parent);
            let parent_value = self.load_value_recursive(&parent_path, depth + 1, visited)?;
            let mut merged = parent_value;
            deep_merge(&mut merged, &value);
            if let Some(metadata) = merged.pointer_mut("/metadata") {
                if let Some(object) = metadata.as_object_mut() {
                    object.remove("parent");
                }
            }
            value = merged;
        }

        visited.remove(&canonical);
        Ok(value)
    }

    fn read_json(&self, path: &Path) -> Result<Value> {
        let size = std::fs::metadata(path)
            .with_context(|| format!("reading metadata of {}", path.display()))?
            .len();
        if size > self.max_bytes {
            return Err(SimulationError::FileTooLarge {
                size,
                cap: self.max_bytes,
            }
            .into());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        if !value.is_object() {
            return Err(SimulationError::InvalidConfiguration {
                field: path.display().to_string(),
                reason: "spec root must be a JSON object".to_string(),
            }
            .into());
        }
        Ok(value)
    }

    /// Canonicalise and verify the path sits under one of the allowed roots.
    fn check_path(&self, path: &Path) -> Result<PathBuf> {
        let canonical = path
            .canonicalize()
            .with_context(|| format!("resolving {}", path.display()))?;
        let allowed = self
            .allowed_roots
            .iter()
            .any(|root| canonical.starts_with(root));
        if !allowed {
            return Err(SimulationError::InvalidPath {
                path: canonical.display().to_string(),
            }
            .into());
        }
        Ok(canonical)
    }
}

fn resolve_relative(including_file: &Path, reference: &str) -> PathBuf {
    let reference = Path::new(reference);
    if reference.is_absolute() {
        reference.to_path_buf()
    } else {
        including_file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(reference)
    }
}

/// Recursive map merge: overlay wins on conflicts, maps merge key-wise,
/// everything else replaces.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

fn apply_profile(value: &mut Value, profile: &str) -> Result<()> {
    let overrides = value
        .pointer(&format!("/profiles/{profile}"))
        .cloned()
        .ok_or_else(|| SimulationError::InvalidConfiguration {
            field: format!("profiles.{profile}"),
            reason: "profile not found".to_string(),
        })?;
    deep_merge(value, &overrides);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_spec(name: &str, value: &Value) -> PathBuf {
        let dir = std::env::temp_dir().join("factory_spec_loader_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
        path
    }

    #[test]
    fn deep_merge_is_recursive_and_overlay_wins() {
        let mut base = json!({"a": {"x": 1, "y": 2}, "b": 3});
        let overlay = json!({"a": {"y": 9, "z": 10}, "c": 4});
        deep_merge(&mut base, &overlay);
        assert_eq!(base, json!({"a": {"x": 1, "y": 9, "z": 10}, "b": 3, "c": 4}));
    }

    #[test]
    fn parent_inheritance_merges_child_over_parent() {
        let parent = write_spec(
            "parent.json",
            &json!({
                "metadata": {"name": "parent", "version": "1"},
                "constraints": {"solar_capacity_kw": 100.0, "battery_capacity_kwh": 500.0}
            }),
        );
        let child = write_spec(
            "child.json",
            &json!({
                "metadata": {"name": "child", "version": "2", "parent": parent.to_str().unwrap()},
                "constraints": {"solar_capacity_kw": 250.0}
            }),
        );

        let loader = SpecLoader::new(&child).unwrap();
        let resolved = loader.load(&child, None).unwrap();
        assert_eq!(resolved.document.metadata.name, "child");
        assert_eq!(resolved.document.constraints.solar_capacity_kw, 250.0);
        assert_eq!(resolved.document.constraints.battery_capacity_kwh, 500.0);
    }

    #[test]
    fn inheritance_cycle_is_rejected() {
        let a_path = std::env::temp_dir()
            .join("factory_spec_loader_tests")
            .join("cycle_a.json");
        let b_path = std::env::temp_dir()
            .join("factory_spec_loader_tests")
            .join("cycle_b.json");
        write_spec(
            "cycle_a.json",
            &json!({"metadata": {"parent": b_path.to_str().unwrap()}}),
        );
        write_spec(
            "cycle_b.json",
            &json!({"metadata": {"parent": a_path.to_str().unwrap()}}),
        );

        let loader = SpecLoader::new(&a_path).unwrap();
        let err = loader.load(&a_path, None).unwrap_err();
        let sim_err = err.downcast_ref::<SimulationError>().unwrap();
        assert!(matches!(
            sim_err,
            SimulationError::InvalidConfiguration { field, .. } if field == "metadata.parent"
        ));
    }

    #[test]
    fn oversized_spec_is_refused_before_parse() {
        let path = write_spec("big.json", &json!({"metadata": {"name": "big"}}));
        let loader = SpecLoader::new(&path).unwrap().with_max_bytes(4);
        let err = loader.load(&path, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SimulationError>(),
            Some(SimulationError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn path_outside_allow_list_is_rejected() {
        let spec = write_spec("allowed.json", &json!({"metadata": {"name": "ok"}}));
        let loader = SpecLoader::new(&spec).unwrap();
        // /proc/self/status exists but is outside spec dir, cwd, and /tmp.
        let err = loader
            .load(Path::new("/proc/self/status"), None)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SimulationError>(),
            Some(SimulationError::InvalidPath { .. })
        ));
    }

    #[test]
    fn profile_overrides_apply_over_base() {
        let path = write_spec(
            "profiled.json",
            &json!({
                "metadata": {"name": "profiled"},
                "constraints": {"solar_capacity_kw": 100.0},
                "profiles": {
                    "sunny": {"constraints": {"solar_capacity_kw": 400.0}}
                }
            }),
        );
        let loader = SpecLoader::new(&path).unwrap();
        let base = loader.load(&path, None).unwrap();
        assert_eq!(base.document.constraints.solar_capacity_kw, 100.0);
        let sunny = loader.load(&path, Some("sunny")).unwrap();
        assert_eq!(sunny.document.constraints.solar_capacity_kw, 400.0);
    }

    #[test]
    fn unknown_profile_is_config_error() {
        let path = write_spec("noprofiles.json", &json!({"metadata": {"name": "x"}}));
        let loader = SpecLoader::new(&path).unwrap();
        let err = loader.load(&path, Some("ghost")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SimulationError>(),
            Some(SimulationError::InvalidConfiguration { field, .. }) if field == "profiles.ghost"
        ));
    }

    #[test]
    fn recipes_file_is_inlined() {
        let recipes = write_spec(
            "recipes.json",
            &json!({
                "recipes": [{
                    "output": "steel",
                    "output_quantity": 1.0,
                    "inputs": {"iron_ore": 2.0},
                    "energy_kwh": 1.0,
                    "time_hours": 1.0,
                    "required_module": "assembly"
                }]
            }),
        );
        let path = write_spec(
            "with_recipes_file.json",
            &json!({
                "metadata": {"name": "x"},
                "recipes_file": recipes.to_str().unwrap()
            }),
        );
        let loader = SpecLoader::new(&path).unwrap();
        let resolved = loader.load(&path, None).unwrap();
        assert_eq!(resolved.document.recipes.len(), 1);
        assert_eq!(resolved.document.recipes[0].output, "steel");
    }
}
