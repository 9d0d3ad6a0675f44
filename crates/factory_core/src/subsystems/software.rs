//! Software production tracking: versions and bug rates of produced
//! software resources, aggregated into a reliability reading that derates
//! the quality of software-dependent recipes.

use super::{Subsystem, TickContext};
use crate::{Event, EventEnvelope, EventKind, FactoryContent, ResourceId};
use std::collections::BTreeMap;

struct Package {
    version: u32,
    bug_rate: f64,
}

pub struct SoftwareProduction {
    library: BTreeMap<ResourceId, Package>,
    /// Productions seen since the last update, to be announced.
    fresh: Vec<ResourceId>,
}

impl SoftwareProduction {
    pub fn new() -> Self {
        Self {
            library: BTreeMap::new(),
            fresh: Vec::new(),
        }
    }

    /// Worst-package reliability; 1.0 with an empty library.
    fn aggregate_reliability(&self) -> f64 {
        self.library
            .values()
            .map(|p| 1.0 - p.bug_rate)
            .fold(1.0, f64::min)
    }
}

impl Default for SoftwareProduction {
    fn default() -> Self {
        Self::new()
    }
}

impl Subsystem for SoftwareProduction {
    fn name(&self) -> &'static str {
        "software"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::ResourceProduced]
    }

    fn handle_event(&mut self, envelope: &EventEnvelope, content: &FactoryContent) {
        let Event::ResourceProduced { resource, .. } = envelope.event else {
            return;
        };
        if !content.resources.def(resource).software {
            return;
        }
        let initial_bug_rate = content.constants.initial_software_bug_rate;
        let package = self.library.entry(resource).or_insert(Package {
            version: 0,
            bug_rate: initial_bug_rate,
        });
        // Each release halves the remaining bug rate.
        package.version += 1;
        package.bug_rate = initial_bug_rate / f64::from(package.version);
        self.fresh.push(resource);
    }

    fn update(&mut self, _ctx: &TickContext, _content: &FactoryContent) -> Vec<Event> {
        let reliability = self.aggregate_reliability();
        self.fresh
            .drain(..)
            .map(|resource| {
                let package = &self.library[&resource];
                Event::SoftwareDeveloped {
                    resource,
                    version: package.version,
                    reliability,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{base_content, envelope_for};
    use crate::TaskId;

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

    fn produced(resource: ResourceId) -> EventEnvelope {
        envelope_for(Event::ResourceProduced {
            resource,
            quantity: 1.0,
            task_id: TaskId("task_00000_sw".to_string()),
        })
    }

    #[test]
    fn software_production_registers_a_package() {
        let content = base_content();
        let sw = content.resources.id("plc_program").unwrap();
        let mut software = SoftwareProduction::new();
        software.handle_event(&produced(sw), &content);
        let events = software.update(&ctx(), &content);
        let Event::SoftwareDeveloped {
            resource,
            version,
            reliability,
        } = events[0]
        else {
            panic!("expected SoftwareDeveloped");
        };
        assert_eq!(resource, sw);
        assert_eq!(version, 1);
        assert!((reliability - (1.0 - content.constants.initial_software_bug_rate)).abs() < 1e-9);
    }

    #[test]
    fn repeat_releases_improve_reliability() {
        let content = base_content();
        let sw = content.resources.id("plc_program").unwrap();
        let mut software = SoftwareProduction::new();
        software.handle_event(&produced(sw), &content);
        software.update(&ctx(), &content);
        software.handle_event(&produced(sw), &content);
        let events = software.update(&ctx(), &content);
        let Event::SoftwareDeveloped {
            version,
            reliability,
            ..
        } = events[0]
        else {
            panic!("expected SoftwareDeveloped");
        };
        assert_eq!(version, 2);
        assert!(reliability > 1.0 - content.constants.initial_software_bug_rate);
    }

    #[test]
    fn non_software_production_is_ignored() {
        let content = base_content();
        let steel = content.resources.id("steel").unwrap();
        let mut software = SoftwareProduction::new();
        software.handle_event(&produced(steel), &content);
        assert!(software.update(&ctx(), &content).is_empty());
    }
}
