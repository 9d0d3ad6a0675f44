//! Cleanroom contamination: particle counts per cleanroom-capable module
//! type, periodic cleaning, and the effective class / yield readings used
//! by the dispatch engine.

use super::{Subsystem, TickContext};
use crate::{Event, EventEnvelope, EventKind, FactoryContent, ModuleTypeId};
use std::collections::BTreeMap;

struct Room {
    /// Particle budget of the nominal class, also the post-cleaning level.
    base_particles: f64,
    particles: f64,
    last_cleaned_hours: f64,
}

pub struct ContaminationControl {
    rooms: BTreeMap<ModuleTypeId, Room>,
    initialised: bool,
}

impl ContaminationControl {
    pub fn new() -> Self {
        Self {
            rooms: BTreeMap::new(),
            initialised: false,
        }
    }

    fn init_rooms(&mut self, content: &FactoryContent) {
        for module_type in content.module_types.ids() {
            if let Some(class) = content.module_types.def(module_type).cleanroom_capable {
                self.rooms.insert(
                    module_type,
                    Room {
                        base_particles: f64::from(class),
                        particles: f64::from(class),
                        last_cleaned_hours: 0.0,
                    },
                );
            }
        }
        self.initialised = true;
    }

    /// Smallest power-of-ten class covering the particle level.
    fn effective_class(particles: f64) -> u32 {
        let mut class = 1u32;
        while f64::from(class) < particles && class < 1_000_000_000 {
            class = class.saturating_mul(10);
        }
        class
    }
}

impl Default for ContaminationControl {
    fn default() -> Self {
        Self::new()
    }
}

impl Subsystem for ContaminationControl {
    fn name(&self) -> &'static str {
        "contamination"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[]
    }

    fn handle_event(&mut self, _envelope: &EventEnvelope, _content: &FactoryContent) {}

    fn update(&mut self, ctx: &TickContext, content: &FactoryContent) -> Vec<Event> {
        if !self.initialised {
            self.init_rooms(content);
        }
        let constants = &content.constants;
        let mut events = Vec::new();

        for (&module_type, room) in &mut self.rooms {
            let activity = ctx
                .module_activity
                .get(module_type.0 as usize)
                .map_or(0, |a| a.active_slots);
            room.particles +=
                f64::from(activity) * constants.contamination_particles_per_slot_hour * ctx.dt_hours;

            if ctx.time_hours - room.last_cleaned_hours
                >= constants.cleanroom_cleaning_interval_hours
            {
                room.particles = room.base_particles;
                room.last_cleaned_hours = ctx.time_hours;
            }

            let effective_class = Self::effective_class(room.particles);
            let yield_factor = (room.base_particles / room.particles).clamp(0.5, 1.0);
            events.push(Event::ContaminationReport {
                module_type,
                effective_class,
                yield_factor,
            });
        }
        events
    }
}
