//! Thermal management: heat load from active modules and the cooling power
//! needed to reject it.

use super::{Subsystem, TickContext};
use crate::{Event, EventEnvelope, EventKind, FactoryContent, ModuleTypeId};

pub struct ThermalManagement {
    last_load_kw: f64,
    /// `subsystem_data` overrides; constants apply when unset.
    limit_override_kw: Option<f64>,
    cop_override: Option<f64>,
}

impl ThermalManagement {
    pub fn new() -> Self {
        Self {
            last_load_kw: 0.0,
            limit_override_kw: None,
            cop_override: None,
        }
    }

    pub fn with_overrides(limit_kw: Option<f64>, cooling_cop: Option<f64>) -> Self {
        Self {
            last_load_kw: 0.0,
            limit_override_kw: limit_kw,
            cop_override: cooling_cop,
        }
    }
}

impl Default for ThermalManagement {
    fn default() -> Self {
        Self::new()
    }
}

impl Subsystem for ThermalManagement {
    fn name(&self) -> &'static str {
        "thermal"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[]
    }

    fn handle_event(&mut self, _envelope: &EventEnvelope, _content: &FactoryContent) {}

    fn update(&mut self, ctx: &TickContext, content: &FactoryContent) -> Vec<Event> {
        let mut load_kw = 0.0;
        for (idx, activity) in ctx.module_activity.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let def = content.module_types.def(ModuleTypeId(idx as u32));
            load_kw += f64::from(activity.active_slots) * def.heat_output_kw;
        }
        self.last_load_kw = load_kw;

        let cop = self.cop_override.unwrap_or(content.constants.cooling_cop);
        let limit_kw = self
            .limit_override_kw
            .unwrap_or(content.constants.thermal_dissipation_limit_kw);
        let cooling_kw = if load_kw > 0.0 { load_kw / cop } else { 0.0 };

        let mut events = vec![Event::ThermalReport {
            load_kw,
            cooling_kw,
        }];
        if load_kw > limit_kw {
            events.push(Event::ThermalLimitReached { load_kw, limit_kw });
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::ModuleActivity;
    use crate::test_fixtures::base_content;

    fn ctx_with_slots(slots: u32) -> TickContext {
        TickContext {
            tick: 0,
            time_hours: 0.0,
            dt_hours: 0.1,
            storage_quantities: vec![],
            module_activity: vec![ModuleActivity {
                instances: 1,
                running: 1,
                active_slots: slots,
            }],
            active_task_count: slots as usize,
        }
    }

    #[test]
    fn idle_factory_reports_zero_load() {
        let content = base_content();
        let mut thermal = ThermalManagement::new();
        let events = thermal.update(&ctx_with_slots(0), &content);
        assert!(matches!(
            events[0],
            Event::ThermalReport { load_kw, cooling_kw } if load_kw == 0.0 && cooling_kw == 0.0
        ));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn load_scales_with_active_slots() {
        let content = base_content();
        let mut thermal = ThermalManagement::new();
        let events = thermal.update(&ctx_with_slots(3), &content);
        let Event::ThermalReport { load_kw, cooling_kw } = events[0] else {
            panic!("expected ThermalReport");
        };
        let per_slot = content.module_types.def(ModuleTypeId(0)).heat_output_kw;
        assert!((load_kw - 3.0 * per_slot).abs() < 1e-9);
        assert!((cooling_kw - load_kw / content.constants.cooling_cop).abs() < 1e-9);
    }

    #[test]
    fn limit_breach_emits_thermal_limit_reached() {
        let mut content = base_content();
        content.constants.thermal_dissipation_limit_kw = 1.0;
        let mut thermal = ThermalManagement::new();
        let events = thermal.update(&ctx_with_slots(3), &content);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, Event::ThermalLimitReached { .. })),
            "load above the dissipation limit must raise the event"
        );
    }
}
