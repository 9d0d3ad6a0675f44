//! Transport: a bounded AGV pool moving materials between storage and the
//! production floor. Jobs follow consumption (storage → module) and
//! production (module → storage); each active transport draws a fixed power
//! overhead the energy phase folds into base consumption.

use super::{Subsystem, TickContext};
use crate::{Event, EventEnvelope, EventKind, FactoryContent, Quantity, ResourceId};
use std::collections::VecDeque;

#[derive(Debug, Clone)]
struct TransportJob {
    resource: ResourceId,
    quantity: Quantity,
    from: String,
    to: String,
    priority: u32,
    remaining_hours: f64,
    announced: bool,
}

pub struct TransportSystem {
    pending: VecDeque<TransportJob>,
    active: Vec<TransportJob>,
    total_completed: u64,
    /// `subsystem_data` overrides; constants apply when unset.
    fleet_override: Option<u32>,
    base_hours_override: Option<f64>,
}

impl TransportSystem {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            active: Vec::new(),
            total_completed: 0,
            fleet_override: None,
            base_hours_override: None,
        }
    }

    pub fn with_overrides(fleet_size: Option<u32>, base_hours: Option<f64>) -> Self {
        Self {
            fleet_override: fleet_size,
            base_hours_override: base_hours,
            ..Self::new()
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn total_completed(&self) -> u64 {
        self.total_completed
    }
}

impl Default for TransportSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl Subsystem for TransportSystem {
    fn name(&self) -> &'static str {
        "transport"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::ResourceConsumed, EventKind::ResourceProduced]
    }

    fn handle_event(&mut self, envelope: &EventEnvelope, content: &FactoryContent) {
        let job = match &envelope.event {
            Event::ResourceConsumed {
                resource, quantity, ..
            } => TransportJob {
                resource: *resource,
                quantity: *quantity,
                from: "storage".to_string(),
                to: "floor".to_string(),
                priority: 10,
                remaining_hours: self
                    .base_hours_override
                    .unwrap_or(content.constants.transport_base_hours),
                announced: false,
            },
            Event::ResourceProduced {
                resource, quantity, ..
            } => TransportJob {
                resource: *resource,
                quantity: *quantity,
                from: "floor".to_string(),
                to: "storage".to_string(),
                priority: 50,
                remaining_hours: self
                    .base_hours_override
                    .unwrap_or(content.constants.transport_base_hours),
                announced: false,
            },
            _ => return,
        };
        if content.resources.def(job.resource).software {
            return; // nothing physical to move
        }
        self.pending.push_back(job);
    }

    fn update(&mut self, ctx: &TickContext, content: &FactoryContent) -> Vec<Event> {
        let constants = &content.constants;
        let mut events = Vec::new();

        // Advance active jobs; completed ones leave the fleet.
        let mut still_active = Vec::with_capacity(self.active.len());
        for mut job in self.active.drain(..) {
            job.remaining_hours -= ctx.dt_hours;
            if job.remaining_hours <= 0.0 {
                self.total_completed += 1;
                events.push(Event::TransportCompleted {
                    resource: job.resource,
                    quantity: job.quantity,
                });
            } else {
                still_active.push(job);
            }
        }
        self.active = still_active;

        // Fill free AGVs, highest priority (lowest value) first.
        self.pending
            .make_contiguous()
            .sort_by_key(|job| job.priority);
        let fleet = self
            .fleet_override
            .unwrap_or(constants.max_concurrent_transports) as usize;
        while self.active.len() < fleet {
            let Some(mut job) = self.pending.pop_front() else {
                break;
            };
            if !job.announced {
                job.announced = true;
                events.push(Event::TransportRequested {
                    resource: job.resource,
                    quantity: job.quantity,
                    from: job.from.clone(),
                    to: job.to.clone(),
                    priority: job.priority,
                });
            }
            self.active.push(job);
        }

        #[allow(clippy::cast_possible_truncation)]
        let active = self.active.len() as u32;
        events.push(Event::TransportReport {
            active,
            power_kw: f64::from(active) * constants.transport_power_kw_per_active,
        });
        events
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

    fn consumed(content: &FactoryContent, qty: f64) -> EventEnvelope {
        envelope_for(Event::ResourceConsumed {
            resource: content.resources.id("iron_ore").unwrap(),
            quantity: qty,
            task_id: TaskId("task_00000_x".to_string()),
        })
    }

    #[test]
    fn consumption_spawns_inbound_transport() {
        let content = base_content();
        let mut transport = TransportSystem::new();
        transport.handle_event(&consumed(&content, 5.0), &content);
        let events = transport.update(&ctx(), &content);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::TransportRequested { from, .. } if from == "storage")));
        assert_eq!(transport.active_count(), 1);
    }

    #[test]
    fn fleet_size_caps_concurrency() {
        let mut content = base_content();
        content.constants.max_concurrent_transports = 2;
        let mut transport = TransportSystem::new();
        for _ in 0..5 {
            transport.handle_event(&consumed(&content, 1.0), &content);
        }
        transport.update(&ctx(), &content);
        assert_eq!(transport.active_count(), 2, "only two AGVs available");
    }

    #[test]
    fn jobs_complete_after_base_duration() {
        let mut content = base_content();
        content.constants.transport_base_hours = 0.1;
        let mut transport = TransportSystem::new();
        transport.handle_event(&consumed(&content, 1.0), &content);
        transport.update(&ctx(), &content); // job starts
        let events = transport.update(&ctx(), &content); // 0.1 h elapses
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::TransportCompleted { .. })));
        assert_eq!(transport.total_completed(), 1);
    }

    #[test]
    fn report_carries_power_overhead() {
        let content = base_content();
        let mut transport = TransportSystem::new();
        transport.handle_event(&consumed(&content, 1.0), &content);
        let events = transport.update(&ctx(), &content);
        let Some(Event::TransportReport { active, power_kw }) = events.last() else {
            panic!("expected trailing TransportReport");
        };
        assert_eq!(*active, 1);
        assert!((power_kw - content.constants.transport_power_kw_per_active).abs() < 1e-9);
    }

    #[test]
    fn software_is_never_transported() {
        let content = base_content();
        let mut transport = TransportSystem::new();
        transport.handle_event(
            &envelope_for(Event::ResourceProduced {
                resource: content.resources.id("plc_program").unwrap(),
                quantity: 1.0,
                task_id: TaskId("task_00000_sw".to_string()),
            }),
            &content,
        );
        transport.update(&ctx(), &content);
        assert_eq!(transport.active_count(), 0);
    }
}
