//! Waste recycling: collects waste streams from completed tasks and feeds
//! the recyclable fraction back as recovered material.

use super::{Subsystem, TickContext};
use crate::{Event, EventEnvelope, EventKind, FactoryContent, Quantity, ResourceId};
use std::collections::BTreeMap;

pub struct WasteRecycling {
    /// Pending waste by resource. BTreeMap keeps recycle order stable.
    pending: BTreeMap<ResourceId, Quantity>,
    total_received: Quantity,
    total_recovered: Quantity,
}

impl WasteRecycling {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            total_received: 0.0,
            total_recovered: 0.0,
        }
    }

    pub fn total_received(&self) -> Quantity {
        self.total_received
    }

    pub fn total_recovered(&self) -> Quantity {
        self.total_recovered
    }
}

impl Default for WasteRecycling {
    fn default() -> Self {
        Self::new()
    }
}

impl Subsystem for WasteRecycling {
    fn name(&self) -> &'static str {
        "waste"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::WasteGenerated]
    }

    fn handle_event(&mut self, envelope: &EventEnvelope, _content: &FactoryContent) {
        if let Event::WasteGenerated { resource, quantity } = envelope.event {
            *self.pending.entry(resource).or_insert(0.0) += quantity;
            self.total_received += quantity;
        }
    }

    fn update(&mut self, _ctx: &TickContext, content: &FactoryContent) -> Vec<Event> {
        let efficiency = content.constants.waste_recycling_efficiency;
        let mut events = Vec::new();
        for (&resource, pending) in &mut self.pending {
            if *pending <= 0.0 {
                continue;
            }
            if !content.resources.def(resource).recyclable {
                // Non-recyclable waste just accumulates in the stream.
                continue;
            }
            let recovered = *pending * efficiency;
            *pending = 0.0;
            self.total_recovered += recovered;
            events.push(Event::WasteRecycled {
                resource,
                quantity: recovered,
            });
        }
        events
    }
}
