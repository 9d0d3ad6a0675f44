//! Fatal error taxonomy.
//!
//! Blocking conditions (insufficient resources, no free slot, energy
//! shortfall, full storage) are *not* errors — they are task statuses handled
//! by the dispatch/rescan protocol. Only conditions that unwind the tick loop
//! live here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulationError {
    /// Schema, range, or reference error during load. Carries the offending
    /// field path, e.g. `constraints.charge_efficiency`.
    #[error("invalid configuration at '{field}': {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// Recipe graph cycle found by the resolver. Carries the cycle path in
    /// visit order, first node repeated at the end.
    #[error("circular dependency: {}", path.join(" -> "))]
    CircularDependency { path: Vec<String> },

    /// Loader refused a path outside the allow-list.
    #[error("path outside allowed directories: {path}")]
    InvalidPath { path: String },

    /// Spec document larger than the configured cap.
    #[error("spec file too large: {size} bytes (cap {cap})")]
    FileTooLarge { size: u64, cap: u64 },

    /// Event drops exceeded the fatal fraction of queue capacity.
    #[error("event queue overflow: {dropped} events dropped (capacity {capacity})")]
    EventQueueOverflow { dropped: u64, capacity: usize },
}
