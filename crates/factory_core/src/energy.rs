//! Solar generation model and battery buffer.
//!
//! All flows are tracked in three cumulative totals (generated, consumed,
//! loss) so that `Σgen − Σcons − Σloss = battery − battery_initial` holds
//! exactly up to float accumulation error.

use crate::Constants;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyState {
    pub battery_kwh: f64,
    pub battery_capacity_kwh: f64,
    pub solar_capacity_kw: f64,
    pub initial_battery_kwh: f64,
    pub total_generated_kwh: f64,
    /// Energy actually served to loads (brownout shortfall excluded).
    pub total_consumed_kwh: f64,
    /// Conversion losses plus curtailed surplus.
    pub total_loss_kwh: f64,
    /// Demand that could not be served because the battery hit its reserve.
    pub total_unmet_kwh: f64,
}

impl EnergyState {
    pub fn new(solar_capacity_kw: f64, battery_capacity_kwh: f64, initial_battery_kwh: f64) -> Self {
        let battery = initial_battery_kwh.clamp(0.0, battery_capacity_kwh);
        Self {
            battery_kwh: battery,
            battery_capacity_kwh,
            solar_capacity_kw,
            initial_battery_kwh: battery,
            total_generated_kwh: 0.0,
            total_consumed_kwh: 0.0,
            total_loss_kwh: 0.0,
            total_unmet_kwh: 0.0,
        }
    }

    pub fn reserve_kwh(&self, constants: &Constants) -> f64 {
        self.battery_capacity_kwh * constants.battery_reserve_fraction
    }

    /// Battery energy a task is allowed to draw on: charge above the reserve.
    pub fn dispatchable_kwh(&self, constants: &Constants) -> f64 {
        (self.battery_kwh - self.reserve_kwh(constants)).max(0.0)
    }

    /// Power available to fund a new task this tick: current solar plus the
    /// dispatchable battery charge spread over one tick.
    pub fn available_power_kw(&self, solar_now_kw: f64, constants: &Constants) -> f64 {
        solar_now_kw + self.dispatchable_kwh(constants) / constants.dt_hours
    }

    /// Apply one tick of generation and consumption.
    ///
    /// Surplus charges the battery at `charge_efficiency` (the remainder is
    /// loss or curtailment); deficit discharges at `discharge_efficiency`,
    /// never below the reserve. Unserved demand is recorded, not faked.
    pub fn apply_tick(&mut self, generated_kw: f64, consumed_kw: f64, constants: &Constants) {
        let dt = constants.dt_hours;
        let gen_kwh = generated_kw * dt;
        let demand_kwh = consumed_kw * dt;
        self.total_generated_kwh += gen_kwh;

        if gen_kwh >= demand_kwh {
            let surplus = gen_kwh - demand_kwh;
            let headroom = self.battery_capacity_kwh - self.battery_kwh;
            let stored = (surplus * constants.charge_efficiency).min(headroom);
            self.battery_kwh += stored;
            self.total_consumed_kwh += demand_kwh;
            self.total_loss_kwh += surplus - stored;
        } else {
            let deficit = demand_kwh - gen_kwh;
            let draw_needed = deficit / constants.discharge_efficiency;
            let available = (self.battery_kwh - self.reserve_kwh(constants)).max(0.0);
            let draw = draw_needed.min(available);
            let supplied = draw * constants.discharge_efficiency;
            self.battery_kwh -= draw;
            self.total_consumed_kwh += gen_kwh + supplied;
            self.total_loss_kwh += draw - supplied;
            self.total_unmet_kwh += deficit - supplied;
        }

        debug_assert!(
            self.battery_kwh >= -1e-9 && self.battery_kwh <= self.battery_capacity_kwh + 1e-9,
            "battery out of range: {}",
            self.battery_kwh
        );
        self.battery_kwh = self.battery_kwh.clamp(0.0, self.battery_capacity_kwh);
    }

    /// Conservation residual — zero (to float noise) at all times.
    pub fn conservation_residual_kwh(&self) -> f64 {
        self.total_generated_kwh
            - self.total_consumed_kwh
            - self.total_loss_kwh
            - (self.battery_kwh - self.initial_battery_kwh)
    }
}

// ---------------------------------------------------------------------------
// Solar model
// ---------------------------------------------------------------------------

/// Normalised sun factor for the hour of day: a half-sine over 06:00–18:00
/// scaled so the daily integral equals `peak_sun_hours`.
pub fn solar_factor(time_hours: f64, constants: &Constants) -> f64 {
    let hour = time_hours.rem_euclid(24.0);
    if !(6.0..18.0).contains(&hour) {
        return 0.0;
    }
    // ∫ sin(π(h−6)/12) dh over (6, 18) = 24/π, so this amplitude makes the
    // daily integral exactly peak_sun_hours.
    let amplitude = constants.peak_sun_hours * std::f64::consts::PI / 24.0;
    amplitude * ((hour - 6.0) * std::f64::consts::PI / 12.0).sin()
}

/// Cloud-cover factor in [0.1, 1.0]. Draws one RNG sample per call when
/// weather is enabled, none otherwise — callers must keep the call pattern
/// deterministic.
pub fn weather_factor(rng: &mut impl Rng, constants: &Constants, enabled: bool) -> f64 {
    if !enabled {
        return 1.0;
    }
    let u: f64 = rng.gen_range(0.8..=1.2);
    (1.0 - constants.average_cloud_cover * u).clamp(0.1, 1.0)
}

/// Instantaneous solar generation in kW.
pub fn generation_kw(time_hours: f64, weather: f64, state: &EnergyState, constants: &Constants) -> f64 {
    state.solar_capacity_kw * solar_factor(time_hours, constants) * weather
}
