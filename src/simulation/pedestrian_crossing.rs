//! Pedestrian crossing logic
//!
//! A crossing idles through a cooldown, then activates at random, but only
//! while no vehicle is on it or about to enter it. An active crossing refuses
//! entry until its countdown runs out.

use rand::Rng;
use serde::Serialize;

use super::config::DurationRange;
use super::types::CellCoord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CrossingState {
    Inactive,
    Active,
}

#[derive(Debug, Clone)]
pub struct PedestrianCrossing {
    pub coord: CellCoord,
    /// Cells from which a vehicle can move onto the crossing
    pub approaches: Vec<CellCoord>,
    inactive_range: DurationRange,
    active_range: DurationRange,
    activation_probability: f64,
    state: CrossingState,
    /// Remaining cooldown (inactive) or remaining blocking time (active)
    countdown: u32,
}

impl PedestrianCrossing {
    /// New crossings start inactive with no cooldown
    pub fn new(
        coord: CellCoord,
        approaches: Vec<CellCoord>,
        inactive_range: DurationRange,
        active_range: DurationRange,
        activation_probability: f64,
    ) -> Self {
        Self {
            coord,
            approaches,
            inactive_range,
            active_range,
            activation_probability,
            state: CrossingState::Inactive,
            countdown: 0,
        }
    }

    /// Advance one tick.
    ///
    /// `is_clear` reports whether the crossing cell and its approach cells
    /// were unoccupied at the start of the tick; activation is only rolled
    /// when it holds and the cooldown has elapsed.
    pub fn advance<R: Rng>(&mut self, is_clear: bool, rng: &mut R) {
        match self.state {
            CrossingState::Active => {
                self.countdown = self.countdown.saturating_sub(1);
                if self.countdown == 0 {
                    self.state = CrossingState::Inactive;
                    self.countdown =
                        rng.random_range(self.inactive_range.min..=self.inactive_range.max);
                }
            }
            CrossingState::Inactive => {
                if self.countdown > 0 {
                    self.countdown -= 1;
                    return;
                }
                if is_clear && rng.random_bool(self.activation_probability) {
                    self.state = CrossingState::Active;
                    self.countdown =
                        rng.random_range(self.active_range.min..=self.active_range.max);
                }
            }
        }
    }

    pub fn state(&self) -> CrossingState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == CrossingState::Active
    }

    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    pub fn allows_entry(&self) -> bool {
        !self.is_active()
    }
}
