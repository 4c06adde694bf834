//! Traffic light logic for the grid simulation
//!
//! Each intersection cell gets one light cycling RED -> GREEN -> RED. The
//! light is a countdown state machine, but its state after `k` advances is
//! always `state_at(k)`, so it can be checked without running a simulation.

use serde::Serialize;

use super::types::CellCoord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LightState {
    Red,
    Green,
}

/// A traffic light bound to one intersection cell
#[derive(Debug, Clone)]
pub struct TrafficLight {
    pub coord: CellCoord,
    red_duration: u32,
    green_duration: u32,
    phase_offset: u32,
    state: LightState,
    /// Ticks left in the current state, always >= 1 between advances
    countdown: u32,
}

impl TrafficLight {
    /// Create a light; `index` is the light's position among all
    /// intersections and fixes its phase offset
    pub fn new(coord: CellCoord, index: usize, red_duration: u32, green_duration: u32) -> Self {
        let cycle = red_duration.saturating_add(green_duration);
        let phase_offset = (index as u64 % cycle as u64) as u32;

        let mut light = Self {
            coord,
            red_duration,
            green_duration,
            phase_offset,
            state: LightState::Red,
            countdown: red_duration,
        };

        // Position the countdown at tick 0 of the cycle
        let phase = light.phase(0);
        if phase < red_duration {
            light.state = LightState::Red;
            light.countdown = red_duration - phase;
        } else {
            light.state = LightState::Green;
            light.countdown = cycle - phase;
        }
        light
    }

    fn cycle(&self) -> u32 {
        self.red_duration.saturating_add(self.green_duration)
    }

    fn phase(&self, tick: u64) -> u32 {
        ((tick + self.phase_offset as u64) % self.cycle() as u64) as u32
    }

    /// State at `tick`: GREEN iff `(tick + offset) mod (red + green) >= red`
    pub fn state_at(&self, tick: u64) -> LightState {
        if self.phase(tick) >= self.red_duration {
            LightState::Green
        } else {
            LightState::Red
        }
    }

    /// Advance one tick, flipping when the countdown runs out
    pub fn advance(&mut self) {
        self.countdown -= 1;
        if self.countdown == 0 {
            match self.state {
                LightState::Red => {
                    self.state = LightState::Green;
                    self.countdown = self.green_duration;
                }
                LightState::Green => {
                    self.state = LightState::Red;
                    self.countdown = self.red_duration;
                }
            }
        }
    }

    pub fn state(&self) -> LightState {
        self.state
    }

    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    pub fn phase_offset(&self) -> u32 {
        self.phase_offset
    }

    pub fn allows_entry(&self) -> bool {
        self.state == LightState::Green
    }
}
