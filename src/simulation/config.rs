//! Run configuration
//!
//! A fully-resolved `SimConfig` is the only input the core needs. The
//! defaults are the parameters the headless runner uses when no flags are
//! given.

use serde::Serialize;
use std::str::FromStr;

use super::error::{SimError, SimResult};
use super::types::{CellCoord, LARGE_DIMENSIONS, MEDIUM_DIMENSIONS, SMALL_DIMENSIONS};

/// Size tier of the generated road grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RoadSize {
    Small,
    Medium,
    Large,
}

impl RoadSize {
    /// (rows, columns)
    pub fn dimensions(self) -> (i32, i32) {
        match self {
            RoadSize::Small => SMALL_DIMENSIONS,
            RoadSize::Medium => MEDIUM_DIMENSIONS,
            RoadSize::Large => LARGE_DIMENSIONS,
        }
    }
}

impl FromStr for RoadSize {
    type Err = SimError;

    fn from_str(s: &str) -> SimResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" => Ok(RoadSize::Small),
            "medium" => Ok(RoadSize::Medium),
            "large" => Ok(RoadSize::Large),
            other => Err(SimError::Configuration(format!(
                "unknown road size '{other}' (expected small, medium or large)"
            ))),
        }
    }
}

/// Inclusive range of tick durations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DurationRange {
    pub min: u32,
    pub max: u32,
}

impl DurationRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimConfig {
    pub road_size: RoadSize,
    /// Number of ticks `Simulation::run` executes
    pub total_ticks: u64,

    pub red_duration: u32,
    pub green_duration: u32,

    /// Cooldown after a crossing goes quiet, before it may activate again
    pub crossing_inactive: DurationRange,
    /// How long pedestrians block the crossing once it activates
    pub crossing_active: DurationRange,
    /// Chance per eligible tick that an idle crossing activates
    pub crossing_activation_probability: f64,

    pub parking_enabled: bool,
    /// Mean parked duration in ticks
    pub avg_parking_time: u32,
    /// Ticks spent pulling into and out of a slot
    pub parking_delay_steps: u32,
    /// Chance per tick that a moving vehicle starts looking for parking
    pub parking_probability: f64,
    /// Maximum lane distance from a vehicle to a slot's access cell
    pub parking_search_radius: u32,
    pub building_parking_capacity: u32,
    /// Fraction of every slot pre-filled with background occupants
    pub parking_initial_occupancy: f64,

    /// Chance to turn at a branch point instead of continuing straight
    pub turn_probability: f64,
    /// One arrival every `arrival_interval` ticks
    pub arrival_interval: u64,
    /// Consecutive held ticks after which a road vehicle stops wandering and
    /// heads for the nearest exit, and a parked vehicle whose stay is over
    /// takes priority onto its access cell
    pub stall_patience: u32,
    /// Restrict arrivals to these spawn cells; `None` uses every spawn cell
    pub spawn_cells: Option<Vec<CellCoord>>,

    pub seed: u64,
    /// Keep a per-tick time series in the final report
    pub record_series: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            road_size: RoadSize::Small,
            total_ticks: 50,
            red_duration: 5,
            green_duration: 4,
            crossing_inactive: DurationRange::new(2, 6),
            crossing_active: DurationRange::new(1, 3),
            crossing_activation_probability: 0.3,
            parking_enabled: false,
            avg_parking_time: 5,
            parking_delay_steps: 1,
            parking_probability: 0.3,
            parking_search_radius: 2,
            building_parking_capacity: 10,
            parking_initial_occupancy: 0.3,
            turn_probability: 0.5,
            arrival_interval: 1,
            stall_patience: 10,
            spawn_cells: None,
            seed: 42,
            record_series: true,
        }
    }
}

impl SimConfig {
    /// Check every field that does not depend on the grid layout.
    /// Spawn cells are checked against the grid by `Simulation::new`.
    pub fn validate(&self) -> SimResult<()> {
        fn positive(name: &str, value: u64) -> SimResult<()> {
            if value == 0 {
                return Err(SimError::Configuration(format!("{name} must be positive")));
            }
            Ok(())
        }

        fn probability(name: &str, value: f64) -> SimResult<()> {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimError::Configuration(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
            Ok(())
        }

        fn range(name: &str, value: DurationRange) -> SimResult<()> {
            if value.min == 0 || value.min > value.max {
                return Err(SimError::Configuration(format!(
                    "{name} must satisfy 0 < min <= max, got {}..={}",
                    value.min, value.max
                )));
            }
            Ok(())
        }

        positive("total_ticks", self.total_ticks)?;
        positive("red_duration", self.red_duration as u64)?;
        positive("green_duration", self.green_duration as u64)?;
        positive("arrival_interval", self.arrival_interval)?;
        positive("stall_patience", self.stall_patience as u64)?;
        range("crossing_inactive", self.crossing_inactive)?;
        range("crossing_active", self.crossing_active)?;
        probability(
            "crossing_activation_probability",
            self.crossing_activation_probability,
        )?;
        probability("turn_probability", self.turn_probability)?;

        if self.parking_enabled {
            positive("avg_parking_time", self.avg_parking_time as u64)?;
            positive(
                "building_parking_capacity",
                self.building_parking_capacity as u64,
            )?;
            probability("parking_probability", self.parking_probability)?;
            probability("parking_initial_occupancy", self.parking_initial_occupancy)?;
        }

        if let Some(cells) = &self.spawn_cells {
            if cells.is_empty() {
                return Err(SimError::Configuration(
                    "spawn_cells must not be empty when given".to_string(),
                ));
            }
        }

        Ok(())
    }
}
