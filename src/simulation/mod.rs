//! Grid traffic simulation core
//!
//! Vehicles move cell by cell over a fixed road grid, obeying traffic
//! lights at intersections and pedestrian crossings, and optionally park
//! in street or building slots. Everything runs headless and is driven by
//! `Simulation::step`.

mod config;
mod error;
mod grid;
mod metrics;
mod parking;
mod pedestrian_crossing;
mod snapshot;
mod traffic_light;
mod types;
mod vehicle;
mod vehicle_manager;
mod world;

// Re-export public types for external use
pub use config::{DurationRange, RoadSize, SimConfig};
pub use error::{SimError, SimResult};
pub use grid::{Cell, CellKind, Grid, ParkingKind, ParkingSite};
pub use metrics::{MetricsRecorder, MetricsReport, TickSample};
pub use parking::{Occupant, ParkingRegistry, ParkingSlot, SlotEntry, SlotHandle};
pub use pedestrian_crossing::{CrossingState, PedestrianCrossing};
pub use snapshot::{CellView, ColorClass, CrossingView, LightView, OccupantView, RenderSnapshot};
pub use traffic_light::{LightState, TrafficLight};
pub use types::{
    CellCoord, Direction, DirectionSet, SlotId, VehicleId, LARGE_DIMENSIONS, MEDIUM_DIMENSIONS,
    SEED_MIXING_CONSTANT, SMALL_DIMENSIONS,
};
pub use vehicle::{
    decision_rng, Action, DecisionContext, ParkingIntent, ParkingPlan, Proposal, Vehicle,
    VehicleState, WaitReason,
};
pub use vehicle_manager::{
    commit_proposals, decide_all, detect_conflicts, retire_completed, sample_park_duration,
    spawn_vehicle, CommitState,
};
pub use world::Simulation;
