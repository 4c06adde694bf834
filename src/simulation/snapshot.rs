//! Read-only render view of the simulation
//!
//! Everything a renderer needs for one frame, detached from the live state.

use serde::Serialize;

use super::grid::CellKind;
use super::pedestrian_crossing::CrossingState;
use super::traffic_light::LightState;
use super::types::{CellCoord, Direction, VehicleId};
use super::vehicle::VehicleState;

/// How a renderer should colour a vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColorClass {
    Regular,
    Parked,
    ParkingTransition,
}

impl ColorClass {
    pub fn for_state(state: VehicleState) -> Self {
        match state {
            VehicleState::Parked => ColorClass::Parked,
            VehicleState::EnteringParking { .. } | VehicleState::ExitingParking { .. } => {
                ColorClass::ParkingTransition
            }
            _ => ColorClass::Regular,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OccupantView {
    pub vehicle: VehicleId,
    pub state: VehicleState,
    pub color: ColorClass,
    pub facing: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellView {
    pub coord: CellCoord,
    pub kind: CellKind,
    pub lanes: u8,
    pub is_intersection: bool,
    pub is_crossing: bool,
    pub parking_capacity: u32,
    /// Reserved plus occupied slot indices behind this cell
    pub parked_count: u32,
    pub occupant: Option<OccupantView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LightView {
    pub coord: CellCoord,
    pub state: LightState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CrossingView {
    pub coord: CellCoord,
    pub state: CrossingState,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderSnapshot {
    pub tick: u64,
    pub rows: i32,
    pub cols: i32,
    /// Row-major
    pub cells: Vec<CellView>,
    pub lights: Vec<LightView>,
    pub crossings: Vec<CrossingView>,
    /// Vehicles currently off the road in a parking slot
    pub parked_vehicles: Vec<(VehicleId, CellCoord)>,
}

impl RenderSnapshot {
    pub fn cell(&self, coord: CellCoord) -> Option<&CellView> {
        if !(0..self.rows).contains(&coord.row) || !(0..self.cols).contains(&coord.col) {
            return None;
        }
        self.cells.get((coord.row * self.cols + coord.col) as usize)
    }

    pub fn occupied_cells(&self) -> impl Iterator<Item = &CellView> {
        self.cells.iter().filter(|c| c.occupant.is_some())
    }
}
