//! Error types for the simulation core

use thiserror::Error;

use super::types::{CellCoord, SlotId, VehicleId};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Invalid configuration or road layout; fatal at construction
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No parking slot with free capacity within the search radius.
    /// Recovered locally by the scheduler, never returned from `step()`.
    #[error("no free parking slot near {near}")]
    CapacityExceeded { near: CellCoord },

    /// Two proposals targeted the same cell in one tick
    #[error("tick {tick}: vehicles {first} and {second} both target cell {cell}")]
    OccupancyConflict {
        tick: u64,
        cell: CellCoord,
        first: VehicleId,
        second: VehicleId,
    },

    #[error("cell {0} is outside the grid")]
    OutOfBounds(CellCoord),

    #[error("{0} not found")]
    NotFound(String),

    #[error("slot {slot:?} has no entry {index}")]
    UnknownSlot { slot: SlotId, index: usize },
}

pub type SimResult<T> = Result<T, SimError>;
