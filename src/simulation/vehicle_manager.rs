//! Vehicle spawning, decision collection and commit
//!
//! This module holds the per-tick vehicle bookkeeping so that the world only
//! coordinates the order of steps. Occupancy and parking slots are mutated
//! here and nowhere else.

use log::debug;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};

use super::config::SimConfig;
use super::error::{SimError, SimResult};
use super::grid::Grid;
use super::metrics::MetricsRecorder;
use super::parking::ParkingRegistry;
use super::types::{CellCoord, VehicleId};
use super::vehicle::{
    decision_rng, Action, DecisionContext, ParkingIntent, ParkingPlan, Proposal, Vehicle,
    VehicleState,
};

/// Shared mutable state touched by the commit phase
pub struct CommitState<'a> {
    pub grid: &'a Grid,
    pub config: &'a SimConfig,
    pub vehicles: &'a mut BTreeMap<VehicleId, Vehicle>,
    pub occupancy: &'a mut HashMap<CellCoord, VehicleId>,
    pub parking: &'a mut ParkingRegistry,
    pub metrics: &'a mut MetricsRecorder,
}

/// Sample how long a new vehicle will stay once parked
///
/// Uniform over `avg/2 ..= avg + avg/2`, never below one tick.
pub fn sample_park_duration<R: Rng>(avg: u32, rng: &mut R) -> u32 {
    let low = (avg - avg / 2).max(1);
    let high = avg.saturating_add(avg / 2).max(low);
    rng.random_range(low..=high)
}

/// Create a vehicle on `spawn`, facing along the spawn cell's road
///
/// # Arguments
/// * `id` - The pre-generated vehicle ID
/// * `spawn` - A free spawn cell
/// * `grid` - Used to find the road direction at the spawn cell
/// * `park_duration` - Sampled stay length, `None` when parking is off
/// * `tick` - Current tick, recorded as the spawn time
pub fn spawn_vehicle(
    id: VehicleId,
    spawn: CellCoord,
    grid: &Grid,
    park_duration: Option<u32>,
    tick: u64,
) -> SimResult<Vehicle> {
    let cell = grid.cell_at(spawn)?;
    let facing = cell
        .flows
        .iter()
        .next()
        .ok_or_else(|| SimError::NotFound(format!("road direction at spawn cell {spawn}")))?;

    Ok(Vehicle::new(id, spawn, facing, park_duration, tick))
}

/// Collect every live vehicle's proposal in ascending id order
pub fn decide_all(ctx: &DecisionContext) -> Vec<Proposal> {
    ctx.vehicles
        .values()
        .map(|vehicle| {
            let mut rng = decision_rng(ctx.config.seed, vehicle.id, ctx.tick);
            vehicle.decide(ctx, &mut rng)
        })
        .collect()
}

/// Reject proposal sets where two vehicles claim the same cell, or a
/// vehicle claims a cell that was occupied at the start of the tick
pub fn detect_conflicts(
    tick: u64,
    proposals: &[Proposal],
    occupancy: &HashMap<CellCoord, VehicleId>,
) -> SimResult<()> {
    let mut claims: HashMap<CellCoord, VehicleId> = HashMap::new();
    for proposal in proposals {
        let Some(cell) = proposal.claimed_cell() else {
            continue;
        };
        if let Some(first) = occupancy.get(&cell).or_else(|| claims.get(&cell)) {
            return Err(SimError::OccupancyConflict {
                tick,
                cell,
                first: *first,
                second: proposal.vehicle,
            });
        }
        claims.insert(cell, proposal.vehicle);
    }
    Ok(())
}

/// Apply all proposals: moves and state transitions first, then parking
/// releases, then reservations in ascending id order
pub fn commit_proposals(tick: u64, proposals: &[Proposal], state: &mut CommitState) -> SimResult<()> {
    detect_conflicts(tick, proposals, state.occupancy)?;

    for proposal in proposals {
        apply_action(proposal, state)?;
    }

    for proposal in proposals {
        if proposal.parking == ParkingIntent::Abandon {
            abandon_plan(proposal.vehicle, state)?;
        }
    }

    for proposal in proposals {
        if let ParkingIntent::Reserve { near } = proposal.parking {
            request_slot(tick, proposal.vehicle, near, state)?;
        }
    }

    Ok(())
}

fn vehicle_mut<'v>(
    vehicles: &'v mut BTreeMap<VehicleId, Vehicle>,
    id: VehicleId,
) -> SimResult<&'v mut Vehicle> {
    vehicles
        .get_mut(&id)
        .ok_or_else(|| SimError::NotFound(format!("vehicle {id}")))
}

fn parking_plan(vehicle: &Vehicle) -> SimResult<ParkingPlan> {
    vehicle
        .parking
        .ok_or_else(|| SimError::NotFound(format!("parking plan of {}", vehicle.id)))
}

fn apply_action(proposal: &Proposal, state: &mut CommitState) -> SimResult<()> {
    let config = state.config;
    let delay = config.parking_delay_steps;
    let vehicle = vehicle_mut(state.vehicles, proposal.vehicle)?;

    match proposal.action {
        Action::Inert => {}
        Action::Move { to, facing } => {
            if state.occupancy.get(&vehicle.position) == Some(&vehicle.id) {
                state.occupancy.remove(&vehicle.position);
            }
            state.occupancy.insert(to, vehicle.id);
            vehicle.position = to;
            vehicle.facing = facing;
            vehicle.state = VehicleState::Moving;
            vehicle.stalled_ticks = 0;

            if state.grid.cell_at(to)?.is_exit {
                vehicle.state = VehicleState::Completed;
                if let Some(plan) = vehicle.parking.take() {
                    state.parking.release(plan.handle)?;
                }
                debug!("{} completed at {} (waited {})", vehicle.id, to, vehicle.wait_time);
            } else if proposal.parking != ParkingIntent::Abandon
                && vehicle.parking.map(|plan| plan.access) == Some(to)
            {
                begin_entering(vehicle, delay, state.occupancy, state.parking)?;
            }
        }
        Action::Hold(reason) => {
            vehicle.wait_time += 1;
            vehicle.stalled_ticks = vehicle.stalled_ticks.saturating_add(1);
            if vehicle.state.is_mobile() {
                vehicle.state = VehicleState::Waiting;
                if !vehicle.heading_home && vehicle.is_stalled(config) {
                    vehicle.heading_home = true;
                    debug!(
                        "{} stuck for {} ticks at {}, heading for the nearest exit",
                        vehicle.id, vehicle.stalled_ticks, vehicle.position
                    );
                }
            }
            debug!("{} waits at {}: {:?}", vehicle.id, vehicle.position, reason);
        }
        Action::BeginEntering => {
            begin_entering(vehicle, delay, state.occupancy, state.parking)?;
        }
        Action::ContinueEntering => {
            if let VehicleState::EnteringParking { remaining } = vehicle.state {
                let remaining = remaining.saturating_sub(1);
                if remaining == 0 {
                    park(vehicle, state.occupancy, state.parking)?;
                } else {
                    vehicle.state = VehicleState::EnteringParking { remaining };
                }
            }
        }
        Action::ParkedTick => {
            let plan = parking_plan(vehicle)?;
            state.parking.count_down(plan.handle)?;
        }
        Action::BeginExiting { to } => {
            let plan = parking_plan(vehicle)?;
            state.parking.release(plan.handle)?;
            vehicle.parking = None;
            state.occupancy.insert(to, vehicle.id);
            vehicle.position = to;
            vehicle.stalled_ticks = 0;
            vehicle.state = if delay == 0 {
                VehicleState::Moving
            } else {
                VehicleState::ExitingParking { remaining: delay }
            };
            debug!("{} leaves its slot onto {}", vehicle.id, to);
        }
        Action::ContinueExiting => {
            if let VehicleState::ExitingParking { remaining } = vehicle.state {
                let remaining = remaining.saturating_sub(1);
                vehicle.state = if remaining == 0 {
                    VehicleState::Moving
                } else {
                    VehicleState::ExitingParking { remaining }
                };
            }
        }
    }

    Ok(())
}

fn begin_entering(
    vehicle: &mut Vehicle,
    delay: u32,
    occupancy: &mut HashMap<CellCoord, VehicleId>,
    parking: &mut ParkingRegistry,
) -> SimResult<()> {
    if delay == 0 {
        return park(vehicle, occupancy, parking);
    }
    vehicle.state = VehicleState::EnteringParking { remaining: delay };
    debug!("{} starts parking at {}", vehicle.id, vehicle.position);
    Ok(())
}

/// Leave the road and occupy the reserved slot index
fn park(
    vehicle: &mut Vehicle,
    occupancy: &mut HashMap<CellCoord, VehicleId>,
    parking: &mut ParkingRegistry,
) -> SimResult<()> {
    let plan = parking_plan(vehicle)?;
    let duration = vehicle.park_duration.unwrap_or(1).max(1);
    parking.occupy(plan.handle, duration)?;
    if occupancy.get(&vehicle.position) == Some(&vehicle.id) {
        occupancy.remove(&vehicle.position);
    }
    vehicle.state = VehicleState::Parked;
    vehicle.has_parked = true;
    vehicle.stalled_ticks = 0;
    debug!("{} parked in {:?} for {} ticks", vehicle.id, plan.handle, duration);
    Ok(())
}

fn abandon_plan(id: VehicleId, state: &mut CommitState) -> SimResult<()> {
    let vehicle = vehicle_mut(state.vehicles, id)?;
    if let Some(plan) = vehicle.parking.take() {
        state.parking.release(plan.handle)?;
        debug!("{} abandoned its reservation at {}", id, plan.access);
    }
    Ok(())
}

fn request_slot(tick: u64, id: VehicleId, near: CellCoord, state: &mut CommitState) -> SimResult<()> {
    let vehicle = vehicle_mut(state.vehicles, id)?;
    if !vehicle.state.is_mobile() || vehicle.parking.is_some() {
        return Ok(());
    }

    match state.parking.reserve(id, near, state.grid) {
        Ok(handle) => {
            let access = state.parking.access_of(handle)?;
            vehicle.parking = Some(ParkingPlan {
                handle,
                access,
                reserved_at: tick,
            });
            state.metrics.reservations_granted += 1;
            debug!("{} reserved {:?} reached from {}", id, handle, access);
        }
        Err(SimError::CapacityExceeded { near }) => {
            state.metrics.reservations_failed += 1;
            debug!("{} found no free parking near {}", id, near);
        }
        Err(other) => return Err(other),
    }
    Ok(())
}

/// Remove completed vehicles from the live set and free their cells
pub fn retire_completed(
    vehicles: &mut BTreeMap<VehicleId, Vehicle>,
    occupancy: &mut HashMap<CellCoord, VehicleId>,
    metrics: &mut MetricsRecorder,
) {
    let done: Vec<VehicleId> = vehicles
        .values()
        .filter(|v| v.state == VehicleState::Completed)
        .map(|v| v.id)
        .collect();

    for id in done {
        if let Some(vehicle) = vehicles.remove(&id) {
            if occupancy.get(&vehicle.position) == Some(&id) {
                occupancy.remove(&vehicle.position);
            }
            metrics.record_completion(&vehicle);
        }
    }
}
