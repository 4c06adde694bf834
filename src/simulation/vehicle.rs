//! Vehicle decision logic for the grid simulation
//!
//! A vehicle never mutates shared state while deciding. `Vehicle::decide`
//! reads a [`DecisionContext`] built from the start-of-tick snapshot and
//! returns a [`Proposal`]; the scheduler applies proposals afterwards.

use log::{trace, warn};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use super::config::SimConfig;
use super::grid::Grid;
use super::parking::{ParkingRegistry, SlotHandle};
use super::pedestrian_crossing::PedestrianCrossing;
use super::traffic_light::TrafficLight;
use super::types::{CellCoord, Direction, DirectionSet, VehicleId, SEED_MIXING_CONSTANT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VehicleState {
    Moving,
    Waiting,
    /// Pulling into a reserved slot; still occupies the access cell
    EnteringParking { remaining: u32 },
    /// Off the road, held only by the parking registry
    Parked,
    /// Pulling out onto the access cell
    ExitingParking { remaining: u32 },
    Completed,
}

impl VehicleState {
    /// Moving and waiting vehicles are the ones that may move this tick
    pub fn is_mobile(&self) -> bool {
        matches!(self, VehicleState::Moving | VehicleState::Waiting)
    }

    pub fn in_parking_transition(&self) -> bool {
        matches!(
            self,
            VehicleState::EnteringParking { .. } | VehicleState::ExitingParking { .. }
        )
    }
}

/// A granted slot and the road cell the vehicle must reach to use it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParkingPlan {
    pub handle: SlotHandle,
    pub access: CellCoord,
    /// Tick at which the reservation was granted
    pub reserved_at: u64,
}

/// Why a vehicle is holding this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WaitReason {
    Occupied(VehicleId),
    RedLight,
    CrossingActive,
    /// Yielding to a vehicle with right of way into the same cell
    Yield(VehicleId),
    /// Parked and ready to leave, but the access cell is not clear
    ExitBlocked,
    NoRoute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Inert,
    Move { to: CellCoord, facing: Direction },
    Hold(WaitReason),
    BeginEntering,
    ContinueEntering,
    ParkedTick,
    BeginExiting { to: CellCoord },
    ContinueExiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkingIntent {
    None,
    /// Ask the registry for a slot near `near` once moves are committed
    Reserve { near: CellCoord },
    /// Give the held slot back
    Abandon,
}

/// A vehicle's intended action for the current tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal {
    pub vehicle: VehicleId,
    pub action: Action,
    pub parking: ParkingIntent,
}

impl Proposal {
    fn new(vehicle: VehicleId, action: Action) -> Self {
        Self {
            vehicle,
            action,
            parking: ParkingIntent::None,
        }
    }

    /// The road cell this proposal would newly occupy
    pub fn claimed_cell(&self) -> Option<CellCoord> {
        match self.action {
            Action::Move { to, .. } | Action::BeginExiting { to } => Some(to),
            _ => None,
        }
    }
}

/// Read-only view of the world at the start of the tick
pub struct DecisionContext<'a> {
    pub grid: &'a Grid,
    pub lights: &'a BTreeMap<CellCoord, TrafficLight>,
    pub crossings: &'a BTreeMap<CellCoord, PedestrianCrossing>,
    pub parking: &'a ParkingRegistry,
    pub occupancy: &'a HashMap<CellCoord, VehicleId>,
    pub vehicles: &'a BTreeMap<VehicleId, Vehicle>,
    pub config: &'a SimConfig,
    pub tick: u64,
}

impl DecisionContext<'_> {
    fn occupant(&self, coord: CellCoord) -> Option<VehicleId> {
        self.occupancy.get(&coord).copied()
    }

    fn is_mobile_occupied(&self, coord: CellCoord) -> bool {
        self.occupant(coord)
            .and_then(|id| self.vehicles.get(&id))
            .map(|v| v.state.is_mobile())
            .unwrap_or(false)
    }

    /// A parked vehicle whose stay ran out and that has been held at least
    /// `stall_patience` ticks
    fn is_overdue(&self, id: VehicleId, remaining: u32) -> bool {
        remaining == 0
            && self
                .vehicles
                .get(&id)
                .map(|v| v.state == VehicleState::Parked && v.is_stalled(self.config))
                .unwrap_or(false)
    }

    /// Exit order among parked vehicles sharing an access cell: overdue
    /// vehicles first, then by id
    fn exit_rank(&self, id: VehicleId, remaining: u32) -> (bool, VehicleId) {
        (!self.is_overdue(id, remaining), id)
    }

    /// Lowest-ranked overdue vehicle waiting to leave onto `access`
    fn overdue_exit(&self, access: CellCoord) -> Option<VehicleId> {
        self.parking
            .exit_contenders(access)
            .into_iter()
            .filter(|(id, remaining)| self.is_overdue(*id, *remaining))
            .map(|(id, _)| id)
            .min()
    }
}

/// Decision RNG for one vehicle at one tick.
///
/// Derived only from (seed, id, tick), so the result does not depend on
/// the order in which vehicles are decided.
pub fn decision_rng(seed: u64, vehicle: VehicleId, tick: u64) -> StdRng {
    let id_part = (vehicle.0 as u64).wrapping_add(1).wrapping_mul(SEED_MIXING_CONSTANT);
    let tick_part = tick
        .wrapping_add(1)
        .wrapping_mul(SEED_MIXING_CONSTANT.rotate_left(29));
    StdRng::seed_from_u64(seed ^ id_part ^ tick_part)
}

#[derive(Debug, Clone, Serialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub position: CellCoord,
    pub facing: Direction,
    pub state: VehicleState,
    /// Ticks spent waiting, including blocked exits from parking
    pub wait_time: u64,
    /// How long this vehicle stays once parked; `None` in runs without parking
    pub park_duration: Option<u32>,
    pub parking: Option<ParkingPlan>,
    pub has_parked: bool,
    pub spawned_at: u64,
    /// Consecutive held ticks; reset whenever the vehicle moves or parks
    pub stalled_ticks: u32,
    /// Gave up wandering and follows the shortest route to an exit
    pub heading_home: bool,
}

impl Vehicle {
    pub fn new(
        id: VehicleId,
        position: CellCoord,
        facing: Direction,
        park_duration: Option<u32>,
        spawned_at: u64,
    ) -> Self {
        Self {
            id,
            position,
            facing,
            state: VehicleState::Moving,
            wait_time: 0,
            park_duration,
            parking: None,
            has_parked: false,
            spawned_at,
            stalled_ticks: 0,
            heading_home: false,
        }
    }

    pub fn is_stalled(&self, config: &SimConfig) -> bool {
        self.stalled_ticks >= config.stall_patience
    }

    /// Compute this tick's proposal. Pure: reads `ctx` only.
    pub fn decide<R: Rng>(&self, ctx: &DecisionContext, rng: &mut R) -> Proposal {
        let proposal = match self.state {
            VehicleState::Completed => Proposal::new(self.id, Action::Inert),
            VehicleState::EnteringParking { .. } => {
                Proposal::new(self.id, Action::ContinueEntering)
            }
            VehicleState::ExitingParking { .. } => Proposal::new(self.id, Action::ContinueExiting),
            VehicleState::Parked => self.decide_parked(ctx),
            VehicleState::Moving | VehicleState::Waiting => self.decide_on_road(ctx, rng),
        };
        trace!("{} at {} proposes {:?}", self.id, self.position, proposal);
        proposal
    }

    fn decide_parked(&self, ctx: &DecisionContext) -> Proposal {
        let Some(plan) = self.parking else {
            return Proposal::new(self.id, Action::Hold(WaitReason::ExitBlocked));
        };
        let remaining = match ctx.parking.occupied_duration_remaining(plan.handle) {
            Ok(remaining) => remaining,
            Err(e) => {
                // The commit's count down reports the same error
                warn!(
                    "{} is parked in {:?} but the registry disagrees: {}",
                    self.id, plan.handle, e
                );
                return Proposal::new(self.id, Action::ParkedTick);
            }
        };

        if remaining > 1 {
            return Proposal::new(self.id, Action::ParkedTick);
        }
        if self.can_leave_slot(ctx, plan.access, remaining) {
            return Proposal::new(self.id, Action::BeginExiting { to: plan.access });
        }
        if remaining == 1 {
            // Finish the stay; the blocked exit is retried next tick
            Proposal::new(self.id, Action::ParkedTick)
        } else {
            Proposal::new(self.id, Action::Hold(WaitReason::ExitBlocked))
        }
    }

    /// The access cell is free and no ready vehicle parked behind the same
    /// access cell outranks this one. Until it is overdue, the vehicle also
    /// waits for moving vehicles about to enter the access cell; once
    /// overdue, those vehicles yield to it instead.
    fn can_leave_slot(&self, ctx: &DecisionContext, access: CellCoord, remaining: u32) -> bool {
        if ctx.occupant(access).is_some() {
            return false;
        }
        let overdue = ctx.is_overdue(self.id, remaining);
        if !overdue
            && ctx
                .grid
                .predecessors(access)
                .iter()
                .any(|(from, _)| ctx.is_mobile_occupied(*from))
        {
            return false;
        }
        let rank = ctx.exit_rank(self.id, remaining);
        !ctx.parking
            .exit_contenders(access)
            .into_iter()
            .any(|(other, other_remaining)| {
                other != self.id
                    && other_remaining <= 1
                    && ctx.exit_rank(other, other_remaining) < rank
            })
    }

    fn decide_on_road<R: Rng>(&self, ctx: &DecisionContext, rng: &mut R) -> Proposal {
        let Ok(permitted) = ctx.grid.permitted_directions(self.position) else {
            return Proposal::new(self.id, Action::Hold(WaitReason::NoRoute));
        };

        let mut intent = ParkingIntent::None;
        let mut direction = None;

        if self.heading_home {
            if self.parking.is_some() {
                intent = ParkingIntent::Abandon;
            }
            direction = self.toward_exit(ctx, permitted);
        } else if let Some(plan) = self.parking {
            if self.position == plan.access {
                return Proposal::new(self.id, Action::BeginEntering);
            }
            direction = self.toward(ctx, permitted, plan.access);
            if direction.is_none() {
                intent = ParkingIntent::Abandon;
            }
        }

        let direction = match direction.or_else(|| self.wander(permitted, ctx.config, rng)) {
            Some(d) => d,
            None => {
                return Proposal {
                    vehicle: self.id,
                    action: Action::Hold(WaitReason::NoRoute),
                    parking: intent,
                }
            }
        };

        let target = self.position.offset(direction);
        let action = match self.check_entry(ctx, target, direction) {
            Ok(()) => Action::Move {
                to: target,
                facing: direction,
            },
            Err(reason) => Action::Hold(reason),
        };

        if intent == ParkingIntent::None && self.wants_parking(ctx.config, rng) {
            let near = match action {
                Action::Move { to, .. } => to,
                _ => self.position,
            };
            intent = ParkingIntent::Reserve { near };
        }

        Proposal {
            vehicle: self.id,
            action,
            parking: intent,
        }
    }

    fn wants_parking<R: Rng>(&self, config: &SimConfig, rng: &mut R) -> bool {
        config.parking_enabled
            && !self.heading_home
            && self.parking.is_none()
            && !self.has_parked
            && self.park_duration.is_some()
            && rng.random_bool(config.parking_probability)
    }

    /// Permitted direction with the shortest lane distance to `access`
    fn toward(&self, ctx: &DecisionContext, permitted: DirectionSet, access: CellCoord) -> Option<Direction> {
        let limit = ctx.config.parking_search_radius.max(1);
        permitted
            .iter()
            .filter_map(|d| {
                ctx.grid
                    .lane_distance(self.position.offset(d), access, limit)
                    .map(|distance| (distance, d))
            })
            .min()
            .map(|(_, d)| d)
    }

    /// Permitted direction on a shortest route to an exit. Each step lowers
    /// the remaining distance, so vehicles on these routes never wait on
    /// each other in a circle.
    fn toward_exit(&self, ctx: &DecisionContext, permitted: DirectionSet) -> Option<Direction> {
        permitted
            .iter()
            .filter_map(|d| {
                ctx.grid
                    .distance_to_exit(self.position.offset(d))
                    .map(|distance| (distance, d))
            })
            .min()
            .map(|(_, d)| d)
    }

    /// Free navigation: keep going straight, turning at branch points with
    /// the configured probability
    fn wander<R: Rng>(&self, permitted: DirectionSet, config: &SimConfig, rng: &mut R) -> Option<Direction> {
        let options: Vec<Direction> = permitted.iter().collect();
        if options.is_empty() {
            return None;
        }

        if options.len() > 1 && rng.random_bool(config.turn_probability) {
            let turns: Vec<Direction> = options
                .iter()
                .copied()
                .filter(|d| *d != self.facing)
                .collect();
            if let Some(turn) = turns.choose(rng) {
                return Some(*turn);
            }
        }

        if permitted.contains(self.facing) {
            Some(self.facing)
        } else {
            options.choose(rng).copied()
        }
    }

    fn check_entry(&self, ctx: &DecisionContext, target: CellCoord, direction: Direction) -> Result<(), WaitReason> {
        if let Some(other) = ctx.occupant(target) {
            return Err(WaitReason::Occupied(other));
        }

        let Ok(cell) = ctx.grid.cell_at(target) else {
            return Err(WaitReason::NoRoute);
        };
        if cell.is_intersection {
            if let Some(light) = ctx.lights.get(&target) {
                if !light.allows_entry() {
                    return Err(WaitReason::RedLight);
                }
            }
        }
        if cell.is_crossing {
            if let Some(crossing) = ctx.crossings.get(&target) {
                if !crossing.allows_entry() {
                    return Err(WaitReason::CrossingActive);
                }
            }
        }

        if let Some(parked) = ctx.overdue_exit(target) {
            return Err(WaitReason::Yield(parked));
        }

        for (from, approach) in ctx.grid.predecessors(target) {
            if from == self.position || approach >= direction {
                continue;
            }
            if ctx.is_mobile_occupied(from) {
                if let Some(other) = ctx.occupant(from) {
                    return Err(WaitReason::Yield(other));
                }
            }
        }

        Ok(())
    }
}
