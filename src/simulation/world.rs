//! Main simulation world that ties everything together
//!
//! `Simulation` owns the grid, every light, crossing and parking slot, and
//! the live vehicles. Each call to `step` runs one tick in a fixed order:
//! lights, crossings and background parking, vehicle decisions, commit,
//! retire and spawn, then metrics.

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap};

use super::config::SimConfig;
use super::error::{SimError, SimResult};
use super::grid::Grid;
use super::metrics::{MetricsRecorder, MetricsReport};
use super::parking::ParkingRegistry;
use super::pedestrian_crossing::PedestrianCrossing;
use super::snapshot::{CellView, ColorClass, CrossingView, LightView, OccupantView, RenderSnapshot};
use super::traffic_light::{LightState, TrafficLight};
use super::types::{CellCoord, VehicleId};
use super::vehicle::{DecisionContext, Vehicle, VehicleState};
use super::vehicle_manager::{self, CommitState};

pub struct Simulation {
    config: SimConfig,
    grid: Grid,

    /// One light per intersection cell
    lights: BTreeMap<CellCoord, TrafficLight>,

    /// One crossing per crossing cell
    crossings: BTreeMap<CellCoord, PedestrianCrossing>,

    parking: ParkingRegistry,

    /// Live vehicles, iterated in ascending id order
    vehicles: BTreeMap<VehicleId, Vehicle>,

    /// On-road vehicles by cell; parked vehicles are not in here
    occupancy: HashMap<CellCoord, VehicleId>,

    /// Cells arrivals are drawn from
    spawn_cells: Vec<CellCoord>,

    /// Number of completed steps
    tick: u64,

    next_id: usize,

    /// Environment randomness: crossings, background parking and arrivals
    rng: StdRng,

    metrics: MetricsRecorder,
}

impl Simulation {
    /// Build a simulation from a validated configuration
    pub fn new(config: SimConfig) -> SimResult<Self> {
        config.validate()?;

        let grid = Grid::new(config.road_size, config.building_parking_capacity)?;

        let spawn_cells = match &config.spawn_cells {
            Some(cells) => {
                for cell in cells {
                    if !grid.spawn_cells().contains(cell) {
                        return Err(SimError::Configuration(format!(
                            "{cell} is not a spawn cell of the {:?} grid",
                            config.road_size
                        )));
                    }
                }
                cells.clone()
            }
            None => grid.spawn_cells().to_vec(),
        };

        let lights: BTreeMap<CellCoord, TrafficLight> = grid
            .intersections()
            .iter()
            .enumerate()
            .map(|(index, coord)| {
                (
                    *coord,
                    TrafficLight::new(*coord, index, config.red_duration, config.green_duration),
                )
            })
            .collect();

        let crossings: BTreeMap<CellCoord, PedestrianCrossing> = grid
            .crossings()
            .iter()
            .map(|coord| {
                let approaches = grid
                    .predecessors(*coord)
                    .into_iter()
                    .map(|(from, _)| from)
                    .collect();
                (
                    *coord,
                    PedestrianCrossing::new(
                        *coord,
                        approaches,
                        config.crossing_inactive,
                        config.crossing_active,
                        config.crossing_activation_probability,
                    ),
                )
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(config.seed);

        let mut parking = ParkingRegistry::from_grid(&grid, config.parking_search_radius);
        if config.parking_enabled {
            parking.seed_background(
                config.parking_initial_occupancy,
                config.avg_parking_time,
                &mut rng,
            );
        }

        info!(
            "Simulation ready: {}x{} grid, {} lights, {} crossings, {} parking spaces ({} pre-filled), seed {}",
            grid.rows(),
            grid.cols(),
            lights.len(),
            crossings.len(),
            parking.total_capacity(),
            parking.total_occupied(),
            config.seed
        );

        Ok(Self {
            metrics: MetricsRecorder::new(config.record_series),
            config,
            grid,
            lights,
            crossings,
            parking,
            vehicles: BTreeMap::new(),
            occupancy: HashMap::new(),
            spawn_cells,
            tick: 0,
            next_id: 0,
            rng,
        })
    }

    /// Run one tick
    pub fn step(&mut self) -> SimResult<()> {
        let tick = self.tick;

        for light in self.lights.values_mut() {
            light.advance();
        }

        for crossing in self.crossings.values_mut() {
            let is_clear = !self.occupancy.contains_key(&crossing.coord)
                && crossing
                    .approaches
                    .iter()
                    .all(|cell| !self.occupancy.contains_key(cell));
            crossing.advance(is_clear, &mut self.rng);
        }

        if self.config.parking_enabled {
            let freed = self.parking.advance();
            if freed > 0 {
                debug!("tick {tick}: {freed} background parking spaces freed");
            }
        }

        let proposals = {
            let ctx = DecisionContext {
                grid: &self.grid,
                lights: &self.lights,
                crossings: &self.crossings,
                parking: &self.parking,
                occupancy: &self.occupancy,
                vehicles: &self.vehicles,
                config: &self.config,
                tick,
            };
            vehicle_manager::decide_all(&ctx)
        };

        let mut state = CommitState {
            grid: &self.grid,
            config: &self.config,
            vehicles: &mut self.vehicles,
            occupancy: &mut self.occupancy,
            parking: &mut self.parking,
            metrics: &mut self.metrics,
        };
        vehicle_manager::commit_proposals(tick, &proposals, &mut state)?;

        vehicle_manager::retire_completed(&mut self.vehicles, &mut self.occupancy, &mut self.metrics);

        if tick % self.config.arrival_interval == 0 {
            self.spawn_arrival()?;
        }

        self.metrics.record_tick(tick, &self.vehicles);
        self.tick += 1;
        Ok(())
    }

    fn spawn_arrival(&mut self) -> SimResult<()> {
        let Some(&spawn) = self.spawn_cells.choose(&mut self.rng) else {
            return Ok(());
        };

        if let Some(blocker) = self.occupancy.get(&spawn) {
            self.metrics.spawns_blocked += 1;
            debug!("tick {}: spawn at {} blocked by {}", self.tick, spawn, blocker);
            return Ok(());
        }

        let park_duration = self.config.parking_enabled.then(|| {
            vehicle_manager::sample_park_duration(self.config.avg_parking_time, &mut self.rng)
        });

        let id = VehicleId(self.next_id);
        let vehicle = vehicle_manager::spawn_vehicle(id, spawn, &self.grid, park_duration, self.tick)?;
        self.next_id += 1;

        debug!("tick {}: {} spawned at {} facing {:?}", self.tick, id, spawn, vehicle.facing);
        self.occupancy.insert(spawn, id);
        self.vehicles.insert(id, vehicle);
        self.metrics.vehicles_spawned += 1;
        Ok(())
    }

    /// Run the remaining ticks up to the configured total and finalize
    pub fn run(&mut self) -> SimResult<MetricsReport> {
        info!(
            "Running {} ticks (red={}, green={}, parking={})",
            self.config.total_ticks,
            self.config.red_duration,
            self.config.green_duration,
            self.config.parking_enabled
        );

        while self.tick < self.config.total_ticks {
            self.step()?;
        }

        let report = self.finalize();
        info!(
            "Run finished after {} ticks: {} spawned, {} completed",
            report.ticks_run, report.vehicles_spawned, report.vehicles_completed
        );
        Ok(report)
    }

    /// Metrics for the ticks run so far
    pub fn finalize(&self) -> MetricsReport {
        let report = self.metrics.finalize(self.tick, &self.vehicles);
        if !report.is_conserved() {
            warn!(
                "vehicle count drift: {} spawned, {} completed, {} live",
                report.vehicles_spawned, report.vehicles_completed, report.vehicles_live
            );
        }
        report
    }

    /// Pure read of the current state for renderers
    pub fn snapshot(&self) -> RenderSnapshot {
        let mut parked_at: HashMap<CellCoord, u32> = HashMap::new();
        for slot in self.parking.slots() {
            *parked_at.entry(slot.site.cell).or_default() += slot.occupied_count();
        }

        let cells = self
            .grid
            .cells()
            .map(|cell| CellView {
                coord: cell.coord,
                kind: cell.kind,
                lanes: cell.lanes,
                is_intersection: cell.is_intersection,
                is_crossing: cell.is_crossing,
                parking_capacity: cell.parking_capacity,
                parked_count: parked_at.get(&cell.coord).copied().unwrap_or(0),
                occupant: self
                    .occupancy
                    .get(&cell.coord)
                    .and_then(|id| self.vehicles.get(id))
                    .map(|vehicle| OccupantView {
                        vehicle: vehicle.id,
                        state: vehicle.state,
                        color: ColorClass::for_state(vehicle.state),
                        facing: vehicle.facing,
                    }),
            })
            .collect();

        let parked_vehicles = self
            .vehicles
            .values()
            .filter(|v| v.state == VehicleState::Parked)
            .filter_map(|v| {
                let plan = v.parking?;
                let slot = self.parking.slot(plan.handle.slot).ok()?;
                Some((v.id, slot.site.cell))
            })
            .collect();

        RenderSnapshot {
            tick: self.tick,
            rows: self.grid.rows(),
            cols: self.grid.cols(),
            cells,
            lights: self
                .lights
                .values()
                .map(|light| LightView {
                    coord: light.coord,
                    state: light.state(),
                })
                .collect(),
            crossings: self
                .crossings
                .values()
                .map(|crossing| CrossingView {
                    coord: crossing.coord,
                    state: crossing.state(),
                    active: crossing.is_active(),
                })
                .collect(),
            parked_vehicles,
        }
    }

    /// Check occupancy and parking bookkeeping against each other
    pub fn verify_invariants(&self) -> SimResult<()> {
        for (coord, id) in &self.occupancy {
            let vehicle = self
                .vehicles
                .get(id)
                .ok_or_else(|| SimError::NotFound(format!("occupant {id} of {coord}")))?;
            if vehicle.position != *coord || vehicle.state == VehicleState::Parked {
                return Err(SimError::NotFound(format!(
                    "{id} recorded at {coord} but is at {} ({:?})",
                    vehicle.position, vehicle.state
                )));
            }
        }

        for vehicle in self.vehicles.values() {
            let on_road = !matches!(vehicle.state, VehicleState::Parked | VehicleState::Completed);
            if on_road {
                match self.occupancy.get(&vehicle.position) {
                    Some(id) if *id == vehicle.id => {}
                    Some(other) => {
                        return Err(SimError::OccupancyConflict {
                            tick: self.tick,
                            cell: vehicle.position,
                            first: *other,
                            second: vehicle.id,
                        })
                    }
                    None => {
                        return Err(SimError::NotFound(format!(
                            "{} missing from occupancy at {}",
                            vehicle.id, vehicle.position
                        )))
                    }
                }
            }
        }

        for slot in self.parking.slots() {
            if slot.occupied_count() > slot.capacity() {
                return Err(SimError::CapacityExceeded {
                    near: slot.site.access,
                });
            }
        }

        Ok(())
    }

    /// Render the grid with vehicles, light colours and active crossings
    pub fn render_map(&self) -> String {
        self.grid.render_ascii(|coord| {
            if let Some(vehicle) = self.occupancy.get(&coord).and_then(|id| self.vehicles.get(id)) {
                return Some(format!("{}{}", vehicle.id, vehicle.facing.arrow()));
            }
            if let Some(light) = self.lights.get(&coord) {
                let colour = match light.state() {
                    LightState::Red => 'R',
                    LightState::Green => 'G',
                };
                return Some(format!("+[{colour}]"));
            }
            match self.crossings.get(&coord) {
                Some(crossing) if crossing.is_active() => Some("[X!]".to_string()),
                _ => None,
            }
        })
    }

    /// Draw a visual map of the grid in the terminal
    pub fn draw_map(&self) {
        println!("\n=== Grid Map (tick {}) ===", self.tick);
        println!("Legend: +[R]/+[G]=Light, [X]=Crossing, [X!]=Pedestrians, [P]=Parking building, Vn=Vehicle");
        println!();
        print!("{}", self.render_map());
        println!();
    }

    /// Print a summary of the current state
    pub fn print_summary(&self) {
        let report = self.finalize();
        println!("=== Traffic Simulation Summary ===");
        println!("Tick: {}/{}", self.tick, self.config.total_ticks);
        println!(
            "Grid: {}x{}, lights: {}, crossings: {}",
            self.grid.rows(),
            self.grid.cols(),
            self.lights.len(),
            self.crossings.len()
        );
        println!(
            "Vehicles: {} live, {} spawned, {} completed, {} blocked spawns",
            report.vehicles_live, report.vehicles_spawned, report.vehicles_completed, report.spawns_blocked
        );
        if self.config.parking_enabled {
            println!(
                "Parking: {}/{} spaces in use, {} reservations granted, {} failed",
                self.parking.total_occupied(),
                self.parking.total_capacity(),
                report.reservations_granted,
                report.reservations_failed
            );
        }
        println!(
            "Wait time: avg {:.2}, min {}, max {}",
            report.average_wait_time, report.min_wait_time, report.max_wait_time
        );

        if !self.vehicles.is_empty() {
            println!("--- Live Vehicles ---");
            for vehicle in self.vehicles.values() {
                println!(
                    "  {} at {} facing {:?}: {:?}, waited {}",
                    vehicle.id, vehicle.position, vehicle.facing, vehicle.state, vehicle.wait_time
                );
            }
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Number of completed steps
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn vehicles(&self) -> &BTreeMap<VehicleId, Vehicle> {
        &self.vehicles
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(&id)
    }

    pub fn lights(&self) -> &BTreeMap<CellCoord, TrafficLight> {
        &self.lights
    }

    pub fn crossings(&self) -> &BTreeMap<CellCoord, PedestrianCrossing> {
        &self.crossings
    }

    pub fn parking(&self) -> &ParkingRegistry {
        &self.parking
    }

    pub fn occupancy(&self) -> &HashMap<CellCoord, VehicleId> {
        &self.occupancy
    }

    pub fn occupant_at(&self, coord: CellCoord) -> Option<VehicleId> {
        self.occupancy.get(&coord).copied()
    }

    pub fn spawn_cells(&self) -> &[CellCoord] {
        &self.spawn_cells
    }
}
