//! Run statistics
//!
//! The recorder accumulates counters during the run; `finalize` turns them
//! into a serializable `MetricsReport`.

use log::info;
use serde::Serialize;
use std::collections::BTreeMap;

use super::types::VehicleId;
use super::vehicle::{Vehicle, VehicleState};

/// Per-tick counts of live vehicles by activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickSample {
    pub tick: u64,
    /// Vehicles on the road (moving or waiting)
    pub active: usize,
    pub waiting: usize,
    pub parked: usize,
    pub in_transition: usize,
    pub completed_total: u64,
}

#[derive(Debug, Default)]
pub struct MetricsRecorder {
    pub vehicles_spawned: u64,
    pub vehicles_completed: u64,
    pub spawns_blocked: u64,
    pub reservations_granted: u64,
    pub reservations_failed: u64,
    /// Wait times of vehicles that already left the grid
    completed_wait_times: Vec<u64>,
    series: Option<Vec<TickSample>>,
}

impl MetricsRecorder {
    pub fn new(record_series: bool) -> Self {
        Self {
            series: record_series.then(Vec::new),
            ..Default::default()
        }
    }

    pub fn record_completion(&mut self, vehicle: &Vehicle) {
        self.vehicles_completed += 1;
        self.completed_wait_times.push(vehicle.wait_time);
    }

    pub fn record_tick(&mut self, tick: u64, vehicles: &BTreeMap<VehicleId, Vehicle>) {
        let completed_total = self.vehicles_completed;
        let Some(series) = self.series.as_mut() else {
            return;
        };

        let mut sample = TickSample {
            tick,
            active: 0,
            waiting: 0,
            parked: 0,
            in_transition: 0,
            completed_total,
        };
        for vehicle in vehicles.values() {
            match vehicle.state {
                VehicleState::Moving => sample.active += 1,
                VehicleState::Waiting => {
                    sample.active += 1;
                    sample.waiting += 1;
                }
                VehicleState::Parked => sample.parked += 1,
                VehicleState::EnteringParking { .. } | VehicleState::ExitingParking { .. } => {
                    sample.in_transition += 1
                }
                VehicleState::Completed => {}
            }
        }
        series.push(sample);
    }

    /// Build the report. Wait statistics cover every spawned vehicle,
    /// finished or still live.
    pub fn finalize(&self, ticks_run: u64, live: &BTreeMap<VehicleId, Vehicle>) -> MetricsReport {
        let waits: Vec<u64> = self
            .completed_wait_times
            .iter()
            .copied()
            .chain(live.values().map(|v| v.wait_time))
            .collect();

        let average_wait_time = if waits.is_empty() {
            0.0
        } else {
            waits.iter().sum::<u64>() as f64 / waits.len() as f64
        };

        let completion_rate = if self.vehicles_spawned > 0 {
            self.vehicles_completed as f64 / self.vehicles_spawned as f64 * 100.0
        } else {
            0.0
        };

        MetricsReport {
            ticks_run,
            vehicles_spawned: self.vehicles_spawned,
            vehicles_completed: self.vehicles_completed,
            vehicles_live: live.len() as u64,
            spawns_blocked: self.spawns_blocked,
            reservations_granted: self.reservations_granted,
            reservations_failed: self.reservations_failed,
            average_wait_time,
            min_wait_time: waits.iter().copied().min().unwrap_or(0),
            max_wait_time: waits.iter().copied().max().unwrap_or(0),
            completion_rate,
            series: self.series.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub ticks_run: u64,
    pub vehicles_spawned: u64,
    pub vehicles_completed: u64,
    pub vehicles_live: u64,
    pub spawns_blocked: u64,
    pub reservations_granted: u64,
    pub reservations_failed: u64,
    pub average_wait_time: f64,
    pub min_wait_time: u64,
    pub max_wait_time: u64,
    /// Completed vehicles as a percentage of spawned ones
    pub completion_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<Vec<TickSample>>,
}

impl MetricsReport {
    /// No vehicle is lost: everything spawned either finished or is still live
    pub fn is_conserved(&self) -> bool {
        self.vehicles_spawned == self.vehicles_completed + self.vehicles_live
    }

    pub fn log_summary(&self) {
        info!("=== SIMULATION COMPLETE ===");
        info!("Ticks run: {}", self.ticks_run);
        info!("Total vehicles spawned: {}", self.vehicles_spawned);
        info!("Total vehicles completed: {}", self.vehicles_completed);
        info!("Vehicles still on the grid: {}", self.vehicles_live);
        info!("Blocked spawns: {}", self.spawns_blocked);
        info!(
            "Parking reservations: {} granted, {} failed",
            self.reservations_granted, self.reservations_failed
        );
        info!(
            "Average wait time: {:.2} ticks (min {}, max {})",
            self.average_wait_time, self.min_wait_time, self.max_wait_time
        );
        info!("Completion rate: {:.1}%", self.completion_rate);
    }
}
