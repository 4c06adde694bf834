//! Parking slot allocation
//!
//! The registry owns every parking slot and is the only place a slot index
//! changes hands. Vehicles never reserve directly: they put a reservation
//! request in their proposal and the scheduler calls [`ParkingRegistry::reserve`]
//! during the commit phase, in ascending vehicle id order. A failed
//! reservation is reported as `CapacityExceeded` and the vehicle simply
//! keeps driving.

use log::warn;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;

use super::error::{SimError, SimResult};
use super::grid::{Grid, ParkingKind, ParkingSite};
use super::types::{CellCoord, SlotId, VehicleId};

/// Who is sitting in an occupied slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Occupant {
    Vehicle(VehicleId),
    /// Pre-existing parked car that is not simulated as a vehicle
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotEntry {
    /// Held for a vehicle that is still approaching or pulling in
    Reserved(VehicleId),
    Occupied { occupant: Occupant, remaining: u32 },
}

/// One slot index inside one parking slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SlotHandle {
    pub slot: SlotId,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct ParkingSlot {
    pub id: SlotId,
    pub site: ParkingSite,
    entries: Vec<Option<SlotEntry>>,
}

impl ParkingSlot {
    fn new(id: SlotId, site: ParkingSite) -> Self {
        Self {
            id,
            site,
            entries: vec![None; site.capacity as usize],
        }
    }

    pub fn capacity(&self) -> u32 {
        self.site.capacity
    }

    /// Reserved plus occupied indices
    pub fn occupied_count(&self) -> u32 {
        self.entries.iter().filter(|e| e.is_some()).count() as u32
    }

    pub fn free_capacity(&self) -> u32 {
        self.capacity() - self.occupied_count()
    }

    pub fn entries(&self) -> &[Option<SlotEntry>] {
        &self.entries
    }

    fn first_free_index(&self) -> Option<usize> {
        self.entries.iter().position(Option::is_none)
    }
}

#[derive(Debug, Clone)]
pub struct ParkingRegistry {
    slots: Vec<ParkingSlot>,
    /// Slots grouped by the road cell used to enter them
    by_access: HashMap<CellCoord, Vec<SlotId>>,
    /// Each vehicle holds at most one slot index
    holders: HashMap<VehicleId, SlotHandle>,
    search_radius: u32,
}

impl ParkingRegistry {
    pub fn new(sites: &[ParkingSite], search_radius: u32) -> Self {
        let slots: Vec<ParkingSlot> = sites
            .iter()
            .enumerate()
            .map(|(index, site)| ParkingSlot::new(SlotId(index), *site))
            .collect();

        let mut by_access: HashMap<CellCoord, Vec<SlotId>> = HashMap::new();
        for slot in &slots {
            by_access.entry(slot.site.access).or_default().push(slot.id);
        }

        Self {
            slots,
            by_access,
            holders: HashMap::new(),
            search_radius,
        }
    }

    /// Registry with every parking site of `grid`
    pub fn from_grid(grid: &Grid, search_radius: u32) -> Self {
        Self::new(grid.parking_sites(), search_radius)
    }

    /// Pre-fill `floor(capacity * fraction)` indices of every slot with
    /// background occupants staying `1..=2*avg_duration` ticks
    pub fn seed_background<R: Rng>(&mut self, fraction: f64, avg_duration: u32, rng: &mut R) {
        let max_stay = avg_duration.saturating_mul(2).max(1);
        for slot in &mut self.slots {
            let count = ((slot.capacity() as f64) * fraction).floor() as usize;
            for entry in slot.entries.iter_mut().take(count) {
                *entry = Some(SlotEntry::Occupied {
                    occupant: Occupant::Background,
                    remaining: rng.random_range(1..=max_stay),
                });
            }
        }
    }

    /// Grant `vehicle` the nearest free slot index whose access cell is
    /// reachable from `near` within the search radius.
    ///
    /// Nearest means fewest legal moves; ties go to the row-major first
    /// access cell, then the lowest slot id. A vehicle already holding a
    /// slot gets its existing handle back.
    pub fn reserve(&mut self, vehicle: VehicleId, near: CellCoord, grid: &Grid) -> SimResult<SlotHandle> {
        if let Some(handle) = self.holders.get(&vehicle) {
            return Ok(*handle);
        }

        for (access, _) in grid.reachable_within(near, self.search_radius) {
            let Some(slot_ids) = self.by_access.get(&access) else {
                continue;
            };
            for slot_id in slot_ids {
                let slot = &mut self.slots[slot_id.0];
                if let Some(index) = slot.first_free_index() {
                    slot.entries[index] = Some(SlotEntry::Reserved(vehicle));
                    let handle = SlotHandle {
                        slot: *slot_id,
                        index,
                    };
                    self.holders.insert(vehicle, handle);
                    return Ok(handle);
                }
            }
        }

        Err(SimError::CapacityExceeded { near })
    }

    /// Free a slot index, whatever state it is in
    pub fn release(&mut self, handle: SlotHandle) -> SimResult<()> {
        let entry = self.entry_mut(handle)?;
        let previous = entry.take();
        match previous {
            Some(SlotEntry::Reserved(vehicle))
            | Some(SlotEntry::Occupied {
                occupant: Occupant::Vehicle(vehicle),
                ..
            }) => {
                self.holders.remove(&vehicle);
                Ok(())
            }
            Some(SlotEntry::Occupied { .. }) => Ok(()),
            None => {
                warn!("release of empty slot index {:?}", handle);
                Err(SimError::UnknownSlot {
                    slot: handle.slot,
                    index: handle.index,
                })
            }
        }
    }

    /// Turn a reservation into an occupied index parked for `duration` ticks
    pub fn occupy(&mut self, handle: SlotHandle, duration: u32) -> SimResult<()> {
        let entry = self.entry_mut(handle)?;
        match *entry {
            Some(SlotEntry::Reserved(vehicle)) => {
                *entry = Some(SlotEntry::Occupied {
                    occupant: Occupant::Vehicle(vehicle),
                    remaining: duration,
                });
                Ok(())
            }
            _ => Err(SimError::NotFound(format!(
                "reservation for slot {:?} index {}",
                handle.slot, handle.index
            ))),
        }
    }

    /// Decrement an occupied index's remaining duration, returning the new value
    pub fn count_down(&mut self, handle: SlotHandle) -> SimResult<u32> {
        let entry = self.entry_mut(handle)?;
        match entry {
            Some(SlotEntry::Occupied { remaining, .. }) => {
                *remaining = remaining.saturating_sub(1);
                Ok(*remaining)
            }
            _ => Err(SimError::NotFound(format!(
                "occupant of slot {:?} index {}",
                handle.slot, handle.index
            ))),
        }
    }

    pub fn occupied_duration_remaining(&self, handle: SlotHandle) -> SimResult<u32> {
        match self.entry(handle)? {
            Some(SlotEntry::Occupied { remaining, .. }) => Ok(*remaining),
            _ => Err(SimError::NotFound(format!(
                "occupant of slot {:?} index {}",
                handle.slot, handle.index
            ))),
        }
    }

    /// Count down background occupants and free those whose stay is over.
    /// Returns how many indices were freed.
    pub fn advance(&mut self) -> usize {
        let mut freed = 0;
        for slot in &mut self.slots {
            for entry in slot.entries.iter_mut() {
                if let Some(SlotEntry::Occupied {
                    occupant: Occupant::Background,
                    remaining,
                }) = entry
                {
                    *remaining = remaining.saturating_sub(1);
                    if *remaining == 0 {
                        *entry = None;
                        freed += 1;
                    }
                }
            }
        }
        freed
    }

    /// Parked vehicles that leave through `access`, with remaining durations
    pub fn exit_contenders(&self, access: CellCoord) -> Vec<(VehicleId, u32)> {
        let Some(slot_ids) = self.by_access.get(&access) else {
            return Vec::new();
        };
        slot_ids
            .iter()
            .flat_map(|id| self.slots[id.0].entries.iter())
            .filter_map(|entry| match entry {
                Some(SlotEntry::Occupied {
                    occupant: Occupant::Vehicle(vehicle),
                    remaining,
                }) => Some((*vehicle, *remaining)),
                _ => None,
            })
            .collect()
    }

    pub fn access_of(&self, handle: SlotHandle) -> SimResult<CellCoord> {
        Ok(self.slot(handle.slot)?.site.access)
    }

    pub fn holder(&self, vehicle: VehicleId) -> Option<SlotHandle> {
        self.holders.get(&vehicle).copied()
    }

    pub fn slot(&self, id: SlotId) -> SimResult<&ParkingSlot> {
        self.slots
            .get(id.0)
            .ok_or_else(|| SimError::NotFound(format!("parking slot {:?}", id)))
    }

    pub fn slots(&self) -> &[ParkingSlot] {
        &self.slots
    }

    pub fn free_capacity(&self, id: SlotId) -> SimResult<u32> {
        Ok(self.slot(id)?.free_capacity())
    }

    pub fn occupied_count(&self, id: SlotId) -> SimResult<u32> {
        Ok(self.slot(id)?.occupied_count())
    }

    /// Occupied indices across all slots of `kind`
    pub fn occupied_of_kind(&self, kind: ParkingKind) -> u32 {
        self.slots
            .iter()
            .filter(|s| s.site.kind == kind)
            .map(ParkingSlot::occupied_count)
            .sum()
    }

    pub fn total_capacity(&self) -> u32 {
        self.slots.iter().map(ParkingSlot::capacity).sum()
    }

    pub fn total_occupied(&self) -> u32 {
        self.slots.iter().map(ParkingSlot::occupied_count).sum()
    }

    fn entry(&self, handle: SlotHandle) -> SimResult<&Option<SlotEntry>> {
        self.slots
            .get(handle.slot.0)
            .and_then(|slot| slot.entries.get(handle.index))
            .ok_or(SimError::UnknownSlot {
                slot: handle.slot,
                index: handle.index,
            })
    }

    fn entry_mut(&mut self, handle: SlotHandle) -> SimResult<&mut Option<SlotEntry>> {
        self.slots
            .get_mut(handle.slot.0)
            .and_then(|slot| slot.entries.get_mut(handle.index))
            .ok_or(SimError::UnknownSlot {
                slot: handle.slot,
                index: handle.index,
            })
    }
}
