//! Parking registry reservation, capacity and release

use rand::rngs::StdRng;
use rand::SeedableRng;

use grid_traffic_sim::simulation::{
    CellCoord, Grid, Occupant, ParkingKind, ParkingRegistry, RoadSize, SimError, SlotEntry,
    VehicleId,
};

fn small_grid() -> Grid {
    Grid::new(RoadSize::Small, 10).expect("small grid builds")
}

#[test]
fn test_reserve_picks_nearest_access_then_row_major() {
    let grid = small_grid();
    let mut registry = ParkingRegistry::from_grid(&grid, 2);
    let near = CellCoord::new(8, 3);

    let first = registry.reserve(VehicleId(0), near, &grid).unwrap();
    assert_eq!(registry.access_of(first).unwrap(), CellCoord::new(7, 3));

    let second = registry.reserve(VehicleId(1), near, &grid).unwrap();
    assert_eq!(registry.access_of(second).unwrap(), CellCoord::new(6, 3));

    let third = registry.reserve(VehicleId(2), near, &grid).unwrap();
    assert_eq!(registry.access_of(third).unwrap(), CellCoord::new(8, 5));

    assert_eq!(
        registry.reserve(VehicleId(3), near, &grid),
        Err(SimError::CapacityExceeded { near })
    );
}

#[test]
fn test_reserve_is_idempotent_per_vehicle() {
    let grid = small_grid();
    let mut registry = ParkingRegistry::from_grid(&grid, 2);

    let first = registry.reserve(VehicleId(4), CellCoord::new(8, 3), &grid).unwrap();
    let again = registry.reserve(VehicleId(4), CellCoord::new(3, 0), &grid).unwrap();
    assert_eq!(first, again);
    assert_eq!(registry.holder(VehicleId(4)), Some(first));
    assert_eq!(registry.total_occupied(), 1);
}

#[test]
fn test_release_frees_slot_for_other_vehicle() {
    let grid = small_grid();
    let mut registry = ParkingRegistry::from_grid(&grid, 1);
    let near = CellCoord::new(8, 3);

    let handle = registry.reserve(VehicleId(0), near, &grid).unwrap();
    registry.release(handle).unwrap();
    assert_eq!(registry.holder(VehicleId(0)), None);
    assert_eq!(registry.free_capacity(handle.slot).unwrap(), 1);

    let reused = registry.reserve(VehicleId(1), near, &grid).unwrap();
    assert_eq!(reused, handle);
}

#[test]
fn test_release_of_empty_index_is_unknown_slot() {
    let grid = small_grid();
    let mut registry = ParkingRegistry::from_grid(&grid, 1);

    let handle = registry.reserve(VehicleId(0), CellCoord::new(8, 3), &grid).unwrap();
    registry.release(handle).unwrap();
    assert_eq!(
        registry.release(handle),
        Err(SimError::UnknownSlot {
            slot: handle.slot,
            index: handle.index
        })
    );
}

#[test]
fn test_occupy_and_count_down() {
    let grid = small_grid();
    let mut registry = ParkingRegistry::from_grid(&grid, 1);

    let handle = registry.reserve(VehicleId(2), CellCoord::new(8, 3), &grid).unwrap();
    assert!(matches!(
        registry.occupied_duration_remaining(handle),
        Err(SimError::NotFound(_))
    ));

    registry.occupy(handle, 3).unwrap();
    assert_eq!(registry.occupied_duration_remaining(handle).unwrap(), 3);
    assert_eq!(registry.count_down(handle).unwrap(), 2);
    assert_eq!(registry.count_down(handle).unwrap(), 1);
    assert_eq!(registry.occupied_duration_remaining(handle).unwrap(), 1);

    let entry = registry.slot(handle.slot).unwrap().entries()[handle.index];
    assert_eq!(
        entry,
        Some(SlotEntry::Occupied {
            occupant: Occupant::Vehicle(VehicleId(2)),
            remaining: 1
        })
    );

    // Occupying twice is a bookkeeping error
    assert!(registry.occupy(handle, 3).is_err());
}

#[test]
fn test_building_capacity_is_enforced() {
    let grid = small_grid();
    // Radius 0: only slots entered from the building's access cell qualify
    let mut registry = ParkingRegistry::from_grid(&grid, 0);
    let access = CellCoord::new(5, 7);

    // One street space on the access cell plus ten in the building
    for id in 0..11 {
        let handle = registry.reserve(VehicleId(id), access, &grid).unwrap();
        assert_eq!(registry.access_of(handle).unwrap(), access);
    }
    assert_eq!(
        registry.reserve(VehicleId(11), access, &grid),
        Err(SimError::CapacityExceeded { near: access })
    );

    assert_eq!(registry.occupied_of_kind(ParkingKind::Building), 10);
    assert_eq!(registry.occupied_of_kind(ParkingKind::Street), 1);
    for slot in registry.slots() {
        assert!(slot.occupied_count() <= slot.capacity());
    }
}

#[test]
fn test_exit_contenders_share_access_cell() {
    let grid = small_grid();
    let mut registry = ParkingRegistry::from_grid(&grid, 0);
    let access = CellCoord::new(5, 7);

    let a = registry.reserve(VehicleId(3), access, &grid).unwrap();
    let b = registry.reserve(VehicleId(5), access, &grid).unwrap();
    let _reserved_only = registry.reserve(VehicleId(8), access, &grid).unwrap();
    registry.occupy(a, 4).unwrap();
    registry.occupy(b, 1).unwrap();

    let mut contenders = registry.exit_contenders(access);
    contenders.sort();
    assert_eq!(contenders, vec![(VehicleId(3), 4), (VehicleId(5), 1)]);
    assert!(registry.exit_contenders(CellCoord::new(3, 0)).is_empty());
}

#[test]
fn test_background_occupants_fill_and_drain() {
    let grid = small_grid();
    let mut registry = ParkingRegistry::from_grid(&grid, 2);
    let mut rng = StdRng::seed_from_u64(42);

    registry.seed_background(0.3, 5, &mut rng);
    // Street spaces hold one car, floor(0.3) = 0; the building gets 3
    assert_eq!(registry.total_occupied(), 3);
    assert_eq!(registry.occupied_of_kind(ParkingKind::Building), 3);

    let mut freed = 0;
    for _ in 0..10 {
        freed += registry.advance();
    }
    assert_eq!(freed, 3);
    assert_eq!(registry.total_occupied(), 0);
}

#[test]
fn test_background_does_not_touch_vehicle_occupants() {
    let grid = small_grid();
    let mut registry = ParkingRegistry::from_grid(&grid, 1);

    let handle = registry.reserve(VehicleId(0), CellCoord::new(8, 3), &grid).unwrap();
    registry.occupy(handle, 2).unwrap();
    for _ in 0..5 {
        registry.advance();
    }
    assert_eq!(registry.occupied_duration_remaining(handle).unwrap(), 2);
}

#[test]
fn test_background_fill_with_huge_average_stay() {
    let grid = small_grid();
    let mut registry = ParkingRegistry::from_grid(&grid, 2);
    let mut rng = StdRng::seed_from_u64(3);

    registry.seed_background(1.0, u32::MAX, &mut rng);
    assert_eq!(registry.total_occupied(), registry.total_capacity());
}
