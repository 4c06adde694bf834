//! Static road-network topology
//!
//! The grid is laid out from fractional positions so the same proportions
//! hold for every size tier. Three horizontal roads (top westbound, middle
//! and bottom eastbound) cross four vertical roads (two-lane edges running
//! south on the left and north on the right, plus single-lane inner columns
//! running north and south). Vertical roads enter and leave through the top
//! and bottom boundary rows, which is where vehicles spawn and exit.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use super::config::RoadSize;
use super::error::{SimError, SimResult};
use super::types::{CellCoord, Direction, DirectionSet};

/// Fractional column positions of pedestrian crossings on horizontal roads
const CROSSING_COLUMN_FRACTIONS: [f64; 4] = [0.1, 0.3, 0.7, 0.9];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CellKind {
    Empty,
    Road,
    Building,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParkingKind {
    Street,
    Building,
}

/// A single grid cell
#[derive(Debug, Clone)]
pub struct Cell {
    pub coord: CellCoord,
    pub kind: CellKind,
    pub lanes: u8,
    /// Directions of the roads running through this cell
    pub flows: DirectionSet,
    /// Legal outgoing moves: flows whose neighbour is an in-bounds road cell
    pub permitted: DirectionSet,
    pub is_intersection: bool,
    pub is_crossing: bool,
    pub is_spawn: bool,
    pub is_exit: bool,
    pub parking_capacity: u32,
    pub parking_kind: Option<ParkingKind>,
}

impl Cell {
    fn empty(coord: CellCoord) -> Self {
        Self {
            coord,
            kind: CellKind::Empty,
            lanes: 0,
            flows: DirectionSet::empty(),
            permitted: DirectionSet::empty(),
            is_intersection: false,
            is_crossing: false,
            is_spawn: false,
            is_exit: false,
            parking_capacity: 0,
            parking_kind: None,
        }
    }

    pub fn is_road(&self) -> bool {
        self.kind == CellKind::Road
    }

    /// Short text form used by the ASCII map: arrow, lane count, and
    /// `T`/`X` suffixes for lights and crossings
    pub fn short_repr(&self) -> String {
        match self.kind {
            CellKind::Empty => ".".to_string(),
            CellKind::Building => "[P]".to_string(),
            CellKind::Road => {
                let mut text: String = if self.is_intersection {
                    "+".to_string()
                } else {
                    self.flows.iter().map(Direction::arrow).collect()
                };
                if self.lanes > 1 {
                    text.push_str(&format!("({})", self.lanes));
                }
                let mut suffix = String::new();
                if self.is_intersection {
                    suffix.push('T');
                }
                if self.is_crossing {
                    suffix.push('X');
                }
                if !suffix.is_empty() {
                    text.push_str(&format!("[{suffix}]"));
                }
                text
            }
        }
    }
}

/// A parking-capable cell and the road cell used to reach it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParkingSite {
    pub cell: CellCoord,
    pub access: CellCoord,
    pub kind: ParkingKind,
    pub capacity: u32,
}

/// Row/column indices of the generated roads
#[derive(Debug, Clone, Copy)]
struct RoadLines {
    top: i32,
    middle: i32,
    bottom: i32,
    left: i32,
    left_inner: i32,
    right_inner: i32,
    right: i32,
}

/// The road grid
#[derive(Debug, Clone)]
pub struct Grid {
    rows: i32,
    cols: i32,
    cells: Vec<Cell>,
    spawn_cells: Vec<CellCoord>,
    exit_cells: Vec<CellCoord>,
    intersections: Vec<CellCoord>,
    crossings: Vec<CellCoord>,
    parking_sites: Vec<ParkingSite>,
    /// Fewest legal moves from each cell to any exit, row-major
    exit_distances: Vec<Option<u32>>,
}

impl Grid {
    /// Build the layout for a size tier
    pub fn new(size: RoadSize, building_capacity: u32) -> SimResult<Self> {
        let (rows, cols) = size.dimensions();
        Self::with_dimensions(rows, cols, building_capacity)
    }

    /// Build the layout for arbitrary dimensions (at least 10×10)
    pub fn with_dimensions(rows: i32, cols: i32, building_capacity: u32) -> SimResult<Self> {
        if rows < 10 || cols < 10 {
            return Err(SimError::Configuration(format!(
                "grid must be at least 10x10, got {rows}x{cols}"
            )));
        }

        let frac = |fraction: f64, n: i32| -> i32 {
            ((fraction * (n - 1) as f64).round() as i32).clamp(0, n - 1)
        };

        let lines = RoadLines {
            top: frac(0.1, rows),
            middle: frac(0.5, rows),
            bottom: frac(0.9, rows),
            left: 0,
            left_inner: frac(0.2, cols),
            right_inner: frac(0.8, cols),
            right: cols - 1,
        };

        let mut grid = Grid {
            rows,
            cols,
            cells: (0..rows)
                .flat_map(|row| (0..cols).map(move |col| Cell::empty(CellCoord::new(row, col))))
                .collect(),
            spawn_cells: Vec::new(),
            exit_cells: Vec::new(),
            intersections: Vec::new(),
            crossings: Vec::new(),
            parking_sites: Vec::new(),
            exit_distances: Vec::new(),
        };

        grid.lay_roads(&lines);
        grid.classify_cells();
        grid.place_crossings(&lines);
        grid.place_parking(&lines, building_capacity)?;
        grid.validate_topology()?;
        grid.exit_distances = grid.measure_exit_distances();

        Ok(grid)
    }

    fn lay_roads(&mut self, lines: &RoadLines) {
        let horizontal = [
            (lines.top, Direction::West, 1),
            (lines.middle, Direction::East, 1),
            (lines.bottom, Direction::East, 1),
        ];
        let vertical = [
            (lines.left, Direction::South, 2),
            (lines.left_inner, Direction::North, 1),
            (lines.right_inner, Direction::South, 1),
            (lines.right, Direction::North, 2),
        ];

        for (row, direction, lanes) in horizontal {
            for col in 0..self.cols {
                self.lay_road_cell(CellCoord::new(row, col), direction, lanes);
            }
        }
        for (col, direction, lanes) in vertical {
            for row in 0..self.rows {
                self.lay_road_cell(CellCoord::new(row, col), direction, lanes);
            }
        }
    }

    fn lay_road_cell(&mut self, coord: CellCoord, direction: Direction, lanes: u8) {
        let index = self.index(coord);
        let cell = &mut self.cells[index];
        cell.kind = CellKind::Road;
        cell.lanes = cell.lanes.max(lanes);
        cell.flows.insert(direction);
    }

    /// Derive permitted moves, intersections, spawn and exit cells from flows
    fn classify_cells(&mut self) {
        for index in 0..self.cells.len() {
            if !self.cells[index].is_road() {
                continue;
            }
            let coord = self.cells[index].coord;
            let flows = self.cells[index].flows;

            let permitted: DirectionSet = flows
                .iter()
                .filter(|d| {
                    self.cell_at(coord.offset(*d))
                        .map(Cell::is_road)
                        .unwrap_or(false)
                })
                .collect();

            let has_vertical = flows.iter().any(Direction::is_vertical);
            let has_horizontal = flows.iter().any(|d| !d.is_vertical());
            let is_intersection = has_vertical && has_horizontal;

            let mut is_spawn = false;
            let mut is_exit = false;
            if !is_intersection {
                if let Some(flow) = flows.iter().next() {
                    is_exit = !self.in_bounds(coord.offset(flow));
                    is_spawn = !self.in_bounds(coord.offset(flow.opposite()));
                }
            }

            let cell = &mut self.cells[index];
            cell.permitted = permitted;
            cell.is_intersection = is_intersection;
            cell.is_spawn = is_spawn;
            cell.is_exit = is_exit;

            if is_intersection {
                self.intersections.push(coord);
            }
            if is_spawn {
                self.spawn_cells.push(coord);
            }
            if is_exit {
                self.exit_cells.push(coord);
            }
        }
    }

    fn place_crossings(&mut self, lines: &RoadLines) {
        let frac_col = |fraction: f64| -> i32 {
            ((fraction * (self.cols - 1) as f64).round() as i32).clamp(0, self.cols - 1)
        };
        let frac_row = |fraction: f64| -> i32 {
            ((fraction * (self.rows - 1) as f64).round() as i32).clamp(0, self.rows - 1)
        };

        let mut candidates = Vec::new();
        for row in [lines.top, lines.bottom, lines.middle] {
            for fraction in CROSSING_COLUMN_FRACTIONS {
                candidates.push(CellCoord::new(row, frac_col(fraction)));
            }
        }
        candidates.push(CellCoord::new(frac_row(0.25), lines.left));
        candidates.push(CellCoord::new(frac_row(0.75), lines.right));

        for coord in candidates {
            let index = self.index(coord);
            let cell = &mut self.cells[index];
            if !cell.is_road() || cell.is_intersection || cell.is_spawn || cell.is_exit {
                continue;
            }
            if !cell.is_crossing {
                cell.is_crossing = true;
                self.crossings.push(coord);
            }
        }
        self.crossings.sort();
    }

    fn place_parking(&mut self, lines: &RoadLines, building_capacity: u32) -> SimResult<()> {
        for cell in self.cells.iter_mut() {
            if cell.is_road()
                && !cell.is_intersection
                && !cell.is_crossing
                && !cell.is_spawn
                && !cell.is_exit
            {
                cell.parking_capacity = 1;
                cell.parking_kind = Some(ParkingKind::Street);
                self.parking_sites.push(ParkingSite {
                    cell: cell.coord,
                    access: cell.coord,
                    kind: ParkingKind::Street,
                    capacity: 1,
                });
            }
        }

        if building_capacity == 0 {
            return Ok(());
        }

        // The building sits just north of the middle road
        let building_col =
            ((0.53 * (self.cols - 1) as f64).round() as i32).clamp(0, self.cols - 1);
        let building = CellCoord::new(lines.middle - 1, building_col);
        let access = CellCoord::new(lines.middle, building_col);

        if self.cell_at(building)?.kind != CellKind::Empty || !self.cell_at(access)?.is_road() {
            return Err(SimError::Configuration(format!(
                "parking building at {building} does not fit the road layout"
            )));
        }

        let index = self.index(building);
        let cell = &mut self.cells[index];
        cell.kind = CellKind::Building;
        cell.parking_capacity = building_capacity;
        cell.parking_kind = Some(ParkingKind::Building);
        self.parking_sites.push(ParkingSite {
            cell: building,
            access,
            kind: ParkingKind::Building,
            capacity: building_capacity,
        });

        Ok(())
    }

    /// Every non-exit road cell needs a successor, must be reachable from a
    /// spawn cell and must be able to reach an exit cell
    fn validate_topology(&self) -> SimResult<()> {
        if self.spawn_cells.is_empty() || self.exit_cells.is_empty() {
            return Err(SimError::Configuration(
                "road layout has no spawn or no exit cells".to_string(),
            ));
        }

        let mut graph: DiGraph<Option<CellCoord>, ()> = DiGraph::new();
        let mut nodes: HashMap<CellCoord, NodeIndex> = HashMap::new();

        for cell in self.cells.iter().filter(|c| c.is_road()) {
            if cell.permitted.is_empty() && !cell.is_exit {
                return Err(SimError::Configuration(format!(
                    "road cell {} has no legal successor",
                    cell.coord
                )));
            }
            nodes.insert(cell.coord, graph.add_node(Some(cell.coord)));
        }

        for cell in self.cells.iter().filter(|c| c.is_road()) {
            for direction in cell.permitted.iter() {
                let next = cell.coord.offset(direction);
                graph.add_edge(nodes[&cell.coord], nodes[&next], ());
            }
        }

        let source = graph.add_node(None);
        let sink = graph.add_node(None);
        for spawn in &self.spawn_cells {
            graph.add_edge(source, nodes[spawn], ());
        }
        for exit in &self.exit_cells {
            graph.add_edge(nodes[exit], sink, ());
        }

        let mut reached_from_spawn = vec![false; graph.node_count()];
        let mut dfs = Dfs::new(&graph, source);
        while let Some(node) = dfs.next(&graph) {
            reached_from_spawn[node.index()] = true;
        }

        let reversed = Reversed(&graph);
        let mut reaches_exit = vec![false; graph.node_count()];
        let mut dfs = Dfs::new(reversed, sink);
        while let Some(node) = dfs.next(reversed) {
            reaches_exit[node.index()] = true;
        }

        for (coord, node) in &nodes {
            if !reached_from_spawn[node.index()] {
                return Err(SimError::Configuration(format!(
                    "road cell {coord} is unreachable from every spawn cell"
                )));
            }
            if !reaches_exit[node.index()] {
                return Err(SimError::Configuration(format!(
                    "road cell {coord} cannot reach any exit cell"
                )));
            }
        }

        Ok(())
    }

    /// Breadth-first walk backwards from every exit along legal moves
    fn measure_exit_distances(&self) -> Vec<Option<u32>> {
        let mut distances = vec![None; self.cells.len()];
        let mut queue = VecDeque::new();
        for exit in &self.exit_cells {
            distances[self.index(*exit)] = Some(0);
            queue.push_back(*exit);
        }

        while let Some(coord) = queue.pop_front() {
            let Some(distance) = distances[self.index(coord)] else {
                continue;
            };
            for (from, _) in self.predecessors(coord) {
                let entry = &mut distances[self.index(from)];
                if entry.is_none() {
                    *entry = Some(distance + 1);
                    queue.push_back(from);
                }
            }
        }

        distances
    }

    fn index(&self, coord: CellCoord) -> usize {
        (coord.row * self.cols + coord.col) as usize
    }

    pub fn rows(&self) -> i32 {
        self.rows
    }

    pub fn cols(&self) -> i32 {
        self.cols
    }

    pub fn in_bounds(&self, coord: CellCoord) -> bool {
        (0..self.rows).contains(&coord.row) && (0..self.cols).contains(&coord.col)
    }

    pub fn cell_at(&self, coord: CellCoord) -> SimResult<&Cell> {
        if !self.in_bounds(coord) {
            return Err(SimError::OutOfBounds(coord));
        }
        Ok(&self.cells[self.index(coord)])
    }

    pub fn permitted_directions(&self, coord: CellCoord) -> SimResult<DirectionSet> {
        Ok(self.cell_at(coord)?.permitted)
    }

    pub fn neighbor(&self, coord: CellCoord, direction: Direction) -> SimResult<CellCoord> {
        let next = coord.offset(direction);
        if !self.in_bounds(next) {
            return Err(SimError::OutOfBounds(next));
        }
        Ok(next)
    }

    /// Cells that can legally move into `coord`, with the direction of travel
    /// into it, in right-of-way order
    pub fn predecessors(&self, coord: CellCoord) -> Vec<(CellCoord, Direction)> {
        Direction::ALL
            .into_iter()
            .filter_map(|direction| {
                let from = coord.offset(direction.opposite());
                let cell = self.cell_at(from).ok()?;
                cell.permitted.contains(direction).then_some((from, direction))
            })
            .collect()
    }

    /// Number of legal moves from `from` to `to`, if at most `limit`
    pub fn lane_distance(&self, from: CellCoord, to: CellCoord, limit: u32) -> Option<u32> {
        self.reachable_within(from, limit)
            .into_iter()
            .find(|(coord, _)| *coord == to)
            .map(|(_, distance)| distance)
    }

    /// Breadth-first walk along permitted moves. Includes `from` at distance
    /// 0; ordered by distance, then row-major.
    pub fn reachable_within(&self, from: CellCoord, radius: u32) -> Vec<(CellCoord, u32)> {
        let mut seen: HashMap<CellCoord, u32> = HashMap::new();
        let mut queue = VecDeque::new();
        if self.in_bounds(from) {
            seen.insert(from, 0);
            queue.push_back(from);
        }

        while let Some(coord) = queue.pop_front() {
            let distance = seen[&coord];
            if distance == radius {
                continue;
            }
            let Ok(cell) = self.cell_at(coord) else {
                continue;
            };
            for direction in cell.permitted.iter() {
                let next = coord.offset(direction);
                if !seen.contains_key(&next) {
                    seen.insert(next, distance + 1);
                    queue.push_back(next);
                }
            }
        }

        let mut reached: Vec<(CellCoord, u32)> = seen.into_iter().collect();
        reached.sort_by_key(|(coord, distance)| (*distance, *coord));
        reached
    }

    /// Fewest legal moves from `coord` to the nearest exit; `None` off the
    /// road network
    pub fn distance_to_exit(&self, coord: CellCoord) -> Option<u32> {
        if !self.in_bounds(coord) {
            return None;
        }
        self.exit_distances.get(self.index(coord)).copied().flatten()
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter()
    }

    pub fn spawn_cells(&self) -> &[CellCoord] {
        &self.spawn_cells
    }

    pub fn exit_cells(&self) -> &[CellCoord] {
        &self.exit_cells
    }

    pub fn intersections(&self) -> &[CellCoord] {
        &self.intersections
    }

    pub fn crossings(&self) -> &[CellCoord] {
        &self.crossings
    }

    pub fn parking_sites(&self) -> &[ParkingSite] {
        &self.parking_sites
    }

    /// Cells holding parking capacity, street spaces first
    pub fn parking_cells(&self) -> Vec<CellCoord> {
        self.parking_sites.iter().map(|site| site.cell).collect()
    }

    /// Render the grid as aligned text, letting `overlay` replace any cell
    pub fn render_ascii<F>(&self, overlay: F) -> String
    where
        F: Fn(CellCoord) -> Option<String>,
    {
        let texts: Vec<String> = self
            .cells
            .iter()
            .map(|cell| overlay(cell.coord).unwrap_or_else(|| cell.short_repr()))
            .collect();

        let mut widths = vec![0usize; self.cols as usize];
        for (index, text) in texts.iter().enumerate() {
            let col = index % self.cols as usize;
            widths[col] = widths[col].max(text.chars().count());
        }

        let mut out = String::new();
        for row in 0..self.rows as usize {
            let line: Vec<String> = (0..self.cols as usize)
                .map(|col| {
                    let text = &texts[row * self.cols as usize + col];
                    let pad = widths[col] - text.chars().count();
                    format!("{text}{}", " ".repeat(pad))
                })
                .collect();
            out.push_str(line.join(" | ").trim_end());
            out.push('\n');
        }
        out
    }
}
