//! Grid Traffic Simulation Library
//!
//! A discrete-time traffic simulation over a road grid that runs headless
//! and exposes render snapshots and run metrics.

pub mod simulation;
