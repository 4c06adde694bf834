use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs;
use std::path::PathBuf;

use grid_traffic_sim::simulation::{RoadSize, SimConfig, Simulation};

#[derive(Parser)]
#[command(name = "grid_traffic_sim")]
#[command(about = "Headless grid traffic simulation")]
struct Cli {
    /// Road grid size: small, medium or large
    #[arg(long, default_value = "small")]
    size: RoadSize,

    /// Number of simulation ticks to run
    #[arg(long, default_value = "50")]
    ticks: u64,

    /// Red light duration in ticks
    #[arg(long, default_value = "5")]
    red: u32,

    /// Green light duration in ticks
    #[arg(long, default_value = "4")]
    green: u32,

    /// Let vehicles park in street and building slots
    #[arg(long)]
    parking: bool,

    /// Average parked duration in ticks
    #[arg(long, default_value = "5")]
    avg_parking_time: u32,

    /// Ticks spent pulling into and out of a slot
    #[arg(long, default_value = "1")]
    parking_delay: u32,

    /// Seed for every random choice in the run
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Write the final metrics report as JSON to this path
    #[arg(long)]
    metrics_json: Option<PathBuf>,

    /// Print the grid map before and after the run
    #[arg(long)]
    draw_map: bool,

    /// Log progress every N ticks (0 disables)
    #[arg(long, default_value = "10")]
    report_every: u64,
}

impl Cli {
    fn to_config(&self) -> SimConfig {
        SimConfig {
            road_size: self.size,
            total_ticks: self.ticks,
            red_duration: self.red,
            green_duration: self.green,
            parking_enabled: self.parking,
            avg_parking_time: self.avg_parking_time,
            parking_delay_steps: self.parking_delay,
            seed: self.seed,
            ..SimConfig::default()
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    run_headless(&cli)
}

/// Run the simulation without graphics and log the final statistics
fn run_headless(cli: &Cli) -> Result<()> {
    info!("Running grid traffic simulation in headless mode...");
    info!(
        "Size: {:?}, ticks: {}, lights: red {} / green {}, parking: {}",
        cli.size, cli.ticks, cli.red, cli.green, cli.parking
    );

    let config = cli.to_config();
    let total_ticks = config.total_ticks;
    let mut sim = Simulation::new(config).context("Failed to set up simulation")?;

    if cli.draw_map {
        sim.draw_map();
    }

    while sim.tick() < total_ticks {
        sim.step()
            .with_context(|| format!("Simulation failed at tick {}", sim.tick()))?;

        if cli.report_every > 0 && sim.tick() % cli.report_every == 0 {
            let report = sim.finalize();
            info!(
                "--- After tick {} --- live: {}, completed: {}, blocked spawns: {}",
                sim.tick(),
                report.vehicles_live,
                report.vehicles_completed,
                report.spawns_blocked
            );
        }
    }

    let report = sim.finalize();
    report.log_summary();

    if cli.draw_map {
        sim.print_summary();
        sim.draw_map();
    }

    if let Some(path) = &cli.metrics_json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize metrics")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
        info!("Metrics written to {}", path.display());
    }

    Ok(())
}
