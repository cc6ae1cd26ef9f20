//! CLI entry point for MCM3000 controllers.
//!
//! Provides one-shot commands for:
//! - Listing supported stages and candidate serial ports
//! - Reading axis positions
//! - Absolute and relative moves, homing, and zeroing
//!
//! # Usage
//!
//! ```bash
//! mcm3000 --config config/mcm3000.toml position
//! mcm3000 --port /dev/ttyUSB0 --stage PLS-X --stage PLS-X --stage ZFM2020 move --axis 3 -- -125.5
//! mcm3000 --mock --stage ZFM2020 home
//! ```

// Global allocator
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use mcm_driver_thorlabs::mock::MockMcm3000;
use mcm_driver_thorlabs::{
    list_ports, supported_stages, AxisConfig, Mcm3000Config, Mcm3000Driver, StageModel, AUTO_PORT,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mcm3000")]
#[command(about = "Control a Thorlabs MCM3000 3-axis motor controller", long_about = None)]
struct Cli {
    /// Controller configuration file (TOML format)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, or "auto" to detect the controller over USB
    #[arg(long, global = true)]
    port: Option<String>,

    /// Stage on the next axis, starting at axis 1 (repeatable)
    #[arg(long = "stage", global = true)]
    stages: Vec<StageModel>,

    /// Axis number whose travel direction is inverted (repeatable)
    #[arg(long = "reverse", global = true)]
    reversed: Vec<u8>,

    /// Talk to a simulated controller instead of hardware
    #[arg(long, global = true)]
    mock: bool,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported stage models
    Stages,

    /// List serial ports and flag likely MCM3000 controllers
    Ports,

    /// Print axis positions
    Position {
        /// Only this axis
        #[arg(long)]
        axis: Option<u8>,
    },

    /// Move an axis
    Move {
        /// Axis number (1-3)
        #[arg(long)]
        axis: u8,

        /// Target in micrometres (distance with --relative)
        #[arg(allow_negative_numbers = true)]
        um: f64,

        /// Move relative to the current position
        #[arg(long)]
        relative: bool,

        /// Return once the command is sent
        #[arg(long)]
        no_wait: bool,
    },

    /// Return axes to encoder count 0
    Home {
        /// Only this axis (default: every configured axis)
        #[arg(long)]
        axis: Option<u8>,
    },

    /// Declare the current position of an axis to be 0
    Zero {
        /// Axis number (1-3)
        #[arg(long)]
        axis: u8,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Stages => {
            print_stages();
            Ok(())
        }
        Commands::Ports => print_ports(),
        Commands::Config => {
            let config = build_config(&cli)?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        command => {
            let config = build_config(&cli)?;
            let mcm = connect(&config, cli.mock).await?;
            let result = run(&mcm, command).await;
            mcm.close().await?;
            result
        }
    }
}

/// File configuration (if any) with command-line overrides applied.
fn build_config(cli: &Cli) -> Result<Mcm3000Config> {
    let mut config = match &cli.config {
        Some(path) => Mcm3000Config::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Mcm3000Config::new(AUTO_PORT),
    };

    if let Some(port) = &cli.port {
        config.port = port.clone();
    }
    if cli.mock && cli.port.is_none() && cli.config.is_none() {
        config.port = "mock".to_string();
    }

    if !cli.stages.is_empty() {
        config.axes = cli
            .stages
            .iter()
            .zip(1u8..)
            .map(|(stage, axis)| AxisConfig::new(axis, *stage))
            .collect();
    }
    for axis in &cli.reversed {
        match config.axes.iter_mut().find(|a| a.axis == *axis) {
            Some(a) => a.reverse = true,
            None => bail!("--reverse {}: axis is not configured", axis),
        }
    }

    config.validate()?;
    Ok(config)
}

async fn connect(config: &Mcm3000Config, mock: bool) -> Result<Mcm3000Driver> {
    let mcm = if mock {
        let (stream, _handle) = MockMcm3000::new().spawn();
        Mcm3000Driver::connect_with_stream(config, stream).await?
    } else {
        Mcm3000Driver::connect(config).await?
    };
    tracing::info!(port = %mcm.port_name(), "Connected to MCM3000");
    Ok(mcm)
}

async fn run(mcm: &Mcm3000Driver, command: &Commands) -> Result<()> {
    match *command {
        Commands::Position { axis } => {
            for axis in selected_axes(mcm, axis) {
                let pos = mcm.position(axis).await?;
                println!("axis {}: {:.3} um ({} counts)", axis, pos.um, pos.counts);
            }
        }
        Commands::Move {
            axis,
            um,
            relative,
            no_wait,
        } => {
            let legal_um = match (relative, no_wait) {
                (false, false) => mcm.move_to(axis, um).await?,
                (true, false) => mcm.move_by(axis, um).await?,
                (false, true) => mcm.start_move(axis, um).await?,
                (true, true) => mcm.start_move_by(axis, um).await?,
            };
            if no_wait {
                println!("axis {}: moving to {:.3} um", axis, legal_um);
            } else {
                let pos = mcm.position(axis).await?;
                println!(
                    "axis {}: at {:.3} um (target {:.3} um)",
                    axis, pos.um, legal_um
                );
            }
        }
        Commands::Home { axis } => {
            for axis in selected_axes(mcm, axis) {
                mcm.home(axis).await?;
                println!("axis {}: homed", axis);
            }
        }
        Commands::Zero { axis } => {
            mcm.zero(axis).await?;
            println!("axis {}: encoder zeroed", axis);
        }
        Commands::Stages | Commands::Ports | Commands::Config => {}
    }
    Ok(())
}

fn selected_axes(mcm: &Mcm3000Driver, axis: Option<u8>) -> Vec<u8> {
    match axis {
        Some(axis) => vec![axis],
        None => mcm.axes().into_iter().map(u8::from).collect(),
    }
}

fn print_stages() {
    println!("{:<10} {:>12} {:>14}", "stage", "um/count", "travel (um)");
    for (stage, um_per_count, travel_um) in supported_stages() {
        println!(
            "{:<10} {:>12.7} {:>14}",
            stage.name(),
            um_per_count,
            format!("±{}", travel_um)
        );
    }
}

fn print_ports() -> Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        let marker = if port.is_mcm3000() { "*" } else { " " };
        println!(
            "{} {:<20} {} {}",
            marker,
            port.name,
            port.manufacturer.as_deref().unwrap_or("-"),
            port.product.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
