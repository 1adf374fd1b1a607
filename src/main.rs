//! CLI entry point.
//!
//! Two process roles, mirroring the deployment: `driver` runs one
//! instrument driver (the single point of communication with that
//! hardware), `magnet` runs the magnet-ramp controller against simulated
//! instruments or a running deployment's configuration. `--sim` swaps the
//! serial transports for the in-process simulators so everything can run
//! without a cryostat attached.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cryo_control::command::ExecutorConfig;
use cryo_control::config::Settings;
use cryo_control::driver::{DriverHandle, InstrumentDriver};
use cryo_control::instruments::{registry_for, InstrumentKind, SimLs218, SimSms};
use cryo_control::sequence::{MagnetController, RampSignal};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "cryo_control")]
#[command(about = "Cryostat instrument drivers and magnet-ramp control", long_about = None)]
struct Cli {
    /// Path to the TOML settings file.
    #[arg(long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Use simulated instruments instead of serial hardware.
    #[arg(long)]
    sim: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one instrument driver process.
    Driver {
        /// Instrument id from the `[instruments]` section.
        id: String,
    },

    /// Run the magnet-ramp controller.
    Magnet {
        /// Raise a start-ramp signal as soon as the controller is idle.
        #[arg(long)]
        start_ramp: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;

    match cli.command {
        Commands::Driver { id } => run_driver(&settings, &id, cli.sim).await,
        Commands::Magnet { start_ramp } => run_magnet(&settings, cli.sim, start_ramp).await,
    }
}

/// Spawns one instrument driver and returns its handle.
fn spawn_instrument(settings: &Settings, id: &str, sim: bool) -> Result<DriverHandle> {
    let instrument = settings.instrument(id)?;
    let registry = registry_for(instrument.kind)?;
    let exec: ExecutorConfig = instrument.executor_config();

    let handle = if sim {
        match instrument.kind {
            InstrumentKind::Sms => {
                let (handle, _task) = InstrumentDriver::spawn(
                    instrument.queue.clone(),
                    registry,
                    SimSms::new().with_ramp_step(0.2),
                    exec,
                );
                handle
            }
            InstrumentKind::Ls218 | InstrumentKind::Ls350 => {
                let (handle, _task) = InstrumentDriver::spawn(
                    instrument.queue.clone(),
                    registry,
                    SimLs218::new(4.2),
                    exec,
                );
                handle
            }
        }
    } else {
        #[cfg(feature = "instrument_serial")]
        {
            let transport =
                cryo_control::transport::SerialTransport::open(instrument.serial.clone())?;
            let (handle, _task) =
                InstrumentDriver::spawn(instrument.queue.clone(), registry, transport, exec);
            handle
        }
        #[cfg(not(feature = "instrument_serial"))]
        {
            return Err(anyhow!(
                "Serial support not enabled; rebuild with --features instrument_serial or pass --sim"
            ));
        }
    };

    info!(instrument = id, queue = %handle.queue(), sim, "Instrument driver running");
    Ok(handle)
}

async fn run_driver(settings: &Settings, id: &str, sim: bool) -> Result<()> {
    let _handle = spawn_instrument(settings, id, sim)?;
    info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}

async fn run_magnet(settings: &Settings, sim: bool, start_ramp: bool) -> Result<()> {
    let magnet = settings
        .magnet
        .clone()
        .ok_or_else(|| anyhow!("No [magnet] section in configuration"))?;

    let power_supply = spawn_instrument(settings, &magnet.power_supply, sim)?;
    let temperatures = spawn_instrument(settings, &magnet.temperature_monitor, sim)?;

    let controller = MagnetController::new(power_supply, temperatures, magnet)?;
    let signals = controller.signals();
    let task = tokio::spawn(controller.run());

    if start_ramp {
        signals.raise(RampSignal::StartRamp);
        info!("Start-ramp signal raised");
    }

    info!("Magnet controller running; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    task.abort();
    Ok(())
}
