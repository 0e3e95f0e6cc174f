//! Bench tester for AS7265x sensor modules.
//!
//! Runs the full probe against a module on the configured platform, or
//! pokes at individual virtual registers while bringing up a fixture.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::filter::LevelFilter;

use as7265x_tester::config::{PlatformConfig, PlatformRegistry, ProbeSettings};
use as7265x_tester::peripheral::as7265x::{
    SimulatedAs7265x, VirtualAddress, VirtualRegisterChannel,
};
use as7265x_tester::probe::{
    ProbeEvent, ProbeLog, ProbeReport, ProbeState, ResultSink, SensorProbe, TracingSink,
};
use as7265x_tester::reset::Reset;
use as7265x_tester::transport::{CommandBus, CommandRunner, Fixture};
use as7265x_tester::tracing::{self, prelude::*};

/// Validate AS7265x spectral sensor modules before assembly
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory of platform JSON files
    #[arg(short = 'c', long, default_value = "configs", global = true)]
    config_dir: PathBuf,

    /// Platform id (defaults to the first one found)
    #[arg(short = 'p', long, global = true)]
    platform: Option<String>,

    /// Talk to an in-memory sensor instead of hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// Enable debug logging
    #[arg(short = 'd', long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List available platforms
    Platforms,
    /// Print wiring and setup instructions
    Setup,
    /// Check that the sensor answers on the bus
    Scan,
    /// Pulse the sensor's reset line
    Reset,
    /// Read one virtual register
    Read {
        #[arg(value_parser = parse_address)]
        addr: VirtualAddress,
    },
    /// Write one virtual register
    Write {
        #[arg(value_parser = parse_address)]
        addr: VirtualAddress,
        #[arg(value_parser = parse_byte)]
        value: u8,
    },
    /// Run the complete module test
    Probe {
        /// Write the JSON report here
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Write the JSON report under its default name
        #[arg(short = 's', long)]
        save: bool,
    },
}

fn parse_byte(text: &str) -> Result<u8, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("`{}` is not a byte: {}", text, e))
}

fn parse_address(text: &str) -> Result<VirtualAddress, String> {
    VirtualAddress::try_from(parse_byte(text)?).map_err(|e| e.to_string())
}

/// The selected platform, or a stand-in when simulating without configs.
fn resolve_platform(args: &Args, registry: &PlatformRegistry) -> Result<Arc<PlatformConfig>> {
    let platform = match &args.platform {
        Some(id) => registry.get(id)?.clone(),
        None => match registry.first() {
            Some(first) => first.clone(),
            None if args.simulate => PlatformConfig {
                name: "Simulated".into(),
                platform: "simulated".into(),
                description: String::new(),
                i2c_bus: Default::default(),
                transport: Default::default(),
                pins: Default::default(),
                commands: Default::default(),
                setup_instructions: Vec::new(),
                dependencies: Default::default(),
                probe: ProbeSettings::default(),
            },
            None => bail!(
                "no platform configurations found in {}",
                args.config_dir.display()
            ),
        },
    };
    Ok(Arc::new(platform))
}

fn open_fixture(args: &Args, platform: &Arc<PlatformConfig>) -> Result<Fixture> {
    if args.simulate {
        info!("Using simulated sensor");
        return Ok(Fixture::simulated(&SimulatedAs7265x::new(), &platform.probe));
    }
    Fixture::open(platform).with_context(|| format!("Failed to set up {}", platform.name))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing::init_journald_or_stdout(if args.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    });

    let registry = PlatformRegistry::load_dir(&args.config_dir)
        .with_context(|| format!("Failed to load {}", args.config_dir.display()))?;

    match &args.command {
        Cmd::Platforms => {
            for (id, config) in registry.platforms() {
                println!("{:<20} {:<24} {}", id, config.name, config.description);
            }
            Ok(())
        }
        Cmd::Setup => {
            let platform = resolve_platform(&args, &registry)?;
            print!("{}", platform.setup_text());
            Ok(())
        }
        Cmd::Scan => scan(&args, &resolve_platform(&args, &registry)?).await,
        Cmd::Reset => {
            let platform = resolve_platform(&args, &registry)?;
            let mut fixture = open_fixture(&args, &platform)?;
            fixture.reset.reset().await.context("Reset failed")?;
            info!("Sensor reset");
            Ok(())
        }
        Cmd::Read { addr } => {
            let platform = resolve_platform(&args, &registry)?;
            let fixture = open_fixture(&args, &platform)?;
            let mut channel =
                VirtualRegisterChannel::new(fixture.bus, platform.probe.poll_budget());
            let value = channel
                .read(*addr)
                .await
                .with_context(|| format!("Failed to read {}", addr))?;
            println!("{} = 0x{:02X} ({})", addr, value, value);
            Ok(())
        }
        Cmd::Write { addr, value } => {
            let platform = resolve_platform(&args, &registry)?;
            let fixture = open_fixture(&args, &platform)?;
            let mut channel =
                VirtualRegisterChannel::new(fixture.bus, platform.probe.poll_budget());
            channel
                .write(*addr, *value)
                .await
                .with_context(|| format!("Failed to write {}", addr))?;
            info!("Wrote 0x{:02X} to {}", value, addr);
            Ok(())
        }
        Cmd::Probe { output, save } => {
            let platform = resolve_platform(&args, &registry)?;
            let fixture = open_fixture(&args, &platform)?;
            let report = probe(&platform, fixture).await?;

            let path = match (output, save) {
                (Some(path), _) => Some(path.clone()),
                (None, true) => Some(PathBuf::from(report.default_file_name())),
                (None, false) => None,
            };
            if let Some(path) = path {
                save_report(&report, &path)?;
            }

            if !report.passed() {
                bail!("sensor module failed ({})", report.outcome);
            }
            Ok(())
        }
    }
}

async fn scan(args: &Args, platform: &Arc<PlatformConfig>) -> Result<()> {
    if args.simulate {
        println!("Sensor found at 0x49 (simulated)");
        return Ok(());
    }

    let bus = CommandBus::new(platform.clone(), CommandRunner::default())?;
    if bus.detect().await.context("Bus scan failed")? {
        println!("Sensor found at 0x49");
        Ok(())
    } else {
        bail!("no device at 0x49 on bus {}", platform.i2c_bus)
    }
}

/// Run the probe on its own task so a signal can cancel it between polls.
async fn probe(platform: &PlatformConfig, fixture: Fixture) -> Result<ProbeReport> {
    let Fixture {
        bus,
        reset,
        mut led,
    } = fixture;
    let settings = platform.probe.clone();
    let started = OffsetDateTime::now_utc();

    let running = CancellationToken::new();
    let tracker = TaskTracker::new();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ProbeEvent>();

    if let Some(led) = led.as_mut() {
        led.started().await;
    }

    let channel = VirtualRegisterChannel::new(bus, settings.poll_budget())
        .with_cancellation(running.clone());
    let mut sensor_probe = SensorProbe::new(channel, reset, settings);
    let task = tracker.spawn(async move {
        let mut sink = events_tx;
        let result = sensor_probe.run(&mut sink).await;
        (sensor_probe.state(), result)
    });
    tracker.close();
    info!("Probing {} sensor module", platform.name);

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    let mut log = ProbeLog::new();
    let mut console = TracingSink;
    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(event) => {
                    console.record(event.clone());
                    log.record(event);
                }
                None => break,
            },
            _ = sigint.recv() => {
                warn!("Interrupted, stopping probe");
                running.cancel();
            },
            _ = sigterm.recv() => {
                warn!("Terminated, stopping probe");
                running.cancel();
            },
        }
    }

    tracker.wait().await;
    let (outcome, result) = task.await.context("Probe task panicked")?;
    if let Err(e) = &result {
        debug!("Probe error: {:?}", e);
    }

    if let Some(led) = led.as_mut() {
        led.finished(outcome == ProbeState::Passed).await;
    }
    Ok(ProbeReport::new(&platform.platform, started, outcome, log))
}

fn save_report(report: &ProbeReport, path: &Path) -> Result<()> {
    let json = report.to_json()?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Results saved to {}", path.display());
    Ok(())
}
