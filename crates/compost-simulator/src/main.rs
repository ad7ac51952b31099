//! Host simulator for the compost monitor master node.
//!
//! Runs complete wake cycles of the compost-core controller against a
//! directory on disk (the storage card), three synthetic sensor nodes and an
//! optional scripted companion. Time is virtual: a 30 minute companion wait
//! replays instantly, and the retained block survives between cycles exactly
//! like RTC memory survives deep sleep.
//!
//! ```text
//! compost-simulator --cycles 4 --fail-node 2 --companion 3:1500:READ
//! ```

mod host_fs;
mod radio;
mod sensors;
mod timebase;

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use embassy_futures::block_on;
use log::info;

use compost_core::config::MasterConfig;
use compost_core::controller::{Inboxes, MasterController};
use compost_core::radio::{CompanionInbox, DiscoveryInbox, uuids};
use compost_core::retained::{RETAINED_LEN, RetainedBlock, RetainedState};
use compost_core::time::Timebase;

use crate::host_fs::HostFileSystem;
use crate::radio::{SimNode, SimRadio};
use crate::sensors::{MockSensorGenerator, SimOnboardSensor};
use crate::timebase::{CompanionEvent, SimTimebase};

/// A companion session stays connected this long after its command.
const SESSION_MS: u64 = 5_000;

#[derive(Parser)]
#[command(name = "compost-simulator")]
#[command(about = "Run compost master wake cycles on the host")]
struct Cli {
    /// Directory used as the storage card
    #[arg(short, long, default_value = "sim-card")]
    data_dir: PathBuf,

    /// JSON file with master configuration overrides
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of wake cycles to run
    #[arg(short = 'n', long, default_value = "3")]
    cycles: u32,

    /// Override the sleep duration in seconds
    #[arg(long)]
    sleep_secs: Option<u32>,

    /// Node id (1-3) that is out of range for the whole run
    #[arg(long)]
    fail_node: Vec<u8>,

    /// Run without a storage card
    #[arg(long)]
    no_card: bool,

    /// Companion command as CYCLE:AT_MS:COMMAND, e.g. 2:1500:READ
    #[arg(long, value_parser = parse_companion)]
    companion: Vec<CompanionScript>,
}

#[derive(Debug, Clone)]
struct CompanionScript {
    cycle: u32,
    at_ms: u64,
    command: String,
}

fn parse_companion(raw: &str) -> Result<CompanionScript, String> {
    let mut parts = raw.splitn(3, ':');
    let (Some(cycle), Some(at_ms), Some(command)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("expected CYCLE:AT_MS:COMMAND, got '{raw}'"));
    };
    Ok(CompanionScript {
        cycle: cycle.parse().map_err(|e| format!("cycle: {e}"))?,
        at_ms: at_ms.parse().map_err(|e| format!("at_ms: {e}"))?,
        command: command.to_string(),
    })
}

fn load_config(cli: &Cli) -> Result<MasterConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => MasterConfig::default(),
    };
    if let Some(secs) = cli.sleep_secs {
        config.sleep_duration_secs = secs;
    }
    Ok(config)
}

/// Companion events of one cycle: connect, write, then drop the link.
fn companion_events(cli: &Cli, cycle: u32) -> Vec<(u64, CompanionEvent)> {
    cli.companion
        .iter()
        .filter(|s| s.cycle == cycle)
        .flat_map(|s| {
            [
                (s.at_ms, CompanionEvent::Connect),
                (s.at_ms, CompanionEvent::Write(s.command.as_bytes().to_vec())),
                (s.at_ms + SESSION_MS, CompanionEvent::Disconnect),
            ]
        })
        .collect()
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    info!("Starting compost master simulator");
    info!(
        "Card: {}, cycles: {}, sleep: {}s",
        if cli.no_card {
            "none".to_string()
        } else {
            cli.data_dir.display().to_string()
        },
        cli.cycles,
        config.sleep_duration_secs
    );

    let discovery = DiscoveryInbox::new(uuids::SENSOR_SERVICE);
    let companion = CompanionInbox::new();
    let mut retained: RetainedBlock = [0; RETAINED_LEN];
    let mut elapsed_secs = 0u64;

    for cycle in 1..=cli.cycles {
        info!("---- wake {} ----", cycle);

        let storage = if cli.no_card {
            None
        } else {
            HostFileSystem::open(&cli.data_dir).ok()
        };

        let nodes = (1..=3)
            .map(|id| SimNode {
                reachable: !cli.fail_node.contains(&id),
                ..SimNode::new(id)
            })
            .collect();
        let generator = MockSensorGenerator::new(elapsed_secs as f64);

        let mut controller = MasterController::boot(
            config,
            storage,
            SimRadio::new(nodes, generator),
            SimTimebase::new(&companion, companion_events(&cli, cycle)),
            Some(SimOnboardSensor::new(generator)),
            Inboxes {
                discovery: &discovery,
                companion: &companion,
            },
            &mut retained,
        );

        let request = block_on(controller.run_until_sleep());

        for line in &controller.radio().transcript {
            println!("companion <- {line}");
        }
        info!(
            "Wake {} done at {} after {} virtual ms, sleeping {}s ({:?})",
            cycle,
            controller.clock().format(),
            controller.timebase().now_ms(),
            request.duration_secs,
            request.reason
        );
        elapsed_secs += request.duration_secs as u64;
    }

    if let Some(state) = RetainedState::load(&retained) {
        info!(
            "Retained: boots {}, empty cycles {}",
            state.boot_count, state.unreachable_cycles
        );
    }
    info!("Simulator exiting");
    Ok(())
}
