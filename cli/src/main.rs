// proxtrace — proximity tracing demo CLI
//
// Shows and rotates the local identifier, edits the CLI configuration, and
// runs an advertise/scan session against a simulated radio medium.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use proxtrace_core::{
    BackendIdentifierStore, Clock, DetectionSummary, Identifier, IdentifierManager, Millis,
    ProximityCapabilities, ProximityCore, ProximityDelegate, SimulatedAir, SledStorage,
    SystemClock, SERVICE_UUID,
};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "proxtrace")]
#[command(about = "Proxtrace — rotating BLE identifiers and proximity detection", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or rotate the local identifier
    Identity {
        #[command(subcommand)]
        action: Option<IdentityAction>,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Advertise and scan for one session among simulated peers
    Simulate {
        #[arg(short, long)]
        peers: Option<usize>,
        #[arg(short, long)]
        duration_ms: Option<u64>,
    },
}

#[derive(Subcommand)]
enum IdentityAction {
    Show,
    Rotate,
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Commands::Identity { action } => cmd_identity(action),
        Commands::Config { action } => cmd_config(action),
        Commands::Simulate { peers, duration_ms } => cmd_simulate(peers, duration_ms).await,
    }
}

fn format_millis(millis: Millis) -> String {
    chrono::DateTime::from_timestamp_millis(millis as i64)
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| millis.to_string())
}

fn print_identifier(identifier: &Identifier) {
    println!("  ID:      {}", identifier.id().bright_cyan());
    println!("  Payload: {}", hex::encode(identifier.payload()).bright_yellow());
    println!("  Created: {}", format_millis(identifier.created_at()));
}

fn cmd_identity(action: Option<IdentityAction>) -> Result<()> {
    let config = config::Config::load()?;
    let proximity = config.proximity_config()?;
    let storage_path = config.storage_path()?;
    let path = storage_path
        .to_str()
        .context("Storage path is not valid UTF-8")?;

    let backend = SledStorage::new(path).context("Failed to open identifier store")?;
    let store = Arc::new(BackendIdentifierStore::persistent(Arc::new(backend)));
    let manager = IdentifierManager::new(store, Arc::new(SystemClock), &proximity);

    match action {
        None | Some(IdentityAction::Show) => {
            let identifier = manager.current_identifier();
            println!("{}", "Current Identifier".bold());
            print_identifier(&identifier);

            let remaining = proximity
                .rotation_interval_ms
                .saturating_sub(identifier.age_at(SystemClock.now_millis()));
            println!("  Rotates: in {}s", remaining / 1000);
        }
        Some(IdentityAction::Rotate) => {
            let previous = manager.current_identifier();
            let identifier = manager.rotate();
            println!("{} Rotated {} → {}", "✓".green(), previous.id().dimmed(), identifier.id().bright_cyan());
            print_identifier(&identifier);
        }
    }

    println!();
    println!("Stored in: {}", storage_path.display().to_string().bright_cyan());
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<22} {}", key.bright_cyan(), value);
            }

            println!();
            println!("Config file: {}", config::Config::config_file()?.display());
        }
    }

    Ok(())
}

/// Prints session changes as they happen
struct ConsoleDelegate;

impl ProximityDelegate for ConsoleDelegate {
    fn on_device_detected(&self, summary: DetectionSummary) {
        println!(
            "  {} {} avg {} dBm (~{:.1} m)",
            "●".green(),
            summary.identifier.id().bright_cyan(),
            summary.average_rssi,
            summary.estimate_distance_m()
        );
    }

    fn on_advertising_changed(&self, advertising: bool) {
        let label = if advertising { "started".green() } else { "stopped".yellow() };
        println!("  📡 Advertising {}", label);
    }

    fn on_scanning_changed(&self, scanning: bool) {
        let label = if scanning { "started".green() } else { "stopped".yellow() };
        println!("  🔍 Scanning {}", label);
    }

    fn on_identifier_changed(&self, identifier: Identifier) {
        println!("  🔄 Identifier is now {}", identifier.id().bright_cyan());
    }

    fn on_error(&self, message: String) {
        println!("  {} {}", "✗".red(), message.red());
    }
}

async fn cmd_simulate(peers: Option<usize>, duration_ms: Option<u64>) -> Result<()> {
    let config = config::Config::load()?;
    let mut proximity = config.proximity_config()?;
    if let Some(duration_ms) = duration_ms {
        proximity = proximity.with_session_duration_ms(duration_ms);
    }
    let peers = peers.unwrap_or(config.simulated_peers);

    let air = SimulatedAir::new();
    let mut rng = rand::thread_rng();
    let mut base_rssi = HashMap::new();
    for i in 0..peers {
        let key = format!("sim-peer-{}", i + 1);
        let value: u32 = rng.gen();
        air.add_beacon(key.clone(), SERVICE_UUID, value.to_be_bytes().to_vec());
        base_rssi.insert(key, rng.gen_range(-90i16..=-45));
    }

    let capabilities =
        ProximityCapabilities::simulated(&air, "local", Arc::new(BackendIdentifierStore::memory()));
    let core = ProximityCore::new(proximity.clone(), capabilities)
        .context("Failed to start proximity core")?;
    core.set_delegate(Some(Box::new(ConsoleDelegate)));

    println!("{}", "Proxtrace Simulation".bold());
    println!("  Local ID: {}", core.current_identifier().id().bright_cyan());
    println!("  Peers:    {}", peers);
    println!("  Session:  {} ms", proximity.session_duration_ms);
    println!();

    // a failed start is already reported through the delegate
    let _ = core.start_advertising();
    if core.start_scanning().is_err() {
        core.shutdown();
        return Ok(());
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    loop {
        ticker.tick().await;
        if !core.scan_state().is_running() {
            break;
        }
        air.sweep(|key| {
            let base = base_rssi.get(key).copied().unwrap_or(-80);
            base + rng.gen_range(-4i16..=4)
        });
    }

    core.shutdown();

    let events = core.proximity_events();
    println!();
    println!("{}", format!("Proximity Events ({})", events.len()).bold());
    if events.is_empty() {
        println!("  {}", "(no devices detected)".dimmed());
    }
    for event in events {
        println!(
            "  {}  {} ↔ {}  {} dBm  {} ms",
            format_millis(event.timestamp).dimmed(),
            event.local_user_id,
            event.remote_user_id.bright_cyan(),
            event.rssi,
            event.duration_ms
        );
    }

    if let Some(message) = core.last_error_message() {
        println!();
        println!("{} {}", "Last error:".red(), message);
    }

    Ok(())
}
