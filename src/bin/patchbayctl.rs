//! patchbayctl: registry inspection and wiring tool
//!
//! Lists what is registered, wires slots to signals and follows the
//! connection-change stream, over the same protocol every producer and
//! consumer speaks.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use patchbay::client::{Event, RegistryClient, Signal, Slot};
use patchbay::config::LOG_ENV_VAR;

#[derive(Parser)]
#[command(name = "patchbayctl")]
#[command(about = "Inspect and rewire the patchbay registry", long_about = None)]
#[command(version)]
struct Cli {
    /// Registry endpoint: a socket path or host:port
    #[arg(
        long,
        env = "PATCHBAY_REGISTRY",
        default_value = "/tmp/patchbay/registry.sock"
    )]
    registry: String,

    /// Print raw JSON instead of tables
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered signals
    Signals,

    /// List registered slots
    Slots,

    /// Show the current wiring, grouped by signal
    Connections,

    /// Wire a slot to a signal
    Connect { slot: String, signal: String },

    /// Clear a slot's wiring
    Disconnect { slot: String },

    /// Follow connection changes as they happen
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so tables and JSON stay pipeable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .without_time(),
        )
        .init();

    let client = RegistryClient::connect(&cli.registry).await?;

    match cli.command {
        Commands::Signals => {
            let signals = client.list_signals().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&signals)?);
            } else {
                print_signals(&signals);
            }
        }
        Commands::Slots => {
            let slots = client.list_slots().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&slots)?);
            } else {
                print_slots(&slots);
            }
        }
        Commands::Connections => {
            let connections = client.list_connections().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&connections)?);
            } else if connections.is_empty() {
                println!("no connections");
            } else {
                for connection in &connections {
                    for slot in &connection.slots {
                        println!("{} -> {}", connection.signal, slot);
                    }
                }
            }
        }
        Commands::Connect { slot, signal } => {
            let slot = client.connect_slot(&slot, &signal).await?;
            println!("wired {} -> {}", signal, slot.name);
        }
        Commands::Disconnect { slot } => {
            let slot = client.disconnect_slot(&slot).await?;
            println!("{} disconnected", slot.name);
        }
        Commands::Watch => {
            let mut changes = client.watch_connections().await?;
            eprintln!("watching connection changes, ctrl-c to stop");
            while let Some(event) = changes.recv().await {
                if cli.json {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    let Event::ConnectionChange {
                        slot_name,
                        connected_to,
                    } = event;
                    match connected_to {
                        Some(signal) => println!("{} -> {}", signal, slot_name),
                        None => println!("(none) -> {}", slot_name),
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_signals(signals: &[Signal]) {
    if signals.is_empty() {
        println!("no signals registered");
        return;
    }
    println!(
        "{:<24} {:<8} {:<20} {}",
        "SIGNAL", "TYPE", "CREATED BY", "DESCRIPTION"
    );
    for signal in signals {
        println!(
            "{:<24} {:<8} {:<20} {}",
            signal.name, signal.value_type, signal.created_by, signal.description
        );
    }
}

fn print_slots(slots: &[Slot]) {
    if slots.is_empty() {
        println!("no slots registered");
        return;
    }
    println!(
        "{:<24} {:<8} {:<20} {:<24} {}",
        "SLOT", "TYPE", "CREATED BY", "CONNECTED TO", "DESCRIPTION"
    );
    for slot in slots {
        println!(
            "{:<24} {:<8} {:<20} {:<24} {}",
            slot.name,
            slot.value_type,
            slot.created_by,
            slot.connected_to.as_deref().unwrap_or("-"),
            slot.description
        );
    }
}
