// mecp: desktop CLI for the Mesh Emergency Communication Protocol
//
// Encodes and inspects MECP messages, queues outgoing traffic in the local
// outbox and drives the distress beacon. There is no radio attached here, so
// everything sent from the command line waits in the outbox.

mod config;
mod history;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use mecp_core::beacon::ManualTrigger;
use mecp_core::message::{compose, ComposeOptions};
use mecp_core::transport::{
    IncomingMessage, LoopbackTransport, MeshPlatform, SenderIdentity, TransportManager,
};
use mecp_core::{
    decode, encode, validate, Clock, Delivery, GpsFix, MeshNode, MeshSettings, MeshStore,
    Severity, SystemClock,
};
use std::sync::Arc;
use tracing::debug;

#[derive(Parser)]
#[command(name = "mecp")]
#[command(about = "MECP: offline-first mesh emergency messaging", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a wire string from a severity, codes and free text
    Encode {
        #[arg(value_parser = parse_severity)]
        severity: Severity,
        codes: Vec<String>,
        #[arg(short, long)]
        text: Option<String>,
    },
    /// Build a message with auto-tags (people, position, time, language)
    Compose {
        #[arg(value_parser = parse_severity)]
        severity: Severity,
        codes: Vec<String>,
        #[arg(short, long, default_value = "0")]
        pax: u32,
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
        #[arg(short, long)]
        note: Option<String>,
    },
    /// Parse a received wire string
    Decode {
        message: String,
        #[arg(long)]
        json: bool,
    },
    /// Check a wire string for errors and warnings
    Validate { message: String },
    /// Queue a message for the radio
    Send {
        #[arg(value_parser = parse_severity)]
        severity: Severity,
        codes: Vec<String>,
        #[arg(short, long)]
        text: Option<String>,
        #[arg(short, long)]
        channel: Option<u32>,
    },
    /// Inspect or retry queued messages
    Outbox {
        #[command(subcommand)]
        action: OutboxAction,
    },
    /// View message history
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,
        #[arg(short, long, default_value = "0")]
        offset: usize,
    },
    /// Manage the distress beacon
    Beacon {
        #[command(subcommand)]
        action: BeaconAction,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Walk through an offline MAYDAY over an in-process radio
    Demo,
}

#[derive(Subcommand)]
enum OutboxAction {
    List,
    Retry { id: u64 },
}

#[derive(Subcommand)]
enum BeaconAction {
    /// Show our beacon and beacons heard from others
    Status,
    Activate {
        codes: Vec<String>,
        #[arg(short, long, value_parser = parse_severity, default_value = "0")]
        severity: Severity,
        #[arg(short, long)]
        text: Option<String>,
    },
    /// Record a periodic transmission at the given position
    Tick {
        #[arg(allow_hyphen_values = true)]
        lat: f64,
        #[arg(allow_hyphen_values = true)]
        lon: f64,
    },
    Cancel,
    /// Acknowledge a beacon heard from another node
    Ack { node_id: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Encode { severity, codes, text } => cmd_encode(severity, codes, text),
        Commands::Compose { severity, codes, pax, lat, lon, note } => {
            let position = lat.zip(lon).map(|(lat, lon)| GpsFix::new(lat, lon));
            cmd_compose(severity, codes, pax, position, note)
        }
        Commands::Decode { message, json } => cmd_decode(&message, json),
        Commands::Validate { message } => cmd_validate(&message),
        Commands::Send { severity, codes, text, channel } => {
            cmd_send(severity, codes, text, channel).await
        }
        Commands::Outbox { action } => cmd_outbox(action),
        Commands::History { limit, offset } => cmd_history(limit, offset),
        Commands::Beacon { action } => cmd_beacon(action).await,
        Commands::Config { action } => cmd_config(action),
        Commands::Demo => cmd_demo().await,
    }
}

fn parse_severity(s: &str) -> std::result::Result<Severity, String> {
    let value: u8 = s
        .parse()
        .map_err(|_| format!("severity must be 0-3, got {:?}", s))?;
    Severity::try_from(value).map_err(|e| e.to_string())
}

/// Open the persistent node. No adapter is bound, so outbound traffic is queued.
fn open_node(config: &config::Config) -> Result<MeshNode> {
    let path = config.storage_dir()?;
    debug!("Opening store at {}", path.display());
    let store = MeshStore::open(&path)
        .with_context(|| format!("Failed to open store at {}", path.display()))?;
    let node = MeshNode::new(
        store,
        Arc::new(TransportManager::new()),
        Arc::new(ManualTrigger::new()),
        Arc::new(SystemClock),
        config.mesh.clone(),
    )?;
    Ok(node)
}

fn print_encoded(result: &mecp_core::EncodeResult) {
    println!("{}", result.message.bright_cyan());
    let size = format!("{} bytes", result.byte_length);
    if result.over_limit {
        println!("  {} {}", size.red(), "(over the 200 byte limit)".red());
    } else {
        println!("  {}", size.dimmed());
    }
    for warning in &result.warnings {
        println!("  {} {}", "!".yellow(), warning);
    }
}

fn cmd_encode(severity: Severity, codes: Vec<String>, text: Option<String>) -> Result<()> {
    print_encoded(&encode(severity, &codes, text.as_deref()));
    Ok(())
}

fn cmd_compose(
    severity: Severity,
    codes: Vec<String>,
    pax: u32,
    position: Option<GpsFix>,
    note: Option<String>,
) -> Result<()> {
    let config = config::Config::load()?;
    let settings = &config.mesh;
    let options = ComposeOptions {
        pax_count: pax,
        position: position.filter(|_| settings.auto_gps),
        timestamp: settings.auto_timestamp.then(|| SystemClock.now_ms()),
        language: settings.language.clone(),
        note,
    };
    print_encoded(&compose(severity, &codes, &options));
    Ok(())
}

fn cmd_decode(message: &str, json: bool) -> Result<()> {
    let parsed = decode(message);
    if json {
        println!("{}", serde_json::to_string_pretty(&parsed)?);
    } else {
        history::print_parsed(&parsed);
    }
    Ok(())
}

fn cmd_validate(message: &str) -> Result<()> {
    let result = validate(message);
    for error in &result.errors {
        println!("{} {}", "✗".red(), error);
    }
    for warning in &result.warnings {
        println!("{} {}", "!".yellow(), warning);
    }
    if result.valid {
        println!("{} Valid", "✓".green());
        Ok(())
    } else {
        anyhow::bail!("Invalid message ({} errors)", result.errors.len())
    }
}

async fn cmd_send(
    severity: Severity,
    codes: Vec<String>,
    text: Option<String>,
    channel: Option<u32>,
) -> Result<()> {
    let preview = encode(severity, &codes, text.as_deref());
    if preview.over_limit {
        print_encoded(&preview);
        anyhow::bail!("Message too long to send");
    }

    let config = config::Config::load()?;
    let mut node = open_node(&config)?;
    let outcome = node
        .send_message(severity, &codes, text.as_deref(), channel)
        .await?;

    match outcome.delivery {
        Delivery::Sent => println!("{} Sent: {}", "✓".green(), outcome.encoded.message),
        Delivery::Queued(entry) => {
            println!(
                "{} Queued as #{}: {}",
                "✓".green(),
                entry.id,
                entry.raw_string.bright_cyan()
            );
            println!("  {}", "Will go out when a radio connects.".dimmed());
        }
    }
    node.store().flush()?;
    Ok(())
}

fn cmd_outbox(action: OutboxAction) -> Result<()> {
    let config = config::Config::load()?;
    let node = open_node(&config)?;

    match action {
        OutboxAction::List => {
            let entries = node.outbox().entries()?;
            if entries.is_empty() {
                println!("{}", "Outbox is empty.".dimmed());
            } else {
                println!("{} ({} total)", "Outbox".bold(), entries.len());
                println!();
                for entry in &entries {
                    history::print_outbox_entry(entry);
                }
            }
        }
        OutboxAction::Retry { id } => {
            let entry = node.outbox().retry(id)?;
            println!("{} #{} is pending again", "✓".green(), entry.id);
        }
    }

    Ok(())
}

fn cmd_history(limit: usize, offset: usize) -> Result<()> {
    let config = config::Config::load()?;
    let node = open_node(&config)?;
    let messages = node.store().messages(limit, offset)?;

    if messages.is_empty() {
        println!("{}", "No messages found.".dimmed());
        return Ok(());
    }

    println!(
        "{} ({} of {} messages)",
        "Message History".bold(),
        messages.len(),
        node.store().message_count()?
    );
    println!();
    for msg in &messages {
        history::print_message(msg);
    }

    Ok(())
}

async fn cmd_beacon(action: BeaconAction) -> Result<()> {
    let config = config::Config::load()?;
    let mut node = open_node(&config)?;

    match action {
        BeaconAction::Status => {
            println!("{}", "Our Beacon".bold());
            match node.beacon().active_session() {
                Some(session) => {
                    history::print_session(session);
                    let positions = node.beacon().positions()?;
                    if let Some(last) = positions.last() {
                        println!("  Last fix:    {:.5},{:.5}", last.lat, last.lon);
                    }
                }
                None => println!("  {}", "(not active)".dimmed()),
            }

            println!();
            println!("{}", "Beacons Heard".bold());
            let heard = node.received_beacons().active_beacons()?;
            if heard.is_empty() {
                println!("  {}", "(none)".dimmed());
            }
            for beacon in &heard {
                history::print_received_beacon(beacon);
            }
        }

        BeaconAction::Activate { codes, severity, text } => {
            let (session, outcome) = node.activate_beacon(codes, text, severity).await?;
            println!("{} Beacon activated", "✓".bright_red().bold());
            history::print_session(&session);
            println!("  Alert:       {}", outcome.encoded.message.bright_cyan());
        }

        BeaconAction::Tick { lat, lon } => {
            let outcome = node.transmit_beacon(GpsFix::new(lat, lon)).await?;
            println!(
                "{} Transmission {} recorded",
                "✓".green(),
                outcome.session.transmit_count
            );
            if outcome.interval_changed {
                println!(
                    "  Interval now {} min",
                    outcome.session.interval_minutes.to_string().bright_yellow()
                );
            }
            if outcome.completed {
                println!("  {}", "Drill finished, beacon stopped.".yellow());
            }
        }

        BeaconAction::Cancel => match node.cancel_beacon().await? {
            Some(session) => println!("{} Beacon #{} cancelled", "✓".green(), session.id),
            None => println!("{}", "No beacon is active.".dimmed()),
        },

        BeaconAction::Ack { node_id } => {
            node.acknowledge_remote_beacon(&node_id).await?;
            println!("{} Acknowledgement queued for {}", "✓".green(), node_id.bright_cyan());
        }
    }

    node.store().flush()?;
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
                println!("  {:<20} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}

async fn cmd_demo() -> Result<()> {
    println!("{}", "MECP demo: offline MAYDAY over a loopback radio".bold());
    println!();

    let radio = LoopbackTransport::shared();
    let manager = Arc::new(TransportManager::new());
    manager.set_adapter(radio.clone());
    let mut node = MeshNode::new(
        MeshStore::in_memory(),
        manager,
        Arc::new(ManualTrigger::new()),
        Arc::new(SystemClock),
        MeshSettings::default(),
    )?;

    let (session, outcome) = node
        .activate_beacon(vec!["M01".into(), "T01".into()], Some("2pax".into()), Severity::Mayday)
        .await?;
    println!("{} Beacon #{} started while offline", "✓".green(), session.id);
    println!("  {}", outcome.encoded.message.bright_cyan());

    node.transmit_beacon(GpsFix::new(49.1794, 20.0881)).await?;
    println!("{} {} messages waiting in the outbox", "✓".green(), node.outbox().pending()?.len());

    if let Some(report) = node.connect("loopback").await? {
        println!(
            "{} Radio connected: {} sent, {} failed, {} remaining",
            "✓".green(),
            report.sent,
            report.failed,
            report.remaining
        );
    }
    for text in radio.sent_texts() {
        println!("  {} {}", "→".bright_green(), text);
    }

    radio.inject(IncomingMessage {
        text: "MECP/2/B02 R01".to_string(),
        sender: SenderIdentity::new("!hzs1", "Mountain Rescue", MeshPlatform::Meshtastic),
        channel: None,
        timestamp: SystemClock.now_ms(),
        signal: None,
    });
    node.process_pending_events().await;

    if let Some(session) = node.beacon().active_session() {
        println!();
        history::print_session(session);
    }

    node.cancel_beacon().await?;
    if let Some(last) = radio.sent_texts().last() {
        println!();
        println!("{} Beacon cancelled", "✓".green());
        println!("  {} {}", "→".bright_green(), last);
    }

    Ok(())
}
