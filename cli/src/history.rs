// Terminal rendering of stored messages, outbox rows and beacons

use chrono::{DateTime, Local, Utc};
use colored::*;
use mecp_core::message::Category;
use mecp_core::store::{
    BeaconSession, BeaconStatus, MessageDirection, OutboxEntry, OutboxStatus, ReceivedBeacon,
    StoredMessage,
};
use mecp_core::{ParsedMessage, Severity};

pub fn format_timestamp(epoch_ms: u64) -> String {
    let dt = DateTime::from_timestamp_millis(epoch_ms as i64).unwrap_or_else(Utc::now);
    let local: DateTime<Local> = dt.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn severity_label(severity: Option<Severity>) -> ColoredString {
    match severity {
        Some(Severity::Mayday) => "MAYDAY".bright_red().bold(),
        Some(Severity::Urgent) => "URGENT".yellow().bold(),
        Some(Severity::Safety) => "SAFETY".bright_blue(),
        Some(Severity::Routine) => "ROUTINE".normal(),
        None => "-".dimmed(),
    }
}

pub fn print_message(msg: &StoredMessage) {
    let direction = match msg.direction {
        MessageDirection::Sent => "→".bright_green(),
        MessageDirection::Received => "←".bright_blue(),
        MessageDirection::Draft => "✎".dimmed(),
    };
    let peer = msg
        .sender_display_name
        .as_deref()
        .or(msg.sender_node_id.as_deref())
        .unwrap_or("me");
    let unread = if msg.is_read { "" } else { " •" };

    println!(
        "{} {} {} [{}]{}",
        direction,
        severity_label(msg.severity),
        peer.bright_cyan(),
        format_timestamp(msg.timestamp).dimmed(),
        unread.bright_yellow()
    );
    println!("   {}", msg.raw_string);
    if msg.is_drill {
        println!("   {}", "(drill)".dimmed());
    }
    println!();
}

pub fn print_outbox_entry(entry: &OutboxEntry) {
    let status = match entry.status {
        OutboxStatus::Pending => "pending".yellow(),
        OutboxStatus::Sending => "sending".bright_blue(),
        OutboxStatus::Sent => "sent".green(),
        OutboxStatus::Failed => "failed".red(),
    };
    println!(
        "  #{:<4} {:<8} {:<8} {}",
        entry.id,
        status,
        severity_label(entry.severity),
        format_timestamp(entry.created_at).dimmed()
    );
    println!("        {}", entry.raw_string);
}

pub fn print_session(session: &BeaconSession) {
    let status = match session.status {
        BeaconStatus::Active => "active".bright_red().bold(),
        BeaconStatus::Completed => "completed".green(),
    };
    println!("  Session:     #{} ({})", session.id, status);
    println!("  Codes:       {}", session.original_codes.join(" "));
    println!("  Started:     {}", format_timestamp(session.started_at));
    println!("  Interval:    {} min", session.interval_minutes);
    match session.max_transmits {
        Some(max) => println!("  Transmits:   {}/{} (drill)", session.transmit_count, max),
        None => println!("  Transmits:   {}", session.transmit_count),
    }
    if let Some(at) = session.acknowledged_at {
        let by = session
            .ack_display_name
            .as_deref()
            .or(session.ack_node_id.as_deref())
            .unwrap_or("unknown");
        println!("  Acknowledged by {} at {}", by.bright_cyan(), format_timestamp(at));
    }
}

pub fn print_received_beacon(beacon: &ReceivedBeacon) {
    let name = beacon
        .sender_display_name
        .as_deref()
        .unwrap_or(beacon.sender_node_id.as_str());
    let drill = if beacon.is_drill { " (drill)" } else { "" };
    println!(
        "  {} {}{} last heard {}",
        "•".bright_red(),
        name.bright_cyan(),
        drill.dimmed(),
        format_timestamp(beacon.last_seen).dimmed()
    );
    println!("    {}", beacon.last_codes);
}

/// Human-readable breakdown of a decoded message
pub fn print_parsed(parsed: &ParsedMessage) {
    if !parsed.valid {
        println!("{} Not a valid MECP message", "✗".red());
    } else {
        println!("{} {}", "Severity:".bold(), severity_label(parsed.severity));
    }

    for code in &parsed.codes {
        let category = code
            .chars()
            .next()
            .and_then(Category::from_letter)
            .map(Category::name)
            .unwrap_or("Unknown");
        println!("  {} {}", code.bright_cyan(), category.dimmed());
    }
    if let Some(text) = &parsed.freetext {
        println!("{} {}", "Text:".bold(), text);
    }

    let extracted = &parsed.extracted;
    if let Some(count) = extracted.count {
        println!("  People:    {}", count);
    }
    if let Some(gps) = extracted.gps {
        println!("  Position:  {:.5},{:.5}", gps.lat, gps.lon);
    }
    if let Some(eta) = extracted.eta {
        println!("  ETA:       {} min", eta);
    }
    if let Some(reference) = &extracted.reference {
        println!("  Reference: #{}", reference);
    }
    if let Some(lang) = &extracted.language {
        println!("  Language:  {}", lang);
    }
    if let Some(ts) = &extracted.timestamp {
        println!("  Time:      {} UTC", ts);
    }
    if let Some(callsign) = &extracted.callsign {
        println!("  Callsign:  {}", callsign);
    }
    if parsed.is_drill {
        println!("{}", "DRILL - no action required".yellow());
    }
    for warning in &parsed.warnings {
        println!("{} {}", "!".yellow(), warning);
    }
}
