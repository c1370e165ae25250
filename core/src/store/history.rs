// Message history records

use serde::{Deserialize, Serialize};

use crate::message::{decode, ParsedMessage, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    Sent,
    Received,
    Draft,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: u64,
    pub raw_string: String,
    pub severity: Option<Severity>,
    pub codes: Vec<String>,
    pub freetext: Option<String>,
    pub is_mecp: bool,
    pub is_drill: bool,
    pub direction: MessageDirection,
    pub sender_node_id: Option<String>,
    pub sender_display_name: Option<String>,
    pub channel: Option<String>,
    pub timestamp: u64,
    pub gps_lat: Option<f64>,
    pub gps_lon: Option<f64>,
    pub reference_tag: Option<String>,
    pub is_read: bool,
    pub is_pinned: bool,
    pub rssi: Option<i32>,
    pub snr: Option<f32>,
}

impl StoredMessage {
    /// Build a history row from a decoded message. The id is assigned on insert.
    pub fn from_parsed(
        parsed: &ParsedMessage,
        direction: MessageDirection,
        timestamp: u64,
    ) -> Self {
        let gps = parsed.extracted.gps;
        Self {
            id: 0,
            raw_string: parsed.raw.clone(),
            severity: parsed.severity,
            codes: parsed.codes.clone(),
            freetext: parsed.freetext.clone(),
            is_mecp: parsed.valid,
            is_drill: parsed.is_drill,
            direction,
            sender_node_id: None,
            sender_display_name: None,
            channel: None,
            timestamp,
            gps_lat: gps.map(|g| g.lat),
            gps_lon: gps.map(|g| g.lon),
            reference_tag: parsed.extracted.reference.clone(),
            is_read: direction != MessageDirection::Received,
            is_pinned: false,
            rssi: None,
            snr: None,
        }
    }

    /// Record of something this node put on air
    pub fn sent(raw: &str, channel: Option<u32>, timestamp: u64) -> Self {
        let mut record = Self::from_parsed(&decode(raw), MessageDirection::Sent, timestamp);
        record.channel = channel.map(|c| c.to_string());
        record
    }

    pub fn with_sender(mut self, node_id: &str, display_name: Option<&str>) -> Self {
        self.sender_node_id = Some(node_id.to_string());
        self.sender_display_name = display_name.map(str::to_string);
        self
    }

    pub fn with_channel(mut self, channel: Option<String>) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_signal(mut self, rssi: Option<i32>, snr: Option<f32>) -> Self {
        self.rssi = rssi;
        self.snr = snr;
        self
    }
}
