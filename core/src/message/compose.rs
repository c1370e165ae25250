// Compose helpers: freetext auto-tags and beacon protocol messages

use super::codec::encode;
use super::types::{
    EncodeResult, GpsFix, Severity, BEACON_ACK_CODE, BEACON_CANCEL_CODE, BEACON_CODE,
};

/// Inputs for the auto-tagged part of a composed message
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeOptions {
    pub pax_count: u32,
    pub position: Option<GpsFix>,
    /// Epoch milliseconds, rendered as `@HHMM` UTC
    pub timestamp: Option<u64>,
    pub language: String,
    pub note: Option<String>,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            pax_count: 0,
            position: None,
            timestamp: None,
            language: "en".to_string(),
            note: None,
        }
    }
}

impl ComposeOptions {
    /// Freetext in tag order: pax, position, time, language, note
    pub fn freetext(&self) -> Option<String> {
        let mut parts = Vec::new();
        if self.pax_count > 0 {
            parts.push(format!("{}pax", self.pax_count));
        }
        if let Some(pos) = self.position {
            parts.push(format_position(pos));
        }
        if let Some(at) = self.timestamp {
            parts.push(format!("@{}", format_hhmm(at)));
        }
        if !self.language.is_empty() && self.language != "en" {
            parts.push(format!("@{}", self.language));
        }
        if let Some(note) = self.note.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            parts.push(note.to_string());
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// Encode a message from codes plus auto-tags
pub fn compose<S: AsRef<str>>(
    severity: Severity,
    codes: &[S],
    options: &ComposeOptions,
) -> EncodeResult {
    encode(severity, codes, options.freetext().as_deref())
}

/// `HHMM` in UTC for an epoch-millisecond instant
pub fn format_hhmm(epoch_ms: u64) -> String {
    let secs = epoch_ms / 1000;
    let hours = (secs / 3600) % 24;
    let minutes = (secs / 60) % 60;
    format!("{:02}{:02}", hours, minutes)
}

fn format_position(pos: GpsFix) -> String {
    format!("{:.5},{:.5}", pos.lat, pos.lon)
}

/// Periodic beacon transmission: session codes with B01 first, then position and time
pub fn beacon_message<S: AsRef<str>>(
    severity: Severity,
    codes: &[S],
    position: GpsFix,
    at_ms: u64,
) -> EncodeResult {
    let mut beacon_codes: Vec<&str> = codes.iter().map(AsRef::as_ref).collect();
    if !beacon_codes.contains(&BEACON_CODE) {
        beacon_codes.insert(0, BEACON_CODE);
    }
    let freetext = format!("{} @{}", format_position(position), format_hhmm(at_ms));
    encode(severity, &beacon_codes, Some(&freetext))
}

/// Reply telling a beacon sender their signal was received
pub fn beacon_ack_message() -> EncodeResult {
    encode(Severity::Safety, &[BEACON_ACK_CODE, "R01"], None)
}

pub fn beacon_cancel_message() -> EncodeResult {
    encode(Severity::Safety, &[BEACON_CANCEL_CODE], None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::decode;

    // 2024-03-01T14:30:00Z
    const AFTERNOON: u64 = 1_709_303_400_000;

    #[test]
    fn test_format_hhmm() {
        assert_eq!(format_hhmm(0), "0000");
        assert_eq!(format_hhmm(AFTERNOON), "1430");
        assert_eq!(format_hhmm(AFTERNOON + 9 * 60_000), "1439");
    }

    #[test]
    fn test_compose_tag_order() {
        let options = ComposeOptions {
            pax_count: 3,
            position: Some(GpsFix::new(48.652, 20.1305)),
            timestamp: Some(AFTERNOON),
            language: "sk".to_string(),
            note: Some("  near hut ".to_string()),
        };
        assert_eq!(
            options.freetext().as_deref(),
            Some("3pax 48.65200,20.13050 @1430 @sk near hut")
        );

        let result = compose(Severity::Mayday, &["M01"], &options);
        let parsed = decode(&result.message);
        assert_eq!(parsed.extracted.count, Some(3));
        assert_eq!(parsed.extracted.language.as_deref(), Some("sk"));
        assert_eq!(parsed.extracted.timestamp.as_deref(), Some("1430"));
    }

    #[test]
    fn test_compose_defaults_add_nothing() {
        let options = ComposeOptions::default();
        assert_eq!(options.freetext(), None);
        assert_eq!(
            compose(Severity::Routine, &["L01"], &options).message,
            "MECP/3/L01"
        );
    }

    #[test]
    fn test_beacon_message_prepends_b01() {
        let result = beacon_message(
            Severity::Mayday,
            &["M01", "T01"],
            GpsFix::new(48.652, 20.1305),
            AFTERNOON,
        );
        assert_eq!(
            result.message,
            "MECP/0/B01 M01 T01 48.65200,20.13050 @1430"
        );

        let result = beacon_message(
            Severity::Mayday,
            &["M01", "B01"],
            GpsFix::new(1.0, 2.0),
            AFTERNOON,
        );
        assert_eq!(result.message, "MECP/0/M01 B01 1.00000,2.00000 @1430");
    }

    #[test]
    fn test_ack_and_cancel_messages() {
        assert_eq!(beacon_ack_message().message, "MECP/2/B02 R01");
        assert_eq!(beacon_cancel_message().message, "MECP/2/B03");
    }
}
