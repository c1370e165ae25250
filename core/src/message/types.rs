// Core MECP message types

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Soft cap for one message on air, in UTF-8 bytes
pub const MAX_MESSAGE_BYTES: usize = 200;

pub const MECP_PREFIX: &str = "MECP/";

pub const BEACON_CODE: &str = "B01";
pub const BEACON_ACK_CODE: &str = "B02";
pub const BEACON_CANCEL_CODE: &str = "B03";

/// Message severity. Lower value is higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Severity {
    Mayday = 0,
    Urgent = 1,
    Safety = 2,
    Routine = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid severity: {0}")]
pub struct InvalidSeverity(pub u8);

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Mayday,
        Severity::Urgent,
        Severity::Safety,
        Severity::Routine,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse the single severity digit of a wire message
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Severity::Mayday),
            '1' => Some(Severity::Urgent),
            '2' => Some(Severity::Safety),
            '3' => Some(Severity::Routine),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::Mayday => "MAYDAY",
            Severity::Urgent => "URGENT",
            Severity::Safety => "SAFETY",
            Severity::Routine => "ROUTINE",
        }
    }
}

impl From<Severity> for u8 {
    fn from(severity: Severity) -> Self {
        severity.as_u8()
    }
}

impl TryFrom<u8> for Severity {
    type Error = InvalidSeverity;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Severity::ALL
            .get(value as usize)
            .copied()
            .ok_or(InvalidSeverity(value))
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Code category, taken from the first letter of a code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Medical,
    Terrain,
    Weather,
    Supplies,
    Position,
    Coordination,
    Response,
    Drill,
    Leisure,
    Threat,
    Resources,
    Beacon,
}

impl Category {
    pub const ALL: [Category; 12] = [
        Category::Medical,
        Category::Terrain,
        Category::Weather,
        Category::Supplies,
        Category::Position,
        Category::Coordination,
        Category::Response,
        Category::Drill,
        Category::Leisure,
        Category::Threat,
        Category::Resources,
        Category::Beacon,
    ];

    pub fn from_letter(letter: char) -> Option<Self> {
        Category::ALL.into_iter().find(|c| c.letter() == letter)
    }

    pub fn letter(self) -> char {
        match self {
            Category::Medical => 'M',
            Category::Terrain => 'T',
            Category::Weather => 'W',
            Category::Supplies => 'S',
            Category::Position => 'P',
            Category::Coordination => 'C',
            Category::Response => 'R',
            Category::Drill => 'D',
            Category::Leisure => 'L',
            Category::Threat => 'X',
            Category::Resources => 'H',
            Category::Beacon => 'B',
        }
    }

    /// Display order in code pickers
    pub fn order(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::Medical => "medical",
            Category::Terrain => "terrain",
            Category::Weather => "weather",
            Category::Supplies => "supplies",
            Category::Position => "position",
            Category::Coordination => "coordination",
            Category::Response => "response",
            Category::Drill => "drill",
            Category::Leisure => "leisure",
            Category::Threat => "threat",
            Category::Resources => "resources",
            Category::Beacon => "beacon",
        }
    }
}

/// True for a three character code token: `[A-Z][0-9][0-9]`
pub fn is_code(token: &str) -> bool {
    let b = token.as_bytes();
    b.len() == 3 && b[0].is_ascii_uppercase() && b[1].is_ascii_digit() && b[2].is_ascii_digit()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
}

impl GpsFix {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn in_range(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Structured hints pulled out of freetext
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extracted {
    pub count: Option<u32>,
    pub gps: Option<GpsFix>,
    /// Minutes, only read when the message carries R03
    pub eta: Option<u32>,
    pub reference: Option<String>,
    pub language: Option<String>,
    /// `HHMM`, 24h clock
    pub timestamp: Option<String>,
    pub callsign: Option<String>,
}

impl Extracted {
    pub fn is_empty(&self) -> bool {
        *self == Extracted::default()
    }
}

/// Result of decoding a wire string. `valid` mirrors whether a severity was read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub valid: bool,
    pub severity: Option<Severity>,
    pub codes: Vec<String>,
    pub is_drill: bool,
    pub freetext: Option<String>,
    pub extracted: Extracted,
    pub warnings: Vec<String>,
    pub raw: String,
}

impl ParsedMessage {
    pub(crate) fn unparsed(raw: &str) -> Self {
        Self {
            valid: false,
            severity: None,
            codes: Vec::new(),
            is_drill: false,
            freetext: None,
            extracted: Extracted::default(),
            warnings: Vec::new(),
            raw: raw.to_string(),
        }
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c == code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeResult {
    pub message: String,
    pub byte_length: usize,
    pub over_limit: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}
