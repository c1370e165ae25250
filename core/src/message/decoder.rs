// Decoder: wire string to ParsedMessage
//
// Decoding never fails. Malformed input yields warnings and, when no
// severity can be read, `valid == false`.

use std::sync::LazyLock;

use regex::Regex;

use super::types::{
    is_code, Category, Extracted, GpsFix, ParsedMessage, Severity, BEACON_ACK_CODE,
    BEACON_CANCEL_CODE, BEACON_CODE, MECP_PREFIX,
};

const DRILL_CODES: [&str; 2] = ["D01", "D02"];

/// Response code whose freetext starts with an ETA in minutes
const ETA_CODE: &str = "R03";

static COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+)pax").expect("count pattern"));
static GPS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(-?[0-9]+\.[0-9]+),(-?[0-9]+\.[0-9]+)").expect("gps pattern")
});
static ETA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+)(?:\s|$)").expect("eta pattern"));
static REFERENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#([A-Za-z0-9]{1,4})").expect("reference pattern"));
static LANGUAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([a-z]{2})(?:\s|$)").expect("language pattern"));
static TIMESTAMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([0-9]{4})(?:\s|$)").expect("timestamp pattern"));
static CALLSIGN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"~([A-Za-z0-9]{1,9})(?:\s|$)").expect("callsign pattern"));

pub fn is_mecp(input: &str) -> bool {
    input.starts_with(MECP_PREFIX)
}

/// Category of a code, from its first letter
pub fn category_of(code: &str) -> Option<Category> {
    code.chars().next().and_then(Category::from_letter)
}

pub fn is_beacon<S: AsRef<str>>(codes: &[S]) -> bool {
    codes.iter().any(|c| c.as_ref() == BEACON_CODE)
}

pub fn is_beacon_ack<S: AsRef<str>>(codes: &[S]) -> bool {
    codes.iter().any(|c| c.as_ref() == BEACON_ACK_CODE)
}

pub fn is_beacon_cancel<S: AsRef<str>>(codes: &[S]) -> bool {
    codes.iter().any(|c| c.as_ref() == BEACON_CANCEL_CODE)
}

pub fn decode(input: &str) -> ParsedMessage {
    let mut result = ParsedMessage::unparsed(input);

    let Some(after_prefix) = input.strip_prefix(MECP_PREFIX) else {
        return result;
    };

    let mut chars = after_prefix.chars();
    let severity_char = chars.next();
    result.severity = severity_char.and_then(Severity::from_char);
    if result.severity.is_none() {
        result.warnings.push(format!(
            "Invalid severity: \"{}\"",
            severity_char.map(String::from).unwrap_or_default()
        ));
    }

    // Lenient: a missing delimiter is reported and the character skipped
    if chars.next() != Some('/') {
        result
            .warnings
            .push("Missing \"/\" delimiter after severity".to_string());
    }

    let body = chars.as_str();
    if body.trim().is_empty() {
        result.valid = result.severity.is_some();
        if result.valid {
            result.warnings.push("No codes present".to_string());
        }
        return result;
    }

    let mut tokens = body.split(' ').filter(|t| !t.is_empty()).peekable();
    while let Some(code) = tokens.next_if(|t| is_code(t)) {
        result.codes.push(code.to_string());
    }

    let rest: Vec<&str> = tokens.collect();
    if !rest.is_empty() {
        let freetext = rest.join(" ");
        result.extracted = extract(&freetext, &result.codes);
        result.freetext = Some(freetext);
    }

    result.is_drill = result
        .codes
        .iter()
        .any(|c| DRILL_CODES.contains(&c.as_str()));
    result.valid = result.severity.is_some();
    result
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn extract(freetext: &str, codes: &[String]) -> Extracted {
    let count = first_capture(&COUNT_RE, freetext).and_then(|n| n.parse().ok());

    let gps = GPS_RE.captures(freetext).and_then(|caps| {
        let lat = caps.get(1)?.as_str().parse().ok()?;
        let lon = caps.get(2)?.as_str().parse().ok()?;
        Some(GpsFix::new(lat, lon)).filter(GpsFix::in_range)
    });

    let eta = if codes.iter().any(|c| c == ETA_CODE) {
        first_capture(&ETA_RE, freetext).and_then(|n| n.parse().ok())
    } else {
        None
    };

    let timestamp = first_capture(&TIMESTAMP_RE, freetext).filter(|hhmm| {
        let hours: u32 = hhmm[..2].parse().unwrap_or(u32::MAX);
        let minutes: u32 = hhmm[2..].parse().unwrap_or(u32::MAX);
        hours <= 23 && minutes <= 59
    });

    Extracted {
        count,
        gps,
        eta,
        reference: first_capture(&REFERENCE_RE, freetext),
        language: first_capture(&LANGUAGE_RE, freetext),
        timestamp,
        callsign: first_capture(&CALLSIGN_RE, freetext),
    }
}
