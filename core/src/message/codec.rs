// Message codec: encoding and validation with the on-air size limit
//
// Oversized messages are flagged, never truncated. Callers decide whether
// to block sending.

use super::types::{
    is_code, EncodeResult, Severity, ValidationResult, MAX_MESSAGE_BYTES, MECP_PREFIX,
};

/// Exact UTF-8 size of a string, which is what the radio transmits
pub fn byte_length(s: &str) -> usize {
    s.len()
}

fn size_warning(bytes: usize) -> String {
    format!(
        "Message is {} bytes, exceeds {} byte limit",
        bytes, MAX_MESSAGE_BYTES
    )
}

/// Build a wire string from structured fields.
///
/// Always produces a message. An out-of-range severity or a malformed code
/// adds a warning instead of failing.
pub fn encode<S: AsRef<str>>(
    severity: impl Into<u8>,
    codes: &[S],
    freetext: Option<&str>,
) -> EncodeResult {
    let severity = severity.into();
    let mut warnings = Vec::new();

    if Severity::try_from(severity).is_err() {
        warnings.push(format!("Invalid severity: {}", severity));
    }

    for code in codes {
        let code = code.as_ref();
        if !is_code(code) {
            warnings.push(format!("Invalid code format: \"{}\"", code));
        }
    }

    let joined = codes.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" ");
    let mut message = format!("{}{}/{}", MECP_PREFIX, severity, joined);

    if let Some(text) = freetext.map(str::trim).filter(|t| !t.is_empty()) {
        message.push(' ');
        message.push_str(text);
    }

    let message = message.trim_end().to_string();
    let bytes = byte_length(&message);
    let over_limit = bytes > MAX_MESSAGE_BYTES;
    if over_limit {
        warnings.push(size_warning(bytes));
    }

    EncodeResult {
        message,
        byte_length: bytes,
        over_limit,
        warnings,
    }
}

/// Check a wire string before sending or after receipt.
///
/// A missing prefix stops validation immediately. Everything else is
/// collected so the UI can show all problems at once.
pub fn validate(input: &str) -> ValidationResult {
    let mut result = ValidationResult::default();

    let Some(after_prefix) = input.strip_prefix(MECP_PREFIX) else {
        result
            .errors
            .push(format!("Message does not start with \"{}\"", MECP_PREFIX));
        return result;
    };

    let mut chars = after_prefix.chars();
    let severity_char = chars.next();
    if severity_char.and_then(Severity::from_char).is_none() {
        result.errors.push(format!(
            "Invalid severity: \"{}\" (must be 0-3)",
            severity_char.map(String::from).unwrap_or_default()
        ));
    }

    if chars.next() != Some('/') {
        result
            .errors
            .push("Missing \"/\" delimiter after severity".to_string());
    }

    if chars.as_str().trim().is_empty() {
        result
            .warnings
            .push("No codes present after severity".to_string());
    }

    let bytes = byte_length(input);
    if bytes > MAX_MESSAGE_BYTES {
        result.warnings.push(size_warning(bytes));
    }

    result.valid = result.errors.is_empty();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_basic() {
        let result = encode(Severity::Mayday, &["M01", "M07"], Some("2pax"));
        assert_eq!(result.message, "MECP/0/M01 M07 2pax");
        assert_eq!(result.byte_length, 19);
        assert!(!result.over_limit);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_encode_trims_freetext() {
        let result = encode(Severity::Routine, &["L01"], Some("   "));
        assert_eq!(result.message, "MECP/3/L01");

        let result = encode(Severity::Routine, &["L01"], Some("  camp ok  "));
        assert_eq!(result.message, "MECP/3/L01 camp ok");
    }

    #[test]
    fn test_encode_no_codes() {
        let codes: [&str; 0] = [];
        let result = encode(Severity::Safety, &codes, None);
        assert_eq!(result.message, "MECP/2/");
    }

    #[test]
    fn test_encode_warns_but_still_builds() {
        let result = encode(7u8, &["M1", "T03"], None);
        assert_eq!(result.message, "MECP/7/M1 T03");
        assert_eq!(
            result.warnings,
            vec![
                "Invalid severity: 7".to_string(),
                "Invalid code format: \"M1\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_encode_over_limit() {
        let text = "A".repeat(190);
        let result = encode(Severity::Mayday, &["M01"], Some(&text));
        assert_eq!(result.byte_length, 201);
        assert!(result.over_limit);
        assert!(result
            .warnings
            .contains(&"Message is 201 bytes, exceeds 200 byte limit".to_string()));
    }

    #[test]
    fn test_exactly_at_limit() {
        let text = "A".repeat(189);
        let result = encode(Severity::Mayday, &["M01"], Some(&text));
        assert_eq!(result.byte_length, 200);
        assert!(!result.over_limit);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_byte_length_utf8() {
        assert_eq!(byte_length(""), 0);
        assert_eq!(byte_length("A"), 1);
        assert_eq!(byte_length("ä"), 2);
        assert_eq!(byte_length("日"), 3);
        assert_eq!(byte_length("🆘"), 4);
        assert_eq!(byte_length("Žilina"), 7);
    }

    #[test]
    fn test_validate_ok() {
        let result = validate("MECP/1/M01 2pax");
        assert!(result.valid);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_validate_missing_prefix_stops() {
        let result = validate("mecp/0/M01");
        assert!(!result.valid);
        assert_eq!(result.errors, vec!["Message does not start with \"MECP/\""]);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_validate_collects_errors() {
        let result = validate("MECP/9M01");
        assert!(!result.valid);
        assert_eq!(
            result.errors,
            vec![
                "Invalid severity: \"9\" (must be 0-3)",
                "Missing \"/\" delimiter after severity",
            ]
        );
    }

    #[test]
    fn test_missing_delimiter_rejected_but_decodable() {
        let result = validate("MECP/0M01");
        assert!(!result.valid);
        assert_eq!(result.errors, vec!["Missing \"/\" delimiter after severity"]);
        assert!(crate::message::decode("MECP/0M01").valid);
    }

    #[test]
    fn test_validate_empty_body_is_warning() {
        let result = validate("MECP/0/");
        assert!(result.valid);
        assert_eq!(result.warnings, vec!["No codes present after severity"]);
    }

    #[test]
    fn test_validate_truncated() {
        let result = validate("MECP/");
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_validate_oversized_is_warning() {
        let input = format!("MECP/0/M01 {}", "A".repeat(190));
        let result = validate(&input);
        assert!(result.valid);
        assert_eq!(
            result.warnings,
            vec!["Message is 201 bytes, exceeds 200 byte limit"]
        );
    }
}
