use mecp_core::message::{byte_length, decode, encode, Severity, MAX_MESSAGE_BYTES};
use proptest::prelude::*;

fn severity() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Mayday),
        Just(Severity::Urgent),
        Just(Severity::Safety),
        Just(Severity::Routine),
    ]
}

proptest! {
    #[test]
    fn encoded_codes_decode_back(
        sev in severity(),
        codes in prop::collection::vec("[A-Z][0-9]{2}", 0..6),
        note in proptest::option::of("[a-z ]{0,40}"),
    ) {
        let encoded = encode(sev, &codes, note.as_deref());
        let parsed = decode(&encoded.message);

        prop_assert!(parsed.valid);
        prop_assert_eq!(parsed.severity, Some(sev));
        prop_assert_eq!(parsed.codes, codes);
        prop_assert_eq!(encoded.byte_length, byte_length(&encoded.message));
        prop_assert_eq!(encoded.over_limit, encoded.byte_length > MAX_MESSAGE_BYTES);
    }

    #[test]
    fn decode_never_panics(input in "\\PC{0,80}") {
        let parsed = decode(&input);
        prop_assert_eq!(parsed.valid, parsed.severity.is_some());
        prop_assert_eq!(parsed.raw, input);
    }

    #[test]
    fn drill_flag_follows_codes(codes in prop::collection::vec("D0[0-9]", 1..4)) {
        let parsed = decode(&encode(Severity::Routine, &codes, None).message);
        let expected = codes.iter().any(|c| c == "D01" || c == "D02");
        prop_assert_eq!(parsed.is_drill, expected);
    }
}
