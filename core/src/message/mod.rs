// Message module: MECP wire format codec
//
// A message is `MECP/<severity>/<codes> <freetext>`, capped at 200 bytes so it
// fits a single LoRa frame after transport overhead.

pub mod codec;
pub mod compose;
pub mod decoder;
pub mod types;

pub use codec::{byte_length, encode, validate};
pub use compose::{
    beacon_ack_message, beacon_cancel_message, beacon_message, compose, format_hhmm,
    ComposeOptions,
};
pub use decoder::{category_of, decode, is_beacon, is_beacon_ack, is_beacon_cancel, is_mecp};
pub use types::{
    is_code, Category, EncodeResult, Extracted, GpsFix, InvalidSeverity, ParsedMessage,
    Severity, ValidationResult, BEACON_ACK_CODE, BEACON_CANCEL_CODE, BEACON_CODE,
    MAX_MESSAGE_BYTES, MECP_PREFIX,
};
