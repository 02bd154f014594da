//! Queue line codec.
//!
//! A queue line is `base64(json(record))`: printable ASCII only, no
//! newlines, reversible byte-for-byte with any base64 decoder.
//!
//! Decoding only accepts canonical, padded base64, so for any line `x` that
//! decodes, `encode(decode(x)) == x`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::errors::DecodeError;
use crate::record::EventRecord;

/// Encode raw bytes into a single line-safe string.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a line produced by [`encode`].
pub fn decode(line: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(STANDARD.decode(line)?)
}

/// Serialize and encode a record into one queue line (without the trailing newline).
pub fn encode_record(record: &EventRecord) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(record)?;
    Ok(encode(&json))
}

/// Decode, parse and validate one queue line.
///
/// Surrounding whitespace (such as a stray `\r`) is ignored.
pub fn decode_record(line: &str) -> Result<EventRecord, DecodeError> {
    let bytes = decode(line.trim())?;
    let text = String::from_utf8(bytes)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    EventRecord::from_value(value)
}

/// Decode one raw queue line as read from disk.
///
/// Bytes that are not UTF-8 are a per-line [`DecodeError::Line`].
pub fn decode_line(line: &[u8]) -> Result<EventRecord, DecodeError> {
    decode_record(std::str::from_utf8(line)?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
