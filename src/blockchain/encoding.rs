//! Canonical block encoding.
//!
//! The message hashed for a block is the plain concatenation, with no
//! separators, of:
//!
//! ```text
//! previous_hash | id | from_id | to_id | amount | miner_id | miner_reward | nonce
//! ```
//!
//! Hashes and identifiers lose their `0x` marker, numeric fields are rendered as
//! 64 digit zero padded lowercase hex, and the nonce is appended last as `0x`
//! followed by its lowercase hex digits. Every stored hash depends on this
//! exact layout, so it must never change.

use super::block::{strip_hex_prefix, BlockFields};
use super::crypto::{sha256_hex, DIGEST_HEX_LEN};

/// Width in hex digits of every encoded numeric field
pub const NUMERIC_WIDTH: usize = 64;

fn push_numeric(message: &mut String, value: u64) {
    message.push_str(&format!("{:0width$x}", value, width = NUMERIC_WIDTH));
}

/// Encodes everything but the nonce
///
/// The miner hashes this prefix once and reuses the state for every attempt.
pub fn encode_prefix(fields: &BlockFields) -> String {
    let mut message = String::with_capacity(DIGEST_HEX_LEN + 3 * NUMERIC_WIDTH + 3 * 42);

    message.push_str(strip_hex_prefix(&fields.previous_hash));
    push_numeric(&mut message, fields.id);
    message.push_str(strip_hex_prefix(&fields.from_id));
    message.push_str(strip_hex_prefix(&fields.to_id));
    push_numeric(&mut message, fields.amount);
    message.push_str(strip_hex_prefix(&fields.miner_id));
    push_numeric(&mut message, fields.miner_reward);

    message
}

/// Encodes the nonce suffix
pub fn encode_nonce(nonce: u64) -> String {
    format!("{:#x}", nonce)
}

/// Encodes a block and a candidate nonce into the message fed to the hash engine
pub fn encode(fields: &BlockFields, nonce: u64) -> String {
    let mut message = encode_prefix(fields);
    message.push_str(&encode_nonce(nonce));
    message
}

/// Computes the expected digest (64 hex digits, no prefix) of a block
pub fn block_digest(fields: &BlockFields, nonce: u64) -> String {
    sha256_hex(encode(fields, nonce))
}
