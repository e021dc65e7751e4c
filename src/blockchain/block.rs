use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::DIGEST_HEX_LEN;

/// Prefix marker carried by stored hashes and conventional account ids
pub const HEX_PREFIX: &str = "0x";

/// Errors raised when a block record does not match the required schema
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("Field `{0}` must not be empty")]
    EmptyField(&'static str),

    #[error("Field `{field}` is not a 0x-prefixed 64 digit lowercase hex digest: {value:?}")]
    InvalidHash { field: &'static str, value: String },

    #[error("Field `{field}` holds {value:?}, which must be written as {canonical:?}")]
    NonCanonicalId {
        field: &'static str,
        value: String,
        canonical: String,
    },
}

/// Strips a leading `0x` marker if present
pub fn strip_hex_prefix(value: &str) -> &str {
    value.strip_prefix(HEX_PREFIX).unwrap_or(value)
}

/// Checks that `value` is `0x` followed by exactly 64 lowercase hex digits
pub fn is_prefixed_digest(value: &str) -> bool {
    match value.strip_prefix(HEX_PREFIX) {
        Some(digits) => {
            digits.len() == DIGEST_HEX_LEN && is_lower_hex(digits)
        }
        None => false,
    }
}

fn is_lower_hex(digits: &str) -> bool {
    !digits.is_empty() && digits.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// The single spelling of an identifier among those that encode identically
///
/// Encoding strips one `0x` marker, so `B` and `0xB` hash the same. Ids whose
/// remainder is lowercase hex (or itself starts with `0x`) keep the marker,
/// every other id is written without it.
pub fn canonical_id(value: &str) -> String {
    let digits = strip_hex_prefix(value);
    if is_lower_hex(digits) || digits.starts_with(HEX_PREFIX) {
        format!("{}{}", HEX_PREFIX, digits)
    } else {
        digits.to_string()
    }
}

fn check_hash(field: &'static str, value: &str) -> Result<(), BlockError> {
    if is_prefixed_digest(value) {
        Ok(())
    } else {
        Err(BlockError::InvalidHash {
            field,
            value: value.to_string(),
        })
    }
}

fn check_identifier(field: &'static str, value: &str) -> Result<(), BlockError> {
    if strip_hex_prefix(value).is_empty() {
        return Err(BlockError::EmptyField(field));
    }

    let canonical = canonical_id(value);
    if canonical != value {
        return Err(BlockError::NonCanonicalId {
            field,
            value: value.to_string(),
            canonical,
        });
    }
    Ok(())
}

/// The hashed content of a block, everything except the proof of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BlockFields {
    /// Position of the block in the chain, 0 for genesis
    pub id: u64,

    /// Hash of the block with id `id - 1`, or the genesis sentinel
    pub previous_hash: String,

    /// Account debited by `amount`
    pub from_id: String,

    /// Account credited with `amount`
    pub to_id: String,

    /// Transferred PisitiCoins
    pub amount: u64,

    /// Account credited with `miner_reward`
    pub miner_id: String,

    /// Reward paid for mining the block
    pub miner_reward: u64,
}

impl BlockFields {
    /// Creates the content of a new block, rejecting malformed fields
    pub fn new(
        id: u64,
        previous_hash: impl Into<String>,
        from_id: impl Into<String>,
        to_id: impl Into<String>,
        amount: u64,
        miner_id: impl Into<String>,
        miner_reward: u64,
    ) -> Result<Self, BlockError> {
        let fields = BlockFields {
            id,
            previous_hash: previous_hash.into(),
            from_id: from_id.into(),
            to_id: to_id.into(),
            amount,
            miner_id: miner_id.into(),
            miner_reward,
        };
        fields.validate()?;
        Ok(fields)
    }

    /// Checks the schema of every field
    pub fn validate(&self) -> Result<(), BlockError> {
        check_hash("previous_hash", &self.previous_hash)?;
        check_identifier("from_id", &self.from_id)?;
        check_identifier("to_id", &self.to_id)?;
        check_identifier("miner_id", &self.miner_id)?;
        Ok(())
    }

    /// Rewrites every identifier in its canonical spelling
    ///
    /// The encoded message, and so the digest, is unchanged.
    pub fn canonicalize_ids(&mut self) {
        for id in [&mut self.from_id, &mut self.to_id, &mut self.miner_id] {
            if !strip_hex_prefix(id).is_empty() {
                *id = canonical_id(id);
            }
        }
    }

    /// Whether `account_id` takes part in this block in any role
    pub fn touches(&self, account_id: &str) -> bool {
        self.from_id == account_id || self.to_id == account_id || self.miner_id == account_id
    }
}

/// Represents a mined block in the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Position of the block in the chain, 0 for genesis
    pub id: u64,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Sender account
    pub from_id: String,

    /// Recipient account
    pub to_id: String,

    /// Transferred PisitiCoins
    pub amount: u64,

    /// Miner account
    pub miner_id: String,

    /// Reward credited to the miner
    pub miner_reward: u64,

    /// Proof of work
    pub nonce: u64,

    /// Hash of this block, `0x` followed by 64 hex digits
    pub hash: String,
}

impl Block {
    /// Assembles a block from its content and a proof of work
    ///
    /// # Arguments
    ///
    /// * `fields` - The hashed content of the block
    /// * `nonce` - The nonce found by the miner
    /// * `digest` - The 64 digit hex digest, without prefix
    pub fn from_mined(fields: BlockFields, nonce: u64, digest: &str) -> Self {
        let BlockFields {
            id,
            previous_hash,
            from_id,
            to_id,
            amount,
            miner_id,
            miner_reward,
        } = fields;

        Block {
            id,
            previous_hash,
            from_id,
            to_id,
            amount,
            miner_id,
            miner_reward,
            nonce,
            hash: format!("{}{}", HEX_PREFIX, digest),
        }
    }

    /// Returns a copy of the hashed content
    pub fn fields(&self) -> BlockFields {
        BlockFields {
            id: self.id,
            previous_hash: self.previous_hash.clone(),
            from_id: self.from_id.clone(),
            to_id: self.to_id.clone(),
            amount: self.amount,
            miner_id: self.miner_id.clone(),
            miner_reward: self.miner_reward,
        }
    }

    /// The stored digest without its prefix marker
    pub fn digest(&self) -> &str {
        strip_hex_prefix(&self.hash)
    }

    /// Checks the schema of every field, including the stored hash
    pub fn validate(&self) -> Result<(), BlockError> {
        self.fields().validate()?;
        check_hash("hash", &self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentinel() -> String {
        format!("0x{}", "0".repeat(64))
    }

    #[test]
    fn test_new_fields() {
        let fields = BlockFields::new(1, sentinel(), "A", "B", 50, "M", 10_000).unwrap();

        assert_eq!(fields.id, 1);
        assert_eq!(fields.amount, 50);
        assert!(fields.touches("A"));
        assert!(fields.touches("M"));
        assert!(!fields.touches("C"));
    }

    #[test]
    fn test_rejects_malformed_previous_hash() {
        let err = BlockFields::new(1, "0x1234", "A", "B", 50, "M", 10_000).unwrap_err();
        assert!(matches!(err, BlockError::InvalidHash { field: "previous_hash", .. }));

        let upper = format!("0x{}", "A".repeat(64));
        assert!(BlockFields::new(1, upper, "A", "B", 50, "M", 10_000).is_err());

        let unprefixed = "0".repeat(64);
        assert!(BlockFields::new(1, unprefixed, "A", "B", 50, "M", 10_000).is_err());
    }

    #[test]
    fn test_rejects_empty_identifiers() {
        assert_eq!(
            BlockFields::new(1, sentinel(), "", "B", 50, "M", 10_000).unwrap_err(),
            BlockError::EmptyField("from_id")
        );
        assert_eq!(
            BlockFields::new(1, sentinel(), "A", "0x", 50, "M", 10_000).unwrap_err(),
            BlockError::EmptyField("to_id")
        );
    }

    #[test]
    fn test_canonical_id() {
        assert_eq!(canonical_id("B"), "B");
        assert_eq!(canonical_id("0xB"), "B");
        assert_eq!(canonical_id("nobody"), "nobody");
        assert_eq!(canonical_id("0x0"), "0x0");
        assert_eq!(canonical_id("0"), "0x0");
        assert_eq!(canonical_id("cafe"), "0xcafe");
        assert_eq!(canonical_id("0x0x5"), "0x0x5");
    }

    #[test]
    fn test_rejects_aliased_identifiers() {
        assert_eq!(
            BlockFields::new(1, sentinel(), "A", "0xB", 50, "M", 10_000).unwrap_err(),
            BlockError::NonCanonicalId {
                field: "to_id",
                value: "0xB".to_string(),
                canonical: "B".to_string()
            }
        );
        assert!(BlockFields::new(0, sentinel(), "0", "A", 100, "M", 10_000).is_err());
        assert!(BlockFields::new(1, sentinel(), "A", "B", 50, "0xM", 10_000).is_err());
    }

    #[test]
    fn test_canonicalize_keeps_digest() {
        let fields = BlockFields::new(1, sentinel(), "A", "B", 50, "M", 10_000).unwrap();
        let mut aliased = fields.clone();
        aliased.from_id = "0xA".to_string();
        aliased.to_id = "0xB".to_string();
        aliased.miner_id = "0xM".to_string();
        assert_eq!(
            crate::blockchain::encoding::encode(&aliased, 3),
            crate::blockchain::encoding::encode(&fields, 3)
        );

        aliased.canonicalize_ids();
        assert_eq!(aliased, fields);
    }

    #[test]
    fn test_from_mined_round_trips_fields() {
        let fields = BlockFields::new(3, sentinel(), "0x0", "A", 100, "M", 10_000).unwrap();
        let digest = "00".repeat(32);
        let block = Block::from_mined(fields.clone(), 7, &digest);

        assert_eq!(block.fields(), fields);
        assert_eq!(block.nonce, 7);
        assert_eq!(block.hash, format!("0x{}", digest));
        assert_eq!(block.digest(), digest);
        assert!(block.validate().is_ok());
    }

    #[test]
    fn test_strip_hex_prefix() {
        assert_eq!(strip_hex_prefix("0xabc"), "abc");
        assert_eq!(strip_hex_prefix("abc"), "abc");
        assert_eq!(strip_hex_prefix("0x0"), "0");
    }
}
