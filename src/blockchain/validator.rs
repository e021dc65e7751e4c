use log::{debug, warn};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::block::{Block, HEX_PREFIX};
use super::encoding::block_digest;
use super::storage::{BlockStore, StorageError};

/// Range of blocks audited by a check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// Every block from genesis
    All,
    /// The newest `n` blocks
    Latest(usize),
}

/// What is wrong with a broken block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BreakKind {
    /// `previous_hash` differs from the hash of the preceding block
    Link,
    /// The stored hash differs from the recomputed digest
    Digest,
    /// A field is not in its canonical form, such as an aliased account id
    Malformed,
}

/// First inconsistency found in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChainBreak {
    pub block_id: u64,
    pub kind: BreakKind,
}

/// Checks a single block against its predecessor's hash
///
/// `previous_hash` is `None` for the genesis block, whose link is not checked.
pub fn verify_block(block: &Block, previous_hash: Option<&str>) -> Option<BreakKind> {
    if let Some(expected) = previous_hash {
        if block.previous_hash != expected {
            return Some(BreakKind::Link);
        }
    }

    let fields = block.fields();
    if fields.validate().is_err() {
        return Some(BreakKind::Malformed);
    }

    let digest = block_digest(&fields, block.nonce);
    if !block.hash.starts_with(HEX_PREFIX) || block.digest() != digest {
        return Some(BreakKind::Digest);
    }

    None
}

/// Audits the chain held by a store
///
/// Blocks are fetched, checked and dropped one at a time, so a check never
/// holds more than two blocks in memory.
pub struct ChainValidator<'a> {
    store: &'a dyn BlockStore,
}

impl<'a> ChainValidator<'a> {
    pub fn new(store: &'a dyn BlockStore) -> Self {
        ChainValidator { store }
    }

    /// Returns the first broken block in `window`, if any
    pub fn check(&self, window: Window) -> Result<Option<ChainBreak>, StorageError> {
        let ids = self.store.list_block_ids()?;
        let start = match window {
            Window::All => 0,
            Window::Latest(0) => return Ok(None),
            Window::Latest(count) => ids.len().saturating_sub(count),
        };

        let mut previous_hash = match start {
            0 => None,
            _ => Some(self.store.get_block(ids[start - 1])?.hash),
        };

        for &id in &ids[start..] {
            let block = self.store.get_block(id)?;

            if let Some(kind) = verify_block(&block, previous_hash.as_deref()) {
                warn!("Block {} is broken ({:?})", block.id, kind);
                return Ok(Some(ChainBreak {
                    block_id: block.id,
                    kind,
                }));
            }

            previous_hash = Some(block.hash);
        }

        debug!("Checked {} blocks, chain is consistent", ids.len() - start);
        Ok(None)
    }
}
