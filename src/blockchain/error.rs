use thiserror::Error;

use super::account::AccountError;
use super::block::BlockError;
use super::miner::MiningError;
use super::storage::StorageError;

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Insufficient funds: required more than {required}, available {available}")]
    InsufficientFunds { required: u64, available: i64 },

    #[error("Chain inconsistency at block {block_id}")]
    ChainInconsistency { block_id: u64 },

    #[error("Balance of {account_id} overflows at block {block_id}")]
    BalanceOverflow { account_id: String, block_id: u64 },

    #[error("Lookup failure: {0}")]
    LookupFailure(String),

    #[error("Storage error: {0}")]
    StorageError(StorageError),

    #[error("Mining error: {0}")]
    MiningError(#[from] MiningError),

    #[error("System error: {0}")]
    SystemError(String),
}

impl From<StorageError> for BlockchainError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => BlockchainError::LookupFailure(what),
            other => BlockchainError::StorageError(other),
        }
    }
}

impl From<BlockError> for BlockchainError {
    fn from(err: BlockError) -> Self {
        BlockchainError::MalformedInput(err.to_string())
    }
}

impl From<AccountError> for BlockchainError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::InsufficientFunds {
                required,
                available,
            } => BlockchainError::InsufficientFunds {
                required,
                available,
            },
            other => BlockchainError::MalformedInput(other.to_string()),
        }
    }
}
