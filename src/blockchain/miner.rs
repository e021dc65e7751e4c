use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, trace};
use rayon::prelude::*;
use thiserror::Error;

use super::block::{Block, BlockFields};
use super::crypto::{Sha256, DIGEST_HEX_LEN, DIGEST_LEN};
use super::encoding::{encode_nonce, encode_prefix};
use super::ChainParams;

/// Errors that can occur while searching for a proof of work
#[derive(Debug, Error)]
pub enum MiningError {
    #[error("Mining cancelled at nonce {last_nonce}")]
    Cancelled { last_nonce: u64 },

    #[error("Difficulty {0} exceeds the 64 nibbles of a digest")]
    InvalidDifficulty(usize),

    #[error("Nonce space exhausted without meeting the difficulty")]
    Exhausted,

    #[error("Failed to build mining thread pool: {0}")]
    ThreadPool(String),
}

/// Shared flag used to abort a running search
///
/// Nothing is persisted until a nonce is found, so cancelling never leaves a
/// partial block behind.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests every search observing this token to stop
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Receives progress reports from a running search
pub trait MiningObserver: Send + Sync {
    /// Called with the highest nonce tried so far
    fn on_progress(&self, nonce: u64);
}

/// Checks that the first `difficulty` hex nibbles of a digest are zero
pub fn meets_difficulty(digest: &[u8], difficulty: usize) -> bool {
    if difficulty > digest.len() * 2 {
        return false;
    }

    let full_bytes = difficulty / 2;
    if digest[..full_bytes].iter().any(|&byte| byte != 0) {
        return false;
    }

    difficulty % 2 == 0 || digest[full_bytes] >> 4 == 0
}

/// Proof-of-work search over the nonce space
///
/// The search always returns the lowest nonce whose digest meets the
/// difficulty. With more than one thread the nonce space is scanned in
/// consecutive batches and the first hit in a batch is taken in nonce order,
/// so the parallel result is identical to the sequential one.
#[derive(Clone)]
pub struct Miner {
    difficulty: usize,
    batch: u64,
    pool: Option<Arc<rayon::ThreadPool>>,
    observer: Option<Arc<dyn MiningObserver>>,
}

impl fmt::Debug for Miner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Miner")
            .field("difficulty", &self.difficulty)
            .field("batch", &self.batch)
            .field("threads", &self.pool.as_ref().map(|pool| pool.current_num_threads()))
            .finish()
    }
}

impl Miner {
    /// Creates a miner for the difficulty and thread settings in `params`
    pub fn new(params: &ChainParams) -> Result<Self, MiningError> {
        if params.difficulty > DIGEST_HEX_LEN {
            return Err(MiningError::InvalidDifficulty(params.difficulty));
        }

        let pool = if params.mining_threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(params.mining_threads)
                .thread_name(|index| format!("miner-{}", index))
                .build()
                .map_err(|e| MiningError::ThreadPool(e.to_string()))?;
            Some(Arc::new(pool))
        } else {
            None
        };

        Ok(Miner {
            difficulty: params.difficulty,
            batch: params.mining_batch.max(1),
            pool,
            observer: None,
        })
    }

    /// Attaches a progress observer
    pub fn with_observer(mut self, observer: Arc<dyn MiningObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// Finds the lowest nonce for `fields` and returns the mined block
    pub fn mine(&self, fields: &BlockFields, cancel: &CancelToken) -> Result<Block, MiningError> {
        let mut base = Sha256::new();
        base.update(encode_prefix(fields).as_bytes());

        let (nonce, digest) = match &self.pool {
            Some(pool) => self.search_parallel(pool, &base, cancel)?,
            None => self.search_sequential(&base, cancel)?,
        };

        let digest = hex::encode(digest);
        debug!("Mined block {} with nonce {}: 0x{}", fields.id, nonce, digest);

        Ok(Block::from_mined(fields.clone(), nonce, &digest))
    }

    fn search_sequential(
        &self,
        base: &Sha256,
        cancel: &CancelToken,
    ) -> Result<(u64, [u8; DIGEST_LEN]), MiningError> {
        let mut nonce = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(MiningError::Cancelled { last_nonce: nonce });
            }

            let digest = attempt(base, nonce);
            if let Some(observer) = &self.observer {
                observer.on_progress(nonce);
            }
            if meets_difficulty(&digest, self.difficulty) {
                return Ok((nonce, digest));
            }

            nonce = nonce.checked_add(1).ok_or(MiningError::Exhausted)?;
        }
    }

    fn search_parallel(
        &self,
        pool: &rayon::ThreadPool,
        base: &Sha256,
        cancel: &CancelToken,
    ) -> Result<(u64, [u8; DIGEST_LEN]), MiningError> {
        let difficulty = self.difficulty;
        let mut start = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(MiningError::Cancelled { last_nonce: start });
            }

            let end = start.saturating_add(self.batch);
            let hit = pool.install(|| {
                (start..end)
                    .into_par_iter()
                    .map(|nonce| (nonce, attempt(base, nonce)))
                    .find_first(|(_, digest)| meets_difficulty(digest, difficulty))
            });

            trace!("Searched nonces {}..{}", start, end);
            if let Some(observer) = &self.observer {
                observer.on_progress(end - 1);
            }
            if let Some(found) = hit {
                return Ok(found);
            }
            if end == u64::MAX {
                return Err(MiningError::Exhausted);
            }
            start = end;
        }
    }
}

fn attempt(base: &Sha256, nonce: u64) -> [u8; DIGEST_LEN] {
    let mut hasher = base.clone();
    hasher.update(encode_nonce(nonce).as_bytes());
    hasher.finalize()
}
