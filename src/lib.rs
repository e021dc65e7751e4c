//! PisitiCoin: an append-only ledger of transfers secured by a proof-of-work
//! hash chain, with tamper detection, repair and balance reconciliation.

pub mod api;
pub mod blockchain;
pub mod config;
