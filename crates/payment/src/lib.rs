//! # typewire Payment
//!
//! Pay-per-request support for outbound HTTP. Every request sent through
//! [`PaidHttpClient`] that comes back `402 Payment Required` is settled once
//! through the configured [`Wallet`] and replayed; a second 402 is terminal.

pub mod client;
pub mod solana;
pub mod wallet;

pub use client::{PaidHttpClient, check_status, map_reqwest_error};
pub use solana::SolanaWallet;
pub use wallet::{LAMPORTS_PER_SOL, PaymentDemand, Wallet};
