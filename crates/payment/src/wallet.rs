//! Wallet abstraction and the payment demand carried by a 402 reply.

use async_trait::async_trait;
use serde::Deserialize;
use typewire_core::PaymentError;

/// Smallest-unit conversion factor for demand amounts.
pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// A payment-capable credential.
///
/// Implementations submit a transfer and later wait for it to land; the
/// client keeps the two steps separate so progress can be reported between
/// them.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Public address funds are sent from.
    fn address(&self) -> String;

    /// Submit a transfer of `lamports` to `recipient`, returning its signature.
    async fn transfer(&self, recipient: &str, lamports: u64) -> Result<String, PaymentError>;

    /// Wait until the transfer identified by `signature` is confirmed.
    async fn confirm(&self, signature: &str) -> Result<(), PaymentError>;
}

/// Body of a `402 Payment Required` reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaymentDemand {
    /// Amount in whole coin units
    pub amount: f64,
    pub recipient: String,
}

impl PaymentDemand {
    pub fn parse(body: &str) -> Result<Self, PaymentError> {
        let demand: Self = serde_json::from_str(body)
            .map_err(|e| PaymentError::InvalidDemand(format!("{e}: {body}")))?;

        if !demand.amount.is_finite() || demand.amount < 0.0 {
            return Err(PaymentError::InvalidDemand(format!(
                "amount must be a non-negative number, got {}",
                demand.amount
            )));
        }
        if demand.recipient.trim().is_empty() {
            return Err(PaymentError::InvalidDemand("recipient is empty".into()));
        }

        Ok(demand)
    }

    /// Amount converted to the smallest integer unit, rounded down.
    pub fn lamports(&self) -> u64 {
        (self.amount * LAMPORTS_PER_SOL).floor() as u64
    }
}
